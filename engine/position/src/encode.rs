//! NN input-plane encoding.
//!
//! Everything downstream of this module treats the result as an opaque blob;
//! the layout only has to agree between here and whatever network weights
//! are loaded. The scheme is the usual AlphaZero-style stack: the last eight
//! half-move snapshots as piece bitboards from the side to move's point of
//! view, then a handful of scalar planes.

use crate::history::History;
use shakmaty::{CastlingSide, Color, Position, Role};

/// Snapshots of past positions included in the input.
pub const INPUT_HISTORY: usize = 8;
/// Planes per snapshot: six piece types for each side plus a repetition flag.
pub const PLANES_PER_SNAPSHOT: usize = 13;
/// Scalar planes appended after the history stack.
pub const SCALAR_PLANES: usize = 8;
/// Total planes per input.
pub const INPUT_PLANES: usize = INPUT_HISTORY * PLANES_PER_SNAPSHOT + SCALAR_PLANES;

const ROLE_ORDER: [Role; 6] = [
    Role::Pawn,
    Role::Knight,
    Role::Bishop,
    Role::Rook,
    Role::Queen,
    Role::King,
];

/// One 8x8 plane: a bitboard mask scaled by a value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub mask: u64,
    pub value: f32,
}

impl Plane {
    fn empty() -> Self {
        Plane {
            mask: 0,
            value: 1.0,
        }
    }

    fn bits(mask: u64) -> Self {
        Plane { mask, value: 1.0 }
    }

    fn filled(value: f32) -> Self {
        Plane {
            mask: u64::MAX,
            value,
        }
    }

    fn flag(set: bool) -> Self {
        Plane {
            mask: if set { u64::MAX } else { 0 },
            value: 1.0,
        }
    }
}

/// Encoded network input for one position.
#[derive(Debug, Clone)]
pub struct InputPlanes {
    pub planes: Vec<Plane>,
}

fn pov(mask: u64, flip: bool) -> u64 {
    // Vertical mirror is a byte swap on a little-endian square layout.
    if flip {
        mask.swap_bytes()
    } else {
        mask
    }
}

/// Encodes the head of `history` plus up to seven preceding snapshots.
pub fn encode_position(history: &History) -> InputPlanes {
    let mut planes = Vec::with_capacity(INPUT_PLANES);
    let head = history.last();
    let us = head.turn();
    let flip = us == Color::Black;

    let len = history.len();
    for back in 0..INPUT_HISTORY {
        if back >= len {
            for _ in 0..PLANES_PER_SNAPSHOT {
                planes.push(Plane::empty());
            }
            continue;
        }
        let idx = len - 1 - back;
        let pos = history.position_at(idx);
        let board = pos.board();
        for color in [us, us.other()] {
            for role in ROLE_ORDER {
                let mask = u64::from(board.by_color(color) & board.by_role(role));
                planes.push(Plane::bits(pov(mask, flip)));
            }
        }
        planes.push(Plane::flag(history.repetitions_at(idx) >= 1));
    }

    let castles = head.castles();
    planes.push(Plane::flag(castles.has(us, CastlingSide::KingSide)));
    planes.push(Plane::flag(castles.has(us, CastlingSide::QueenSide)));
    planes.push(Plane::flag(castles.has(us.other(), CastlingSide::KingSide)));
    planes.push(Plane::flag(castles.has(us.other(), CastlingSide::QueenSide)));
    planes.push(Plane::flag(flip));
    planes.push(Plane::filled(head.halfmoves() as f32));
    planes.push(Plane::filled(history.ply() as f32));
    planes.push(Plane::filled(1.0));

    debug_assert_eq!(planes.len(), INPUT_PLANES);
    InputPlanes { planes }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startpos_shape_and_pawns() {
        let h = History::starting();
        let input = encode_position(&h);
        assert_eq!(input.planes.len(), INPUT_PLANES);
        // Our pawns on rank 2, theirs on rank 7.
        assert_eq!(input.planes[0].mask, 0x0000_0000_0000_ff00);
        assert_eq!(input.planes[6].mask, 0x00ff_0000_0000_0000);
    }

    #[test]
    fn black_to_move_is_mirrored() {
        let mut h = History::starting();
        h.push_uci("e2e4").unwrap();
        let input = encode_position(&h);
        // "Our" pawns are black's, mirrored onto rank 2.
        assert_eq!(input.planes[0].mask, 0x0000_0000_0000_ff00);
        // Flip flag plane is set.
        assert_eq!(input.planes[INPUT_HISTORY * PLANES_PER_SNAPSHOT + 4].mask, u64::MAX);
    }

    #[test]
    fn history_snapshots_fill_backwards() {
        let mut h = History::starting();
        h.push_uci("e2e4").unwrap();
        let input = encode_position(&h);
        // Second snapshot is the starting position from black's POV: white
        // pawns sit on rank 2 and mirror onto rank 7.
        let second = &input.planes[PLANES_PER_SNAPSHOT..2 * PLANES_PER_SNAPSHOT];
        assert_eq!(second[6].mask, 0x00ff_0000_0000_0000);
        // Snapshots past the start of the game are empty.
        let last = &input.planes[7 * PLANES_PER_SNAPSHOT..8 * PLANES_PER_SNAPSHOT];
        assert!(last.iter().all(|p| p.mask == 0));
    }
}
