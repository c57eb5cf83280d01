//! Fixed policy-space projection of chess moves.
//!
//! The network's policy head is a flat vector of 1,858 logits: one slot per
//! from/to pair reachable by queen or knight geometry (1,792), plus explicit
//! slots for promotions to queen, rook and bishop (66). Promotion to knight
//! shares the bare from/to slot. Moves are always indexed from the point of
//! view of the side to move, so positions with black to move are mirrored
//! vertically before lookup.

use once_cell::sync::Lazy;
use shakmaty::{CastlingMode, File, Move, Role, Square};
use std::collections::HashMap;

/// Number of slots in the policy head.
pub const POLICY_SIZE: usize = 1858;

/// Promotion discriminant used in the lookup key. Knight promotions share
/// the bare-move slot, mirroring how the table is generated.
fn promotion_code(role: Option<Role>) -> u8 {
    match role {
        Some(Role::Queen) => 1,
        Some(Role::Rook) => 2,
        Some(Role::Bishop) => 3,
        _ => 0,
    }
}

static MOVE_INDEX: Lazy<HashMap<(u8, u8, u8), u16>> = Lazy::new(build_move_table);

fn build_move_table() -> HashMap<(u8, u8, u8), u16> {
    let mut table = HashMap::with_capacity(POLICY_SIZE);
    let mut idx: u16 = 0;

    const QUEEN_DIRS: [(i32, i32); 8] = [
        (0, 1),
        (1, 1),
        (1, 0),
        (1, -1),
        (0, -1),
        (-1, -1),
        (-1, 0),
        (-1, 1),
    ];
    const KNIGHT_JUMPS: [(i32, i32); 8] = [
        (1, 2),
        (2, 1),
        (2, -1),
        (1, -2),
        (-1, -2),
        (-2, -1),
        (-2, 1),
        (-1, 2),
    ];

    for from in 0..64u8 {
        let (file, rank) = (i32::from(from % 8), i32::from(from / 8));
        for (df, dr) in QUEEN_DIRS {
            let (mut f, mut r) = (file + df, rank + dr);
            while (0..8).contains(&f) && (0..8).contains(&r) {
                let to = (r * 8 + f) as u8;
                table.insert((from, to, 0), idx);
                idx += 1;
                f += df;
                r += dr;
            }
        }
        for (df, dr) in KNIGHT_JUMPS {
            let (f, r) = (file + df, rank + dr);
            if (0..8).contains(&f) && (0..8).contains(&r) {
                let to = (r * 8 + f) as u8;
                table.insert((from, to, 0), idx);
                idx += 1;
            }
        }
    }

    // Promotions, side-to-move POV: seventh rank to eighth, straight or
    // capturing one file sideways.
    for file in 0..8i32 {
        let from = (48 + file) as u8;
        for df in [-1, 0, 1] {
            let f = file + df;
            if !(0..8).contains(&f) {
                continue;
            }
            let to = (56 + f) as u8;
            for code in 1..=3u8 {
                table.insert((from, to, code), idx);
                idx += 1;
            }
        }
    }

    debug_assert_eq!(idx as usize, POLICY_SIZE);
    table
}

/// Squares a move travels between, normalized so castling reads as the
/// king's standard two-square step.
fn move_squares(m: &Move) -> (Square, Square) {
    match m {
        Move::Castle { king, rook } => {
            let file = if rook > king { File::G } else { File::C };
            (*king, Square::from_coords(file, king.rank()))
        }
        _ => (
            m.from().expect("drops do not occur in standard chess"),
            m.to(),
        ),
    }
}

/// Projects a move into its policy-head slot. `flip` mirrors the board
/// vertically and must be set when black is to move.
pub fn move_to_index(m: &Move, flip: bool) -> u16 {
    let (from, to) = move_squares(m);
    let mut from = u32::from(from) as u8;
    let mut to = u32::from(to) as u8;
    if flip {
        from ^= 56;
        to ^= 56;
    }
    let code = promotion_code(m.promotion());
    *MOVE_INDEX
        .get(&(from, to, code))
        .expect("legal move maps into the policy space")
}

/// Human-readable UCI form of a move. Orientation-independent: UCI squares
/// are absolute.
pub fn move_to_uci(m: &Move) -> String {
    m.to_uci(CastlingMode::Standard).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shakmaty::{Chess, Position};

    fn find_move(pos: &Chess, uci: &str) -> Move {
        pos.legal_moves()
            .iter()
            .find(|m| move_to_uci(m) == uci)
            .cloned()
            .unwrap()
    }

    #[test]
    fn table_covers_the_whole_policy_space() {
        assert_eq!(MOVE_INDEX.len(), POLICY_SIZE);
        let max = MOVE_INDEX.values().copied().max().unwrap();
        assert_eq!(max as usize, POLICY_SIZE - 1);
    }

    #[test]
    fn distinct_moves_get_distinct_slots() {
        let pos = Chess::default();
        let mut seen = std::collections::HashSet::new();
        for m in pos.legal_moves() {
            assert!(seen.insert(move_to_index(&m, false)));
        }
    }

    #[test]
    fn black_moves_mirror_white_moves() {
        let white = Chess::default();
        let e2e4 = find_move(&white, "e2e4");
        let mut black = Chess::default();
        black.play_unchecked(&e2e4);
        let e7e5 = find_move(&black, "e7e5");
        assert_eq!(move_to_index(&e2e4, false), move_to_index(&e7e5, true));
        let g1f3 = find_move(&white, "g1f3");
        let g8f6 = find_move(&black, "g8f6");
        assert_eq!(move_to_index(&g1f3, false), move_to_index(&g8f6, true));
    }

    #[test]
    fn promotions_split_by_piece_except_knight() {
        let pos: Chess = "8/4P2k/8/8/8/8/8/4K3 w - - 0 1"
            .parse::<shakmaty::fen::Fen>()
            .unwrap()
            .into_position(CastlingMode::Standard)
            .unwrap();
        let q = move_to_index(&find_move(&pos, "e7e8q"), false);
        let r = move_to_index(&find_move(&pos, "e7e8r"), false);
        let b = move_to_index(&find_move(&pos, "e7e8b"), false);
        let n = move_to_index(&find_move(&pos, "e7e8n"), false);
        let bare = *MOVE_INDEX.get(&(52, 60, 0)).unwrap();
        assert_eq!(n, bare);
        let all = [q, r, b, n];
        let unique: std::collections::HashSet<_> = all.iter().collect();
        assert_eq!(unique.len(), 4);
    }

    #[test]
    fn castling_is_indexed_as_the_king_step() {
        let pos: Chess = "r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1"
            .parse::<shakmaty::fen::Fen>()
            .unwrap()
            .into_position(CastlingMode::Standard)
            .unwrap();
        let short = find_move(&pos, "e1g1");
        let e1 = 4u8;
        let g1 = 6u8;
        assert_eq!(move_to_index(&short, false), *MOVE_INDEX.get(&(e1, g1, 0)).unwrap());
    }
}
