//! Game position history.
//!
//! The search keeps one `History` per worker descent. It grows along the
//! selection path and is trimmed back to the played-game prefix before the
//! next descent, so pushes after the prefix never reallocate the whole game.

use shakmaty::fen::Fen;
use shakmaty::uci::Uci;
use shakmaty::zobrist::{Zobrist64, ZobristHash};
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Move, Position};
use thiserror::Error;

pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

#[derive(Debug, Error)]
pub enum PositionError {
    #[error("invalid FEN: {0}")]
    InvalidFen(String),

    #[error("illegal move: {0}")]
    IllegalMove(String),
}

/// Final result of a finished game, from white's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameResult {
    WhiteWon,
    BlackWon,
    Draw,
}

impl GameResult {
    /// Value of this result for the player who just moved into the position
    /// where the game ended (`to_move` is the side that has no reply).
    pub fn value_for_mover(self, to_move: Color) -> f32 {
        match self {
            GameResult::Draw => 0.0,
            GameResult::WhiteWon => {
                if to_move == Color::Black {
                    1.0
                } else {
                    -1.0
                }
            }
            GameResult::BlackWon => {
                if to_move == Color::White {
                    1.0
                } else {
                    -1.0
                }
            }
        }
    }
}

/// Sequence of positions from a starting FEN to the current head.
#[derive(Debug, Clone)]
pub struct History {
    positions: Vec<Chess>,
    /// Half-moves played before the starting position of this history,
    /// recovered from the FEN move counters.
    base_ply: u32,
}

impl History {
    pub fn starting() -> Self {
        Self::from_fen(STARTING_FEN).expect("starting FEN parses")
    }

    pub fn from_fen(fen: &str) -> Result<Self, PositionError> {
        let setup: Fen = fen
            .parse()
            .map_err(|_| PositionError::InvalidFen(fen.to_string()))?;
        let pos: Chess = setup
            .into_position(CastlingMode::Standard)
            .map_err(|_| PositionError::InvalidFen(fen.to_string()))?;
        let base_ply =
            2 * (u32::from(pos.fullmoves()) - 1) + u32::from(pos.turn() == Color::Black);
        Ok(Self {
            positions: vec![pos],
            base_ply,
        })
    }

    pub fn last(&self) -> &Chess {
        self.positions.last().expect("history is never empty")
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Game ply at the head (0 for white to move in the initial position).
    pub fn ply(&self) -> u32 {
        self.base_ply + self.positions.len() as u32 - 1
    }

    pub fn is_black_to_move(&self) -> bool {
        self.last().turn() == Color::Black
    }

    pub fn push(&mut self, m: &Move) {
        let mut next = self.last().clone();
        next.play_unchecked(m);
        self.positions.push(next);
    }

    /// Parses and plays a move in UCI notation.
    pub fn push_uci(&mut self, uci: &str) -> Result<Move, PositionError> {
        let parsed =
            Uci::from_ascii(uci.as_bytes()).map_err(|_| PositionError::IllegalMove(uci.into()))?;
        let m = parsed
            .to_move(self.last())
            .map_err(|_| PositionError::IllegalMove(uci.into()))?;
        self.push(&m);
        Ok(m)
    }

    pub fn pop(&mut self) {
        debug_assert!(self.positions.len() > 1);
        self.positions.pop();
    }

    /// Drops positions past `len`. Used to rewind a worker's history to the
    /// played-game prefix between descents.
    pub fn trim(&mut self, len: usize) {
        debug_assert!(len >= 1);
        self.positions.truncate(len);
    }

    /// Mixes the Zobrist hashes of the last `window` positions into a single
    /// cache key. Positions before the start of the game contribute nothing,
    /// so short games still hash deterministically.
    pub fn hash_last(&self, window: usize) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for pos in self.positions.iter().rev().take(window.max(1)) {
            let z: Zobrist64 = pos.zobrist_hash(EnPassantMode::Legal);
            hash = (hash ^ z.0).wrapping_mul(0x0000_0100_0000_01b3);
        }
        hash
    }

    /// How many earlier positions in the reversible tail equal the head.
    /// 2 means the head is a third occurrence.
    pub fn repetitions(&self) -> u32 {
        self.repetitions_at(self.positions.len() - 1)
    }

    pub(crate) fn repetitions_at(&self, idx: usize) -> u32 {
        let pos = &self.positions[idx];
        let horizon = (pos.halfmoves() as usize).min(idx);
        let target: Zobrist64 = pos.zobrist_hash(EnPassantMode::Legal);
        self.positions[idx - horizon..idx]
            .iter()
            .filter(|p| p.zobrist_hash::<Zobrist64>(EnPassantMode::Legal) == target)
            .count() as u32
    }

    pub(crate) fn position_at(&self, idx: usize) -> &Chess {
        &self.positions[idx]
    }

    /// Classifies the head as terminal, if it is. `at_root` suppresses the
    /// draw-by-rule short circuits: when the host asks us to search such a
    /// position, thinking about it is the point.
    pub fn compute_terminal(&self, at_root: bool) -> Option<GameResult> {
        self.classify_terminal(&self.last().legal_moves(), at_root)
    }

    /// Same as [`Self::compute_terminal`], for callers that already hold the
    /// head's legal moves.
    pub fn classify_terminal(
        &self,
        legal: &shakmaty::MoveList,
        at_root: bool,
    ) -> Option<GameResult> {
        let pos = self.last();
        if legal.is_empty() {
            if pos.is_check() {
                // Side to move is mated; the winner is whoever just moved.
                return Some(match pos.turn() {
                    Color::White => GameResult::BlackWon,
                    Color::Black => GameResult::WhiteWon,
                });
            }
            return Some(GameResult::Draw);
        }
        if !at_root {
            if pos.is_insufficient_material() {
                return Some(GameResult::Draw);
            }
            if pos.halfmoves() >= 100 {
                return Some(GameResult::Draw);
            }
            if self.repetitions() >= 2 {
                return Some(GameResult::Draw);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starting_position_ply() {
        let h = History::starting();
        assert_eq!(h.ply(), 0);
        assert!(!h.is_black_to_move());
    }

    #[test]
    fn ply_tracks_fen_counters() {
        let h = History::from_fen("4k3/8/8/8/8/8/8/4K3 b - - 0 40").unwrap();
        assert_eq!(h.ply(), 79);
        assert!(h.is_black_to_move());
    }

    #[test]
    fn push_and_trim() {
        let mut h = History::starting();
        h.push_uci("e2e4").unwrap();
        h.push_uci("e7e5").unwrap();
        assert_eq!(h.len(), 3);
        assert_eq!(h.ply(), 2);
        h.trim(1);
        assert_eq!(h.len(), 1);
        assert!(!h.is_black_to_move());
    }

    #[test]
    fn rejects_illegal_moves() {
        let mut h = History::starting();
        assert!(h.push_uci("e2e5").is_err());
        assert!(h.push_uci("zz99").is_err());
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn window_hash_depends_on_history() {
        let mut a = History::starting();
        a.push_uci("g1f3").unwrap();
        a.push_uci("g8f6").unwrap();
        a.push_uci("f3g1").unwrap();
        a.push_uci("f6g8").unwrap();
        let b = History::starting();
        // Same head position, different recent window.
        assert_eq!(a.hash_last(1), b.hash_last(1));
        assert_ne!(a.hash_last(4), b.hash_last(4));
    }

    #[test]
    fn counts_repetitions() {
        let mut h = History::starting();
        for _ in 0..2 {
            h.push_uci("g1f3").unwrap();
            h.push_uci("g8f6").unwrap();
            h.push_uci("f3g1").unwrap();
            h.push_uci("f6g8").unwrap();
        }
        // Initial position has now occurred three times.
        assert_eq!(h.repetitions(), 2);
        assert_eq!(h.compute_terminal(false), Some(GameResult::Draw));
        assert_eq!(h.compute_terminal(true), None);
    }

    #[test]
    fn classifies_checkmate() {
        let mut h = History::starting();
        for m in ["f2f3", "e7e5", "g2g4", "d8h4"] {
            h.push_uci(m).unwrap();
        }
        assert_eq!(h.compute_terminal(false), Some(GameResult::BlackWon));
        assert_eq!(h.compute_terminal(true), Some(GameResult::BlackWon));
        assert_eq!(
            GameResult::BlackWon.value_for_mover(Color::White),
            1.0,
            "mate is a win for the side that delivered it"
        );
    }

    #[test]
    fn classifies_stalemate() {
        let h = History::from_fen("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").unwrap();
        assert_eq!(h.compute_terminal(true), Some(GameResult::Draw));
    }

    #[test]
    fn fifty_move_rule_is_not_terminal_at_root() {
        let h = History::from_fen("4k3/8/8/8/8/8/4K3/7R w - - 100 80").unwrap();
        assert_eq!(h.compute_terminal(false), Some(GameResult::Draw));
        assert_eq!(h.compute_terminal(true), None);
    }
}
