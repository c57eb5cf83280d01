//! Events the search emits while thinking.

/// A progress snapshot, mapped by the host onto a UCI `info` line.
#[derive(Debug, Clone, Default)]
pub struct ThinkingInfo {
    /// Depth to which the tree is fully explored.
    pub depth: u16,
    /// Deepest playout so far.
    pub seldepth: u16,
    pub time_ms: i64,
    pub nodes: i64,
    pub nps: i64,
    /// Cache occupancy in permille.
    pub hashfull: i64,
    pub score_cp: Option<i64>,
    /// Principal variation in UCI notation, starting with the best move.
    pub pv: Vec<String>,
    /// Free-form line (verbose per-move stats).
    pub comment: Option<String>,
}

/// Final move choice. `None` is the null move: no legal moves at the root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BestMoveInfo {
    pub best_move: Option<String>,
    pub ponder_move: Option<String>,
}

pub type InfoCallback = Box<dyn Fn(ThinkingInfo) + Send + Sync>;
pub type BestMoveCallback = Box<dyn Fn(BestMoveInfo) + Send + Sync>;

/// Projects a win probability in [-1, 1] onto a centipawn-like scale.
pub fn q_to_centipawns(q: f32) -> i64 {
    (290.680_623_072 * (1.548_090_806 * f64::from(q)).tan()).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centipawn_projection() {
        assert_eq!(q_to_centipawns(0.0), 0);
        assert_eq!(q_to_centipawns(-0.5), -q_to_centipawns(0.5));
        assert!(q_to_centipawns(0.9) > 500);
        assert!(q_to_centipawns(0.99).abs() > q_to_centipawns(0.9).abs());
    }
}
