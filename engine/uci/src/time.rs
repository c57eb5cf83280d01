//! Time management.
//!
//! Turns the host's clock state into a concrete per-move deadline. The share
//! of the remaining time given to the current move follows a cosh^-2 curve
//! over game plies: short openings, a peak of effort in the early middle
//! game, and a long taper.

use crate::uci::GoParams;
use cinder_search::Limits;

#[derive(Debug, Clone, Copy)]
pub struct TimeParams {
    pub slowmover: f32,
    pub move_overhead_ms: i64,
    pub curve_peak: f32,
    pub curve_left_width: f32,
    pub curve_right_width: f32,
}

impl Default for TimeParams {
    fn default() -> Self {
        Self {
            slowmover: 1.93,
            move_overhead_ms: 100,
            curve_peak: 26.0,
            curve_left_width: 67.0,
            curve_right_width: 76.0,
        }
    }
}

/// Scales widths so the curve's inflection points land at peak +/- width,
/// where it has fallen to 2/3 of its maximum: 2 / ln(2 + sqrt(3)).
const WIDTH_SCALER: f32 = 1.518_651_485;

/// Relative thinking-effort weight of the move at `ply`.
fn move_weight(ply: f32, params: &TimeParams) -> f32 {
    let width = if ply > params.curve_peak {
        params.curve_right_width
    } else {
        params.curve_left_width
    };
    ((ply - params.curve_peak) / width / WIDTH_SCALER)
        .cosh()
        .powi(-2)
}

/// Tolerance below which the slowmover scale is not worth applying.
const SLOWMOVER_TOLERANCE_MS: f32 = 200.0;

/// Builds search limits from go parameters and the clock. `searchmoves`
/// stays empty here; the controller resolves the strings against the root.
pub fn build_limits(go: &GoParams, ply: u32, is_black: bool, params: &TimeParams) -> Limits {
    let mut limits = Limits {
        visits: go.nodes.unwrap_or(-1),
        time_ms: go.movetime.unwrap_or(-1),
        infinite: go.infinite,
        ..Limits::default()
    };

    let time = if is_black { go.btime } else { go.wtime };
    let Some(time) = time else {
        return limits;
    };
    if go.infinite || time < 0 {
        return limits;
    }
    let increment = (if is_black { go.binc } else { go.winc })
        .unwrap_or(0)
        .max(0);

    let mut movestogo = go.movestogo.unwrap_or(50);
    if movestogo < 0 {
        movestogo = 50;
    }
    // Some hosts send movestogo 0 for "this move decides".
    if movestogo == 0 {
        movestogo = 1;
    }

    let total_moves_time = (time + increment * (movestogo - 1)
        - params.move_overhead_ms * movestogo)
        .max(0);

    let this_move_weight = move_weight(ply as f32, params);
    let mut other_move_weights = 0.0f32;
    for i in 1..movestogo {
        other_move_weights += move_weight((ply + 2 * i as u32) as f32, params);
    }
    let mut this_move_time =
        total_moves_time as f32 * this_move_weight / (this_move_weight + other_move_weights);

    if params.slowmover >= 1.0 || this_move_time * params.slowmover > SLOWMOVER_TOLERANCE_MS {
        this_move_time *= params.slowmover;
    }

    limits.time_ms = (this_move_time as i64)
        .min(time - params.move_overhead_ms)
        .max(0);
    limits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn go_with_time(wtime: i64) -> GoParams {
        GoParams {
            wtime: Some(wtime),
            ..GoParams::default()
        }
    }

    #[test]
    fn movetime_passes_straight_through() {
        let go = GoParams {
            movetime: Some(300),
            ..GoParams::default()
        };
        let limits = build_limits(&go, 0, false, &TimeParams::default());
        assert_eq!(limits.time_ms, 300);
        assert!(!limits.infinite);
    }

    #[test]
    fn infinite_ignores_the_clock() {
        let go = GoParams {
            infinite: true,
            wtime: Some(60_000),
            ..GoParams::default()
        };
        let limits = build_limits(&go, 0, false, &TimeParams::default());
        assert!(limits.infinite);
        assert_eq!(limits.time_ms, -1);
    }

    #[test]
    fn nodes_map_to_visits() {
        let go = GoParams {
            nodes: Some(1234),
            ..GoParams::default()
        };
        let limits = build_limits(&go, 0, false, &TimeParams::default());
        assert_eq!(limits.visits, 1234);
        assert_eq!(limits.time_ms, -1);
    }

    #[test]
    fn clock_time_is_split_across_remaining_moves() {
        let params = TimeParams::default();
        let limits = build_limits(&go_with_time(60_000), 0, false, &params);
        assert!(limits.time_ms > 0);
        // One move out of fifty cannot eat the whole clock.
        assert!(limits.time_ms < 60_000 / 4);
    }

    #[test]
    fn deadline_never_exceeds_clock_minus_overhead() {
        let params = TimeParams::default();
        let limits = build_limits(&go_with_time(150), 20, false, &params);
        assert!(limits.time_ms <= 150 - params.move_overhead_ms);
        assert!(limits.time_ms >= 0);
    }

    #[test]
    fn effort_peaks_near_the_curve_peak() {
        let params = TimeParams::default();
        let opening = build_limits(&go_with_time(60_000), 0, false, &params);
        let middlegame = build_limits(&go_with_time(60_000), 26, false, &params);
        assert!(middlegame.time_ms > opening.time_ms);
    }

    #[test]
    fn black_uses_its_own_clock() {
        let go = GoParams {
            wtime: Some(60_000),
            btime: Some(1_000),
            ..GoParams::default()
        };
        let params = TimeParams::default();
        let white = build_limits(&go, 10, false, &params);
        let black = build_limits(&go, 10, true, &params);
        assert!(white.time_ms > black.time_ms);
    }
}
