//! UCI command parsing and response formatting.
//!
//! The parser is deliberately forgiving: tournament managers send correct
//! input, and an unknown or malformed line is reported and skipped rather
//! than recovered. Responses are plain strings so the printing side stays a
//! one-liner.

use cinder_search::{BestMoveInfo, ThinkingInfo};

#[derive(Debug, PartialEq)]
pub enum Command {
    Uci,
    Debug { on: bool },
    IsReady,
    SetOption { name: String, value: String },
    SetPosition { fen: Option<String>, moves: Vec<String> },
    NewGame,
    Go(GoParams),
    Stop,
    Quit,
    Unknown(String),
}

/// Raw `go` arguments. Times are milliseconds.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct GoParams {
    pub wtime: Option<i64>,
    pub btime: Option<i64>,
    pub winc: Option<i64>,
    pub binc: Option<i64>,
    pub movestogo: Option<i64>,
    pub nodes: Option<i64>,
    pub movetime: Option<i64>,
    pub infinite: bool,
    pub searchmoves: Vec<String>,
}

impl Command {
    pub fn parse(input: &str) -> Self {
        let parts: Vec<&str> = input.split_whitespace().collect();
        let Some(&first) = parts.first() else {
            return Self::Unknown(String::new());
        };
        match first {
            "uci" => Self::Uci,
            "debug" if parts.len() > 1 => Self::Debug {
                on: parts[1] == "on",
            },
            "isready" => Self::IsReady,
            "setoption" => parse_setoption(&parts, input),
            "position" => parse_setposition(&parts),
            "ucinewgame" => Self::NewGame,
            "go" => Self::Go(parse_go(&parts)),
            "stop" => Self::Stop,
            "quit" => Self::Quit,
            _ => Self::Unknown(input.trim().to_string()),
        }
    }
}

fn parse_setoption(parts: &[&str], input: &str) -> Command {
    if parts.len() < 3 || parts[1] != "name" {
        return Command::Unknown(input.trim().to_string());
    }
    let value_index = parts.iter().position(|&p| p == "value");
    let name = parts[2..value_index.unwrap_or(parts.len())].join(" ");
    let value = value_index
        .map(|i| parts[i + 1..].join(" "))
        .unwrap_or_default();
    if name.is_empty() {
        return Command::Unknown(input.trim().to_string());
    }
    Command::SetOption { name, value }
}

fn parse_setposition(parts: &[&str]) -> Command {
    let fen_index = parts.iter().position(|&p| p == "fen");
    let moves_index = parts.iter().position(|&p| p == "moves");
    let fen =
        fen_index.map(|i| parts[i + 1..moves_index.unwrap_or(parts.len())].join(" "));
    let moves = moves_index
        .map(|i| parts[i + 1..].iter().map(|s| (*s).to_string()).collect())
        .unwrap_or_default();
    Command::SetPosition { fen, moves }
}

fn parse_go(parts: &[&str]) -> GoParams {
    let mut params = GoParams::default();
    let mut i = 1;
    while i < parts.len() {
        let take_number = |j: usize| parts.get(j + 1).and_then(|v| v.parse::<i64>().ok());
        match parts[i] {
            "wtime" => {
                params.wtime = take_number(i);
                i += 2;
            }
            "btime" => {
                params.btime = take_number(i);
                i += 2;
            }
            "winc" => {
                params.winc = take_number(i);
                i += 2;
            }
            "binc" => {
                params.binc = take_number(i);
                i += 2;
            }
            "movestogo" => {
                params.movestogo = take_number(i);
                i += 2;
            }
            "nodes" => {
                params.nodes = take_number(i);
                i += 2;
            }
            "movetime" => {
                params.movetime = take_number(i);
                i += 2;
            }
            "infinite" => {
                params.infinite = true;
                i += 1;
            }
            "searchmoves" => {
                // Everything up to the next keyword is a move.
                i += 1;
                while i < parts.len() && !is_go_keyword(parts[i]) {
                    params.searchmoves.push(parts[i].to_string());
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    params
}

fn is_go_keyword(token: &str) -> bool {
    matches!(
        token,
        "wtime" | "btime" | "winc" | "binc" | "movestogo" | "nodes" | "movetime" | "infinite"
            | "searchmoves" | "ponder" | "depth" | "mate"
    )
}

/// Renders a thinking event as a UCI `info` line.
pub fn format_info(info: &ThinkingInfo) -> String {
    if let Some(comment) = &info.comment {
        return format!("info string {comment}");
    }
    let mut line = format!(
        "info depth {} seldepth {} time {} nodes {} nps {} hashfull {}",
        info.depth, info.seldepth, info.time_ms, info.nodes, info.nps, info.hashfull
    );
    if let Some(cp) = info.score_cp {
        line.push_str(&format!(" score cp {cp}"));
    }
    if !info.pv.is_empty() {
        line.push_str(" pv ");
        line.push_str(&info.pv.join(" "));
    }
    line
}

/// Renders the final move choice. A search with no legal moves reports the
/// null move.
pub fn format_bestmove(best: &BestMoveInfo) -> String {
    let mv = best.best_move.as_deref().unwrap_or("0000");
    match &best.ponder_move {
        Some(ponder) => format!("bestmove {mv} ponder {ponder}"),
        None => format!("bestmove {mv}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_basic_commands() {
        assert_eq!(Command::parse("uci"), Command::Uci);
        assert_eq!(Command::parse("isready"), Command::IsReady);
        assert_eq!(Command::parse("ucinewgame"), Command::NewGame);
        assert_eq!(Command::parse("stop"), Command::Stop);
        assert_eq!(Command::parse("quit"), Command::Quit);
        assert_eq!(Command::parse("debug on"), Command::Debug { on: true });
        assert_eq!(Command::parse("debug off"), Command::Debug { on: false });
    }

    #[test]
    fn parse_setoption_name_value() {
        assert_eq!(
            Command::parse("setoption name threads value 4"),
            Command::SetOption {
                name: "threads".to_string(),
                value: "4".to_string()
            }
        );
        assert_eq!(
            Command::parse("setoption name smart-pruning value false"),
            Command::SetOption {
                name: "smart-pruning".to_string(),
                value: "false".to_string()
            }
        );
        assert!(matches!(
            Command::parse("setoption threads 4"),
            Command::Unknown(_)
        ));
    }

    #[test]
    fn parse_position_startpos_and_fen() {
        assert_eq!(
            Command::parse("position startpos moves e2e4 e7e5"),
            Command::SetPosition {
                fen: None,
                moves: vec!["e2e4".to_string(), "e7e5".to_string()]
            }
        );
        assert_eq!(
            Command::parse(
                "position fen rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1 moves d2d4"
            ),
            Command::SetPosition {
                fen: Some(
                    "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1".to_string()
                ),
                moves: vec!["d2d4".to_string()]
            }
        );
    }

    #[test]
    fn parse_go_forms() {
        assert_eq!(
            Command::parse("go wtime 300000 btime 300000 winc 1000 binc 1000 movestogo 40"),
            Command::Go(GoParams {
                wtime: Some(300_000),
                btime: Some(300_000),
                winc: Some(1000),
                binc: Some(1000),
                movestogo: Some(40),
                ..GoParams::default()
            })
        );
        assert_eq!(
            Command::parse("go nodes 1000"),
            Command::Go(GoParams {
                nodes: Some(1000),
                ..GoParams::default()
            })
        );
        assert_eq!(
            Command::parse("go movetime 300"),
            Command::Go(GoParams {
                movetime: Some(300),
                ..GoParams::default()
            })
        );
        assert_eq!(
            Command::parse("go infinite"),
            Command::Go(GoParams {
                infinite: true,
                ..GoParams::default()
            })
        );
    }

    #[test]
    fn parse_go_searchmoves_stops_at_keywords() {
        assert_eq!(
            Command::parse("go searchmoves e2e4 d2d4 movetime 100"),
            Command::Go(GoParams {
                movetime: Some(100),
                searchmoves: vec!["e2e4".to_string(), "d2d4".to_string()],
                ..GoParams::default()
            })
        );
    }

    #[test]
    fn unknown_lines_are_reported() {
        assert!(matches!(
            Command::parse("xyzzy now"),
            Command::Unknown(_)
        ));
    }

    #[test]
    fn format_info_line() {
        let info = ThinkingInfo {
            depth: 3,
            seldepth: 7,
            time_ms: 1500,
            nodes: 4096,
            nps: 2730,
            hashfull: 12,
            score_cp: Some(35),
            pv: vec!["e2e4".to_string(), "e7e5".to_string()],
            comment: None,
        };
        assert_eq!(
            format_info(&info),
            "info depth 3 seldepth 7 time 1500 nodes 4096 nps 2730 hashfull 12 score cp 35 pv e2e4 e7e5"
        );
    }

    #[test]
    fn format_info_comment() {
        let info = ThinkingInfo {
            comment: Some("e2e4  N: 12".to_string()),
            ..ThinkingInfo::default()
        };
        assert_eq!(format_info(&info), "info string e2e4  N: 12");
    }

    #[test]
    fn format_bestmove_variants() {
        assert_eq!(
            format_bestmove(&BestMoveInfo {
                best_move: Some("e2e4".to_string()),
                ponder_move: None
            }),
            "bestmove e2e4"
        );
        assert_eq!(format_bestmove(&BestMoveInfo::default()), "bestmove 0000");
    }
}
