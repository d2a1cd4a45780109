//! The text-line protocol spoken with the engine process.
//!
//! Outbound commands are modeled as [`UciCommand`] and rendered through
//! `Display`. Inbound lines go through [`parse_line`], a total function:
//! anything outside the recognized grammar becomes [`EngineLine::Ignored`]
//! instead of an error, because engines interleave plenty of chatter
//! (`id`, `option`, `info string`, ...) that the session must simply skip.

use std::fmt;
use std::str::FromStr;

use shakmaty::uci::UciMove;

use crate::score::RelScore;

/// Commands sent to the engine over its stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UciCommand {
    Uci,
    IsReady,
    NewGame,
    SetOption { name: String, value: String },
    Position { fen: String },
    Go { depth: Option<u32>, movetime_ms: Option<u64> },
    Stop,
    Quit,
}

impl fmt::Display for UciCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UciCommand::Uci => write!(f, "uci"),
            UciCommand::IsReady => write!(f, "isready"),
            UciCommand::NewGame => write!(f, "ucinewgame"),
            UciCommand::SetOption { name, value } => {
                write!(f, "setoption name {name} value {value}")
            }
            UciCommand::Position { fen } => write!(f, "position fen {fen}"),
            UciCommand::Go { depth, movetime_ms } => {
                write!(f, "go")?;
                if let Some(d) = depth {
                    write!(f, " depth {d}")?;
                }
                if let Some(t) = movetime_ms {
                    write!(f, " movetime {t}")?;
                }
                Ok(())
            }
            UciCommand::Stop => write!(f, "stop"),
            UciCommand::Quit => write!(f, "quit"),
        }
    }
}

/// Readiness replies recognized during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    UciOk,
    ReadyOk,
}

/// Fields parsed out of an `info` line. Absent fields stay `None` rather than
/// defaulting to zero, so a depth-only line cannot masquerade as a 0.00 eval.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchInfo {
    pub depth: Option<u32>,
    pub score: Option<RelScore>,
    pub nodes: Option<u64>,
    pub nps: Option<u64>,
    pub pv: Vec<UciMove>,
}

impl SearchInfo {
    fn is_empty(&self) -> bool {
        self.depth.is_none()
            && self.score.is_none()
            && self.nodes.is_none()
            && self.nps.is_none()
            && self.pv.is_empty()
    }
}

/// One parsed line of engine output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineLine {
    Handshake(Handshake),
    Info(SearchInfo),
    /// `bestmove` terminates a search. `mv` is `None` for the `(none)` token
    /// an engine emits on a position with no legal move.
    BestMove {
        mv: Option<UciMove>,
        ponder: Option<UciMove>,
    },
    Ignored(String),
}

/// Keywords that terminate a pv token run inside an `info` line.
fn is_info_keyword(token: &str) -> bool {
    matches!(
        token,
        "depth"
            | "seldepth"
            | "multipv"
            | "score"
            | "nodes"
            | "nps"
            | "time"
            | "hashfull"
            | "tbhits"
            | "currmove"
            | "currmovenumber"
            | "string"
            | "refutation"
            | "currline"
    )
}

/// Parses one raw line of engine output. Total: never fails, never panics.
pub fn parse_line(line: &str) -> EngineLine {
    let trimmed = line.trim();

    if trimmed == "uciok" {
        return EngineLine::Handshake(Handshake::UciOk);
    }
    if trimmed == "readyok" {
        return EngineLine::Handshake(Handshake::ReadyOk);
    }
    if let Some(rest) = trimmed.strip_prefix("bestmove") {
        return parse_bestmove(trimmed, rest);
    }
    if let Some(rest) = trimmed.strip_prefix("info") {
        let info = parse_info(rest);
        if info.is_empty() {
            // e.g. "info string NNUE evaluation enabled" - nothing to report
            return EngineLine::Ignored(trimmed.to_string());
        }
        return EngineLine::Info(info);
    }

    EngineLine::Ignored(trimmed.to_string())
}

fn parse_bestmove(raw: &str, rest: &str) -> EngineLine {
    let mut tokens = rest.split_whitespace();

    let mv = match tokens.next() {
        Some("(none)") | Some("0000") => None,
        Some(token) => match UciMove::from_str(token) {
            Ok(mv) => Some(mv),
            // a bestmove we cannot read is a malformed line, not a null move
            Err(_) => return EngineLine::Ignored(raw.to_string()),
        },
        None => return EngineLine::Ignored(raw.to_string()),
    };

    let ponder = match (tokens.next(), tokens.next()) {
        (Some("ponder"), Some(token)) => UciMove::from_str(token).ok(),
        _ => None,
    };

    EngineLine::BestMove { mv, ponder }
}

fn parse_info(rest: &str) -> SearchInfo {
    let mut info = SearchInfo::default();
    let mut tokens = rest.split_whitespace().peekable();

    while let Some(token) = tokens.next() {
        match token {
            "depth" => info.depth = tokens.next().and_then(|v| v.parse().ok()),
            "nodes" => info.nodes = tokens.next().and_then(|v| v.parse().ok()),
            "nps" => info.nps = tokens.next().and_then(|v| v.parse().ok()),
            "score" => {
                if let (Some(kind), Some(value)) = (tokens.next(), tokens.next()) {
                    info.score = RelScore::parse(kind, value);
                }
            }
            "pv" => {
                while let Some(&next) = tokens.peek() {
                    if is_info_keyword(next) {
                        break;
                    }
                    match UciMove::from_str(next) {
                        Ok(mv) => {
                            info.pv.push(mv);
                            tokens.next();
                        }
                        Err(_) => break,
                    }
                }
            }
            _ => {}
        }
    }

    info
}
