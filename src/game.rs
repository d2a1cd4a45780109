//! Authoritative game state.
//!
//! [`GameController`] is the only owner of the current position and the move
//! history. Every component that wants to change the game goes through
//! [`GameController::apply_move`] or [`GameController::reset`]; everything
//! else only reads snapshots or listens on the state-change channel.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use log::{debug, error};
use shakmaty::fen::Fen;
use shakmaty::san::SanPlus;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Position, Role, Square};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::util;

/// Where a move came from. Routing and logging only; legality never looks at
/// this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveSource {
    Local,
    Engine,
    Remote,
}

/// A move as requested by some source: origin, destination, optional
/// promotion piece. Interchange format is the coordinate token ("e2e4",
/// "e7e8q").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveRequest {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<Role>,
}

impl MoveRequest {
    /// Extracts a request from a parsed UCI move token. Null moves and drops
    /// have no board meaning here and yield `None`.
    pub fn from_uci(mv: &UciMove) -> Option<MoveRequest> {
        match *mv {
            UciMove::Normal { from, to, promotion } => {
                Some(MoveRequest { from, to, promotion })
            }
            _ => None,
        }
    }

    pub fn to_uci(&self) -> UciMove {
        UciMove::Normal {
            from: self.from,
            to: self.to,
            promotion: self.promotion,
        }
    }
}

impl FromStr for MoveRequest {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let uci = util::parse_uci_move(s)?;
        MoveRequest::from_uci(&uci).context("not a from-to move token")
    }
}

impl fmt::Display for MoveRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uci())
    }
}

/// Result of evaluating the position after a move, recomputed on every
/// successful application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStatus {
    InProgress,
    /// The named side is in check.
    Check(Color),
    /// The named side won.
    Checkmate(Color),
    Stalemate,
    Draw,
}

impl TerminalStatus {
    pub fn is_over(&self) -> bool {
        matches!(
            self,
            TerminalStatus::Checkmate(_) | TerminalStatus::Stalemate | TerminalStatus::Draw
        )
    }
}

/// Why a move was refused. The position and history are untouched in every
/// case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MoveRejected {
    #[error("illegal move")]
    Illegal,
    #[error("not this side's turn")]
    OutOfTurn,
    #[error("game is already over")]
    GameAlreadyOver,
}

/// A move that made it into the history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayedMove {
    pub mv: MoveRequest,
    pub san: String,
    pub source: MoveSource,
}

/// Immutable view of the game, handed to subscribers on every state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub fen: String,
    pub turn: Color,
    pub status: TerminalStatus,
    pub last_move: Option<PlayedMove>,
    pub ply: usize,
}

pub struct GameController {
    start: Chess,
    position: Chess,
    history: Vec<PlayedMove>,
    subscribers: Vec<mpsc::UnboundedSender<Snapshot>>,
}

impl Default for GameController {
    fn default() -> Self {
        Self::new()
    }
}

impl GameController {
    pub fn new() -> GameController {
        GameController {
            start: Chess::default(),
            position: Chess::default(),
            history: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    pub fn fen(&self) -> String {
        Fen::from_position(&self.position, EnPassantMode::Legal).to_string()
    }

    pub fn turn(&self) -> Color {
        self.position.turn()
    }

    pub fn status(&self) -> TerminalStatus {
        status_of(&self.position)
    }

    pub fn history(&self) -> &[PlayedMove] {
        &self.history
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            fen: self.fen(),
            turn: self.turn(),
            status: self.status(),
            last_move: self.history.last().cloned(),
            ply: self.history.len(),
        }
    }

    /// Legal destination squares for the piece on `from`, for click/drag
    /// highlighting.
    pub fn legal_targets(&self, from: Square) -> Vec<Square> {
        self.position
            .legal_moves()
            .iter()
            .filter(|m| m.from() == Some(from))
            .map(|m| m.to())
            .collect()
    }

    /// Registers a state-change listener. Closed receivers are dropped on the
    /// next notification.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Snapshot> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Applies a move if it is the mover's turn and the rules library accepts
    /// it. On rejection nothing changes: no position update, no history entry,
    /// no notification.
    pub fn apply_move(
        &mut self,
        mv: MoveRequest,
        source: MoveSource,
    ) -> Result<Snapshot, MoveRejected> {
        if self.status().is_over() {
            return Err(MoveRejected::GameAlreadyOver);
        }

        let piece = self
            .position
            .board()
            .piece_at(mv.from)
            .ok_or(MoveRejected::Illegal)?;
        if piece.color != self.position.turn() {
            return Err(MoveRejected::OutOfTurn);
        }

        let m = mv
            .to_uci()
            .to_move(&self.position)
            .map_err(|_| MoveRejected::Illegal)?;

        // Compute the successor on a copy so a panic or error anywhere above
        // can never leave a half-applied position behind.
        let mut next = self.position.clone();
        let san = SanPlus::from_move_and_play_unchecked(&mut next, m).to_string();
        self.position = next;
        self.history.push(PlayedMove { mv, san, source });

        debug!(
            "applied {} ({:?}), ply {}, status {:?}",
            mv,
            source,
            self.history.len(),
            self.status()
        );

        Ok(self.notify())
    }

    /// Back to the starting position with an empty history.
    pub fn reset(&mut self) -> Snapshot {
        self.start = Chess::default();
        self.position = Chess::default();
        self.history.clear();
        self.notify()
    }

    /// Adopts an authoritative position and history from the room, replacing
    /// whatever we had locally. Fails without touching state if the payload
    /// does not parse or replay.
    pub fn restore(&mut self, fen: &str, moves: &[String]) -> Result<Snapshot> {
        let start: Chess = Fen::from_str(fen)
            .context("room sent an unreadable FEN")?
            .into_position(CastlingMode::Standard)
            .context("room sent an invalid position")?;

        let mut position = start.clone();
        let mut history = Vec::with_capacity(moves.len());
        for token in moves {
            let uci = util::parse_uci_move(token)?;
            let mv = MoveRequest::from_uci(&uci).context("room history contains a non-move")?;
            let m = uci
                .to_move(&position)
                .context("room history does not replay")?;
            let san = SanPlus::from_move_and_play_unchecked(&mut position, m).to_string();
            history.push(PlayedMove { mv, san, source: MoveSource::Remote });
        }

        self.start = start;
        self.position = position;
        self.history = history;
        Ok(self.notify())
    }

    /// Rolls back the last `plies` half-moves by replaying the shortened
    /// history from the starting position. Replay, not reverse diffs: the
    /// rules library only has to be correct in the forward direction.
    pub fn undo(&mut self, plies: usize) -> Snapshot {
        let keep = self.history.len().saturating_sub(plies);
        self.history.truncate(keep);

        let mut position = self.start.clone();
        let mut replayed = 0;
        for played in &self.history {
            match played.mv.to_uci().to_move(&position) {
                Ok(m) => {
                    position.play_unchecked(m);
                    replayed += 1;
                }
                Err(_) => {
                    // History entries were all legal when recorded, so this
                    // indicates a bug; salvage the replayable prefix.
                    error!("history no longer replays at ply {replayed}, truncating");
                    break;
                }
            }
        }
        self.history.truncate(replayed);
        self.position = position;
        self.notify()
    }

    fn notify(&mut self) -> Snapshot {
        let snapshot = self.snapshot();
        self.subscribers
            .retain(|tx| tx.send(snapshot.clone()).is_ok());
        snapshot
    }
}

fn status_of(pos: &Chess) -> TerminalStatus {
    if pos.is_checkmate() {
        TerminalStatus::Checkmate(!pos.turn())
    } else if pos.is_stalemate() {
        TerminalStatus::Stalemate
    } else if pos.is_insufficient_material() || pos.halfmoves() >= 100 {
        TerminalStatus::Draw
    } else if pos.is_check() {
        TerminalStatus::Check(pos.turn())
    } else {
        TerminalStatus::InProgress
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mv(token: &str) -> MoveRequest {
        token.parse().unwrap()
    }

    #[test]
    fn applies_a_legal_move_and_notifies() {
        let mut game = GameController::new();
        let mut states = game.subscribe();

        let snap = game.apply_move(mv("e2e4"), MoveSource::Local).unwrap();
        assert_eq!(snap.ply, 1);
        assert_eq!(snap.turn, Color::Black);
        assert_eq!(snap.last_move.as_ref().unwrap().mv, mv("e2e4"));
        assert_eq!(snap.last_move.unwrap().san, "e4");
        assert_eq!(snap.status, TerminalStatus::InProgress);

        let notified = states.try_recv().unwrap();
        assert_eq!(notified.fen, snap.fen);
    }

    #[test]
    fn rejected_move_changes_nothing() {
        let mut game = GameController::new();
        let mut states = game.subscribe();
        let before = game.fen();

        assert_eq!(
            game.apply_move(mv("e2e5"), MoveSource::Local),
            Err(MoveRejected::Illegal)
        );
        assert_eq!(game.fen(), before);
        assert!(game.history().is_empty());
        assert!(states.try_recv().is_err());
    }

    #[test]
    fn moving_the_opponents_piece_is_out_of_turn() {
        let mut game = GameController::new();
        assert_eq!(
            game.apply_move(mv("e7e5"), MoveSource::Local),
            Err(MoveRejected::OutOfTurn)
        );
    }

    #[test]
    fn empty_origin_square_is_illegal() {
        let mut game = GameController::new();
        assert_eq!(
            game.apply_move(mv("e4e5"), MoveSource::Local),
            Err(MoveRejected::Illegal)
        );
    }

    #[test]
    fn fools_mate_reports_checkmate_and_blocks_further_moves() {
        let mut game = GameController::new();
        for token in ["f2f3", "e7e5", "g2g4", "d8h4"] {
            game.apply_move(mv(token), MoveSource::Local).unwrap();
        }
        assert_eq!(game.status(), TerminalStatus::Checkmate(Color::Black));
        assert_eq!(
            game.apply_move(mv("e2e4"), MoveSource::Local),
            Err(MoveRejected::GameAlreadyOver)
        );
    }

    #[test]
    fn check_is_reported_for_the_attacked_side() {
        let mut game = GameController::new();
        // 1.e4 d5 2.Bb5+
        for token in ["e2e4", "d7d5", "f1b5"] {
            game.apply_move(mv(token), MoveSource::Local).unwrap();
        }
        assert_eq!(game.status(), TerminalStatus::Check(Color::Black));
    }

    #[test]
    fn reset_restores_the_starting_position() {
        let mut game = GameController::new();
        game.apply_move(mv("e2e4"), MoveSource::Local).unwrap();
        let snap = game.reset();
        assert_eq!(snap.ply, 0);
        assert_eq!(snap.fen, GameController::new().fen());
    }

    #[test]
    fn replaying_history_after_reset_reproduces_the_position() {
        let mut game = GameController::new();
        for token in ["e2e4", "e7e5", "g1f3", "b8c6"] {
            game.apply_move(mv(token), MoveSource::Local).unwrap();
        }
        let before = game.fen();
        let moves: Vec<MoveRequest> = game.history().iter().map(|p| p.mv).collect();

        game.reset();
        for m in moves {
            game.apply_move(m, MoveSource::Local).unwrap();
        }
        assert_eq!(game.fen(), before);
    }

    #[test]
    fn undo_two_plies_removes_a_move_pair() {
        let mut game = GameController::new();
        game.apply_move(mv("e2e4"), MoveSource::Local).unwrap();
        let after_first = game.fen();
        game.apply_move(mv("e7e5"), MoveSource::Local).unwrap();
        game.apply_move(mv("g1f3"), MoveSource::Engine).unwrap();

        let snap = game.undo(2);
        assert_eq!(snap.ply, 1);
        assert_eq!(snap.fen, after_first);
    }

    #[test]
    fn undo_past_the_start_is_clamped() {
        let mut game = GameController::new();
        game.apply_move(mv("e2e4"), MoveSource::Local).unwrap();
        let snap = game.undo(10);
        assert_eq!(snap.ply, 0);
        assert_eq!(snap.fen, GameController::new().fen());
    }

    #[test]
    fn restore_adopts_room_state() {
        let mut game = GameController::new();
        game.apply_move(mv("d2d4"), MoveSource::Local).unwrap();

        let start = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
        let snap = game
            .restore(start, &["e2e4".into(), "e7e5".into()])
            .unwrap();
        assert_eq!(snap.ply, 2);
        assert_eq!(snap.turn, Color::White);
        assert_eq!(game.history()[0].san, "e4");
    }

    #[test]
    fn restore_rejects_a_history_that_does_not_replay() {
        let mut game = GameController::new();
        game.apply_move(mv("e2e4"), MoveSource::Local).unwrap();
        let before = game.fen();

        let start = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
        assert!(game.restore(start, &["e2e5".into()]).is_err());
        assert_eq!(game.fen(), before);
        assert_eq!(game.history().len(), 1);
    }

    #[test]
    fn legal_targets_lists_pawn_pushes() {
        let game = GameController::new();
        let targets = game.legal_targets(Square::E2);
        assert_eq!(targets.len(), 2);
        assert!(targets.contains(&Square::E3));
        assert!(targets.contains(&Square::E4));
    }
}
