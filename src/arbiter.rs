//! Routing between the board, the engine session, and the room transport.
//!
//! The arbiter decides, per mode, who answers a local move: the engine
//! (solo) or the room server (multiplayer). It owns the [`GameController`]
//! and is the only component that calls `apply_move`, so a move can never
//! race itself through two paths.

use anyhow::Result;
use log::{debug, info, warn};

use crate::engine::{EngineEvaluation, SearchControl, SearchLimits, SessionEvent};
use crate::game::{GameController, MoveRejected, MoveRequest, MoveSource, Snapshot};
use crate::net::{ClientEvent, Room, ServerEvent, Transport, TransportError};
use shakmaty::Color;

/// Who the local player faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    SoloVsEngine,
    /// In a room. `peer_present` stays false until the second seat fills; the
    /// board is locked for play until then.
    Multiplayer { peer_present: bool },
}

pub struct ModeArbiter {
    game: GameController,
    engine: Box<dyn SearchControl>,
    transport: Option<Box<dyn Transport>>,
    mode: Mode,
    local_side: Color,
    limits: SearchLimits,
    room: Option<Room>,
    last_eval: Option<EngineEvaluation>,
    engine_offline: bool,
}

impl ModeArbiter {
    pub fn new(engine: Box<dyn SearchControl>, limits: SearchLimits) -> ModeArbiter {
        ModeArbiter {
            game: GameController::new(),
            engine,
            transport: None,
            mode: Mode::SoloVsEngine,
            local_side: Color::White,
            limits,
            room: None,
            last_eval: None,
            engine_offline: false,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn local_side(&self) -> Color {
        self.local_side
    }

    pub fn game(&self) -> &GameController {
        &self.game
    }

    pub fn game_mut(&mut self) -> &mut GameController {
        &mut self.game
    }

    /// Latest engine evaluation of the position being searched, if any.
    pub fn last_eval(&self) -> Option<&EngineEvaluation> {
        self.last_eval.as_ref()
    }

    /// Attaches a room transport and asks to join. The mode flips to
    /// multiplayer once the server confirms with `RoomJoined`.
    pub async fn join_room(
        &mut self,
        mut transport: Box<dyn Transport>,
        room_id: &str,
        identity: &str,
    ) -> Result<(), TransportError> {
        transport
            .emit(ClientEvent::JoinRoom {
                room_id: room_id.to_string(),
                identity: identity.to_string(),
            })
            .await?;
        self.transport = Some(transport);
        Ok(())
    }

    /// A move from the local player. Turn ownership is checked here, before
    /// the rules: in multiplayer the opponent's pieces are simply not ours to
    /// move, whatever the position says.
    pub async fn handle_local_move(
        &mut self,
        mv: MoveRequest,
    ) -> Result<Snapshot, MoveRejected> {
        if self.game.turn() != self.local_side {
            return Err(MoveRejected::OutOfTurn);
        }
        if let Mode::Multiplayer { peer_present: false } = self.mode {
            // nobody to answer yet
            return Err(MoveRejected::OutOfTurn);
        }

        let snapshot = self.game.apply_move(mv, MoveSource::Local)?;

        match self.mode {
            Mode::SoloVsEngine => self.search_if_engines_turn(),
            Mode::Multiplayer { .. } => {
                let event = self.room.as_ref().map(|room| ClientEvent::MakeMove {
                    room_id: room.id.clone(),
                    mv: mv.to_string(),
                    fen: snapshot.fen.clone(),
                    seq: self.game.history().len() as u32,
                });
                if let Some(event) = event {
                    self.emit(event).await;
                }
            }
        }

        Ok(snapshot)
    }

    /// Events coming back from the engine session.
    pub fn handle_engine_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Ready => {
                self.engine_offline = false;
                if self.mode == Mode::SoloVsEngine {
                    self.search_if_engines_turn();
                }
            }
            SessionEvent::Evaluation(eval) => {
                self.last_eval = Some(eval);
            }
            SessionEvent::SearchFinished { token, best } => {
                debug!("search #{token} finished: {best:?}");
                let Some(best) = best else {
                    info!("engine found no move to play");
                    return;
                };
                if self.mode != Mode::SoloVsEngine {
                    // a room game took over while the engine was thinking
                    return;
                }
                if let Err(reason) = self.game.apply_move(best, MoveSource::Engine) {
                    warn!("engine reply {best} was refused: {reason}");
                }
            }
            SessionEvent::Offline { reason } => {
                warn!("engine unavailable: {reason}");
                self.engine_offline = true;
            }
        }
    }

    /// Events pushed by the room server.
    pub async fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::RoomJoined { room_id, participants, fen, history, seq, chat } => {
                if let Err(err) = self.game.restore(&fen, &history) {
                    warn!("could not adopt room state: {err}");
                    self.request_resync(&room_id).await;
                    return;
                }
                if self.game.history().len() as u32 != seq {
                    warn!("room history length disagrees with its seq, resyncing");
                    self.request_resync(&room_id).await;
                    return;
                }
                info!("joined room {room_id} with {} participant(s)", participants.len());
                let peer_present = participants.len() > 1;
                self.room = Some(Room { id: room_id, participants, chat });
                self.mode = Mode::Multiplayer { peer_present };
                self.engine.cancel();
            }
            ServerEvent::StartGame => {
                if let Mode::Multiplayer { ref mut peer_present } = self.mode {
                    *peer_present = true;
                }
            }
            ServerEvent::Move { mv, fen, seq } => self.handle_remote_move(mv, fen, seq).await,
            ServerEvent::NewGame => {
                self.last_eval = None;
                self.game.reset();
            }
            ServerEvent::ChatMessage { entry } => {
                info!("[{}] {}", entry.from, entry.text);
                if let Some(room) = self.room.as_mut() {
                    room.chat.push(entry);
                }
            }
            ServerEvent::OpponentLeft => {
                info!("opponent left, continuing against the engine");
                self.transport = None;
                self.room = None;
                self.mode = Mode::SoloVsEngine;
                self.search_if_engines_turn();
            }
        }
    }

    async fn handle_remote_move(&mut self, mv: String, fen: String, seq: u32) {
        if !matches!(self.mode, Mode::Multiplayer { .. }) {
            // a late echo from a room we already left
            debug!("remote move {mv} ignored outside multiplayer");
            return;
        }
        let room_id = match self.room.as_ref() {
            Some(room) => room.id.clone(),
            None => return,
        };

        let expected = self.game.history().len() as u32 + 1;
        if seq != expected {
            warn!("remote move out of sequence (got {seq}, expected {expected})");
            self.request_resync(&room_id).await;
            return;
        }

        let parsed: Result<MoveRequest> = mv.parse();
        let applied = match parsed {
            Ok(request) => self.game.apply_move(request, MoveSource::Remote),
            Err(err) => {
                warn!("unreadable remote move {mv:?}: {err}");
                self.request_resync(&room_id).await;
                return;
            }
        };

        match applied {
            Ok(snapshot) if snapshot.fen == fen => {}
            Ok(snapshot) => {
                // boards agree on legality but not on position: drift
                warn!("position diverged from the room after {mv} ({})", snapshot.fen);
                self.request_resync(&room_id).await;
            }
            Err(reason) => {
                warn!("remote move {mv} was refused locally: {reason}");
                self.request_resync(&room_id).await;
            }
        }
    }

    /// Starts over. Solo: the engine opens whenever it holds the white
    /// pieces. Multiplayer: the server is told and will echo `NewGame` to
    /// both seats.
    pub async fn new_game(&mut self) -> Snapshot {
        self.engine.cancel();
        self.last_eval = None;
        let snapshot = self.game.reset();

        match self.mode {
            Mode::SoloVsEngine => self.search_if_engines_turn(),
            Mode::Multiplayer { .. } => {
                let event = self
                    .room
                    .as_ref()
                    .map(|room| ClientEvent::NewGame { room_id: room.id.clone() });
                if let Some(event) = event {
                    self.emit(event).await;
                }
            }
        }
        snapshot
    }

    /// Takes back the local player's last move. Solo play unwinds the engine
    /// reply too, so the player is back on turn.
    pub fn undo(&mut self) -> Snapshot {
        self.engine.cancel();
        let plies = match self.mode {
            Mode::SoloVsEngine => 2,
            Mode::Multiplayer { .. } => 1,
        };
        self.game.undo(plies)
    }

    /// Swaps the local player to the other color and starts a fresh game.
    /// Any search still running belongs to the seat the player just took, so
    /// it is cancelled before the engine is consulted again.
    pub fn switch_side(&mut self) -> Color {
        self.engine.cancel();
        self.local_side = !self.local_side;
        info!("local player now plays {:?}", self.local_side);
        self.last_eval = None;
        self.game.reset();
        if self.mode == Mode::SoloVsEngine {
            self.search_if_engines_turn();
        }
        self.local_side
    }

    pub async fn send_chat(&mut self, message: &str) {
        let event = self.room.as_ref().map(|room| ClientEvent::ChatMessage {
            room_id: room.id.clone(),
            message: message.to_string(),
        });
        if let Some(event) = event {
            self.emit(event).await;
        }
    }

    fn search_if_engines_turn(&mut self) {
        if self.engine_offline {
            return;
        }
        if self.game.turn() == self.local_side || self.game.status().is_over() {
            return;
        }
        self.engine.start_search(self.game.fen(), self.limits);
    }

    async fn request_resync(&mut self, room_id: &str) {
        let room_id = room_id.to_string();
        self.emit(ClientEvent::ResyncRequest { room_id }).await;
    }

    async fn emit(&mut self, event: ClientEvent) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        match transport.emit(event).await {
            Ok(()) => {}
            Err(TransportError::ConnectionLost) => {
                warn!("room connection lost, falling back to solo play");
                self.transport = None;
                self.room = None;
                self.mode = Mode::SoloVsEngine;
                self.search_if_engines_turn();
            }
            Err(err) => warn!("transport error: {err}"),
        }
    }
}
