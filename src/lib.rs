//! Core of a chess app: rules-checked game state, a UCI engine session, and
//! a mode arbiter that routes moves between the local player, the engine, and
//! a multiplayer room.

pub mod arbiter;
pub mod engine;
pub mod game;
pub mod net;
pub mod score;
pub mod uci;
pub mod util;

pub use arbiter::{Mode, ModeArbiter};
pub use engine::{
    EngineEvaluation, EngineSession, ProcessTransport, SearchControl, SearchLimits,
    SessionConfig, SessionEvent, SessionHandle, SessionState,
};
pub use game::{GameController, MoveRejected, MoveRequest, MoveSource, Snapshot, TerminalStatus};
pub use score::{Eval, RelScore};
