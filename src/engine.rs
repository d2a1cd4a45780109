pub mod process;
pub mod session;

pub use process::ProcessTransport;
pub use session::{EngineSession, SessionConfig, SessionHandle, SessionState};

use async_trait::async_trait;
use shakmaty::uci::UciMove;

use crate::game::MoveRequest;
use crate::score::Eval;

/// Byte pipe to the engine worker. The session owns exactly one of these and
/// nothing else ever writes to it.
#[async_trait]
pub trait EngineTransport: Send {
    async fn send(&mut self, line: &str) -> anyhow::Result<()>;

    /// Next line of engine output, or `None` once the worker is gone.
    async fn recv(&mut self) -> Option<String>;
}

/// Search constraints passed through to the engine. The engine applies
/// whichever bound it hits first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchLimits {
    pub max_depth: Option<u32>,
    pub max_time_ms: Option<u64>,
}

impl Default for SearchLimits {
    fn default() -> Self {
        SearchLimits {
            max_depth: Some(12),
            max_time_ms: Some(800),
        }
    }
}

/// Snapshot of the engine's current thinking, replaced wholesale on every
/// info line. The eval is already normalized to the white-positive
/// perspective.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEvaluation {
    pub depth: Option<u32>,
    pub eval: Option<Eval>,
    pub nodes: Option<u64>,
    pub nps: Option<u64>,
    pub pv: Vec<UciMove>,
}

impl EngineEvaluation {
    pub fn best_move(&self) -> Option<&UciMove> {
        self.pv.first()
    }
}

/// What the session reports back to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Handshake completed; searches may be issued.
    Ready,
    Evaluation(EngineEvaluation),
    /// A search concluded. `best` is `None` when the engine had no legal move
    /// to offer (terminal position).
    SearchFinished {
        token: u64,
        best: Option<MoveRequest>,
    },
    /// The session is gone for good; constructing a new one is the only
    /// recovery.
    Offline { reason: String },
}

/// The slice of the session the arbiter needs: fire-and-forget search
/// control.
pub trait SearchControl: Send {
    fn start_search(&self, fen: String, limits: SearchLimits);
    fn cancel(&self);
}
