//! Engine session: one worker, one search in flight, token-tagged results.
//!
//! The protocol logic lives in [`SessionCore`], a synchronous state machine
//! that consumes parsed lines and emits commands to send plus events to
//! surface. The async driver around it owns the transport and does nothing
//! but shuttle bytes, which keeps every interesting transition unit-testable
//! without a worker.
//!
//! Single-flight discipline: a `start_search` while another search runs sends
//! `stop`, remembers the new request, and only issues it once the stale
//! `bestmove` has arrived and been discarded. Results carry a monotonically
//! increasing token so a caller can never observe two best-moves for one
//! request.

use std::time::Duration;

use log::{debug, info, warn};
use shakmaty::Color;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};

use crate::game::MoveRequest;
use crate::score::Eval;
use crate::uci::{self, EngineLine, UciCommand};
use crate::util;

use super::{EngineEvaluation, EngineTransport, SearchControl, SearchLimits, SessionEvent};

/// Lifecycle of a session. `Offline` is terminal; recovery means building a
/// new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Handshaking,
    Ready,
    Searching,
    Stopped,
    Offline(String),
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub handshake_timeout: Duration,
    /// `setoption` pairs sent once the engine has identified itself.
    pub options: Vec<(String, String)>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            handshake_timeout: Duration::from_secs(10),
            options: Vec::new(),
        }
    }
}

struct PendingSearch {
    fen: String,
    limits: SearchLimits,
}

/// Commands to send and events to surface after one input was processed.
#[derive(Default)]
struct Step {
    commands: Vec<UciCommand>,
    events: Vec<SessionEvent>,
}

impl Step {
    fn none() -> Step {
        Step::default()
    }
}

struct SessionCore {
    state: SessionState,
    options: Vec<(String, String)>,
    token: u64,
    cancelled: bool,
    stop_sent: bool,
    pending: Option<PendingSearch>,
    search_side: Color,
}

impl SessionCore {
    fn new(options: Vec<(String, String)>) -> SessionCore {
        SessionCore {
            state: SessionState::Uninitialized,
            options,
            token: 0,
            cancelled: false,
            stop_sent: false,
            pending: None,
            search_side: Color::White,
        }
    }

    fn state(&self) -> &SessionState {
        &self.state
    }

    fn begin_handshake(&mut self) -> Step {
        self.state = SessionState::Handshaking;
        Step {
            commands: vec![UciCommand::Uci],
            events: Vec::new(),
        }
    }

    fn start_search(&mut self, fen: String, limits: SearchLimits) -> Step {
        match &self.state {
            SessionState::Offline(reason) => {
                warn!("search requested while offline ({reason})");
                Step {
                    commands: Vec::new(),
                    events: vec![SessionEvent::Offline { reason: reason.clone() }],
                }
            }
            SessionState::Stopped => {
                warn!("search requested after shutdown, dropping");
                Step::none()
            }
            SessionState::Uninitialized | SessionState::Handshaking => {
                // same as the handshake window in any GUI: too early, drop it
                warn!("search requested before the engine was ready, dropping");
                Step::none()
            }
            SessionState::Ready => self.begin_search(fen, limits),
            SessionState::Searching => {
                self.pending = Some(PendingSearch { fen, limits });
                if self.stop_sent {
                    Step::none()
                } else {
                    self.stop_sent = true;
                    Step {
                        commands: vec![UciCommand::Stop],
                        events: Vec::new(),
                    }
                }
            }
        }
    }

    fn begin_search(&mut self, fen: String, limits: SearchLimits) -> Step {
        self.token += 1;
        self.cancelled = false;
        self.stop_sent = false;
        self.search_side = util::side_to_move(&fen);
        self.state = SessionState::Searching;
        info!(
            "search #{} (depth {:?}, movetime {:?}ms)",
            self.token, limits.max_depth, limits.max_time_ms
        );
        Step {
            commands: vec![
                UciCommand::Position { fen },
                UciCommand::Go {
                    depth: limits.max_depth,
                    movetime_ms: limits.max_time_ms,
                },
            ],
            events: Vec::new(),
        }
    }

    /// Advisory stop. Valid only while searching, a no-op everywhere else.
    fn cancel(&mut self) -> Step {
        if self.state != SessionState::Searching || self.cancelled {
            return Step::none();
        }
        self.cancelled = true;
        if self.stop_sent {
            Step::none()
        } else {
            self.stop_sent = true;
            Step {
                commands: vec![UciCommand::Stop],
                events: Vec::new(),
            }
        }
    }

    fn on_line(&mut self, raw: &str) -> Step {
        match uci::parse_line(raw) {
            EngineLine::Handshake(_) => {
                if self.state == SessionState::Handshaking {
                    self.state = SessionState::Ready;
                    info!("engine ready");
                    let mut commands: Vec<UciCommand> = self
                        .options
                        .iter()
                        .map(|(name, value)| UciCommand::SetOption {
                            name: name.clone(),
                            value: value.clone(),
                        })
                        .collect();
                    commands.push(UciCommand::NewGame);
                    Step {
                        commands,
                        events: vec![SessionEvent::Ready],
                    }
                } else {
                    Step::none()
                }
            }
            EngineLine::Info(search_info) => {
                // info from a search we already gave up on is noise
                if self.state != SessionState::Searching
                    || self.cancelled
                    || self.pending.is_some()
                {
                    return Step::none();
                }
                let evaluation = EngineEvaluation {
                    depth: search_info.depth,
                    eval: search_info
                        .score
                        .map(|rel| Eval::from_relative(rel, self.search_side)),
                    nodes: search_info.nodes,
                    nps: search_info.nps,
                    pv: search_info.pv,
                };
                Step {
                    commands: Vec::new(),
                    events: vec![SessionEvent::Evaluation(evaluation)],
                }
            }
            EngineLine::BestMove { mv, ponder: _ } => {
                if self.state != SessionState::Searching {
                    debug!("unsolicited bestmove, dropping");
                    return Step::none();
                }
                if let Some(next) = self.pending.take() {
                    // stale result of the superseded search: discard, restart
                    debug!("discarding stale bestmove for search #{}", self.token);
                    return self.begin_search(next.fen, next.limits);
                }
                self.state = SessionState::Ready;
                if self.cancelled {
                    self.cancelled = false;
                    debug!("discarding bestmove of a cancelled search");
                    return Step::none();
                }
                Step {
                    commands: Vec::new(),
                    events: vec![SessionEvent::SearchFinished {
                        token: self.token,
                        best: mv.as_ref().and_then(MoveRequest::from_uci),
                    }],
                }
            }
            EngineLine::Ignored(line) => {
                if !line.is_empty() {
                    debug!("ignoring engine line: {line}");
                }
                Step::none()
            }
        }
    }

    /// The worker is unreachable. Terminal: a running search is implicitly
    /// aborted, no best-move will ever be surfaced for it.
    fn transport_closed(&mut self, reason: String) -> Step {
        if matches!(self.state, SessionState::Offline(_) | SessionState::Stopped) {
            return Step::none();
        }
        warn!("engine session offline: {reason}");
        self.pending = None;
        self.cancelled = false;
        self.state = SessionState::Offline(reason.clone());
        Step {
            commands: Vec::new(),
            events: vec![SessionEvent::Offline { reason }],
        }
    }

    fn shutdown(&mut self) -> Step {
        let already_dead =
            matches!(self.state, SessionState::Offline(_) | SessionState::Stopped);
        self.state = SessionState::Stopped;
        Step {
            commands: if already_dead { Vec::new() } else { vec![UciCommand::Quit] },
            events: Vec::new(),
        }
    }
}

enum SessionCommand {
    StartSearch { fen: String, limits: SearchLimits },
    Cancel,
    Shutdown,
}

/// Cheap cloneable handle to a running session task.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    state_rx: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(SessionCommand::Shutdown);
    }
}

impl SearchControl for SessionHandle {
    fn start_search(&self, fen: String, limits: SearchLimits) {
        let _ = self
            .cmd_tx
            .send(SessionCommand::StartSearch { fen, limits });
    }

    fn cancel(&self) {
        let _ = self.cmd_tx.send(SessionCommand::Cancel);
    }
}

pub struct EngineSession;

impl EngineSession {
    /// Spawns the driver task for `transport` and hands back a control handle
    /// plus the event stream.
    pub fn spawn<T>(
        transport: T,
        config: SessionConfig,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>)
    where
        T: EngineTransport + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Uninitialized);

        tokio::spawn(run(transport, config, cmd_rx, event_tx, state_tx));

        (SessionHandle { cmd_tx, state_rx }, event_rx)
    }
}

async fn run<T: EngineTransport>(
    mut transport: T,
    config: SessionConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    state_tx: watch::Sender<SessionState>,
) {
    let mut core = SessionCore::new(config.options.clone());
    let mut alive = true;
    let handshake_deadline = Instant::now() + config.handshake_timeout;

    let step = core.begin_handshake();
    flush(&mut core, step, &mut transport, &mut alive, &event_tx, &state_tx).await;

    loop {
        if *core.state() == SessionState::Stopped {
            break;
        }
        let handshaking = *core.state() == SessionState::Handshaking;

        let step = tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(SessionCommand::StartSearch { fen, limits }) => {
                    core.start_search(fen, limits)
                }
                Some(SessionCommand::Cancel) => core.cancel(),
                Some(SessionCommand::Shutdown) | None => core.shutdown(),
            },
            line = transport.recv(), if alive => match line {
                Some(line) => {
                    debug!("engine -> {line}");
                    core.on_line(&line)
                }
                None => {
                    alive = false;
                    core.transport_closed("engine output stream closed".into())
                }
            },
            _ = sleep_until(handshake_deadline), if handshaking && alive => {
                alive = false;
                core.transport_closed("handshake timed out".into())
            }
        };

        flush(&mut core, step, &mut transport, &mut alive, &event_tx, &state_tx).await;
    }
}

async fn flush<T: EngineTransport>(
    core: &mut SessionCore,
    step: Step,
    transport: &mut T,
    alive: &mut bool,
    event_tx: &mpsc::UnboundedSender<SessionEvent>,
    state_tx: &watch::Sender<SessionState>,
) {
    // publish the state before anything observable, so a caller woken by an
    // event or a written command already sees the transition
    let _ = state_tx.send_replace(core.state().clone());
    for event in step.events {
        let _ = event_tx.send(event);
    }
    for cmd in step.commands {
        if !*alive {
            continue;
        }
        debug!("engine <- {cmd}");
        if let Err(err) = transport.send(&cmd.to_string()).await {
            *alive = false;
            let fallout = core.transport_closed(format!("engine write failed: {err}"));
            let _ = state_tx.send_replace(core.state().clone());
            for event in fallout.events {
                let _ = event_tx.send(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::Eval;

    const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
    const BLACK_FEN: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1";

    fn ready_core() -> SessionCore {
        let mut core = SessionCore::new(Vec::new());
        let step = core.begin_handshake();
        assert_eq!(step.commands, vec![UciCommand::Uci]);
        let step = core.on_line("uciok");
        assert_eq!(step.events, vec![SessionEvent::Ready]);
        core
    }

    #[test]
    fn handshake_reaches_ready_and_starts_a_new_game() {
        let mut core = SessionCore::new(vec![("Threads".into(), "2".into())]);
        core.begin_handshake();
        assert_eq!(*core.state(), SessionState::Handshaking);

        let step = core.on_line("uciok");
        assert_eq!(*core.state(), SessionState::Ready);
        assert_eq!(
            step.commands,
            vec![
                UciCommand::SetOption { name: "Threads".into(), value: "2".into() },
                UciCommand::NewGame,
            ]
        );
    }

    #[test]
    fn search_issues_position_then_go() {
        let mut core = ready_core();
        let step = core.start_search(START_FEN.into(), SearchLimits::default());
        assert_eq!(
            step.commands,
            vec![
                UciCommand::Position { fen: START_FEN.into() },
                UciCommand::Go { depth: Some(12), movetime_ms: Some(800) },
            ]
        );
        assert_eq!(*core.state(), SessionState::Searching);
    }

    #[test]
    fn evaluation_is_normalized_for_the_searched_side() {
        let mut core = ready_core();
        core.start_search(BLACK_FEN.into(), SearchLimits::default());

        let step = core.on_line("info depth 10 score cp 35 pv e7e5");
        let [SessionEvent::Evaluation(eval)] = step.events.as_slice() else {
            panic!("expected a single evaluation event");
        };
        // engine spoke for black, canonical view flips the sign
        assert_eq!(eval.eval, Some(Eval::Cp(-35)));
        assert_eq!(eval.depth, Some(10));
        assert_eq!(eval.best_move().unwrap().to_string(), "e7e5");
    }

    #[test]
    fn bestmove_finishes_the_search() {
        let mut core = ready_core();
        core.start_search(START_FEN.into(), SearchLimits::default());

        let step = core.on_line("bestmove e2e4 ponder e7e5");
        let [SessionEvent::SearchFinished { token: 1, best: Some(best) }] =
            step.events.as_slice()
        else {
            panic!("expected a finished search");
        };
        assert_eq!(best.to_string(), "e2e4");
        assert_eq!(*core.state(), SessionState::Ready);
    }

    #[test]
    fn bestmove_none_surfaces_an_empty_result() {
        let mut core = ready_core();
        core.start_search(START_FEN.into(), SearchLimits::default());

        let step = core.on_line("bestmove (none)");
        assert_eq!(
            step.events,
            vec![SessionEvent::SearchFinished { token: 1, best: None }]
        );
    }

    #[test]
    fn overlapping_search_stops_then_restarts_without_a_stale_result() {
        let mut core = ready_core();
        core.start_search(START_FEN.into(), SearchLimits::default());

        // second request while searching: a single stop goes out
        let step = core.start_search(BLACK_FEN.into(), SearchLimits::default());
        assert_eq!(step.commands, vec![UciCommand::Stop]);

        // a third request just replaces the queued one
        let step = core.start_search(BLACK_FEN.into(), SearchLimits::default());
        assert!(step.commands.is_empty());

        // the stale bestmove is swallowed and the queued search goes out
        let step = core.on_line("bestmove e2e4");
        assert!(step.events.is_empty());
        assert_eq!(
            step.commands,
            vec![
                UciCommand::Position { fen: BLACK_FEN.into() },
                UciCommand::Go { depth: Some(12), movetime_ms: Some(800) },
            ]
        );
        assert_eq!(*core.state(), SessionState::Searching);

        // only the fresh search ever produces a result, under a new token
        let step = core.on_line("bestmove e7e5");
        let [SessionEvent::SearchFinished { token: 2, best: Some(best) }] =
            step.events.as_slice()
        else {
            panic!("expected the restarted search to finish");
        };
        assert_eq!(best.to_string(), "e7e5");
    }

    #[test]
    fn info_between_stop_and_restart_is_suppressed() {
        let mut core = ready_core();
        core.start_search(START_FEN.into(), SearchLimits::default());
        core.start_search(BLACK_FEN.into(), SearchLimits::default());

        let step = core.on_line("info depth 20 score cp 99 pv e2e4");
        assert!(step.events.is_empty());
    }

    #[test]
    fn cancel_discards_the_trailing_bestmove() {
        let mut core = ready_core();
        core.start_search(START_FEN.into(), SearchLimits::default());

        let step = core.cancel();
        assert_eq!(step.commands, vec![UciCommand::Stop]);

        let step = core.on_line("bestmove e2e4");
        assert!(step.events.is_empty());
        assert_eq!(*core.state(), SessionState::Ready);
    }

    #[test]
    fn cancel_outside_a_search_is_a_noop() {
        let mut core = ready_core();
        let step = core.cancel();
        assert!(step.commands.is_empty() && step.events.is_empty());
    }

    #[test]
    fn search_before_ready_is_dropped() {
        let mut core = SessionCore::new(Vec::new());
        core.begin_handshake();
        let step = core.start_search(START_FEN.into(), SearchLimits::default());
        assert!(step.commands.is_empty() && step.events.is_empty());
    }

    #[test]
    fn offline_is_terminal_and_resurfaces_on_every_request() {
        let mut core = ready_core();
        core.start_search(START_FEN.into(), SearchLimits::default());

        let step = core.transport_closed("worker died".into());
        assert_eq!(
            step.events,
            vec![SessionEvent::Offline { reason: "worker died".into() }]
        );

        // the aborted search never completes, later requests only re-surface
        let step = core.start_search(START_FEN.into(), SearchLimits::default());
        assert!(step.commands.is_empty());
        assert_eq!(
            step.events,
            vec![SessionEvent::Offline { reason: "worker died".into() }]
        );
        assert_eq!(*core.state(), SessionState::Offline("worker died".into()));
    }

    #[test]
    fn unsolicited_lines_do_nothing() {
        let mut core = ready_core();
        assert!(core.on_line("bestmove e2e4").events.is_empty());
        assert!(core.on_line("id name Stockfish").events.is_empty());
        assert!(core.on_line("readyok").events.is_empty());
    }
}
