use std::env;
use std::path::PathBuf;

use anyhow::Result;
use env_logger::{Env, Target};
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use chessbaku::engine::{EngineSession, ProcessTransport, SessionConfig, SessionHandle};
use chessbaku::game::{MoveRequest, Snapshot};
use chessbaku::{ModeArbiter, SearchLimits};

#[tokio::main]
async fn main() -> Result<()> {
    // start with "./chessbaku 2>&1 | tee -a /path/to/chessbaku.log" for a log-file
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .target(Target::Stdout)
        .init();

    let engine_path = env::var("UCI_ENGINE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("stockfish"));

    let transport = ProcessTransport::spawn(&engine_path)?;
    let (session, mut engine_events) = EngineSession::spawn(transport, SessionConfig::default());

    let mut arbiter = ModeArbiter::new(Box::new(session.clone()), SearchLimits::default());
    let mut snapshots = arbiter.game_mut().subscribe();

    info!("playing against {} - type moves like e2e4, or: new / undo / switch / status / quit", engine_path.display());
    print_snapshot(&arbiter.game().snapshot());

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = engine_events.recv() => match event {
                Some(event) => arbiter.handle_engine_event(event),
                None => {
                    error!("engine session ended");
                    break;
                }
            },
            snapshot = snapshots.recv() => {
                if let Some(snapshot) = snapshot {
                    print_snapshot(&snapshot);
                    if let Some(eval) = arbiter.last_eval().and_then(|e| e.eval) {
                        info!("eval: {eval}");
                    }
                }
            },
            line = input.next_line() => {
                let Some(line) = line? else { break };
                if !handle_command(&mut arbiter, &session, line.trim()).await {
                    break;
                }
            },
        }
    }

    session.shutdown();
    Ok(())
}

/// Returns false when the player asked to quit.
async fn handle_command(
    arbiter: &mut ModeArbiter,
    session: &SessionHandle,
    command: &str,
) -> bool {
    match command {
        "" => {}
        "quit" | "exit" => return false,
        "new" => {
            arbiter.new_game().await;
        }
        "undo" => {
            arbiter.undo();
        }
        "switch" => {
            let side = arbiter.switch_side();
            info!("you now play {side:?}");
        }
        "status" => info!("engine: {:?}", session.state()),
        token => match token.parse::<MoveRequest>() {
            Ok(mv) => {
                if let Err(reason) = arbiter.handle_local_move(mv).await {
                    warn!("{reason}");
                }
            }
            Err(_) => warn!("unrecognized command: {token}"),
        },
    }
    true
}

fn print_snapshot(snapshot: &Snapshot) {
    match &snapshot.last_move {
        Some(played) => info!(
            "{}. {} | {:?} to move | {:?}",
            snapshot.ply, played.san, snapshot.turn, snapshot.status
        ),
        None => info!("new game | {:?} to move", snapshot.turn),
    }
}
