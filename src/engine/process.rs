//! Transport over a local engine executable.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout};

use super::EngineTransport;

/// An engine worker as a child process, spoken to over stdin/stdout. Dropping
/// the transport kills the child.
pub struct ProcessTransport {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl ProcessTransport {
    /// Spawns the engine binary at `path` with piped stdio. Stderr is
    /// discarded; engines use it for banners, not protocol.
    pub fn spawn(path: &Path) -> Result<ProcessTransport> {
        let mut child = tokio::process::Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start engine at {}", path.display()))?;

        let stdin = child
            .stdin
            .take()
            .context("engine child has no stdin handle")?;
        let stdout = child
            .stdout
            .take()
            .context("engine child has no stdout handle")?;

        debug!("spawned engine worker: {}", path.display());

        Ok(ProcessTransport {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }
}

#[async_trait]
impl EngineTransport for ProcessTransport {
    async fn send(&mut self, line: &str) -> Result<()> {
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<String> {
        match self.stdout.next_line().await {
            Ok(line) => line,
            Err(err) => {
                warn!("error reading from engine: {err}");
                None
            }
        }
    }
}

impl Drop for ProcessTransport {
    fn drop(&mut self) {
        // quit was already sent on orderly shutdown; this covers the rest
        let _ = self.child.start_kill();
    }
}
