//! # Hosted Server Process
//!
//! A server binary spawned by the bridge as `<binary> <address> <version>`.
//!
//! The child is killed when this handle is dropped, so an abandoned connect never
//! leaves an orphaned server behind.

use std::process::ExitStatus;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Child;
use tokio::process::Command;

use crate::config::ServerCommand;

/// Reported while the server is still running.
pub const EXIT_STILL_RUNNING: i32 = 259;
/// The server was started with a version it does not speak.
pub const EXIT_VERSION_MISMATCH: i32 = 252;
/// The server failed during startup for another reason.
pub const EXIT_OTHER_ERROR: i32 = 253;
pub const EXIT_NORMAL: i32 = 0;

/// How a hosted server exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerExit {
    /// `None` when the process was ended by a signal.
    pub code: Option<i32>,
}

impl ServerExit {
    fn from_status(status: ExitStatus) -> Self {
        Self { code: status.code() }
    }

    pub fn describe(&self) -> &'static str {
        match self.code {
            Some(EXIT_NORMAL) => "server exited normally",
            Some(EXIT_VERSION_MISMATCH) => "server version mismatch",
            Some(EXIT_OTHER_ERROR) => "server failed to start",
            Some(EXIT_STILL_RUNNING) => "server is still running",
            Some(_) => "server exited with an error",
            None => "server was terminated by a signal",
        }
    }
}

impl std::fmt::Display for ServerExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (exit code {})", self.describe(), code),
            None => write!(f, "{}", self.describe()),
        }
    }
}

pub struct HostedServer {
    child: Child,
    pid: Option<u32>,
}

impl HostedServer {
    pub fn spawn(command: &ServerCommand, address: &str) -> std::io::Result<Self> {
        let mut cmd = Command::new(&command.binary);
        cmd.arg(address)
            .arg(&command.version)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn()?;
        let pid = child.id();
        tracing::info!(binary = %command.binary.display(), ?pid, %address, "spawned server");
        Ok(Self { child, pid })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// The exit status if the process has already ended.
    pub fn try_exit(&mut self) -> Option<ServerExit> {
        match self.child.try_wait() {
            Ok(status) => status.map(ServerExit::from_status),
            Err(e) => {
                tracing::warn!(pid = ?self.pid, error = %e, "failed to poll server process");
                None
            }
        }
    }

    /// Sends the kill signal without waiting for the process to go away.
    pub fn start_kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            // Already reaped is the common case here.
            tracing::debug!(pid = ?self.pid, error = %e, "kill failed");
        }
    }

    /// Kills the process and reaps it.
    pub async fn kill(&mut self) {
        tracing::info!(pid = ?self.pid, "killing server");
        if let Err(e) = self.child.kill().await {
            tracing::warn!(pid = ?self.pid, error = %e, "failed to kill server");
        }
    }

    /// Waits up to `grace` for the process to exit on its own, then kills it.
    pub async fn shutdown(&mut self, grace: Duration) -> Option<ServerExit> {
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                let exit = ServerExit::from_status(status);
                tracing::info!(pid = ?self.pid, %exit, "server exited");
                Some(exit)
            }
            Ok(Err(e)) => {
                tracing::warn!(pid = ?self.pid, error = %e, "failed to wait for server");
                self.kill().await;
                None
            }
            Err(_) => {
                tracing::warn!(pid = ?self.pid, ?grace, "server outlived shutdown timeout");
                self.kill().await;
                None
            }
        }
    }
}
