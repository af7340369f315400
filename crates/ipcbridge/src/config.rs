//! # Configuration
//!
//! Plain structs with conservative defaults and chained setters.

use std::path::PathBuf;
use std::time::Duration;

/// How to launch a server process the bridge hosts itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCommand {
    pub binary: PathBuf,
    pub working_dir: Option<PathBuf>,
    /// Passed after the address; the server exits with
    /// [`EXIT_VERSION_MISMATCH`](crate::host::EXIT_VERSION_MISMATCH) if it disagrees.
    pub version: String,
}

impl ServerCommand {
    pub fn new(binary: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            working_dir: None,
            version: version.into(),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Connection attempts before giving up.
    pub connect_attempts: u32,
    /// Pause between failed attempts.
    pub retry_delay: Duration,
    /// Bound on a single attempt.
    pub connect_timeout: Duration,
    /// Default bound on a call. `None` waits until a response or disconnect.
    pub call_timeout: Option<Duration>,
    /// How long a hosted server gets to exit after `System.Shutdown`.
    pub shutdown_timeout: Duration,
    /// Set to allow [`Bridge::host`](crate::Bridge::host).
    pub server: Option<ServerCommand>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl BridgeConfig {
    pub fn standard() -> Self {
        Self {
            connect_attempts: 5,
            retry_delay: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(5),
            call_timeout: None,
            shutdown_timeout: Duration::from_secs(2),
            server: None,
        }
    }

    pub fn with_connect_attempts(mut self, attempts: u32) -> Self {
        self.connect_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_server(mut self, server: ServerCommand) -> Self {
        self.server = Some(server);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Identifies this server in logs.
    pub name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "ipc-server".into(),
        }
    }
}

impl ServerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}
