//! # RPC Bridge
//!
//! Turns ordinary blocking method calls into traffic on one shared, multiplexed
//! connection.
//!
//! ## Philosophy
//!
//! - **One receive path**: a pump task owns the inbound side of the transport. It
//!   decodes each reply and hands it to the registry; nothing it does can block on
//!   a caller, so one slow consumer never stalls the next response.
//! - **Many callers**: any number of threads may call at once. Each call gets its own
//!   id and waits only on its own completion.
//! - **Failure is a response**: `call` never returns `Err`. Anything that stops a
//!   call from reaching the server or the answer from coming back is reported as a
//!   transport-level [`Response`], which callers already have to handle.
//!
//! ## State machine
//!
//! ```text
//! Disconnected --connect/host--> Connecting --ok--> Connected
//!      ^                              |                 |
//!      +-------- give up / cancel ----+                 |
//!      +-------------- disconnect / peer gone ----------+
//! ```

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use ipcrpc::CallError;
use ipcrpc::CallFrame;
use ipcrpc::CallId;
use ipcrpc::Frame;
use ipcrpc::Response;
use ipcrpc::Value;
use ipcrpc::peek_id;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

use crate::config::BridgeConfig;
use crate::host::HostedServer;
use crate::host::ServerExit;
use crate::registry::PendingCallRegistry;
use crate::transport;
use crate::transport::Connector;
use crate::transport::Transport;

/// Class and function every server answers to stop serving.
pub const SHUTDOWN_CLASS: &str = "System";
pub const SHUTDOWN_FUNCTION: &str = "Shutdown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// `connect` or `host` while a connection is up.
    AlreadyConnected,
    /// `connect` or `host` while another connect is in progress.
    Busy,
    /// Every attempt failed.
    ConnectFailed {
        address: String,
        attempts: u32,
        last: transport::Error,
    },
    /// The hosted server exited before a connection was made.
    ServerExited(ServerExit),
    /// `host` without a configured server command.
    NoServerCommand,
    /// The server binary could not be started.
    Spawn(String),
    /// `disconnect` ran while the connect was in progress.
    Cancelled,
    /// The bridge's own runtime could not be built.
    Runtime(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyConnected => write!(f, "Already connected"),
            Self::Busy => write!(f, "A connect is already in progress"),
            Self::ConnectFailed { address, attempts, last } => {
                write!(f, "Failed to connect to {} after {} attempts: {}", address, attempts, last)
            }
            Self::ServerExited(exit) => write!(f, "Server exited before connecting: {}", exit),
            Self::NoServerCommand => write!(f, "No server command configured"),
            Self::Spawn(msg) => write!(f, "Failed to start server: {}", msg),
            Self::Cancelled => write!(f, "Connect cancelled by disconnect"),
            Self::Runtime(msg) => write!(f, "Failed to build runtime: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

struct Connection {
    /// Distinguishes this connection from later ones, so a pump that outlives its
    /// connection cannot tear down a newer one.
    generation: u64,
    address: String,
    transport: Arc<dyn Transport>,
    pump: JoinHandle<()>,
    server: Option<HostedServer>,
}

enum Link {
    Disconnected,
    /// Carries the attempt's generation, so a stale retry loop can tell that a
    /// later `connect` has taken over.
    Connecting(u64),
    Connected(Connection),
}

/// State shared between the bridge and its pump.
struct Shared {
    registry: PendingCallRegistry,
    link: Mutex<Link>,
    generation: AtomicU64,
}

impl Shared {
    fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transport(&self) -> Option<Arc<dyn Transport>> {
        match &*self.link() {
            Link::Connected(conn) => Some(conn.transport.clone()),
            _ => None,
        }
    }

    /// Routes one inbound message. Never blocks.
    fn dispatch(&self, msg: &[u8]) {
        match Frame::decode(msg) {
            Ok(Frame::Reply(reply)) => {
                self.registry.complete(reply.id, reply.response);
            }
            Ok(Frame::Call(call)) => {
                tracing::warn!(call_id = call.id, class = call.class, "ignoring call frame sent to client");
            }
            Err(e) => match peek_id(msg) {
                Ok(id) => {
                    tracing::warn!(call_id = id, error = %e, "malformed reply");
                    let response = Response::transport_error(format!("malformed reply: {}", e));
                    self.registry.complete(id, response);
                }
                Err(_) => {
                    tracing::warn!(error = %e, len = msg.len(), "dropping undecodable message");
                }
            },
        }
    }

    /// Called by a pump whose transport ended.
    fn connection_lost(&self, generation: u64, reason: &str) {
        let lost = {
            let mut link = self.link();
            if !matches!(&*link, Link::Connected(conn) if conn.generation == generation) {
                return;
            }
            std::mem::replace(&mut *link, Link::Disconnected)
        };

        tracing::warn!(%reason, "connection lost");
        self.registry.cancel_all(reason);
        if let Link::Connected(mut conn) = lost {
            if let Some(server) = conn.server.as_mut() {
                server.start_kill();
            }
        }
    }
}

async fn pump(shared: Arc<Shared>, transport: Arc<dyn Transport>, generation: u64) {
    let reason = loop {
        match transport.recv().await {
            Ok(Some(msg)) => shared.dispatch(&msg),
            Ok(None) => break "connection closed by server".to_string(),
            Err(e) => break format!("receive failed: {}", e),
        }
    };
    shared.connection_lost(generation, &reason);
}

/// Client side of the connection.
///
/// The blocking methods (`connect`, `call`, `disconnect`, ...) drive the matching
/// `*_async` method on the bridge's runtime and must not be called from a thread
/// that is already running async code on a tokio runtime.
pub struct Bridge {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    config: BridgeConfig,
    handle: tokio::runtime::Handle,
    runtime: Option<Runtime>,
}

impl Bridge {
    /// A bridge with its own multi-threaded runtime.
    pub fn new(connector: impl Connector, config: BridgeConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("ipcbridge")
            .build()
            .map_err(|e| Error::Runtime(e.to_string()))?;
        let handle = runtime.handle().clone();
        Ok(Self::build(connector, config, handle, Some(runtime)))
    }

    /// A bridge that spawns its pump on an existing runtime.
    pub fn with_handle(connector: impl Connector, config: BridgeConfig, handle: tokio::runtime::Handle) -> Self {
        Self::build(connector, config, handle, None)
    }

    fn build(
        connector: impl Connector,
        config: BridgeConfig,
        handle: tokio::runtime::Handle,
        runtime: Option<Runtime>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: PendingCallRegistry::new(),
                link: Mutex::new(Link::Disconnected),
                generation: AtomicU64::new(0),
            }),
            connector: Arc::new(connector),
            config,
            handle,
            runtime,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn state(&self) -> State {
        match &*self.shared.link() {
            Link::Disconnected => State::Disconnected,
            Link::Connecting(_) => State::Connecting,
            Link::Connected(_) => State::Connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == State::Connected
    }

    /// True when connected to a server this bridge spawned.
    pub fn is_hosted(&self) -> bool {
        matches!(&*self.shared.link(), Link::Connected(conn) if conn.server.is_some())
    }

    /// Number of calls waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.shared.registry.len()
    }

    // ------------------------------------------------------------------------
    //  Connection lifecycle
    // ------------------------------------------------------------------------

    pub fn connect(&self, address: &str) -> Result<()> {
        self.handle.block_on(self.connect_async(address))
    }

    /// Like [`Self::connect`] with `timeout` bounding each attempt.
    pub fn connect_with_timeout(&self, address: &str, timeout: Duration) -> Result<()> {
        self.handle.block_on(self.connect_inner(address, timeout))
    }

    pub async fn connect_async(&self, address: &str) -> Result<()> {
        self.connect_inner(address, self.config.connect_timeout).await
    }

    async fn connect_inner(&self, address: &str, attempt_timeout: Duration) -> Result<()> {
        let generation = self.begin_connecting()?;
        tracing::info!(%address, "connecting");
        match self.open(generation, address, attempt_timeout, None).await {
            Ok(transport) => self.install(generation, address, transport, None).await,
            Err(e) => {
                self.abort_connecting(generation);
                Err(e)
            }
        }
    }

    /// Spawns the configured server binary for `address` and connects to it.
    ///
    /// If no connection can be made the child is killed before returning.
    pub fn host(&self, address: &str) -> Result<()> {
        self.handle.block_on(self.host_async(address))
    }

    pub async fn host_async(&self, address: &str) -> Result<()> {
        let command = self.config.server.clone().ok_or(Error::NoServerCommand)?;
        let generation = self.begin_connecting()?;

        let mut server = match HostedServer::spawn(&command, address) {
            Ok(server) => server,
            Err(e) => {
                self.abort_connecting(generation);
                tracing::error!(binary = %command.binary.display(), error = %e, "failed to spawn server");
                return Err(Error::Spawn(e.to_string()));
            }
        };

        match self.open(generation, address, self.config.connect_timeout, Some(&mut server)).await {
            Ok(transport) => self.install(generation, address, transport, Some(server)).await,
            Err(e) => {
                server.kill().await;
                self.abort_connecting(generation);
                Err(e)
            }
        }
    }

    /// Moves `Disconnected` to `Connecting` and returns the attempt's generation.
    fn begin_connecting(&self) -> Result<u64> {
        let mut link = self.shared.link();
        match *link {
            Link::Disconnected => {
                let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
                *link = Link::Connecting(generation);
                Ok(generation)
            }
            Link::Connecting(_) => Err(Error::Busy),
            Link::Connected(_) => Err(Error::AlreadyConnected),
        }
    }

    fn abort_connecting(&self, generation: u64) {
        let mut link = self.shared.link();
        if self.owns_attempt(&link, generation) {
            *link = Link::Disconnected;
        }
    }

    fn still_connecting(&self, generation: u64) -> bool {
        self.owns_attempt(&self.shared.link(), generation)
    }

    fn owns_attempt(&self, link: &Link, generation: u64) -> bool {
        matches!(link, Link::Connecting(current) if *current == generation)
    }

    /// The retry loop.
    async fn open(
        &self,
        generation: u64,
        address: &str,
        attempt_timeout: Duration,
        mut server: Option<&mut HostedServer>,
    ) -> Result<Box<dyn Transport>> {
        let attempts = self.config.connect_attempts.max(1);
        let mut last = transport::Error::ConnectionRefused(address.to_string());

        for attempt in 1..=attempts {
            match tokio::time::timeout(attempt_timeout, self.connector.connect(address)).await {
                Ok(Ok(transport)) => {
                    tracing::info!(%address, attempt, "connected");
                    return Ok(transport);
                }
                Ok(Err(e)) => {
                    tracing::debug!(%address, attempt, error = %e, "connect attempt failed");
                    last = e;
                }
                Err(_) => {
                    tracing::debug!(%address, attempt, "connect attempt timed out");
                    last = transport::Error::Timeout;
                }
            }

            if let Some(server) = server.as_mut() {
                if let Some(exit) = server.try_exit() {
                    tracing::error!(%address, %exit, "server exited while connecting");
                    return Err(Error::ServerExited(exit));
                }
            }

            if !self.still_connecting(generation) {
                return Err(Error::Cancelled);
            }

            if attempt < attempts {
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }

        tracing::warn!(%address, attempts, error = %last, "giving up on connect");
        Err(Error::ConnectFailed {
            address: address.to_string(),
            attempts,
            last,
        })
    }

    /// Moves `Connecting` to `Connected` and starts the pump.
    async fn install(
        &self,
        generation: u64,
        address: &str,
        transport: Box<dyn Transport>,
        server: Option<HostedServer>,
    ) -> Result<()> {
        let transport: Arc<dyn Transport> = Arc::from(transport);

        let rejected = {
            let mut link = self.shared.link();
            if self.owns_attempt(&link, generation) {
                self.shared.registry.reopen();
                let pump = self
                    .handle
                    .spawn(pump(self.shared.clone(), transport.clone(), generation));
                *link = Link::Connected(Connection {
                    generation,
                    address: address.to_string(),
                    transport: transport.clone(),
                    pump,
                    server,
                });
                None
            } else {
                Some(server)
            }
        };

        let Some(server) = rejected else {
            return Ok(());
        };

        tracing::info!(%address, "connect cancelled, closing new connection");
        let _ = transport.close().await;
        if let Some(mut server) = server {
            server.kill().await;
        }
        Err(Error::Cancelled)
    }

    /// Drops the connection and fails every outstanding call. Safe in any state.
    ///
    /// A hosted server is detached from the connection first, asked to stop
    /// with `System.Shutdown` and given `shutdown_timeout` to exit before it is
    /// killed.
    pub fn disconnect(&self) {
        self.handle.block_on(self.disconnect_async())
    }

    pub async fn disconnect_async(&self) {
        // Once detached, a connection loss seen by the pump cannot kill it.
        let server = match &mut *self.shared.link() {
            Link::Connected(conn) => conn.server.take(),
            _ => None,
        };

        if server.is_some() {
            let response = self
                .call_inner(SHUTDOWN_CLASS, SHUTDOWN_FUNCTION, &[], Some(self.config.shutdown_timeout))
                .await;
            if let Err(e) = response.classify() {
                tracing::debug!(error = %e, "shutdown request failed");
            }
        }

        let taken = std::mem::replace(&mut *self.shared.link(), Link::Disconnected);
        let cancelled = self.shared.registry.cancel_all("disconnected");

        match taken {
            Link::Connected(conn) => {
                conn.pump.abort();
                if let Err(e) = conn.transport.close().await {
                    tracing::debug!(error = %e, "close failed");
                }
                tracing::info!(address = %conn.address, cancelled, "disconnected");
            }
            Link::Connecting(generation) => tracing::info!(generation, "connect abandoned by disconnect"),
            Link::Disconnected => {}
        }

        if let Some(mut server) = server {
            server.shutdown(self.config.shutdown_timeout).await;
        }
    }

    // ------------------------------------------------------------------------
    //  Calls
    // ------------------------------------------------------------------------

    /// Calls `class.function(args)` and blocks until the response arrives, the
    /// connection drops, or the configured call timeout elapses.
    ///
    /// # Panics
    /// When called from inside an async context.
    pub fn call(&self, class: &str, function: &str, args: &[Value]) -> Response {
        self.handle.block_on(self.call_async(class, function, args))
    }

    /// Like [`Self::call`] with `timeout` instead of the configured call timeout.
    pub fn call_with_timeout(&self, class: &str, function: &str, args: &[Value], timeout: Duration) -> Response {
        self.handle
            .block_on(self.call_inner(class, function, args, Some(timeout)))
    }

    /// Like [`Self::call`], with the response split into values or a typed failure.
    pub fn call_checked(&self, class: &str, function: &str, args: &[Value]) -> std::result::Result<Vec<Value>, CallError> {
        self.call(class, function, args).into_result()
    }

    pub async fn call_async(&self, class: &str, function: &str, args: &[Value]) -> Response {
        self.call_inner(class, function, args, self.config.call_timeout)
            .await
    }

    pub async fn call_checked_async(
        &self,
        class: &str,
        function: &str,
        args: &[Value],
    ) -> std::result::Result<Vec<Value>, CallError> {
        self.call_async(class, function, args).await.into_result()
    }

    async fn call_inner(&self, class: &str, function: &str, args: &[Value], timeout: Option<Duration>) -> Response {
        let Some(transport) = self.shared.transport() else {
            return Response::transport_error("not connected");
        };

        let id = self.shared.registry.next_id();
        let payload = match CallFrame::new(id, class, function, args).to_bytes() {
            Ok(payload) => payload,
            Err(e) => return Response::transport_error(format!("failed to encode call: {}", e)),
        };

        // Registered before sending, since the reply can beat `send` back.
        let pending = match self.shared.registry.insert(id) {
            Ok(pending) => pending,
            Err(e) => return Response::transport_error(e.to_string()),
        };

        if let Err(e) = transport.send(&payload).await {
            // Dropping the pending call removes its entry.
            drop(pending);
            tracing::warn!(call_id = id, class, function, error = %e, "send failed");
            return Response::transport_error(format!("failed to send call: {}", e));
        }

        match pending.wait(timeout).await {
            Ok(response) => response,
            Err(e) => Response::transport_error(e.to_string()),
        }
    }

    /// Completes call `id` with `values`, for transports that decode replies
    /// themselves. Returns `false` if no call was waiting.
    pub fn on_response(&self, id: CallId, values: Vec<Value>) -> bool {
        self.shared.registry.complete(id, Response::from_values(values))
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        let taken = std::mem::replace(&mut *self.shared.link(), Link::Disconnected);
        self.shared.registry.cancel_all("bridge dropped");
        if let Link::Connected(mut conn) = taken {
            conn.pump.abort();
            if let Some(server) = conn.server.as_mut() {
                server.start_kill();
            }
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
