//! # Server Dispatcher
//!
//! The receiving end of the bridge: decodes calls, runs the registered handler,
//! and sends back the handler's [`Response`] under the caller's call id.
//!
//! ## Philosophy
//!
//! - **Handlers are plain functions**: a handler takes the argument list and
//!   returns a response. It runs on the blocking pool, so it may call into native
//!   code that blocks without stalling the receive loop.
//! - **Every call gets an answer**: an unknown class, an unknown function, or a
//!   frame that only partly decodes still produces a reply under the call's id,
//!   so the client is never left waiting.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use ipcrpc::Frame;
use ipcrpc::ReplyFrame;
use ipcrpc::Response;
use ipcrpc::RpcError;
use ipcrpc::Value;
use ipcrpc::peek_id;
use tokio::sync::watch;

use crate::bridge::SHUTDOWN_CLASS;
use crate::bridge::SHUTDOWN_FUNCTION;
use crate::config::ServerConfig;
use crate::transport;
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Transport(transport::Error),
    Encode(RpcError),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Encode(e) => write!(f, "Failed to encode reply: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<RpcError> for Error {
    fn from(e: RpcError) -> Self {
        Self::Encode(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub type Handler = Arc<dyn Fn(&[Value]) -> Response + Send + Sync>;

/// A named group of functions, e.g. `Scene` with `Create`, `Release`, ...
pub struct Class {
    name: String,
    functions: HashMap<String, Handler>,
}

impl Class {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn function(
        mut self,
        name: impl Into<String>,
        handler: impl Fn(&[Value]) -> Response + Send + Sync + 'static,
    ) -> Self {
        self.functions.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

pub struct Server {
    config: ServerConfig,
    classes: DashMap<String, Arc<Class>>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Server {
    /// A server answering only the built-in `System.Shutdown`.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        let shutdown = Arc::new(shutdown);

        let server = Self {
            config,
            classes: DashMap::new(),
            shutdown: shutdown.clone(),
        };

        server.register(Class::new(SHUTDOWN_CLASS).function(SHUTDOWN_FUNCTION, move |_| {
            shutdown.send_replace(true);
            Response::ok([])
        }));
        server
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Adds `class`, replacing any class of the same name.
    pub fn register(&self, class: Class) -> Option<Arc<Class>> {
        tracing::debug!(server = %self.config.name, class = class.name(), "registering class");
        self.classes.insert(class.name.clone(), Arc::new(class))
    }

    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Runs the handler for `class.function` on the current thread.
    pub fn dispatch(&self, class: &str, function: &str, args: &[Value]) -> Response {
        let Some(entry) = self.classes.get(class).map(|c| c.value().clone()) else {
            tracing::warn!(server = %self.config.name, class, function, "unknown class");
            return Response::transport_error(format!("class '{}' is not registered", class));
        };
        let Some(handler) = entry.functions.get(function) else {
            tracing::warn!(server = %self.config.name, class, function, "unknown function");
            return Response::transport_error(format!("function '{}.{}' is not registered", class, function));
        };
        tracing::trace!(class, function, args = args.len(), "dispatch");
        handler(args)
    }

    /// Answers calls arriving on `transport` until the client goes away or
    /// `System.Shutdown` is called.
    pub async fn serve(self: Arc<Self>, transport: Arc<dyn Transport>) -> Result<()> {
        let mut stop = self.shutdown.subscribe();
        tracing::info!(server = %self.config.name, "serving");

        loop {
            let msg = tokio::select! {
                _ = stop.wait_for(|stopped| *stopped) => {
                    tracing::info!(server = %self.config.name, "shutdown requested");
                    break;
                }
                msg = transport.recv() => msg?,
            };
            let Some(msg) = msg else {
                tracing::info!(server = %self.config.name, "client disconnected");
                break;
            };

            let server = self.clone();
            let transport = transport.clone();
            tokio::spawn(async move {
                if let Err(e) = server.answer(&msg, transport.as_ref()).await {
                    tracing::warn!(server = %server.config.name, error = %e, "failed to reply");
                }
            });
        }
        Ok(())
    }

    async fn answer(self: &Arc<Self>, msg: &[u8], transport: &dyn Transport) -> Result<()> {
        let (id, response) = match Frame::decode(msg) {
            Ok(Frame::Call(call)) => {
                let id = call.id;
                let class = call.class.to_string();
                let function = call.function.to_string();
                let args = call.args;

                let server = self.clone();
                let response = tokio::task::spawn_blocking(move || server.dispatch(&class, &function, &args))
                    .await
                    .unwrap_or_else(|e| {
                        tracing::error!(call_id = id, error = %e, "handler panicked");
                        Response::transport_error(format!("handler failed: {}", e))
                    });
                (id, response)
            }
            Ok(Frame::Reply(reply)) => {
                tracing::warn!(call_id = reply.id, "ignoring reply frame sent to server");
                return Ok(());
            }
            Err(e) => match peek_id(msg) {
                Ok(id) => {
                    tracing::warn!(call_id = id, error = %e, "malformed call");
                    (id, Response::transport_error(format!("malformed call: {}", e)))
                }
                Err(_) => {
                    tracing::warn!(error = %e, len = msg.len(), "dropping undecodable message");
                    return Ok(());
                }
            },
        };

        let bytes = ReplyFrame::new(id, response.values()).to_bytes()?;
        transport.send(&bytes).await?;
        Ok(())
    }
}
