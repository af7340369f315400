//! # ipcbridge
//!
//! Blocking RPC calls against objects that live in another process, and the
//! handle tables that name those objects.
//!
//! ## Architecture
//!
//! - **Client**: [`Bridge`] owns the connection and a [`PendingCallRegistry`].
//!   Callers block in [`Bridge::call`] while a background pump routes replies
//!   back by call id.
//! - **Server**: [`Server`] decodes calls, runs handlers, and replies. Handlers
//!   resolve the handles in their arguments through the per-kind
//!   [`ObjectTable`]s held by a [`Context`].
//! - **Transport**: anything implementing [`Transport`]. The in-memory
//!   [`mock_transport`] pair connects a client and a server in one process.

pub mod bridge;
pub mod config;
pub mod context;
pub mod handle;
pub mod host;
pub mod id_alloc;
pub mod logging;
pub mod mock_transport;
pub mod registry;
pub mod server;
pub mod table;
pub mod transport;

#[cfg(test)]
mod tests;

pub use bridge::Bridge;
pub use bridge::State;
pub use config::BridgeConfig;
pub use config::ServerCommand;
pub use config::ServerConfig;
pub use context::Context;
pub use handle::Handle;
pub use handle::INVALID_HANDLE;
pub use handle::Kind;
pub use handle::RawHandle;
pub use id_alloc::IdAllocator;
pub use id_alloc::IdRange;
pub use registry::PendingCall;
pub use registry::PendingCallRegistry;
pub use server::Class;
pub use server::Server;
pub use table::Exhausted;
pub use table::ObjectTable;
pub use transport::Connector;
pub use transport::Transport;

pub use ipcrpc::CallError;
pub use ipcrpc::CallId;
pub use ipcrpc::ErrorCode;
pub use ipcrpc::Response;
pub use ipcrpc::Value;
