//! # Transport Abstraction
//!
//! A minimal, async interface for moving whole messages between two processes.
//!
//! ## Philosophy
//!
//! - **Message-Oriented**: A transport moves opaque buffers. It knows nothing about
//!   calls, replies, or values, and how it cuts a byte stream into messages is its
//!   own business.
//! - **Full Duplex**: `send` and `recv` may run concurrently. The bridge keeps one
//!   task parked in `recv` while any number of callers `send`.

use std::fmt;

/// Errors that occur at the connection layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The peer is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// Nothing is listening at the address.
    ConnectionRefused(String),
    /// The operation did not finish in time.
    Timeout,
    /// The peer or the channel rejected the payload size.
    PayloadTooLarge,
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::ConnectionRefused(addr) => write!(f, "Connection refused: {}", addr),
            Self::Timeout => write!(f, "Transport operation timed out"),
            Self::PayloadTooLarge => write!(f, "Payload too large for transport"),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// One established, bidirectional message channel.
///
/// Object-safe so it can live behind `Arc<dyn Transport>`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends one whole message.
    ///
    /// # invariants
    /// - Must not interpret the payload.
    /// - Returns `Err` once the connection is gone; never silently drops.
    async fn send(&self, payload: &[u8]) -> Result<()>;

    /// Waits for the next whole message. `Ok(None)` means the peer closed cleanly.
    async fn recv(&self) -> Result<Option<Vec<u8>>>;

    /// Releases the connection. Later sends fail and the peer observes end of stream.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Opens transports by address.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, address: &str) -> Result<Box<dyn Transport>>;
}
