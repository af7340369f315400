//! In-memory transports.
//!
//! Used by the test suite and by anything that wants a client and server in one
//! process without a real pipe between them.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::sync::mpsc;

use crate::transport;
use crate::transport::Connector;
use crate::transport::Transport;

/// A duplex channel transport using tokio mpsc channels.
///
/// Messages sent on one half appear on the other half's `recv()` and vice versa.
pub struct DuplexChannelTransport {
    tx: std::sync::Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl DuplexChannelTransport {
    /// Creates a transport from separate tx and rx channels.
    pub fn new(tx: mpsc::UnboundedSender<Vec<u8>>, rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self {
            tx: std::sync::Mutex::new(Some(tx)),
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Creates a pair of transports connected to each other.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        (Self::new(tx_a, rx_b), Self::new(tx_b, rx_a))
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<Vec<u8>>> {
        self.tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait::async_trait]
impl Transport for DuplexChannelTransport {
    async fn send(&self, payload: &[u8]) -> transport::Result<()> {
        let tx = self
            .sender()
            .ok_or_else(|| transport::Error::ConnectionLost("Transport closed".into()))?;
        tx.send(payload.to_vec())
            .map_err(|_| transport::Error::ConnectionLost("Channel closed".into()))
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }

    async fn close(&self) -> transport::Result<()> {
        // Dropping our sender ends the peer's stream.
        self.tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        Ok(())
    }
}

/// Accepted server halves for one address.
pub type Incoming = mpsc::UnboundedReceiver<DuplexChannelTransport>;

/// A [`Connector`] whose addresses are in-process listeners.
///
/// `listen(address)` returns a stream of server halves; every successful
/// `connect(address)` creates a [`DuplexChannelTransport::pair`], pushes one half
/// to the listener, and returns the other.
#[derive(Clone, Default)]
pub struct ChannelConnector {
    listeners: Arc<DashMap<String, mpsc::UnboundedSender<DuplexChannelTransport>>>,
    refusals: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
}

impl ChannelConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts accepting connections on `address`, replacing any earlier listener.
    pub fn listen(&self, address: impl Into<String>) -> Incoming {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.insert(address.into(), tx);
        rx
    }

    /// Stops accepting connections on `address`.
    pub fn unlisten(&self, address: &str) {
        self.listeners.remove(address);
    }

    /// Refuses the next `count` connection attempts regardless of listeners.
    pub fn refuse_next(&self, count: usize) {
        self.refusals.store(count, Ordering::SeqCst);
    }

    /// Total connection attempts seen so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Connector for ChannelConnector {
    async fn connect(&self, address: &str) -> transport::Result<Box<dyn Transport>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(transport::Error::ConnectionRefused(address.to_string()));
        }

        let Some(listener) = self.listeners.get(address).map(|l| l.value().clone()) else {
            return Err(transport::Error::ConnectionRefused(address.to_string()));
        };

        let (client, server) = DuplexChannelTransport::pair();
        listener
            .send(server)
            .map_err(|_| transport::Error::ConnectionRefused(address.to_string()))?;
        Ok(Box::new(client))
    }
}
