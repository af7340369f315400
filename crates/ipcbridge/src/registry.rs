//! # Pending Call Registry
//!
//! Correlates outbound calls with the responses that eventually come back for them.
//!
//! ## Philosophy
//!
//! - **One claim**: removing an entry from the map is the only way to resolve it.
//!   Whoever removes it (a response, a cancel, a timeout) owns the outcome, so a
//!   call completes at most once.
//! - **Closed during teardown**: `cancel_all` closes the registry before draining it,
//!   so a call registered concurrently with a disconnect fails fast instead of
//!   waiting for a response that can never arrive.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use ipcrpc::CallId;
use ipcrpc::Response;
use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The registry was closed by `cancel_all` and not reopened yet.
    Closed,
    /// No response arrived within the timeout.
    TimedOut(CallId),
    /// The entry was discarded without a response.
    Abandoned(CallId),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "not connected, call registry is closed"),
            Self::TimedOut(id) => write!(f, "call {} timed out", id),
            Self::Abandoned(id) => write!(f, "call {} was abandoned", id),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

type Waiters = DashMap<CallId, oneshot::Sender<Response>>;

pub struct PendingCallRegistry {
    pending: Arc<Waiters>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Default for PendingCallRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingCallRegistry {
    /// An open, empty registry. Ids start at 1.
    pub fn new() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Registers a new call under a fresh id.
    pub fn register(&self) -> Result<PendingCall> {
        self.insert(self.next_id())
    }

    /// Reserves an id without registering anything under it.
    pub(crate) fn next_id(&self) -> CallId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a call under an id from [`Self::next_id`].
    pub(crate) fn insert(&self, id: CallId) -> Result<PendingCall> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        // `cancel_all` may have closed and drained between the check and the insert.
        if self.closed.load(Ordering::SeqCst) {
            self.pending.remove(&id);
            return Err(Error::Closed);
        }

        Ok(PendingCall {
            id,
            rx,
            pending: self.pending.clone(),
        })
    }

    /// Delivers `response` to the call waiting on `id`.
    ///
    /// Returns `false` if nothing is waiting: the call already completed, timed out,
    /// or never existed.
    pub fn complete(&self, id: CallId, response: Response) -> bool {
        let Some((_, tx)) = self.pending.remove(&id) else {
            tracing::debug!(call_id = id, "response for unknown or finished call");
            return false;
        };
        // The waiter may have been dropped; the entry is claimed either way.
        let _ = tx.send(response);
        true
    }

    /// Fails every outstanding call with a transport error carrying `reason`, and
    /// closes the registry until [`Self::reopen`]. Returns how many calls were woken.
    pub fn cancel_all(&self, reason: &str) -> usize {
        self.closed.store(true, Ordering::SeqCst);

        let ids: Vec<CallId> = self.pending.iter().map(|e| *e.key()).collect();
        let mut woken = 0;
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Response::transport_error(reason));
                woken += 1;
            }
        }

        if woken > 0 {
            tracing::info!(count = woken, %reason, "cancelled pending calls");
        }
        woken
    }

    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Drops the entry for `id` without resolving it.
    pub fn discard(&self, id: CallId) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Number of calls still waiting for a response.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// The caller's side of one registered call.
///
/// Dropping it without waiting removes the registry entry.
pub struct PendingCall {
    id: CallId,
    rx: oneshot::Receiver<Response>,
    pending: Arc<Waiters>,
}

impl PendingCall {
    pub fn id(&self) -> CallId {
        self.id
    }

    /// Suspends until the call is completed, cancelled, or `timeout` elapses.
    pub async fn wait(mut self, timeout: Option<Duration>) -> Result<Response> {
        let received = match timeout {
            None => (&mut self.rx).await,
            Some(limit) => match tokio::time::timeout(limit, &mut self.rx).await {
                Ok(received) => received,
                Err(_) => {
                    if self.pending.remove(&self.id).is_some() {
                        tracing::debug!(call_id = self.id, ?limit, "call timed out");
                        return Err(Error::TimedOut(self.id));
                    }
                    // A completer claimed the entry first and has already sent.
                    (&mut self.rx).await
                }
            },
        };
        received.map_err(|_| Error::Abandoned(self.id))
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        // Ids are never reused, so this cannot touch another call's entry.
        self.pending.remove(&self.id);
    }
}
