//! Shared relay handle
//!
//! One handle per session. Presence, moderator override and the event router
//! all send through clones of it; the session closes it exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cohort_core::{CohortError, CohortResult, ConnectionId};
use cohort_wire::{ClientMessage, ServerMessage};
use tokio::sync::mpsc;

/// Inbound relay messages for one connection
pub type RelayReceiver = mpsc::Receiver<ServerMessage>;

/// Transport-specific send path behind a [`RelayHandle`]
pub trait Uplink: Send + Sync {
    /// Best-effort, non-blocking send
    fn send(&self, from: ConnectionId, message: ClientMessage) -> CohortResult<()>;

    /// Release the connection; called once
    fn disconnect(&self, from: ConnectionId);
}

struct HandleInner {
    id: ConnectionId,
    uplink: Arc<dyn Uplink>,
    closed: AtomicBool,
}

impl HandleInner {
    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.uplink.disconnect(self.id);
        true
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        self.close();
    }
}

/// Cloneable handle to one relay connection
#[derive(Clone)]
pub struct RelayHandle {
    inner: Arc<HandleInner>,
}

impl RelayHandle {
    pub fn new(id: ConnectionId, uplink: Arc<dyn Uplink>) -> Self {
        RelayHandle {
            inner: Arc::new(HandleInner {
                id,
                uplink,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Identity used for self-filtering
    pub fn connection_id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn send(&self, message: ClientMessage) -> CohortResult<()> {
        if self.is_closed() {
            return Err(CohortError::TransportClosed);
        }
        self.inner.uplink.send(self.inner.id, message)
    }

    /// Send, logging instead of failing; the next tick resends current state
    pub fn send_best_effort(&self, message: ClientMessage) -> bool {
        let name = message.name();
        match self.send(message) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(target: "relay", event = name, %err, "dropped outbound message");
                false
            }
        }
    }

    /// Close the connection; returns false if it was already closed
    pub fn close(&self) -> bool {
        self.inner.close()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for RelayHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayHandle")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
