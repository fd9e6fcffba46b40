//! In-process relay
//!
//! Runs the room registry behind a lock and delivers to per-connection
//! channels. Used when the relay is embedded and by the test harness.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cohort_core::{CohortError, CohortResult, ConnectionId, RoomId};
use cohort_wire::{ClientMessage, ServerMessage};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::{Delivery, RelayHandle, RelayReceiver, RoomRegistry, Uplink};

/// Default per-connection inbound queue depth
pub const DEFAULT_INBOUND_CAPACITY: usize = 256;

struct MemoryInner {
    registry: Mutex<RoomRegistry>,
    peers: Mutex<HashMap<ConnectionId, mpsc::Sender<ServerMessage>>>,
    capacity: usize,
}

impl MemoryInner {
    fn deliver(&self, deliveries: Vec<Delivery>) {
        let peers = self.peers.lock();
        for delivery in deliveries {
            let Some(tx) = peers.get(&delivery.to) else {
                continue;
            };
            if let Err(err) = tx.try_send(delivery.message) {
                tracing::debug!(target: "relay", to = %delivery.to, %err, "inbound queue full, dropping");
            }
        }
    }
}

impl Uplink for MemoryInner {
    fn send(&self, from: ConnectionId, message: ClientMessage) -> CohortResult<()> {
        if !self.peers.lock().contains_key(&from) {
            return Err(CohortError::TransportClosed);
        }
        let deliveries = self.registry.lock().handle(from, message, Instant::now());
        self.deliver(deliveries);
        Ok(())
    }

    fn disconnect(&self, from: ConnectionId) {
        self.peers.lock().remove(&from);
        let deliveries = self.registry.lock().disconnect(from);
        self.deliver(deliveries);
    }
}

/// Relay living in the current process
#[derive(Clone)]
pub struct MemoryRelay {
    inner: Arc<MemoryInner>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_INBOUND_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        MemoryRelay {
            inner: Arc::new(MemoryInner {
                registry: Mutex::new(RoomRegistry::new()),
                peers: Mutex::new(HashMap::new()),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Open a connection with a fresh id
    pub fn connect(&self) -> (RelayHandle, RelayReceiver) {
        let mut id = ConnectionId::generate();
        while self.inner.peers.lock().contains_key(&id) {
            id = ConnectionId::generate();
        }
        self.connect_as(id)
    }

    /// Open a connection with a chosen id
    pub fn connect_as(&self, id: ConnectionId) -> (RelayHandle, RelayReceiver) {
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        self.inner.peers.lock().insert(id, tx);
        let uplink: Arc<dyn Uplink> = self.inner.clone();
        (RelayHandle::new(id, uplink), rx)
    }

    /// Evict members idle for longer than `idle`
    pub fn sweep(&self, idle: Duration) -> usize {
        let deliveries = self.inner.registry.lock().sweep(Instant::now(), idle);
        let count = deliveries.len();
        self.inner.deliver(deliveries);
        count
    }

    pub fn room_size(&self, room: &RoomId) -> usize {
        self.inner.registry.lock().room_size(room)
    }

    pub fn connections(&self) -> usize {
        self.inner.peers.lock().len()
    }
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}
