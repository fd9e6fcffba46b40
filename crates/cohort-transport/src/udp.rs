//! UDP relay client and server
//!
//! One JSON datagram per message. The client stamps its connection id on
//! every datagram; the server learns the return address from the last
//! datagram it saw for that id.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cohort_core::{CohortError, CohortResult, ConnectionId, RoomId};
use cohort_wire::{
    decode_datagram, encode_datagram, ClientDatagram, ClientMessage, ServerMessage,
    MAX_DATAGRAM_SIZE,
};
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::{Delivery, RelayHandle, RelayReceiver, RoomRegistry, Uplink};

/// Silence after which the relay evicts a member
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(15);

struct UdpUplink {
    socket: Arc<UdpSocket>,
    relay: SocketAddr,
    rooms: Mutex<HashSet<RoomId>>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
}

impl UdpUplink {
    fn transmit(&self, from: ConnectionId, message: ClientMessage) -> CohortResult<()> {
        let bytes = encode_datagram(&ClientDatagram { from, message })?;
        send_outcome(self.socket.try_send_to(&bytes, self.relay))
    }
}

/// A datagram the socket could not take right now is lost, and says so
fn send_outcome(result: std::io::Result<usize>) -> CohortResult<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(CohortError::TransportError(
            "socket busy, datagram dropped".into(),
        )),
        Err(e) => Err(CohortError::TransportError(e.to_string())),
    }
}

impl Uplink for UdpUplink {
    fn send(&self, from: ConnectionId, message: ClientMessage) -> CohortResult<()> {
        match &message {
            ClientMessage::JoinRoom { room_id, .. } => {
                self.rooms.lock().insert(room_id.clone());
            }
            ClientMessage::LeaveRoom { room_id } => {
                self.rooms.lock().remove(room_id);
            }
            _ => {}
        }
        self.transmit(from, message)
    }

    fn disconnect(&self, from: ConnectionId) {
        let rooms: Vec<RoomId> = self.rooms.lock().drain().collect();
        for room_id in rooms {
            if let Err(err) = self.transmit(from, ClientMessage::LeaveRoom { room_id }) {
                tracing::debug!(target: "relay", %err, "leave on disconnect failed");
            }
        }
        if let Some(task) = self.receive_task.lock().take() {
            task.abort();
        }
    }
}

/// Connect to a UDP relay
///
/// Binds an ephemeral local port of the relay's address family.
pub async fn connect_udp(
    relay: SocketAddr,
    buffer_size: usize,
) -> CohortResult<(RelayHandle, RelayReceiver)> {
    let local: SocketAddr = if relay.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };
    let socket = UdpSocket::bind(local)
        .await
        .map_err(|e| CohortError::TransportError(e.to_string()))?;
    let socket = Arc::new(socket);

    let (rx, task) = start_receive_loop(Arc::clone(&socket), relay, buffer_size);
    let uplink = UdpUplink {
        socket,
        relay,
        rooms: Mutex::new(HashSet::new()),
        receive_task: Mutex::new(Some(task)),
    };

    let id = ConnectionId::generate();
    tracing::debug!(target: "relay", %relay, connection = %id, "udp relay client ready");
    Ok((RelayHandle::new(id, Arc::new(uplink)), rx))
}

/// Start a background receive loop for relay datagrams
///
/// Datagrams from any address other than `relay` are ignored.
pub fn start_receive_loop(
    socket: Arc<UdpSocket>,
    relay: SocketAddr,
    buffer_size: usize,
) -> (RelayReceiver, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(buffer_size.max(1));

    let task = tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, addr)) => {
                    if addr != relay {
                        continue;
                    }
                    match decode_datagram::<ServerMessage>(&buf[..len]) {
                        Ok(message) => {
                            if tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(target: "relay", "Malformed relay datagram: {}", e);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(target: "relay", "UDP receive error: {}", e);
                }
            }
        }
    });

    (rx, task)
}

/// UDP relay server configuration
#[derive(Debug, Clone)]
pub struct UdpRelayConfig {
    pub bind: SocketAddr,
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for UdpRelayConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 7400)),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            sweep_interval: Duration::from_secs(1),
        }
    }
}

/// Room relay serving UDP clients
pub struct UdpRelayServer {
    socket: UdpSocket,
    local_addr: SocketAddr,
    registry: RoomRegistry,
    peers: HashMap<ConnectionId, SocketAddr>,
    config: UdpRelayConfig,
}

impl UdpRelayServer {
    pub async fn bind(config: UdpRelayConfig) -> CohortResult<Self> {
        let socket = UdpSocket::bind(config.bind)
            .await
            .map_err(|e| CohortError::TransportError(e.to_string()))?;

        let local_addr = socket
            .local_addr()
            .map_err(|e| CohortError::TransportError(e.to_string()))?;

        Ok(UdpRelayServer {
            socket,
            local_addr,
            registry: RoomRegistry::new(),
            peers: HashMap::new(),
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until `shutdown` resolves
    pub async fn run<F>(mut self, shutdown: F) -> CohortResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        tracing::info!(target: "relay", addr = %self.local_addr, "relay listening");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    let stats = self.registry.stats();
                    tracing::info!(
                        target: "relay",
                        handled = stats.messages_handled,
                        delivered = stats.deliveries,
                        evicted = stats.evictions,
                        "relay stopped"
                    );
                    return Ok(());
                }
                _ = sweep.tick() => {
                    let deliveries = self.registry.sweep(Instant::now(), self.config.idle_timeout);
                    self.dispatch(deliveries).await;
                    let registry = &self.registry;
                    self.peers.retain(|id, _| registry.contains(*id));
                }
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok((len, addr)) => {
                        let datagram = decode_datagram::<ClientDatagram>(&buf[..len]);
                        self.on_datagram(datagram, addr).await;
                    }
                    Err(e) => {
                        tracing::warn!(target: "relay", "UDP receive error: {}", e);
                    }
                }
            }
        }
    }

    async fn on_datagram(&mut self, datagram: CohortResult<ClientDatagram>, addr: SocketAddr) {
        let ClientDatagram { from, message } = match datagram {
            Ok(datagram) => datagram,
            Err(e) => {
                tracing::warn!(target: "relay", %addr, "Malformed client datagram: {}", e);
                return;
            }
        };

        self.peers.insert(from, addr);
        let deliveries = self.registry.handle(from, message, Instant::now());
        // Non-members still get their reply, e.g. `rejoin-required`.
        self.dispatch(deliveries).await;
        if !self.registry.contains(from) {
            self.peers.remove(&from);
        }
    }

    async fn dispatch(&self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            let Some(addr) = self.peers.get(&delivery.to).copied() else {
                continue;
            };
            let bytes = match encode_datagram(&delivery.message) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(target: "relay", event = delivery.message.name(), "Encode failed: {}", e);
                    continue;
                }
            };
            if let Err(e) = self.socket.send_to(&bytes, addr).await {
                tracing::warn!(target: "relay", %addr, "UDP send error: {}", e);
            }
        }
    }
}
