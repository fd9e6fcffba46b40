//! Chaos relay links
//!
//! Wraps a relay connection so outbound frames suffer:
//! - Random and burst loss
//! - Duplication
//! - Pairwise reordering
//!
//! Random impairment applies to periodic stream frames only: transforms and
//! active moderator frames. Other frames pass untouched unless
//! `lost_joins` is set, which swallows the first room joins outright. The
//! periodic streams and room membership must converge regardless.

use std::sync::Arc;

use cohort_core::{CohortResult, ConnectionId};
use cohort_transport::{RelayHandle, Uplink};
use cohort_wire::ClientMessage;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Link impairment configuration
#[derive(Clone, Debug)]
pub struct ChaosConfig {
    /// Frame loss rate (0.0 - 1.0)
    pub loss_rate: f64,
    /// Probability that a loss burst starts
    pub burst_loss_prob: f64,
    /// Burst length range
    pub burst_length: (u32, u32),
    /// Probability a frame is held back and sent after the next one
    pub reorder_prob: f64,
    pub duplicate_prob: f64,
    /// Leading `join-room` frames to swallow
    pub lost_joins: u32,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        ChaosConfig {
            loss_rate: 0.01,
            burst_loss_prob: 0.01,
            burst_length: (2, 5),
            reorder_prob: 0.05,
            duplicate_prob: 0.01,
            lost_joins: 0,
        }
    }
}

impl ChaosConfig {
    /// No impairment
    pub fn clean() -> Self {
        ChaosConfig {
            loss_rate: 0.0,
            burst_loss_prob: 0.0,
            burst_length: (0, 0),
            reorder_prob: 0.0,
            duplicate_prob: 0.0,
            lost_joins: 0,
        }
    }

    /// Congested classroom Wi-Fi
    pub fn poor() -> Self {
        ChaosConfig {
            loss_rate: 0.1,
            burst_loss_prob: 0.05,
            burst_length: (3, 8),
            reorder_prob: 0.1,
            duplicate_prob: 0.02,
            lost_joins: 0,
        }
    }

    /// Loss only, for deterministic convergence checks
    pub fn lossy(loss_rate: f64) -> Self {
        ChaosConfig {
            loss_rate,
            ..ChaosConfig::clean()
        }
    }

    /// Clean link whose first `count` joins never arrive
    pub fn lost_joins(count: u32) -> Self {
        ChaosConfig {
            lost_joins: count,
            ..ChaosConfig::clean()
        }
    }
}

/// Fate of one outbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fate {
    Deliver,
    Drop,
    Duplicate,
    Hold,
}

/// Link statistics
#[derive(Clone, Debug, Default)]
pub struct ChaosStats {
    pub frames_sent: u64,
    pub frames_delivered: u64,
    pub frames_lost: u64,
    pub frames_reordered: u64,
    pub frames_duplicated: u64,
}

impl ChaosStats {
    pub fn loss_rate(&self) -> f64 {
        if self.frames_sent == 0 {
            0.0
        } else {
            self.frames_lost as f64 / self.frames_sent as f64
        }
    }
}

/// Seeded fate generator
pub struct ChaosLink {
    config: ChaosConfig,
    rng: StdRng,
    burst_remaining: u32,
    joins_to_lose: u32,
    stats: ChaosStats,
}

impl ChaosLink {
    pub fn new(config: ChaosConfig, seed: u64) -> Self {
        ChaosLink {
            joins_to_lose: config.lost_joins,
            config,
            rng: StdRng::seed_from_u64(seed),
            burst_remaining: 0,
            stats: ChaosStats::default(),
        }
    }

    /// Whether the next join is swallowed
    pub fn loses_join(&mut self) -> bool {
        if self.joins_to_lose == 0 {
            return false;
        }
        self.joins_to_lose -= 1;
        self.stats.frames_sent += 1;
        self.stats.frames_lost += 1;
        true
    }

    /// Decide what happens to the next frame
    pub fn next_fate(&mut self) -> Fate {
        self.stats.frames_sent += 1;

        if self.should_drop() {
            self.stats.frames_lost += 1;
            return Fate::Drop;
        }
        if self.rng.gen::<f64>() < self.config.reorder_prob {
            self.stats.frames_reordered += 1;
            return Fate::Hold;
        }
        if self.rng.gen::<f64>() < self.config.duplicate_prob {
            self.stats.frames_duplicated += 1;
            return Fate::Duplicate;
        }
        Fate::Deliver
    }

    fn should_drop(&mut self) -> bool {
        if self.burst_remaining > 0 {
            self.burst_remaining -= 1;
            return true;
        }

        if self.rng.gen::<f64>() < self.config.burst_loss_prob {
            let (min, max) = self.config.burst_length;
            self.burst_remaining = self.rng.gen_range(min..=max.max(min));
            return true;
        }

        self.rng.gen::<f64>() < self.config.loss_rate
    }

    pub fn stats(&self) -> &ChaosStats {
        &self.stats
    }
}

struct ChaosState {
    link: ChaosLink,
    held: Option<ClientMessage>,
}

/// Uplink that impairs another relay connection
struct ChaosUplink {
    inner: RelayHandle,
    state: Mutex<ChaosState>,
}

/// Frames that the next tick supersedes
pub fn is_periodic(message: &ClientMessage) -> bool {
    match message {
        ClientMessage::UpdateTransform { .. } => true,
        ClientMessage::TeacherSyncUpdate { camera, .. } => camera.active,
        ClientMessage::TeacherPointerMove { pointer, .. } => pointer.active,
        _ => false,
    }
}

impl Uplink for ChaosUplink {
    fn send(&self, _from: ConnectionId, message: ClientMessage) -> CohortResult<()> {
        if matches!(message, ClientMessage::JoinRoom { .. }) && self.state.lock().link.loses_join() {
            tracing::trace!(target: "chaos", event = message.name(), "join lost");
            return Ok(());
        }
        if !is_periodic(&message) {
            return self.deliver(message);
        }

        let (fate, released) = {
            let mut state = self.state.lock();
            let fate = state.link.next_fate();
            let released = if fate == Fate::Drop { None } else { state.held.take() };
            (fate, released)
        };

        match fate {
            Fate::Drop => {
                tracing::trace!(target: "chaos", event = message.name(), "frame lost");
                Ok(())
            }
            Fate::Hold => {
                self.state.lock().held = Some(message);
                if let Some(released) = released {
                    self.deliver(released)?;
                }
                Ok(())
            }
            Fate::Duplicate => {
                self.deliver(message.clone())?;
                self.deliver(message)?;
                if let Some(released) = released {
                    self.deliver(released)?;
                }
                Ok(())
            }
            Fate::Deliver => {
                self.deliver(message)?;
                if let Some(released) = released {
                    self.deliver(released)?;
                }
                Ok(())
            }
        }
    }

    fn disconnect(&self, _from: ConnectionId) {
        self.inner.close();
    }
}

impl ChaosUplink {
    fn deliver(&self, message: ClientMessage) -> CohortResult<()> {
        self.inner.send(message)?;
        self.state.lock().link.stats.frames_delivered += 1;
        Ok(())
    }
}

/// Statistics view of a chaotic connection
#[derive(Clone)]
pub struct ChaosMonitor(Arc<ChaosUplink>);

impl ChaosMonitor {
    pub fn stats(&self) -> ChaosStats {
        self.0.state.lock().link.stats().clone()
    }
}

/// Route `handle`'s outbound frames through a seeded chaos link
///
/// The returned handle keeps the wrapped connection's id; closing it closes
/// the wrapped connection.
pub fn chaotic(handle: RelayHandle, config: ChaosConfig, seed: u64) -> (RelayHandle, ChaosMonitor) {
    let id = handle.connection_id();
    let uplink = Arc::new(ChaosUplink {
        inner: handle,
        state: Mutex::new(ChaosState {
            link: ChaosLink::new(config, seed),
            held: None,
        }),
    });
    let monitor = ChaosMonitor(Arc::clone(&uplink));
    (RelayHandle::new(id, uplink), monitor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_core::{Profile, Role, RoomId};
    use cohort_transport::MemoryRelay;
    use cohort_wire::ServerMessage;
    use proptest::prelude::*;

    #[test]
    fn test_clean_link_delivers_everything() {
        let mut link = ChaosLink::new(ChaosConfig::clean(), 1);
        assert!((0..1000).all(|_| link.next_fate() == Fate::Deliver));
        assert_eq!(link.stats().loss_rate(), 0.0);
    }

    #[test]
    fn test_poor_link_loses_frames() {
        let mut link = ChaosLink::new(ChaosConfig::poor(), 12345);
        for _ in 0..2000 {
            link.next_fate();
        }
        let stats = link.stats();
        assert!(stats.loss_rate() > 0.05, "loss {}", stats.loss_rate());
        assert!(stats.frames_reordered > 0);
    }

    #[test]
    fn test_same_seed_same_fates() {
        let mut a = ChaosLink::new(ChaosConfig::poor(), 7);
        let mut b = ChaosLink::new(ChaosConfig::poor(), 7);
        for _ in 0..500 {
            assert_eq!(a.next_fate(), b.next_fate());
        }
    }

    proptest! {
        #[test]
        fn test_every_frame_gets_one_fate(seed in any::<u64>(), frames in 1usize..500) {
            let mut link = ChaosLink::new(ChaosConfig::poor(), seed);
            let delivered = (0..frames)
                .filter(|_| link.next_fate() == Fate::Deliver)
                .count() as u64;
            let stats = link.stats();
            prop_assert_eq!(stats.frames_sent, frames as u64);
            prop_assert_eq!(
                delivered + stats.frames_lost + stats.frames_reordered + stats.frames_duplicated,
                frames as u64
            );
        }
    }

    #[test]
    fn test_only_stream_frames_are_periodic() {
        let room = RoomId::from("lab");
        let join = ClientMessage::JoinRoom {
            room_id: room.clone(),
            participant: Profile::new("Ada", Role::Student),
        };
        let released = ClientMessage::TeacherSyncUpdate {
            room_id: room.clone(),
            camera: cohort_wire::ModeratorOverride::released(),
        };
        let moving = ClientMessage::UpdateTransform {
            room_id: room,
            transforms: cohort_core::TransformFrame::standing(),
        };
        assert!(!is_periodic(&join));
        assert!(!is_periodic(&released));
        assert!(is_periodic(&moving));
    }

    #[tokio::test]
    async fn test_chaotic_handle_keeps_identity() {
        let relay = MemoryRelay::new();
        let room = RoomId::from("lab");
        let (raw, _rx) = relay.connect();
        let id = raw.connection_id();
        let (handle, monitor) = chaotic(raw, ChaosConfig::lossy(1.0), 3);
        assert_eq!(handle.connection_id(), id);

        let (other, mut other_rx) = relay.connect();
        other
            .send(ClientMessage::JoinRoom {
                room_id: room.clone(),
                participant: Profile::new("Other", Role::Student),
            })
            .unwrap();
        handle
            .send(ClientMessage::JoinRoom {
                room_id: room.clone(),
                participant: Profile::new("Chaos", Role::Student),
            })
            .unwrap();

        match other_rx.recv().await.unwrap() {
            ServerMessage::UserJoined { connection_id, .. } => assert_eq!(connection_id, id),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(monitor.stats().frames_delivered, 1);

        handle
            .send(ClientMessage::UpdateTransform {
                room_id: room.clone(),
                transforms: cohort_core::TransformFrame::standing(),
            })
            .unwrap();
        assert_eq!(monitor.stats().frames_lost, 1);
        assert!(other_rx.try_recv().is_err());

        assert!(handle.close());
        assert_eq!(relay.room_size(&room), 1);
    }

    #[tokio::test]
    async fn test_lost_joins_only_swallow_joins() {
        let relay = MemoryRelay::new();
        let room = RoomId::from("lab");
        let (raw, mut rx) = relay.connect();
        let (handle, monitor) = chaotic(raw, ChaosConfig::lost_joins(1), 5);
        let join = ClientMessage::JoinRoom {
            room_id: room.clone(),
            participant: Profile::new("Late", Role::Student),
        };

        handle.send(join.clone()).unwrap();
        assert_eq!(relay.room_size(&room), 0);
        assert_eq!(monitor.stats().frames_lost, 1);

        handle.send(join).unwrap();
        assert_eq!(relay.room_size(&room), 1);
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerMessage::CurrentParticipants { .. }
        ));
    }
}
