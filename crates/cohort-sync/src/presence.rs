//! Presence Sync Agent
//!
//! Sends the local transform frame every tick and keeps a cache of every
//! other participant in the room. The local connection is never cached.
//!
//! Membership is confirmed by the relay's `current-participants` snapshot.
//! Until one arrives, or after the relay answers with `rejoin-required`, the
//! agent asks to rejoin at most once per `rejoin_after_ticks` ticks.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use cohort_core::{ConnectionId, LocalPoses, Participant, Profile, RoomId, TransformFrame};
use cohort_wire::{ClientMessage, ServerMessage};

/// Presence tick interval (20 Hz)
pub const PRESENCE_INTERVAL: Duration = Duration::from_millis(50);

/// Silence after which a cached participant is dropped
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(15);

/// Ticks to wait for a snapshot before repeating the join (1 s at 20 Hz)
pub const DEFAULT_REJOIN_TICKS: u32 = 20;

/// Presence configuration
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    pub stale_after: Duration,
    pub rejoin_after_ticks: u32,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            stale_after: DEFAULT_STALE_AFTER,
            rejoin_after_ticks: DEFAULT_REJOIN_TICKS,
        }
    }
}

/// What an inbound message did to the cache
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceChange {
    Joined(Participant),
    Moved(ConnectionId),
    Left(ConnectionId),
    Evicted(ConnectionId),
}

#[derive(Debug, Clone)]
struct Entry {
    participant: Participant,
    last_heard: Instant,
}

/// Presence statistics
#[derive(Debug, Clone, Default)]
pub struct PresenceStats {
    pub frames_sent: u64,
    pub frames_applied: u64,
    pub frames_ignored: u64,
    pub evictions: u64,
    pub rejoins: u64,
}

/// Per-client presence state
#[derive(Debug)]
pub struct PresenceAgent {
    self_id: ConnectionId,
    room: RoomId,
    profile: Profile,
    cache: HashMap<ConnectionId, Entry>,
    joined: bool,
    ticks_since_join: u32,
    config: PresenceConfig,
    stats: PresenceStats,
}

impl PresenceAgent {
    pub fn new(self_id: ConnectionId, room: RoomId, profile: Profile, config: PresenceConfig) -> Self {
        Self {
            self_id,
            room,
            profile,
            cache: HashMap::new(),
            joined: false,
            ticks_since_join: 0,
            config,
            stats: PresenceStats::default(),
        }
    }

    pub fn self_id(&self) -> ConnectionId {
        self.self_id
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn join_message(&self) -> ClientMessage {
        ClientMessage::JoinRoom {
            room_id: self.room.clone(),
            participant: self.profile.clone(),
        }
    }

    /// Join message for a fresh attempt; membership is unconfirmed until
    /// the next snapshot
    pub fn request_join(&mut self) -> ClientMessage {
        self.joined = false;
        self.ticks_since_join = 0;
        self.join_message()
    }

    /// Repeat the join when no snapshot confirmed it in time
    pub fn poll_rejoin(&mut self) -> Option<ClientMessage> {
        if self.joined || self.ticks_since_join < self.config.rejoin_after_ticks {
            return None;
        }
        self.stats.rejoins += 1;
        tracing::info!(target: "presence", room = %self.room, "rejoining room");
        Some(self.request_join())
    }

    /// Whether the relay has confirmed membership
    pub fn is_joined(&self) -> bool {
        self.joined
    }

    pub fn leave_message(&self) -> ClientMessage {
        ClientMessage::LeaveRoom {
            room_id: self.room.clone(),
        }
    }

    /// Build this tick's transform frame
    ///
    /// Always produces a frame; a missing head pose is sent as the origin.
    pub fn tick(&mut self, poses: &LocalPoses) -> ClientMessage {
        self.stats.frames_sent += 1;
        self.ticks_since_join = self.ticks_since_join.saturating_add(1);
        ClientMessage::UpdateTransform {
            room_id: self.room.clone(),
            transforms: TransformFrame {
                head: poses.head.unwrap_or_default(),
                left_hand: poses.left_hand,
                right_hand: poses.right_hand,
            },
        }
    }

    /// Apply an inbound relay message
    pub fn apply(&mut self, message: &ServerMessage, now: Instant) -> Vec<PresenceChange> {
        match message {
            ServerMessage::CurrentParticipants { participants } => {
                let self_id = self.self_id;
                self.joined = true;
                let previous = std::mem::take(&mut self.cache);
                let mut changes = Vec::with_capacity(participants.len());
                for p in participants.iter().filter(|p| p.connection_id != self_id) {
                    self.cache.insert(
                        p.connection_id,
                        Entry {
                            participant: p.clone(),
                            last_heard: now,
                        },
                    );
                    if !previous.contains_key(&p.connection_id) {
                        changes.push(PresenceChange::Joined(p.clone()));
                    }
                }
                // A snapshot after a rejoin replaces whatever was cached.
                let mut gone: Vec<ConnectionId> = previous
                    .into_keys()
                    .filter(|id| !self.cache.contains_key(id))
                    .collect();
                gone.sort();
                changes.extend(gone.into_iter().map(PresenceChange::Left));
                changes
            }
            ServerMessage::RejoinRequired { room_id } => {
                if *room_id == self.room && self.joined {
                    tracing::info!(target: "presence", room = %room_id, "relay lost our membership");
                    self.joined = false;
                }
                Vec::new()
            }
            ServerMessage::UserJoined {
                connection_id,
                participant,
            } => {
                if *connection_id == self.self_id {
                    return Vec::new();
                }
                let participant = Participant::joined(*connection_id, participant);
                self.cache.insert(
                    *connection_id,
                    Entry {
                        participant: participant.clone(),
                        last_heard: now,
                    },
                );
                tracing::debug!(target: "presence", connection = %connection_id, "participant joined");
                vec![PresenceChange::Joined(participant)]
            }
            ServerMessage::ParticipantMoved {
                connection_id,
                transforms,
            } => match self.cache.get_mut(connection_id) {
                Some(entry) if *connection_id != self.self_id => {
                    entry.participant.transforms = *transforms;
                    entry.last_heard = now;
                    self.stats.frames_applied += 1;
                    vec![PresenceChange::Moved(*connection_id)]
                }
                _ => {
                    self.stats.frames_ignored += 1;
                    Vec::new()
                }
            },
            ServerMessage::UserLeft { connection_id } => {
                match self.cache.remove(connection_id) {
                    Some(_) => {
                        tracing::debug!(target: "presence", connection = %connection_id, "participant left");
                        vec![PresenceChange::Left(*connection_id)]
                    }
                    None => Vec::new(),
                }
            }
            other => {
                if let Some(entry) = other.origin().and_then(|id| self.cache.get_mut(&id)) {
                    entry.last_heard = now;
                }
                Vec::new()
            }
        }
    }

    /// Drop participants not heard from within `stale_after`
    pub fn evict_stale(&mut self, now: Instant) -> Vec<PresenceChange> {
        let stale_after = self.config.stale_after;
        let stale: Vec<ConnectionId> = self
            .cache
            .iter()
            .filter(|(_, e)| now.saturating_duration_since(e.last_heard) > stale_after)
            .map(|(id, _)| *id)
            .collect();

        stale
            .into_iter()
            .map(|id| {
                self.cache.remove(&id);
                self.stats.evictions += 1;
                tracing::info!(target: "presence", connection = %id, "evicted silent participant");
                PresenceChange::Evicted(id)
            })
            .collect()
    }

    /// Cached participants, ordered by connection id
    pub fn participants(&self) -> Vec<&Participant> {
        let mut list: Vec<&Participant> = self.cache.values().map(|e| &e.participant).collect();
        list.sort_by_key(|p| p.connection_id);
        list
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Participant> {
        self.cache.get(&id).map(|e| &e.participant)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn stats(&self) -> &PresenceStats {
        &self.stats
    }
}
