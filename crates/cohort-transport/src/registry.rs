//! Room registry
//!
//! Sans-IO relay state. Feed it client messages and it answers with the
//! deliveries to make; no sockets, no clocks of its own.
//!
//! Forwarding rules:
//! - `join-room` records the member at a standing pose, announces
//!   `user-joined` to the others and sends the joiner a snapshot of everyone
//!   else
//! - `update-transform` stores the frame and forwards `participant-moved`
//! - `leave-room`, disconnect and idle eviction announce `user-left`; a room
//!   with no members is dropped
//! - workshop events and moderator frames are forwarded with the sender's id
//!   (and role, for moderator frames) stamped on
//!
//! Nothing is ever echoed back to the sender, and messages for a room the
//! sender has not joined are dropped. A transform frame from a non-member
//! is answered with `rejoin-required`, so a client that lost its join,
//! was evicted or outlived a relay restart finds its way back. Joining
//! again as an existing member only refreshes the profile and resends the
//! snapshot.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use cohort_core::{ConnectionId, Participant, Profile, RoomId, TransformFrame};
use cohort_wire::{ClientMessage, ServerMessage};

/// One message to deliver to one connection
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub to: ConnectionId,
    pub message: ServerMessage,
}

impl Delivery {
    pub fn new(to: ConnectionId, message: ServerMessage) -> Self {
        Self { to, message }
    }
}

#[derive(Debug, Clone)]
struct Member {
    profile: Profile,
    transforms: TransformFrame,
    last_seen: Instant,
}

impl Member {
    fn as_participant(&self, id: ConnectionId) -> Participant {
        Participant {
            connection_id: id,
            display_name: self.profile.display_name.clone(),
            role: self.profile.role,
            transforms: self.transforms,
        }
    }
}

/// Relay counters
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    pub messages_handled: u64,
    pub messages_dropped: u64,
    pub deliveries: u64,
    pub evictions: u64,
}

/// Room membership and forwarding
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<RoomId, HashMap<ConnectionId, Member>>,
    stats: RegistryStats,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one client message, returning what to deliver
    pub fn handle(
        &mut self,
        from: ConnectionId,
        message: ClientMessage,
        now: Instant,
    ) -> Vec<Delivery> {
        self.stats.messages_handled += 1;

        let deliveries = match message {
            ClientMessage::JoinRoom {
                room_id,
                participant,
            } => self.join(from, room_id, participant, now),
            ClientMessage::LeaveRoom { room_id } => self.leave(from, &room_id),
            ClientMessage::UpdateTransform {
                room_id,
                transforms,
            } => match self.touch(from, &room_id, now) {
                Some(member) => {
                    member.transforms = transforms;
                    self.fan_out(
                        &room_id,
                        from,
                        ServerMessage::ParticipantMoved {
                            connection_id: from,
                            transforms,
                        },
                    )
                }
                None => {
                    self.stats.messages_dropped += 1;
                    tracing::debug!(target: "relay", room = %room_id, connection = %from, "transform from non-member");
                    vec![Delivery::new(from, ServerMessage::RejoinRequired { room_id })]
                }
            },
            ClientMessage::WorkshopEvent { room_id, event } => {
                match self.touch(from, &room_id, now) {
                    Some(_) => self.fan_out(
                        &room_id,
                        from,
                        ServerMessage::WorkshopEvent {
                            connection_id: from,
                            event,
                        },
                    ),
                    None => self.drop_message(),
                }
            }
            ClientMessage::TeacherSyncUpdate { room_id, camera } => {
                match self.touch(from, &room_id, now) {
                    Some(member) => {
                        let role = member.profile.role;
                        self.fan_out(
                            &room_id,
                            from,
                            ServerMessage::TeacherSyncUpdate {
                                connection_id: from,
                                role,
                                camera,
                            },
                        )
                    }
                    None => self.drop_message(),
                }
            }
            ClientMessage::TeacherPointerMove { room_id, pointer } => {
                match self.touch(from, &room_id, now) {
                    Some(member) => {
                        let role = member.profile.role;
                        self.fan_out(
                            &room_id,
                            from,
                            ServerMessage::TeacherPointerMove {
                                connection_id: from,
                                role,
                                pointer,
                            },
                        )
                    }
                    None => self.drop_message(),
                }
            }
        };

        self.stats.deliveries += deliveries.len() as u64;
        deliveries
    }

    /// Remove a connection from every room it joined
    pub fn disconnect(&mut self, from: ConnectionId) -> Vec<Delivery> {
        let rooms: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|(_, members)| members.contains_key(&from))
            .map(|(room, _)| room.clone())
            .collect();

        let mut deliveries = Vec::new();
        for room in rooms {
            deliveries.extend(self.leave(from, &room));
        }
        self.stats.deliveries += deliveries.len() as u64;
        deliveries
    }

    /// Evict members that have been silent for longer than `idle`
    pub fn sweep(&mut self, now: Instant, idle: Duration) -> Vec<Delivery> {
        let stale: Vec<(RoomId, ConnectionId)> = self
            .rooms
            .iter()
            .flat_map(|(room, members)| {
                members
                    .iter()
                    .filter(|(_, m)| now.saturating_duration_since(m.last_seen) > idle)
                    .map(move |(id, _)| (room.clone(), *id))
            })
            .collect();

        let mut deliveries = Vec::new();
        for (room, id) in stale {
            tracing::debug!(target: "relay", room = %room, connection = %id, "evicting idle member");
            self.stats.evictions += 1;
            deliveries.extend(self.leave(id, &room));
        }
        self.stats.deliveries += deliveries.len() as u64;
        deliveries
    }

    /// Is the connection a member of any room
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.rooms.values().any(|members| members.contains_key(&id))
    }

    pub fn room_size(&self, room: &RoomId) -> usize {
        self.rooms.get(room).map(HashMap::len).unwrap_or(0)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Current participants of a room, excluding `except`
    pub fn snapshot(&self, room: &RoomId, except: ConnectionId) -> Vec<Participant> {
        let mut participants: Vec<Participant> = self
            .rooms
            .get(room)
            .into_iter()
            .flat_map(|members| members.iter())
            .filter(|(id, _)| **id != except)
            .map(|(id, member)| member.as_participant(*id))
            .collect();
        participants.sort_by_key(|p| p.connection_id);
        participants
    }

    pub fn stats(&self) -> &RegistryStats {
        &self.stats
    }

    fn join(
        &mut self,
        from: ConnectionId,
        room_id: RoomId,
        profile: Profile,
        now: Instant,
    ) -> Vec<Delivery> {
        let members = self.rooms.entry(room_id.clone()).or_default();
        if let Some(member) = members.get_mut(&from) {
            member.profile = profile;
            member.last_seen = now;
            tracing::debug!(target: "relay", room = %room_id, connection = %from, "repeated join");
            return vec![Delivery::new(
                from,
                ServerMessage::CurrentParticipants {
                    participants: self.snapshot(&room_id, from),
                },
            )];
        }
        members.insert(
            from,
            Member {
                profile: profile.clone(),
                transforms: TransformFrame::standing(),
                last_seen: now,
            },
        );

        tracing::info!(
            target: "relay",
            room = %room_id,
            connection = %from,
            role = %profile.role,
            "participant joined"
        );

        let mut deliveries = self.fan_out(
            &room_id,
            from,
            ServerMessage::UserJoined {
                connection_id: from,
                participant: profile,
            },
        );
        deliveries.push(Delivery::new(
            from,
            ServerMessage::CurrentParticipants {
                participants: self.snapshot(&room_id, from),
            },
        ));
        deliveries
    }

    fn leave(&mut self, from: ConnectionId, room_id: &RoomId) -> Vec<Delivery> {
        let Some(members) = self.rooms.get_mut(room_id) else {
            return Vec::new();
        };
        if members.remove(&from).is_none() {
            return Vec::new();
        }

        tracing::info!(target: "relay", room = %room_id, connection = %from, "participant left");

        if members.is_empty() {
            self.rooms.remove(room_id);
            tracing::debug!(target: "relay", room = %room_id, "room closed");
            return Vec::new();
        }

        self.fan_out(
            room_id,
            from,
            ServerMessage::UserLeft {
                connection_id: from,
            },
        )
    }

    fn touch(&mut self, from: ConnectionId, room_id: &RoomId, now: Instant) -> Option<&mut Member> {
        let member = self.rooms.get_mut(room_id)?.get_mut(&from)?;
        member.last_seen = now;
        Some(member)
    }

    fn fan_out(
        &self,
        room_id: &RoomId,
        from: ConnectionId,
        message: ServerMessage,
    ) -> Vec<Delivery> {
        let Some(members) = self.rooms.get(room_id) else {
            return Vec::new();
        };
        let mut targets: Vec<ConnectionId> =
            members.keys().copied().filter(|id| *id != from).collect();
        targets.sort();
        targets
            .into_iter()
            .map(|to| Delivery::new(to, message.clone()))
            .collect()
    }

    fn drop_message(&mut self) -> Vec<Delivery> {
        self.stats.messages_dropped += 1;
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_core::{Pose, Role, Vec3};
    use cohort_wire::{EventEnvelope, ModeratorOverride, PointerRay};
    use proptest::prelude::*;

    fn room() -> RoomId {
        RoomId::from("lab")
    }

    fn join(registry: &mut RoomRegistry, id: u64, role: Role, now: Instant) -> Vec<Delivery> {
        registry.handle(
            ConnectionId::new(id),
            ClientMessage::JoinRoom {
                room_id: room(),
                participant: Profile::new(format!("p{id}"), role),
            },
            now,
        )
    }

    #[test]
    fn test_join_announces_and_snapshots() {
        let mut registry = RoomRegistry::new();
        let now = Instant::now();

        let first = join(&mut registry, 1, Role::Teacher, now);
        assert_eq!(first.len(), 1);
        assert_eq!(
            first[0].message,
            ServerMessage::CurrentParticipants {
                participants: vec![]
            }
        );

        let second = join(&mut registry, 2, Role::Student, now);
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].to, ConnectionId::new(1));
        assert!(matches!(
            second[0].message,
            ServerMessage::UserJoined { connection_id, .. } if connection_id == ConnectionId::new(2)
        ));
        match &second[1].message {
            ServerMessage::CurrentParticipants { participants } => {
                assert_eq!(second[1].to, ConnectionId::new(2));
                assert_eq!(participants.len(), 1);
                assert_eq!(participants[0].connection_id, ConnectionId::new(1));
                assert_eq!(participants[0].transforms.head.position.y, 1.6);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_transform_forwarded_to_others_only() {
        let mut registry = RoomRegistry::new();
        let now = Instant::now();
        join(&mut registry, 1, Role::Student, now);
        join(&mut registry, 2, Role::Student, now);
        join(&mut registry, 3, Role::Student, now);

        let frame = TransformFrame::head_only(Pose::at(Vec3::new(1.0, 1.7, 0.0)));
        let out = registry.handle(
            ConnectionId::new(2),
            ClientMessage::UpdateTransform {
                room_id: room(),
                transforms: frame,
            },
            now,
        );
        let targets: Vec<u64> = out.iter().map(|d| d.to.0).collect();
        assert_eq!(targets, vec![1, 3]);

        let snapshot = registry.snapshot(&room(), ConnectionId::new(1));
        let moved = snapshot
            .iter()
            .find(|p| p.connection_id == ConnectionId::new(2))
            .unwrap();
        assert_eq!(moved.transforms, frame);
    }

    #[test]
    fn test_non_member_messages_dropped() {
        let mut registry = RoomRegistry::new();
        let now = Instant::now();
        join(&mut registry, 1, Role::Student, now);

        let out = registry.handle(
            ConnectionId::new(9),
            ClientMessage::WorkshopEvent {
                room_id: room(),
                event: EventEnvelope::new("quiz", serde_json::Value::Null),
            },
            now,
        );
        assert!(out.is_empty());
        assert_eq!(registry.stats().messages_dropped, 1);
    }

    #[test]
    fn test_moderator_frames_carry_role() {
        let mut registry = RoomRegistry::new();
        let now = Instant::now();
        join(&mut registry, 1, Role::Teacher, now);
        join(&mut registry, 2, Role::Student, now);

        let out = registry.handle(
            ConnectionId::new(1),
            ClientMessage::TeacherSyncUpdate {
                room_id: room(),
                camera: ModeratorOverride::follow(Pose::at(Vec3::ZERO)),
            },
            now,
        );
        assert_eq!(out.len(), 1);
        assert!(matches!(
            out[0].message,
            ServerMessage::TeacherSyncUpdate { role: Role::Teacher, .. }
        ));

        let out = registry.handle(
            ConnectionId::new(2),
            ClientMessage::TeacherPointerMove {
                room_id: room(),
                pointer: PointerRay::off(),
            },
            now,
        );
        assert!(matches!(
            out[0].message,
            ServerMessage::TeacherPointerMove { role: Role::Student, .. }
        ));
    }

    #[test]
    fn test_last_leave_closes_room() {
        let mut registry = RoomRegistry::new();
        let now = Instant::now();
        join(&mut registry, 1, Role::Student, now);
        join(&mut registry, 2, Role::Student, now);

        let out = registry.disconnect(ConnectionId::new(1));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, ConnectionId::new(2));
        assert_eq!(
            out[0].message,
            ServerMessage::UserLeft {
                connection_id: ConnectionId::new(1)
            }
        );

        let out = registry.handle(
            ConnectionId::new(2),
            ClientMessage::LeaveRoom { room_id: room() },
            now,
        );
        assert!(out.is_empty());
        assert_eq!(registry.room_count(), 0);
        assert!(!registry.contains(ConnectionId::new(2)));
    }

    #[test]
    fn test_sweep_evicts_silent_members() {
        let mut registry = RoomRegistry::new();
        let start = Instant::now();
        join(&mut registry, 1, Role::Student, start);
        join(&mut registry, 2, Role::Student, start);

        let later = start + Duration::from_secs(10);
        registry.handle(
            ConnectionId::new(2),
            ClientMessage::UpdateTransform {
                room_id: room(),
                transforms: TransformFrame::standing(),
            },
            later,
        );

        let out = registry.sweep(start + Duration::from_secs(16), Duration::from_secs(15));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, ConnectionId::new(2));
        assert_eq!(registry.room_size(&room()), 1);
        assert_eq!(registry.stats().evictions, 1);
    }

    fn moved(registry: &mut RoomRegistry, id: u64, now: Instant) -> Vec<Delivery> {
        registry.handle(
            ConnectionId::new(id),
            ClientMessage::UpdateTransform {
                room_id: room(),
                transforms: TransformFrame::head_only(Pose::at(Vec3::new(2.0, 1.6, 0.0))),
            },
            now,
        )
    }

    #[test]
    fn test_evicted_member_is_asked_to_rejoin() {
        let mut registry = RoomRegistry::new();
        let start = Instant::now();
        join(&mut registry, 1, Role::Teacher, start);
        join(&mut registry, 2, Role::Student, start);
        moved(&mut registry, 1, start + Duration::from_secs(10));

        // Member 2 went quiet through a network pause and is swept.
        let swept = start + Duration::from_secs(16);
        assert_eq!(registry.sweep(swept, Duration::from_secs(15)).len(), 1);
        assert_eq!(registry.room_size(&room()), 1);

        // Its resumed stream is answered with a rejoin request, not silence.
        for tick in 0..3 {
            let out = moved(&mut registry, 2, swept + Duration::from_millis(50 * tick));
            assert_eq!(
                out,
                vec![Delivery::new(
                    ConnectionId::new(2),
                    ServerMessage::RejoinRequired { room_id: room() }
                )]
            );
        }

        let rejoined = join(&mut registry, 2, Role::Student, swept + Duration::from_millis(200));
        assert!(matches!(
            rejoined[0].message,
            ServerMessage::UserJoined { connection_id, .. } if connection_id == ConnectionId::new(2)
        ));
        assert_eq!(registry.room_size(&room()), 2);

        let out = moved(&mut registry, 2, swept + Duration::from_millis(250));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, ConnectionId::new(1));
    }

    #[test]
    fn test_rejoin_request_after_relay_restart() {
        // A fresh registry knows nobody; the first frame earns a rejoin request.
        let mut registry = RoomRegistry::new();
        let out = moved(&mut registry, 5, Instant::now());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, ConnectionId::new(5));
        assert!(matches!(out[0].message, ServerMessage::RejoinRequired { .. }));
        assert_eq!(registry.stats().messages_dropped, 1);
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn test_repeated_join_is_idempotent() {
        let mut registry = RoomRegistry::new();
        let now = Instant::now();
        join(&mut registry, 1, Role::Student, now);
        join(&mut registry, 2, Role::Student, now);
        moved(&mut registry, 2, now);

        let again = join(&mut registry, 2, Role::Student, now);
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].to, ConnectionId::new(2));
        assert!(matches!(
            &again[0].message,
            ServerMessage::CurrentParticipants { participants } if participants.len() == 1
        ));
        assert_eq!(registry.room_size(&room()), 2);

        // The stored pose survives the repeated join.
        let seen = registry.snapshot(&room(), ConnectionId::new(1));
        assert_eq!(seen[0].transforms.head.position.x, 2.0);
    }

    proptest! {
        #[test]
        fn prop_never_delivers_to_sender(ids in proptest::collection::vec(1u64..20, 1..12), sender in 1u64..20) {
            let mut registry = RoomRegistry::new();
            let now = Instant::now();
            for id in &ids {
                join(&mut registry, *id, Role::Student, now);
            }
            let out = registry.handle(
                ConnectionId::new(sender),
                ClientMessage::UpdateTransform {
                    room_id: room(),
                    transforms: TransformFrame::standing(),
                },
                now,
            );
            let member = ids.contains(&sender);
            prop_assert!(out.iter().all(|d| d.to != ConnectionId::new(sender)
                || (!member && matches!(d.message, ServerMessage::RejoinRequired { .. }))),
                "sender received a non-RejoinRequired delivery");
            let snapshot = registry.snapshot(&room(), ConnectionId::new(sender));
            prop_assert!(snapshot.iter().all(|p| p.connection_id != ConnectionId::new(sender)));
        }
    }
}
