//! Room protocol messages
//!
//! Every message is a JSON object `{ "event": <name>, "payload": {...} }`.
//! Client messages are addressed to a room; relay messages are stamped with
//! the connection that originated them.

use cohort_core::{ConnectionId, Participant, Profile, Role, RoomId, TransformFrame};
use serde::{Deserialize, Serialize};

use crate::{EventEnvelope, ModeratorOverride, PointerRay};

/// Client → relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_id: RoomId,
        participant: Profile,
    },
    #[serde(rename_all = "camelCase")]
    LeaveRoom { room_id: RoomId },
    #[serde(rename_all = "camelCase")]
    UpdateTransform {
        room_id: RoomId,
        transforms: TransformFrame,
    },
    #[serde(rename_all = "camelCase")]
    WorkshopEvent {
        room_id: RoomId,
        event: EventEnvelope,
    },
    #[serde(rename_all = "camelCase")]
    TeacherSyncUpdate {
        room_id: RoomId,
        camera: ModeratorOverride,
    },
    #[serde(rename_all = "camelCase")]
    TeacherPointerMove {
        room_id: RoomId,
        pointer: PointerRay,
    },
}

impl ClientMessage {
    pub fn room_id(&self) -> &RoomId {
        match self {
            ClientMessage::JoinRoom { room_id, .. }
            | ClientMessage::LeaveRoom { room_id }
            | ClientMessage::UpdateTransform { room_id, .. }
            | ClientMessage::WorkshopEvent { room_id, .. }
            | ClientMessage::TeacherSyncUpdate { room_id, .. }
            | ClientMessage::TeacherPointerMove { room_id, .. } => room_id,
        }
    }

    /// Wire name of the message
    pub fn name(&self) -> &'static str {
        match self {
            ClientMessage::JoinRoom { .. } => "join-room",
            ClientMessage::LeaveRoom { .. } => "leave-room",
            ClientMessage::UpdateTransform { .. } => "update-transform",
            ClientMessage::WorkshopEvent { .. } => "workshop-event",
            ClientMessage::TeacherSyncUpdate { .. } => "teacher-sync-update",
            ClientMessage::TeacherPointerMove { .. } => "teacher-pointer-move",
        }
    }
}

/// Relay → client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Snapshot sent to a joiner; never contains the joiner itself
    #[serde(rename_all = "camelCase")]
    CurrentParticipants { participants: Vec<Participant> },
    #[serde(rename_all = "camelCase")]
    UserJoined {
        connection_id: ConnectionId,
        participant: Profile,
    },
    #[serde(rename_all = "camelCase")]
    UserLeft { connection_id: ConnectionId },
    #[serde(rename_all = "camelCase")]
    ParticipantMoved {
        connection_id: ConnectionId,
        transforms: TransformFrame,
    },
    #[serde(rename_all = "camelCase")]
    WorkshopEvent {
        connection_id: ConnectionId,
        event: EventEnvelope,
    },
    #[serde(rename_all = "camelCase")]
    TeacherSyncUpdate {
        connection_id: ConnectionId,
        role: Role,
        camera: ModeratorOverride,
    },
    #[serde(rename_all = "camelCase")]
    TeacherPointerMove {
        connection_id: ConnectionId,
        role: Role,
        pointer: PointerRay,
    },
    /// Sent to a connection streaming into a room it is not a member of,
    /// e.g. after idle eviction, a lost join or a relay restart
    #[serde(rename_all = "camelCase")]
    RejoinRequired { room_id: RoomId },
}

impl ServerMessage {
    /// Connection the message is about, if it names one
    pub fn origin(&self) -> Option<ConnectionId> {
        match self {
            ServerMessage::CurrentParticipants { .. } | ServerMessage::RejoinRequired { .. } => None,
            ServerMessage::UserJoined { connection_id, .. }
            | ServerMessage::UserLeft { connection_id }
            | ServerMessage::ParticipantMoved { connection_id, .. }
            | ServerMessage::WorkshopEvent { connection_id, .. }
            | ServerMessage::TeacherSyncUpdate { connection_id, .. }
            | ServerMessage::TeacherPointerMove { connection_id, .. } => Some(*connection_id),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerMessage::CurrentParticipants { .. } => "current-participants",
            ServerMessage::UserJoined { .. } => "user-joined",
            ServerMessage::UserLeft { .. } => "user-left",
            ServerMessage::ParticipantMoved { .. } => "participant-moved",
            ServerMessage::WorkshopEvent { .. } => "workshop-event",
            ServerMessage::TeacherSyncUpdate { .. } => "teacher-sync-update",
            ServerMessage::TeacherPointerMove { .. } => "teacher-pointer-move",
            ServerMessage::RejoinRequired { .. } => "rejoin-required",
        }
    }
}
