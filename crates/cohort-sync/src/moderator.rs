//! Moderator Override Channel
//!
//! Two independent edge-triggered streams driven by the moderator:
//! camera-follow and pointer. While a stream is active every tick sends the
//! current frame; switching it off sends exactly one `{active:false}`.
//!
//! Receivers only act on frames whose relay-stamped sender role is the
//! moderator role and whose sender is not themselves.

use std::time::Duration;

use cohort_core::{
    CohortError, CohortResult, ConnectionId, Pose, Role, RoomId, SceneProbe, Vec3,
};
use cohort_wire::{ClientMessage, ModeratorOverride, PointerRay, ServerMessage};

/// Override tick interval
pub const OVERRIDE_INTERVAL: Duration = Duration::from_millis(50);

/// Moderator channel configuration
#[derive(Debug, Clone)]
pub struct ModeratorConfig {
    /// Height of the head above the camera rig, removed from synced poses
    pub rig_height: f32,
    /// Pointer ray length when nothing is hit (m)
    pub pointer_range: f32,
}

impl Default for ModeratorConfig {
    fn default() -> Self {
        Self {
            rig_height: cohort_core::DEFAULT_EYE_HEIGHT,
            pointer_range: 10.0,
        }
    }
}

/// What a receiver must do with an inbound override frame
#[derive(Debug, Clone, PartialEq)]
pub enum OverrideAction {
    /// Write the rig pose once
    ApplyCamera(Pose),
    /// The moderator stopped camera-follow
    CameraReleased,
    ShowPointer { origin: Vec3, target: Vec3 },
    HidePointer,
}

/// Edge-triggered stream state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Inactive,
    Active,
}

impl StreamState {
    pub fn is_active(self) -> bool {
        self == StreamState::Active
    }
}

/// Moderator override state for one client
#[derive(Debug)]
pub struct ModeratorChannel {
    self_id: ConnectionId,
    room: RoomId,
    role: Role,
    config: ModeratorConfig,
    camera: StreamState,
    pointer: StreamState,
    local_pointer: Option<(Vec3, Vec3)>,
    following: Option<ConnectionId>,
}

impl ModeratorChannel {
    pub fn new(self_id: ConnectionId, room: RoomId, role: Role, config: ModeratorConfig) -> Self {
        Self {
            self_id,
            room,
            role,
            config,
            camera: StreamState::Inactive,
            pointer: StreamState::Inactive,
            local_pointer: None,
            following: None,
        }
    }

    fn require_moderator(&self) -> CohortResult<()> {
        if self.role.is_moderator() {
            Ok(())
        } else {
            Err(CohortError::NotModerator(self.role))
        }
    }

    /// Toggle camera-follow
    ///
    /// Returns the deactivation frame on the Active → Inactive edge.
    pub fn set_camera_sync(&mut self, on: bool) -> CohortResult<Option<ClientMessage>> {
        self.require_moderator()?;
        match (self.camera, on) {
            (StreamState::Inactive, true) => {
                self.camera = StreamState::Active;
                tracing::info!(target: "moderator", room = %self.room, "camera sync on");
                Ok(None)
            }
            (StreamState::Active, false) => {
                self.camera = StreamState::Inactive;
                tracing::info!(target: "moderator", room = %self.room, "camera sync off");
                Ok(Some(ClientMessage::TeacherSyncUpdate {
                    room_id: self.room.clone(),
                    camera: ModeratorOverride::released(),
                }))
            }
            _ => Ok(None),
        }
    }

    /// Toggle the pointer
    ///
    /// Returns the clear frame on the Active → Inactive edge.
    pub fn set_pointer(&mut self, on: bool) -> CohortResult<Option<ClientMessage>> {
        self.require_moderator()?;
        match (self.pointer, on) {
            (StreamState::Inactive, true) => {
                self.pointer = StreamState::Active;
                Ok(None)
            }
            (StreamState::Active, false) => {
                self.pointer = StreamState::Inactive;
                self.local_pointer = None;
                Ok(Some(ClientMessage::TeacherPointerMove {
                    room_id: self.room.clone(),
                    pointer: PointerRay::off(),
                }))
            }
            _ => Ok(None),
        }
    }

    pub fn camera_state(&self) -> StreamState {
        self.camera
    }

    pub fn pointer_state(&self) -> StreamState {
        self.pointer
    }

    /// Frames for the active streams
    pub fn tick<P: SceneProbe + ?Sized>(&mut self, head: &Pose, scene: &P) -> Vec<ClientMessage> {
        let mut out = Vec::new();

        if self.camera.is_active() {
            let rig = Pose::new(
                head.position - Vec3::new(0.0, self.config.rig_height, 0.0),
                head.rotation_degrees,
            );
            out.push(ClientMessage::TeacherSyncUpdate {
                room_id: self.room.clone(),
                camera: ModeratorOverride::follow(rig),
            });
        }

        if self.pointer.is_active() {
            let ray = head.view_ray();
            let target = scene
                .intersect(&ray, self.config.pointer_range)
                .unwrap_or_else(|| ray.at(self.config.pointer_range));
            self.local_pointer = Some((ray.origin, target));
            out.push(ClientMessage::TeacherPointerMove {
                room_id: self.room.clone(),
                pointer: PointerRay::segment(ray.origin, target),
            });
        }

        out
    }

    /// The moderator's own pointer segment, for local rendering
    pub fn local_pointer(&self) -> Option<(Vec3, Vec3)> {
        self.local_pointer
    }

    /// Moderator currently being followed, if any
    pub fn following(&self) -> Option<ConnectionId> {
        self.following
    }

    /// Interpret an inbound frame
    pub fn apply(&mut self, message: &ServerMessage) -> Option<OverrideAction> {
        match message {
            ServerMessage::TeacherSyncUpdate {
                connection_id,
                role,
                camera,
            } => {
                if !self.accepts(*connection_id, *role) {
                    return None;
                }
                match (camera.active, camera.camera) {
                    (true, Some(pose)) => {
                        self.following = Some(*connection_id);
                        Some(OverrideAction::ApplyCamera(pose))
                    }
                    (true, None) => None,
                    (false, _) => {
                        self.following = None;
                        Some(OverrideAction::CameraReleased)
                    }
                }
            }
            ServerMessage::TeacherPointerMove {
                connection_id,
                role,
                pointer,
            } => {
                if !self.accepts(*connection_id, *role) {
                    return None;
                }
                Some(match pointer.endpoints() {
                    Some((origin, target)) => OverrideAction::ShowPointer { origin, target },
                    None => OverrideAction::HidePointer,
                })
            }
            _ => None,
        }
    }

    fn accepts(&self, sender: ConnectionId, role: Role) -> bool {
        let accepted = role.is_moderator() && sender != self.self_id;
        if !accepted {
            tracing::trace!(target: "moderator", %sender, %role, "ignoring override frame");
        }
        accepted
    }
}
