//! Virtual scene
//!
//! A headless stand-in for the rendered scene: the test steers the head pose
//! and gaze target, and reads back what moderator frames did to the view.

use std::sync::Arc;

use cohort_core::{GazeHit, GazeProbe, Pose, PoseSource, Ray, SceneProbe, Vec3, ViewController};
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct SceneState {
    head: Option<Pose>,
    left_hand: Option<Pose>,
    right_hand: Option<Pose>,
    gaze: Option<GazeHit>,
    floor: bool,
    camera_writes: Vec<Pose>,
    pointer: Option<(Vec3, Vec3)>,
}

/// Shared handle to a headless scene
///
/// Clones observe and steer the same scene; one clone is handed to the
/// session, the test keeps another.
#[derive(Debug, Clone)]
pub struct VirtualScene {
    state: Arc<Mutex<SceneState>>,
}

impl VirtualScene {
    /// Viewer standing at `position`, looking down -Z, over a floor at y = 0
    pub fn standing_at(position: Vec3) -> Self {
        Self {
            state: Arc::new(Mutex::new(SceneState {
                head: Some(Pose::at(position)),
                floor: true,
                ..SceneState::default()
            })),
        }
    }

    /// Scene without a camera
    pub fn empty() -> Self {
        Self {
            state: Arc::new(Mutex::new(SceneState::default())),
        }
    }

    pub fn set_head(&self, pose: Pose) {
        self.state.lock().head = Some(pose);
    }

    pub fn set_hands(&self, left: Option<Pose>, right: Option<Pose>) {
        let mut state = self.state.lock();
        state.left_hand = left;
        state.right_hand = right;
    }

    /// Point the gaze at a named part, or at nothing
    pub fn look_at(&self, target: Option<&str>) {
        self.state.lock().gaze = target.map(|t| GazeHit::new(t, Vec3::new(0.0, 0.5, 0.0)));
    }

    pub fn camera_writes(&self) -> Vec<Pose> {
        self.state.lock().camera_writes.clone()
    }

    pub fn last_camera(&self) -> Option<Pose> {
        self.state.lock().camera_writes.last().copied()
    }

    pub fn pointer(&self) -> Option<(Vec3, Vec3)> {
        self.state.lock().pointer
    }
}

impl PoseSource for VirtualScene {
    fn head_pose(&self) -> Option<Pose> {
        self.state.lock().head
    }

    fn left_hand_pose(&self) -> Option<Pose> {
        self.state.lock().left_hand
    }

    fn right_hand_pose(&self) -> Option<Pose> {
        self.state.lock().right_hand
    }
}

impl SceneProbe for VirtualScene {
    /// Intersect the floor plane
    fn intersect(&self, ray: &Ray, max_distance: f32) -> Option<Vec3> {
        if !self.state.lock().floor || ray.direction.y >= 0.0 {
            return None;
        }
        let t = -ray.origin.y / ray.direction.y;
        (t >= 0.0 && t <= max_distance).then(|| ray.at(t))
    }
}

impl GazeProbe for VirtualScene {
    fn gaze_hit(&self) -> Option<GazeHit> {
        self.state.lock().gaze.clone()
    }
}

impl ViewController for VirtualScene {
    fn apply_camera(&mut self, pose: &Pose) {
        self.state.lock().camera_writes.push(*pose);
    }

    fn show_pointer(&mut self, origin: Vec3, target: Vec3) {
        self.state.lock().pointer = Some((origin, target));
    }

    fn hide_pointer(&mut self) {
        self.state.lock().pointer = None;
    }
}
