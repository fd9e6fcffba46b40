//! Geometry primitives - positions, poses and rays
//!
//! Rotations are carried as Euler angles in degrees (YXZ order, as produced
//! by the scene's camera rig). The engine never interpolates them; it only
//! derives the view-forward direction for ray casting.

use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

/// Standing eye height used for freshly joined participants and rig offsets
pub const DEFAULT_EYE_HEIGHT: f32 = 1.6;

/// 3D vector in scene units (metres)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Unit vector in the same direction; zero stays zero
    pub fn normalize(&self) -> Vec3 {
        let len = self.length();
        if len < 1e-6 {
            return Vec3::ZERO;
        }
        Vec3::new(self.x / len, self.y / len, self.z / len)
    }

    pub fn distance(&self, other: &Vec3) -> f32 {
        (*self - *other).length()
    }

    /// Linear interpolation
    pub fn lerp(&self, other: &Vec3, t: f32) -> Vec3 {
        Vec3 {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
            z: self.z + (other.z - self.z) * t,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;

    fn mul(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// Position plus Euler rotation in degrees
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pose {
    pub position: Vec3,
    pub rotation_degrees: Vec3,
}

impl Pose {
    pub fn new(position: Vec3, rotation_degrees: Vec3) -> Self {
        Self {
            position,
            rotation_degrees,
        }
    }

    /// Pose at `position` looking down -Z
    pub fn at(position: Vec3) -> Self {
        Self::new(position, Vec3::ZERO)
    }

    /// View-forward direction (unit length)
    ///
    /// YXZ order with -Z forward: yaw is `rotation.y`, pitch is `rotation.x`;
    /// roll does not move the forward axis.
    pub fn forward(&self) -> Vec3 {
        let yaw = self.rotation_degrees.y.to_radians();
        let pitch = self.rotation_degrees.x.to_radians();
        Vec3::new(
            -yaw.sin() * pitch.cos(),
            pitch.sin(),
            -yaw.cos() * pitch.cos(),
        )
        .normalize()
    }

    /// Ray from this pose along its view-forward direction
    pub fn view_ray(&self) -> Ray {
        Ray::new(self.position, self.forward())
    }
}

/// Per-tick transform snapshot of one participant
///
/// Hands are absent when no controller is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformFrame {
    pub head: Pose,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_hand: Option<Pose>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_hand: Option<Pose>,
}

impl TransformFrame {
    pub fn head_only(head: Pose) -> Self {
        Self {
            head,
            left_hand: None,
            right_hand: None,
        }
    }

    /// Transforms assigned to a participant before its first frame arrives
    pub fn standing() -> Self {
        Self::head_only(Pose::at(Vec3::new(0.0, DEFAULT_EYE_HEIGHT, 0.0)))
    }
}

impl Default for TransformFrame {
    fn default() -> Self {
        Self::head_only(Pose::default())
    }
}

/// Half-line with unit direction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize(),
        }
    }

    /// Point at distance `t` along the ray
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}
