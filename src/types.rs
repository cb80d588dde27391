//! Core types shared across all modules.

use crate::geometry::BodyDescriptor;
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Poses
// ---------------------------------------------------------------------------

/// World-space position + rotation of one body at one instant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Pose {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    pub fn identity() -> Self {
        Self::new(Vec3::ZERO, Quat::IDENTITY)
    }

    pub fn from_position(position: Vec3) -> Self {
        Self::new(position, Quat::IDENTITY)
    }

    /// Component-wise position lerp, shortest-path rotation slerp.
    pub fn lerp(&self, other: &Pose, t: f32) -> Pose {
        Pose {
            position: self.position.lerp(other.position, t),
            rotation: self.rotation.slerp(other.rotation, t).normalize(),
        }
    }

    /// Transform a point from body space into world space.
    pub fn transform_point(&self, local: Vec3) -> Vec3 {
        self.position + self.rotation * local
    }

    /// Compose `self * local`: `local` is expressed in this pose's frame.
    pub fn compose(&self, local: &Pose) -> Pose {
        Pose {
            position: self.transform_point(local.position),
            rotation: (self.rotation * local.rotation).normalize(),
        }
    }

    pub fn approx_eq(&self, other: &Pose, epsilon: f32) -> bool {
        self.position.abs_diff_eq(other.position, epsilon)
            && (self.rotation.dot(other.rotation).abs() - 1.0).abs() <= epsilon
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::fmt::Display for Pose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({:.2}, {:.2}, {:.2})",
            self.position.x, self.position.y, self.position.z
        )
    }
}

// ---------------------------------------------------------------------------
// Bounds
// ---------------------------------------------------------------------------

/// World-space axis-aligned bounding box. `min <= max` on every axis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Builds a box from two arbitrary corners.
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    pub fn from_center_extent(center: Vec3, half_extent: Vec3) -> Self {
        let half = half_extent.abs();
        Self {
            min: center - half,
            max: center + half,
        }
    }

    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = Vec3>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        Some(iter.fold(Self::new(first, first), |acc, p| Self {
            min: acc.min.min(p),
            max: acc.max.max(p),
        }))
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extent(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn expand_by(&self, margin: f32) -> Self {
        Self::new(self.min - Vec3::splat(margin), self.max + Vec3::splat(margin))
    }

    pub fn union(&self, other: &Aabb) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Inclusive overlap test: touching faces count as intersecting.
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
            && self.min.z <= other.max.z
            && other.min.z <= self.max.z
    }

    pub fn contains_point(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// World box of this body-space box under `pose` (rotated corners, re-fit).
    pub fn transformed(&self, pose: &Pose) -> Self {
        let corners = self.corners().map(|c| pose.transform_point(c));
        let mut out = Self::new(corners[0], corners[0]);
        for c in &corners[1..] {
            out.min = out.min.min(*c);
            out.max = out.max.max(*c);
        }
        out
    }
}

impl std::fmt::Display for Aabb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[({:.2}, {:.2}, {:.2}) .. ({:.2}, {:.2}, {:.2})]",
            self.min.x, self.min.y, self.min.z, self.max.x, self.max.y, self.max.z
        )
    }
}

// ---------------------------------------------------------------------------
// Tracked objects
// ---------------------------------------------------------------------------

/// Opaque handle to an object owned by the [`SceneHost`](crate::host::SceneHost).
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ObjectHandle(pub u64);

impl std::fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum BodyRole {
    Dynamic,
    Static,
}

/// One physically simulated object under bake/playback control.
#[derive(Debug, Clone)]
pub struct TrackedBody {
    pub handle: ObjectHandle,
    /// Pose at the time the object was added; restored on cancel.
    pub initial: Pose,
    pub role: BodyRole,
    /// Host collision profile, restored after playback/activation.
    pub collision_profile: String,
    /// Geometry copied into the bake backend on every record.
    pub descriptor: BodyDescriptor,
}

/// Current scene mode.
#[derive(Debug, Clone, Copy, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum SceneAction {
    #[default]
    Idle,
    Recording,
    Playing,
    PlayingLive,
}

impl std::fmt::Display for SceneAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SceneAction::Idle => "idle",
            SceneAction::Recording => "recording",
            SceneAction::Playing => "playing",
            SceneAction::PlayingLive => "playing-live",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Stats & config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneStats {
    pub action: SceneAction,
    pub dynamic_objects: usize,
    pub static_objects: usize,
    pub activators: usize,
    pub scheduled_events: usize,
    pub frame_count: usize,
    pub frame_interval: f32,
    pub progress: f32,
    pub finished: bool,
    pub activated_objects: usize,
}

/// How the playback SOD check finds candidate objects.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SodAlgorithm {
    /// Every activator against every unactivated object.
    Naive,
    /// Spatial-hash broad phase, then an exact box test.
    #[default]
    Indexed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SodConfig {
    pub enabled: bool,
    /// Edge length of one hash cell in world units.
    pub cell_size: f32,
    /// Centre of the hash grid.
    pub grid_origin: Vec3,
    /// SOD checks per second (`<= 0` checks on every tick).
    pub check_fps: f32,
    pub algorithm: SodAlgorithm,
    /// Activated objects become activators themselves.
    pub chain_reaction: bool,
    /// Box margin for activators registered by the caller.
    pub original_expansion: f32,
    /// Box margin for activators added by chain reaction.
    pub added_expansion: f32,
}

impl Default for SodConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cell_size: 1.0,
            grid_origin: Vec3::ZERO,
            check_fps: -1.0,
            algorithm: SodAlgorithm::Indexed,
            chain_reaction: false,
            original_expansion: 0.0,
            added_expansion: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Blend between the two bracketing frames during playback.
    pub interpolate: bool,
    /// Playback frames per second (`<= 0` renders on every tick).
    pub play_fps: f32,
    /// Disable host simulation when a dynamic object is added.
    pub freeze_on_add: bool,
    /// Run [`add_tagged_objects`](crate::scene::BakeScene::add_tagged_objects) on initialize.
    pub add_tagged_on_init: bool,
    pub dynamic_tag: String,
    pub static_tag: String,
    pub activator_tag: String,
    /// Gravity used by every bake.
    pub gravity: Vec3,
    pub sod: SodConfig,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            interpolate: true,
            play_fps: -1.0,
            freeze_on_add: true,
            add_tagged_on_init: false,
            dynamic_tag: "BakeDynamic".into(),
            static_tag: "BakeStatic".into(),
            activator_tag: "BakeActivator".into(),
            gravity: Vec3::new(0.0, -9.81, 0.0),
            sod: SodConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aabb_new_orders_corners() {
        let b = Aabb::new(Vec3::new(1.0, -1.0, 3.0), Vec3::new(-1.0, 2.0, 0.0));
        assert_eq!(b.min, Vec3::new(-1.0, -1.0, 0.0));
        assert_eq!(b.max, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn touching_boxes_intersect() {
        let a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let b = Aabb::new(Vec3::new(1.0, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        let c = Aabb::new(Vec3::new(1.01, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn rotated_box_grows() {
        let b = Aabb::from_center_extent(Vec3::ZERO, Vec3::new(1.0, 0.1, 0.1));
        let pose = Pose::new(
            Vec3::new(5.0, 0.0, 0.0),
            Quat::from_rotation_z(std::f32::consts::FRAC_PI_4),
        );
        let w = b.transformed(&pose);
        assert!(w.half_extent().y > 0.5);
        assert!((w.center() - Vec3::new(5.0, 0.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn pose_lerp_endpoints() {
        let a = Pose::from_position(Vec3::ZERO);
        let b = Pose::new(Vec3::new(2.0, 0.0, 0.0), Quat::from_rotation_y(1.0));
        assert!(a.lerp(&b, 0.0).approx_eq(&a, 1e-6));
        assert!(a.lerp(&b, 1.0).approx_eq(&b, 1e-6));
        assert!((a.lerp(&b, 0.5).position.x - 1.0).abs() < 1e-6);
    }
}
