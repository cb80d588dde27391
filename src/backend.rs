//! The narrow interface every physics engine is consumed through.

use crate::error::BackendError;
use crate::geometry::BodyDescriptor;
use crate::types::{Aabb, Pose};
use glam::Vec3;

/// Index of a body inside one backend world.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct BodyHandle(pub usize);

/// One physics world.
///
/// Created by a [`PhysicsEngine`](crate::engine::PhysicsEngine) and owned by
/// exactly one thread at a time: the scene while idle, the bake worker while
/// recording.
pub trait PhysicsBackend: Send {
    fn name(&self) -> &str;

    /// Remove every body. Gravity is kept.
    fn clear(&mut self);

    fn add_static_body(&mut self, desc: &BodyDescriptor) -> BodyHandle;

    /// Dynamic bodies are observed: [`observed_bodies`](Self::observed_bodies)
    /// lists them in insertion order.
    fn add_dynamic_body(&mut self, desc: &BodyDescriptor) -> BodyHandle;

    fn observed_bodies(&self) -> &[BodyHandle];

    fn gravity(&self) -> Vec3;
    fn set_gravity(&mut self, gravity: Vec3);

    /// Advance the world by `dt` seconds and make the results readable.
    fn step_and_fetch(&mut self, dt: f32) -> Result<(), BackendError>;

    fn pose(&self, body: BodyHandle) -> Result<Pose, BackendError>;
    fn set_pose(&mut self, body: BodyHandle, pose: Pose) -> Result<(), BackendError>;

    /// World bounds of every shape on the body.
    fn world_bounds(&self, body: BodyHandle) -> Result<Aabb, BackendError>;

    fn set_kinematic(&mut self, body: BodyHandle, kinematic: bool) -> Result<(), BackendError>;
    fn is_kinematic(&self, body: BodyHandle) -> Result<bool, BackendError>;

    fn linear_velocity(&self, body: BodyHandle) -> Result<Vec3, BackendError>;
    fn set_linear_velocity(&mut self, body: BodyHandle, v: Vec3) -> Result<(), BackendError>;
    fn set_angular_velocity(&mut self, body: BodyHandle, w: Vec3) -> Result<(), BackendError>;

    fn apply_impulse_at_position(
        &mut self,
        body: BodyHandle,
        impulse: Vec3,
        position: Vec3,
    ) -> Result<(), BackendError>;
}
