//! Collision-free rigid-body integrator.
//!
//! Bodies fall under gravity, keep their velocities, spin about their
//! angular velocity, and react to impulses. Nothing collides. Used for
//! quick previews and anywhere a deterministic world is more useful than
//! a realistic one.

use crate::backend::{BodyHandle, PhysicsBackend};
use crate::engine::PhysicsEngine;
use crate::error::BackendError;
use crate::geometry::{BodyDescriptor, ShapeGeometry};
use crate::types::{Aabb, Pose};
use glam::{Quat, Vec3};

struct BallisticBody {
    pose: Pose,
    linear: Vec3,
    angular: Vec3,
    inv_mass: f32,
    inv_inertia: f32,
    fixed: bool,
    kinematic: bool,
    local_bounds: Option<Aabb>,
}

pub struct BallisticBackend {
    bodies: Vec<BallisticBody>,
    observed: Vec<BodyHandle>,
    gravity: Vec3,
    steps: u64,
}

impl BallisticBackend {
    pub fn new() -> Self {
        Self {
            bodies: Vec::new(),
            observed: Vec::new(),
            gravity: Vec3::new(0.0, -9.81, 0.0),
            steps: 0,
        }
    }

    /// Steps taken since creation.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    fn insert(&mut self, desc: &BodyDescriptor, fixed: bool) -> BodyHandle {
        for shape in &desc.shapes {
            if let ShapeGeometry::Unsupported { kind } = &shape.geometry {
                log::error!("Unsupported collision geometry '{}', shape skipped", kind);
            }
        }
        let local_bounds = desc.local_bounds();
        // Solid sphere approximation: I = 2/5 m r².
        let radius = local_bounds
            .map(|b| b.half_extent().length())
            .filter(|r| *r > f32::EPSILON)
            .unwrap_or(0.5);
        let mass = desc.mass.max(f32::EPSILON);
        let inertia = 0.4 * mass * radius * radius;
        self.bodies.push(BallisticBody {
            pose: desc.transform,
            linear: Vec3::ZERO,
            angular: Vec3::ZERO,
            inv_mass: if fixed { 0.0 } else { 1.0 / mass },
            inv_inertia: if fixed { 0.0 } else { 1.0 / inertia },
            fixed,
            kinematic: false,
            local_bounds,
        });
        BodyHandle(self.bodies.len() - 1)
    }

    fn body(&self, h: BodyHandle) -> Result<&BallisticBody, BackendError> {
        self.bodies.get(h.0).ok_or(BackendError::UnknownBody(h.0))
    }

    fn body_mut(&mut self, h: BodyHandle) -> Result<&mut BallisticBody, BackendError> {
        self.bodies.get_mut(h.0).ok_or(BackendError::UnknownBody(h.0))
    }
}

impl Default for BallisticBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicsBackend for BallisticBackend {
    fn name(&self) -> &str {
        "ballistic"
    }

    fn clear(&mut self) {
        self.bodies.clear();
        self.observed.clear();
    }

    fn add_static_body(&mut self, desc: &BodyDescriptor) -> BodyHandle {
        self.insert(desc, true)
    }

    fn add_dynamic_body(&mut self, desc: &BodyDescriptor) -> BodyHandle {
        let h = self.insert(desc, false);
        self.observed.push(h);
        h
    }

    fn observed_bodies(&self) -> &[BodyHandle] {
        &self.observed
    }

    fn gravity(&self) -> Vec3 {
        self.gravity
    }

    fn set_gravity(&mut self, gravity: Vec3) {
        self.gravity = gravity;
    }

    fn step_and_fetch(&mut self, dt: f32) -> Result<(), BackendError> {
        if !dt.is_finite() || dt <= 0.0 {
            return Err(BackendError::InvalidStep(dt));
        }
        let gravity = self.gravity;
        for body in self.bodies.iter_mut().filter(|b| !b.fixed && !b.kinematic) {
            body.linear += gravity * dt;
            body.pose.position += body.linear * dt;
            let spin = Quat::from_scaled_axis(body.angular * dt);
            body.pose.rotation = (spin * body.pose.rotation).normalize();
        }
        self.steps += 1;
        Ok(())
    }

    fn pose(&self, body: BodyHandle) -> Result<Pose, BackendError> {
        Ok(self.body(body)?.pose)
    }

    fn set_pose(&mut self, body: BodyHandle, pose: Pose) -> Result<(), BackendError> {
        self.body_mut(body)?.pose = pose;
        Ok(())
    }

    fn world_bounds(&self, body: BodyHandle) -> Result<Aabb, BackendError> {
        let b = self.body(body)?;
        Ok(match b.local_bounds {
            Some(local) => local.transformed(&b.pose),
            None => Aabb::new(b.pose.position, b.pose.position),
        })
    }

    fn set_kinematic(&mut self, body: BodyHandle, kinematic: bool) -> Result<(), BackendError> {
        let b = self.body_mut(body)?;
        if !b.fixed {
            b.kinematic = kinematic;
        }
        Ok(())
    }

    fn is_kinematic(&self, body: BodyHandle) -> Result<bool, BackendError> {
        Ok(self.body(body)?.kinematic)
    }

    fn linear_velocity(&self, body: BodyHandle) -> Result<Vec3, BackendError> {
        Ok(self.body(body)?.linear)
    }

    fn set_linear_velocity(&mut self, body: BodyHandle, v: Vec3) -> Result<(), BackendError> {
        let b = self.body_mut(body)?;
        if !b.fixed {
            b.linear = v;
        }
        Ok(())
    }

    fn set_angular_velocity(&mut self, body: BodyHandle, w: Vec3) -> Result<(), BackendError> {
        let b = self.body_mut(body)?;
        if !b.fixed {
            b.angular = w;
        }
        Ok(())
    }

    fn apply_impulse_at_position(
        &mut self,
        body: BodyHandle,
        impulse: Vec3,
        position: Vec3,
    ) -> Result<(), BackendError> {
        let b = self.body_mut(body)?;
        if b.fixed || b.kinematic {
            return Ok(());
        }
        let arm = position - b.pose.position;
        b.linear += impulse * b.inv_mass;
        b.angular += arm.cross(impulse) * b.inv_inertia;
        Ok(())
    }
}

/// Engine whose worlds are [`BallisticBackend`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct BallisticEngine;

impl PhysicsEngine for BallisticEngine {
    fn name(&self) -> &str {
        "ballistic"
    }

    fn create_world(&self) -> Box<dyn PhysicsBackend> {
        Box::new(BallisticBackend::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ball_at(y: f32) -> BodyDescriptor {
        BodyDescriptor::sphere(Pose::from_position(Vec3::new(0.0, y, 0.0)), 0.5)
    }

    #[test]
    fn dynamic_bodies_fall_static_bodies_stay() {
        let mut world = BallisticBackend::new();
        let floor = world.add_static_body(&BodyDescriptor::cuboid(
            Pose::identity(),
            Vec3::new(10.0, 0.5, 10.0),
        ));
        let ball = world.add_dynamic_body(&ball_at(10.0));
        assert_eq!(world.observed_bodies(), &[ball]);

        for _ in 0..10 {
            world.step_and_fetch(0.1).unwrap();
        }
        assert!(world.pose(ball).unwrap().position.y < 10.0);
        assert_eq!(world.pose(floor).unwrap().position, Vec3::ZERO);
    }

    #[test]
    fn kinematic_bodies_hold_position() {
        let mut world = BallisticBackend::new();
        let ball = world.add_dynamic_body(&ball_at(3.0));
        world.set_kinematic(ball, true).unwrap();
        world.apply_impulse_at_position(ball, Vec3::X * 100.0, Vec3::ZERO).unwrap();
        world.step_and_fetch(0.5).unwrap();
        assert_eq!(world.pose(ball).unwrap().position, Vec3::new(0.0, 3.0, 0.0));

        world.set_kinematic(ball, false).unwrap();
        world.step_and_fetch(0.5).unwrap();
        assert!(world.pose(ball).unwrap().position.y < 3.0);
    }

    #[test]
    fn invalid_step_rejected() {
        let mut world = BallisticBackend::new();
        assert_eq!(world.step_and_fetch(0.0), Err(BackendError::InvalidStep(0.0)));
        assert!(matches!(
            world.pose(BodyHandle(3)),
            Err(BackendError::UnknownBody(3))
        ));
    }

    #[test]
    fn centred_impulse_only_moves() {
        let mut world = BallisticBackend::new();
        world.set_gravity(Vec3::ZERO);
        let ball = world.add_dynamic_body(&ball_at(0.0).with_mass(2.0));
        world
            .apply_impulse_at_position(ball, Vec3::new(4.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 0.0))
            .unwrap();
        assert_eq!(world.linear_velocity(ball).unwrap(), Vec3::new(2.0, 0.0, 0.0));
        world.step_and_fetch(1.0).unwrap();
        let pose = world.pose(ball).unwrap();
        assert!((pose.position.x - 2.0).abs() < 1e-6);
        assert!(pose.rotation.abs_diff_eq(Quat::IDENTITY, 1e-6));
    }
}
