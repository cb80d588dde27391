//! Rapier-backed physics worlds.
//!
//! ```text
//! RapierEngine
//!  ├── CookCache<SharedShape>   shared hulls/meshes, cleared on shutdown
//!  └── create_world() ──► RapierBackend
//!                          ├── RigidBodySet / ColliderSet
//!                          └── PhysicsPipeline + solver state
//! ```

use crate::backend::{BodyHandle, PhysicsBackend};
use crate::engine::PhysicsEngine;
use crate::error::BackendError;
use crate::geometry::{BodyDescriptor, CookCache, ShapeDescriptor, ShapeGeometry};
use crate::types::{Aabb, Pose};
use rapier3d::na::{Quaternion, UnitQuaternion};
use rapier3d::prelude::*;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// glam <-> nalgebra
// ---------------------------------------------------------------------------

fn to_vector(v: glam::Vec3) -> Vector<Real> {
    vector![v.x, v.y, v.z]
}

fn to_point(v: glam::Vec3) -> Point<Real> {
    point![v.x, v.y, v.z]
}

fn from_vector(v: &Vector<Real>) -> glam::Vec3 {
    glam::Vec3::new(v.x, v.y, v.z)
}

fn to_isometry(pose: &Pose) -> Isometry<Real> {
    let q = pose.rotation;
    Isometry::from_parts(
        Translation::from(to_vector(pose.position)),
        UnitQuaternion::from_quaternion(Quaternion::new(q.w, q.x, q.y, q.z)),
    )
}

fn from_isometry(iso: &Isometry<Real>) -> Pose {
    let c = iso.rotation.quaternion().coords;
    Pose::new(
        from_vector(&iso.translation.vector),
        glam::Quat::from_xyzw(c.x, c.y, c.z, c.w).normalize(),
    )
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

pub struct RapierBackend {
    gravity: Vector<Real>,
    params: IntegrationParameters,
    pipeline: PhysicsPipeline,
    islands: IslandManager,
    broad_phase: BroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd: CCDSolver,
    handles: Vec<RigidBodyHandle>,
    observed: Vec<BodyHandle>,
    cooked: Arc<CookCache<SharedShape>>,
}

impl RapierBackend {
    pub fn new(cooked: Arc<CookCache<SharedShape>>) -> Self {
        Self {
            gravity: vector![0.0, -9.81, 0.0],
            params: IntegrationParameters::default(),
            pipeline: PhysicsPipeline::new(),
            islands: IslandManager::new(),
            broad_phase: BroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd: CCDSolver::new(),
            handles: Vec::new(),
            observed: Vec::new(),
            cooked,
        }
    }

    fn shape_for(&self, desc: &ShapeDescriptor) -> Option<SharedShape> {
        match &desc.geometry {
            ShapeGeometry::Box { half_extents } => Some(SharedShape::cuboid(
                half_extents.x.abs(),
                half_extents.y.abs(),
                half_extents.z.abs(),
            )),
            ShapeGeometry::Sphere { radius } => Some(SharedShape::ball(*radius)),
            ShapeGeometry::Capsule {
                half_height,
                radius,
            } => Some(SharedShape::capsule_y(*half_height, *radius)),
            ShapeGeometry::ConvexHull { key, points } => {
                let cooked = self.cooked.get_or_cook(*key, || {
                    let pts: Vec<Point<Real>> = points.iter().map(|p| to_point(*p)).collect();
                    SharedShape::convex_hull(&pts)
                });
                if cooked.is_none() {
                    log::error!("Convex hull cooking failed for mesh {}:{}", key.mesh_id, key.element);
                }
                cooked.map(|s| (*s).clone())
            }
            ShapeGeometry::TriangleMesh {
                key,
                vertices,
                indices,
            } => {
                if vertices.is_empty() || indices.is_empty() {
                    log::error!("Empty triangle mesh {}:{}", key.mesh_id, key.element);
                    return None;
                }
                let cooked = self.cooked.get_or_cook(*key, || {
                    let verts: Vec<Point<Real>> = vertices.iter().map(|p| to_point(*p)).collect();
                    Some(SharedShape::trimesh(verts, indices.clone()))
                });
                cooked.map(|s| (*s).clone())
            }
            ShapeGeometry::Unsupported { kind } => {
                log::error!("Unsupported collision geometry '{}', shape skipped", kind);
                None
            }
        }
    }

    fn insert(&mut self, desc: &BodyDescriptor, builder: RigidBodyBuilder) -> BodyHandle {
        let rb = self.bodies.insert(builder.position(to_isometry(&desc.transform)).build());
        let shapes: Vec<(SharedShape, &ShapeDescriptor)> = desc
            .shapes
            .iter()
            .filter_map(|s| self.shape_for(s).map(|shape| (shape, s)))
            .collect();
        let share = desc.mass.max(f32::EPSILON) / shapes.len().max(1) as f32;
        for (shape, s) in shapes {
            let collider = ColliderBuilder::new(shape)
                .position(to_isometry(&s.local))
                .friction(s.material.coulomb_friction())
                .restitution(s.material.restitution)
                .mass(share)
                .build();
            self.colliders
                .insert_with_parent(collider, rb, &mut self.bodies);
        }
        self.handles.push(rb);
        BodyHandle(self.handles.len() - 1)
    }

    fn handle(&self, body: BodyHandle) -> Result<RigidBodyHandle, BackendError> {
        self.handles
            .get(body.0)
            .copied()
            .ok_or(BackendError::UnknownBody(body.0))
    }

    fn body(&self, body: BodyHandle) -> Result<&RigidBody, BackendError> {
        let h = self.handle(body)?;
        self.bodies.get(h).ok_or(BackendError::UnknownBody(body.0))
    }

    fn body_mut(&mut self, body: BodyHandle) -> Result<&mut RigidBody, BackendError> {
        let h = self.handle(body)?;
        self.bodies.get_mut(h).ok_or(BackendError::UnknownBody(body.0))
    }
}

impl PhysicsBackend for RapierBackend {
    fn name(&self) -> &str {
        "rapier"
    }

    fn clear(&mut self) {
        let gravity = self.gravity;
        let cooked = Arc::clone(&self.cooked);
        *self = Self::new(cooked);
        self.gravity = gravity;
    }

    fn add_static_body(&mut self, desc: &BodyDescriptor) -> BodyHandle {
        self.insert(desc, RigidBodyBuilder::fixed())
    }

    fn add_dynamic_body(&mut self, desc: &BodyDescriptor) -> BodyHandle {
        let h = self.insert(desc, RigidBodyBuilder::dynamic());
        self.observed.push(h);
        h
    }

    fn observed_bodies(&self) -> &[BodyHandle] {
        &self.observed
    }

    fn gravity(&self) -> glam::Vec3 {
        from_vector(&self.gravity)
    }

    fn set_gravity(&mut self, gravity: glam::Vec3) {
        self.gravity = to_vector(gravity);
    }

    fn step_and_fetch(&mut self, dt: f32) -> Result<(), BackendError> {
        if !dt.is_finite() || dt <= 0.0 {
            return Err(BackendError::InvalidStep(dt));
        }
        self.params.dt = dt;
        self.pipeline.step(
            &self.gravity,
            &self.params,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd,
            None,
            &(),
            &(),
        );
        Ok(())
    }

    fn pose(&self, body: BodyHandle) -> Result<Pose, BackendError> {
        Ok(from_isometry(self.body(body)?.position()))
    }

    fn set_pose(&mut self, body: BodyHandle, pose: Pose) -> Result<(), BackendError> {
        self.body_mut(body)?.set_position(to_isometry(&pose), true);
        Ok(())
    }

    fn world_bounds(&self, body: BodyHandle) -> Result<Aabb, BackendError> {
        let rb = self.body(body)?;
        let fallback = from_vector(rb.translation());
        let bounds = rb
            .colliders()
            .iter()
            .filter_map(|h| self.colliders.get(*h))
            .map(|c| {
                let aabb = c.compute_aabb();
                Aabb::new(
                    glam::Vec3::new(aabb.mins.x, aabb.mins.y, aabb.mins.z),
                    glam::Vec3::new(aabb.maxs.x, aabb.maxs.y, aabb.maxs.z),
                )
            })
            .reduce(|a, b| a.union(&b));
        Ok(bounds.unwrap_or_else(|| Aabb::new(fallback, fallback)))
    }

    fn set_kinematic(&mut self, body: BodyHandle, kinematic: bool) -> Result<(), BackendError> {
        let rb = self.body_mut(body)?;
        if rb.is_fixed() {
            return Ok(());
        }
        let ty = if kinematic {
            RigidBodyType::KinematicPositionBased
        } else {
            RigidBodyType::Dynamic
        };
        rb.set_body_type(ty, true);
        Ok(())
    }

    fn is_kinematic(&self, body: BodyHandle) -> Result<bool, BackendError> {
        Ok(self.body(body)?.is_kinematic())
    }

    fn linear_velocity(&self, body: BodyHandle) -> Result<glam::Vec3, BackendError> {
        Ok(from_vector(self.body(body)?.linvel()))
    }

    fn set_linear_velocity(&mut self, body: BodyHandle, v: glam::Vec3) -> Result<(), BackendError> {
        self.body_mut(body)?.set_linvel(to_vector(v), true);
        Ok(())
    }

    fn set_angular_velocity(&mut self, body: BodyHandle, w: glam::Vec3) -> Result<(), BackendError> {
        self.body_mut(body)?.set_angvel(to_vector(w), true);
        Ok(())
    }

    fn apply_impulse_at_position(
        &mut self,
        body: BodyHandle,
        impulse: glam::Vec3,
        position: glam::Vec3,
    ) -> Result<(), BackendError> {
        self.body_mut(body)?
            .apply_impulse_at_point(to_vector(impulse), to_point(position), true);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Creates [`RapierBackend`] worlds that share one cooking cache.
#[derive(Default)]
pub struct RapierEngine {
    cooked: Arc<CookCache<SharedShape>>,
}

impl RapierEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cooked hulls and meshes currently cached.
    pub fn cooked_shapes(&self) -> usize {
        self.cooked.len()
    }
}

impl PhysicsEngine for RapierEngine {
    fn name(&self) -> &str {
        "rapier"
    }

    fn shutdown(&self) {
        log::debug!("Dropping {} cooked shapes", self.cooked.len());
        self.cooked.clear();
    }

    fn create_world(&self) -> Box<dyn PhysicsBackend> {
        Box::new(RapierBackend::new(Arc::clone(&self.cooked)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{MeshKey, SurfaceMaterial};

    #[test]
    fn colliders_take_the_static_friction() {
        let mut world = RapierBackend::new(Arc::new(CookCache::new()));
        let material = SurfaceMaterial {
            static_friction: 0.8,
            dynamic_friction: 0.2,
            restitution: 0.1,
        };
        let mut desc = BodyDescriptor::sphere(Pose::identity(), 0.5);
        desc.shapes = desc
            .shapes
            .into_iter()
            .map(|s| s.with_material(material))
            .collect();
        world.add_dynamic_body(&desc);

        let (_, collider) = world.colliders.iter().next().unwrap();
        assert_eq!(collider.friction(), 0.8);
        assert_eq!(collider.restitution(), 0.1);
    }

    #[test]
    fn ball_comes_to_rest_on_floor() {
        let engine = RapierEngine::new();
        let mut world = engine.create_world();
        world.add_static_body(&BodyDescriptor::cuboid(
            Pose::identity(),
            glam::Vec3::new(10.0, 0.5, 10.0),
        ));
        let ball = world.add_dynamic_body(&BodyDescriptor::sphere(
            Pose::from_position(glam::Vec3::new(0.0, 3.0, 0.0)),
            0.5,
        ));
        for _ in 0..240 {
            world.step_and_fetch(1.0 / 60.0).unwrap();
        }
        let y = world.pose(ball).unwrap().position.y;
        assert!(y > 0.5 && y < 1.5, "ball settled at {y}");
    }

    #[test]
    fn hulls_cooked_once_per_mesh() {
        let engine = RapierEngine::new();
        let mut world = engine.create_world();
        let points = vec![
            glam::Vec3::new(0.0, 0.0, 0.0),
            glam::Vec3::new(1.0, 0.0, 0.0),
            glam::Vec3::new(0.0, 1.0, 0.0),
            glam::Vec3::new(0.0, 0.0, 1.0),
        ];
        let hull = ShapeDescriptor::new(ShapeGeometry::ConvexHull {
            key: MeshKey::new(1, 0),
            points,
        });
        for i in 0..3 {
            let desc = BodyDescriptor::new(Pose::from_position(glam::Vec3::X * i as f32))
                .with_shape(hull.clone());
            world.add_dynamic_body(&desc);
        }
        assert_eq!(engine.cooked_shapes(), 1);
        engine.shutdown();
        assert_eq!(engine.cooked_shapes(), 0);
    }
}
