//! The scene-graph boundary.
//!
//! A [`SceneHost`] owns the real objects: their transforms, tags, collision
//! profiles, and live physics. The scene never stores host state itself, it
//! only reads descriptions on add and pushes transforms during playback.
//!
//! [`LiveHost`] is a self-contained host backed by its own physics world.

use crate::backend::{BodyHandle, PhysicsBackend};
use crate::geometry::{BodyDescriptor, ShapeDescriptor};
use crate::types::{Aabb, BodyRole, ObjectHandle, Pose};
use glam::Vec3;
use std::collections::BTreeMap;

/// Collision profile applied to baked objects while playback drives them.
pub const PLAYBACK_COLLISION_PROFILE: &str = "OverlapAll";

/// What the scene reads from the host when an object is added.
#[derive(Debug, Clone)]
pub struct ObjectDescription {
    pub transform: Pose,
    pub collision_profile: String,
    pub shapes: Vec<ShapeDescriptor>,
    pub mass: f32,
}

impl ObjectDescription {
    pub fn body_descriptor(&self) -> BodyDescriptor {
        BodyDescriptor {
            shapes: self.shapes.clone(),
            transform: self.transform,
            mass: self.mass,
        }
    }
}

pub trait SceneHost {
    /// `None` when the handle does not name a live object.
    fn describe(&self, object: ObjectHandle) -> Option<ObjectDescription>;

    /// Every object carrying `tag`, in a stable order.
    fn tagged(&self, tag: &str) -> Vec<ObjectHandle>;

    fn transform(&self, object: ObjectHandle) -> Option<Pose>;

    /// Move without waking physics.
    fn set_transform_no_physics(&mut self, object: ObjectHandle, pose: Pose);

    /// Move the object. With `physics_enabled == false` the move also clears
    /// any velocity, with `true` the physics body keeps its state.
    fn teleport(&mut self, object: ObjectHandle, pose: Pose, physics_enabled: bool);

    fn set_simulate_physics(&mut self, object: ObjectHandle, enabled: bool);
    fn set_collision_profile(&mut self, object: ObjectHandle, profile: &str);
    fn set_linear_velocity(&mut self, object: ObjectHandle, velocity: Vec3);

    /// Angular velocity in radians per second.
    fn set_angular_velocity(&mut self, object: ObjectHandle, velocity: Vec3);

    fn add_impulse_at(&mut self, object: ObjectHandle, impulse: Vec3, position: Vec3);

    /// Current world bounds.
    fn bounds(&self, object: ObjectHandle) -> Option<Aabb>;

    /// Root of the attachment hierarchy the object belongs to.
    fn attachment_root(&self, object: ObjectHandle) -> ObjectHandle {
        object
    }

    /// Particles, audio, and other cosmetic reactions.
    fn play_feedback(&mut self, _object: ObjectHandle, _position: Vec3) {}
}

// ---------------------------------------------------------------------------
// Live host
// ---------------------------------------------------------------------------

struct LiveObject {
    body: BodyHandle,
    role: BodyRole,
    tags: Vec<String>,
    profile: String,
    simulating: bool,
    parent: Option<ObjectHandle>,
    descriptor: BodyDescriptor,
}

/// Host that simulates its own objects in a private physics world.
pub struct LiveHost {
    world: Box<dyn PhysicsBackend>,
    objects: BTreeMap<ObjectHandle, LiveObject>,
    next_id: u64,
    feedback: Vec<(ObjectHandle, Vec3)>,
}

impl LiveHost {
    pub fn new(world: Box<dyn PhysicsBackend>) -> Self {
        Self {
            world,
            objects: BTreeMap::new(),
            next_id: 1,
            feedback: Vec::new(),
        }
    }

    pub fn spawn(&mut self, desc: BodyDescriptor, role: BodyRole, tags: &[&str]) -> ObjectHandle {
        let body = match role {
            BodyRole::Dynamic => self.world.add_dynamic_body(&desc),
            BodyRole::Static => self.world.add_static_body(&desc),
        };
        let profile = match role {
            BodyRole::Dynamic => "PhysicsActor",
            BodyRole::Static => "BlockAll",
        };
        let handle = ObjectHandle(self.next_id);
        self.next_id += 1;
        self.objects.insert(
            handle,
            LiveObject {
                body,
                role,
                tags: tags.iter().map(|t| t.to_string()).collect(),
                profile: profile.into(),
                simulating: role == BodyRole::Dynamic,
                parent: None,
                descriptor: desc,
            },
        );
        handle
    }

    /// Attach `child` under `parent` for [`SceneHost::attachment_root`].
    pub fn attach(&mut self, child: ObjectHandle, parent: ObjectHandle) {
        if let Some(obj) = self.objects.get_mut(&child) {
            obj.parent = Some(parent);
        }
    }

    pub fn step(&mut self, dt: f32) -> Result<(), crate::error::BackendError> {
        self.world.step_and_fetch(dt)
    }

    pub fn pose(&self, object: ObjectHandle) -> Option<Pose> {
        self.transform(object)
    }

    pub fn is_simulating(&self, object: ObjectHandle) -> bool {
        self.objects.get(&object).is_some_and(|o| o.simulating)
    }

    pub fn collision_profile(&self, object: ObjectHandle) -> Option<&str> {
        self.objects.get(&object).map(|o| o.profile.as_str())
    }

    pub fn linear_velocity(&self, object: ObjectHandle) -> Option<Vec3> {
        let obj = self.objects.get(&object)?;
        self.world.linear_velocity(obj.body).ok()
    }

    /// Every `play_feedback` call so far.
    pub fn feedback(&self) -> &[(ObjectHandle, Vec3)] {
        &self.feedback
    }

    pub fn objects(&self) -> impl Iterator<Item = ObjectHandle> + '_ {
        self.objects.keys().copied()
    }

    pub fn world(&self) -> &dyn PhysicsBackend {
        self.world.as_ref()
    }

    fn body(&self, object: ObjectHandle) -> Option<BodyHandle> {
        let found = self.objects.get(&object).map(|o| o.body);
        if found.is_none() {
            log::warn!("Host has no object {}", object);
        }
        found
    }

    fn apply<F>(&mut self, object: ObjectHandle, f: F)
    where
        F: FnOnce(&mut dyn PhysicsBackend, BodyHandle) -> Result<(), crate::error::BackendError>,
    {
        let Some(body) = self.body(object) else {
            return;
        };
        if let Err(err) = f(self.world.as_mut(), body) {
            log::warn!("Host update on {} failed: {}", object, err);
        }
    }
}

impl SceneHost for LiveHost {
    fn describe(&self, object: ObjectHandle) -> Option<ObjectDescription> {
        let obj = self.objects.get(&object)?;
        Some(ObjectDescription {
            transform: self.world.pose(obj.body).ok()?,
            collision_profile: obj.profile.clone(),
            shapes: obj.descriptor.shapes.clone(),
            mass: obj.descriptor.mass,
        })
    }

    fn tagged(&self, tag: &str) -> Vec<ObjectHandle> {
        self.objects
            .iter()
            .filter(|(_, o)| o.tags.iter().any(|t| t == tag))
            .map(|(h, _)| *h)
            .collect()
    }

    fn transform(&self, object: ObjectHandle) -> Option<Pose> {
        let obj = self.objects.get(&object)?;
        self.world.pose(obj.body).ok()
    }

    fn set_transform_no_physics(&mut self, object: ObjectHandle, pose: Pose) {
        self.apply(object, |w, b| w.set_pose(b, pose));
    }

    fn teleport(&mut self, object: ObjectHandle, pose: Pose, physics_enabled: bool) {
        self.apply(object, |w, b| {
            w.set_pose(b, pose)?;
            if !physics_enabled {
                w.set_linear_velocity(b, Vec3::ZERO)?;
                w.set_angular_velocity(b, Vec3::ZERO)?;
            }
            Ok(())
        });
    }

    fn set_simulate_physics(&mut self, object: ObjectHandle, enabled: bool) {
        let Some(obj) = self.objects.get_mut(&object) else {
            log::warn!("Host has no object {}", object);
            return;
        };
        if obj.role == BodyRole::Static {
            return;
        }
        obj.simulating = enabled;
        let body = obj.body;
        if let Err(err) = self.world.set_kinematic(body, !enabled) {
            log::warn!("Host update on {} failed: {}", object, err);
        }
    }

    fn set_collision_profile(&mut self, object: ObjectHandle, profile: &str) {
        if let Some(obj) = self.objects.get_mut(&object) {
            obj.profile = profile.to_string();
        }
    }

    fn set_linear_velocity(&mut self, object: ObjectHandle, velocity: Vec3) {
        self.apply(object, |w, b| w.set_linear_velocity(b, velocity));
    }

    fn set_angular_velocity(&mut self, object: ObjectHandle, velocity: Vec3) {
        self.apply(object, |w, b| w.set_angular_velocity(b, velocity));
    }

    fn add_impulse_at(&mut self, object: ObjectHandle, impulse: Vec3, position: Vec3) {
        self.apply(object, |w, b| w.apply_impulse_at_position(b, impulse, position));
    }

    fn bounds(&self, object: ObjectHandle) -> Option<Aabb> {
        let obj = self.objects.get(&object)?;
        self.world.world_bounds(obj.body).ok()
    }

    fn attachment_root(&self, object: ObjectHandle) -> ObjectHandle {
        let mut current = object;
        // Bounded walk so a cyclic attachment cannot hang the caller.
        for _ in 0..self.objects.len() {
            match self.objects.get(&current).and_then(|o| o.parent) {
                Some(parent) => current = parent,
                None => break,
            }
        }
        current
    }

    fn play_feedback(&mut self, object: ObjectHandle, position: Vec3) {
        self.feedback.push((object, position));
    }
}
