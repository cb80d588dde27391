//! Per-scenario hooks into bake and playback.
//!
//! A scene holds one [`SharedController`]. During a bake the worker thread
//! locks it for each hook call; during playback the tick thread does.

use crate::backend::{BodyHandle, PhysicsBackend};
use crate::host::SceneHost;
use crate::types::TrackedBody;
use glam::Vec3;
use parking_lot::Mutex;
use std::sync::Arc;

pub trait SceneController: Send {
    /// Once, on the worker thread, after the world is populated.
    fn on_bake_begin(&mut self, _backend: &mut dyn PhysicsBackend) {}

    /// Before every recorded step.
    fn on_bake_tick(&mut self, _backend: &mut dyn PhysicsBackend, _frame: usize) {}

    /// After the last frame of a bake that was not cancelled.
    fn on_bake_end(&mut self, _backend: &mut dyn PhysicsBackend) {}

    fn on_playback_begin(&mut self, _host: &mut dyn SceneHost, _objects: &[TrackedBody]) {}

    /// After `object` has been handed back to live physics.
    fn on_object_activated(
        &mut self,
        _host: &mut dyn SceneHost,
        _object: &TrackedBody,
        _frame: usize,
    ) {
    }
}

pub type SharedController = Arc<Mutex<dyn SceneController>>;

pub fn shared<C: SceneController + 'static>(controller: C) -> SharedController {
    Arc::new(Mutex::new(controller))
}

/// Controller with no behaviour.
#[derive(Debug, Default)]
pub struct NoopController;

impl SceneController for NoopController {}

// ---------------------------------------------------------------------------
// Random velocity
// ---------------------------------------------------------------------------

/// Throws every body in a seeded random direction when the bake starts.
#[derive(Debug, Clone)]
pub struct RandomVelocityController {
    pub seed: u64,
    /// Each velocity component is drawn from `[-max_speed, max_speed]`.
    pub max_speed: f32,
    /// Play host feedback when an object wakes up.
    pub visualize: bool,
}

impl RandomVelocityController {
    pub fn new(seed: u64, max_speed: f32) -> Self {
        Self {
            seed,
            max_speed,
            visualize: true,
        }
    }
}

impl SceneController for RandomVelocityController {
    fn on_bake_begin(&mut self, backend: &mut dyn PhysicsBackend) {
        let mut rng = fastrand::Rng::with_seed(self.seed);
        let m = self.max_speed;
        let bodies = backend.observed_bodies().to_vec();
        for body in bodies {
            let v = Vec3::new(
                rng.f32() * 2.0 * m - m,
                rng.f32() * 2.0 * m - m,
                rng.f32() * 2.0 * m - m,
            );
            if let Err(err) = backend.set_linear_velocity(body, v) {
                log::warn!("Could not seed velocity: {}", err);
            }
        }
    }

    fn on_object_activated(&mut self, host: &mut dyn SceneHost, object: &TrackedBody, _frame: usize) {
        if !self.visualize {
            return;
        }
        if let Some(pose) = host.transform(object.handle) {
            host.play_feedback(object.handle, pose.position);
        }
    }
}

// ---------------------------------------------------------------------------
// Staged release
// ---------------------------------------------------------------------------

/// Holds every body kinematic, then lets them go lowest first so the held
/// count falls linearly between `start_frame` and `end_frame`.
#[derive(Debug, Clone)]
pub struct StagedReleaseController {
    pub start_frame: usize,
    pub end_frame: usize,
    pub up: Vec3,
    order: Vec<BodyHandle>,
    released: usize,
}

impl StagedReleaseController {
    pub fn new(start_frame: usize, end_frame: usize) -> Self {
        Self {
            start_frame,
            end_frame,
            up: Vec3::Y,
            order: Vec::new(),
            released: 0,
        }
    }

    pub fn with_up(mut self, up: Vec3) -> Self {
        self.up = up;
        self
    }

    pub fn released(&self) -> usize {
        self.released
    }

    fn release_until(&mut self, backend: &mut dyn PhysicsBackend, target: usize) {
        let target = target.min(self.order.len());
        while self.released < target {
            let body = self.order[self.released];
            if let Err(err) = backend.set_kinematic(body, false) {
                log::warn!("Could not release body: {}", err);
            }
            self.released += 1;
        }
    }
}

impl SceneController for StagedReleaseController {
    fn on_bake_begin(&mut self, backend: &mut dyn PhysicsBackend) {
        let up = self.up;
        let mut heights: Vec<(BodyHandle, f32)> = backend
            .observed_bodies()
            .iter()
            .map(|b| {
                let h = backend.pose(*b).map(|p| p.position.dot(up)).unwrap_or(0.0);
                (*b, h)
            })
            .collect();
        heights.sort_by(|a, b| a.1.total_cmp(&b.1));
        self.order = heights.into_iter().map(|(b, _)| b).collect();
        self.released = 0;
        for body in &self.order {
            if let Err(err) = backend.set_kinematic(*body, true) {
                log::warn!("Could not hold body: {}", err);
            }
        }
    }

    fn on_bake_tick(&mut self, backend: &mut dyn PhysicsBackend, frame: usize) {
        if frame < self.start_frame {
            return;
        }
        if frame >= self.end_frame {
            self.release_until(backend, self.order.len());
            return;
        }
        let span = self.end_frame.saturating_sub(self.start_frame).max(1);
        let target = self.order.len() * (frame - self.start_frame) / span;
        self.release_until(backend, target);
    }
}

// ---------------------------------------------------------------------------
// Frozen bake
// ---------------------------------------------------------------------------

/// Bakes a still scene: every body stays where it was placed until
/// simulate-on-demand wakes it at playback.
#[derive(Debug, Default, Clone)]
pub struct FrozenBakeController;

impl SceneController for FrozenBakeController {
    fn on_bake_begin(&mut self, backend: &mut dyn PhysicsBackend) {
        let bodies = backend.observed_bodies().to_vec();
        for body in bodies {
            if let Err(err) = backend.set_kinematic(body, true) {
                log::warn!("Could not freeze body: {}", err);
            }
        }
    }
}
