//! Scripted events and their per-frame schedule.

use crate::backend::PhysicsBackend;
use crate::host::SceneHost;
use crate::types::{BodyRole, TrackedBody};
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Index into the scene's event list.
pub type EventId = usize;

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Radial impulse: full strength inside `falloff_min`, fading linearly to
/// zero at `falloff_max`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Explosion {
    pub position: Vec3,
    pub impulse: f32,
    pub falloff_min: f32,
    pub falloff_max: f32,
}

impl Explosion {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    /// Impulse felt by a body centred at `body`, or `None` outside the blast.
    pub fn impulse_for(&self, body: Vec3) -> Option<Vec3> {
        let offset = body - self.position;
        let distance = offset.length();
        if distance > self.falloff_max {
            return None;
        }
        let span = self.falloff_max - self.falloff_min;
        let scale = if distance <= self.falloff_min || span <= f32::EPSILON {
            1.0
        } else {
            1.0 - (distance - self.falloff_min) / span
        };
        let direction = offset.try_normalize().unwrap_or(Vec3::Y);
        Some(direction * self.impulse * scale)
    }

    /// Push every observed body of a bake world. Returns how many were hit.
    pub fn apply_to_backend(&self, backend: &mut dyn PhysicsBackend) -> usize {
        let bodies = backend.observed_bodies().to_vec();
        let mut hit = 0;
        for body in bodies {
            let Ok(pose) = backend.pose(body) else {
                continue;
            };
            if let Some(impulse) = self.impulse_for(pose.position) {
                if backend
                    .apply_impulse_at_position(body, impulse, self.position)
                    .is_ok()
                {
                    hit += 1;
                }
            }
        }
        hit
    }

    /// Push the live dynamic objects of a host. Returns how many were hit.
    pub fn apply_to_host(&self, host: &mut dyn SceneHost, objects: &[TrackedBody]) -> usize {
        let mut hit = 0;
        for obj in objects.iter().filter(|o| o.role == BodyRole::Dynamic) {
            let Some(pose) = host.transform(obj.handle) else {
                continue;
            };
            if let Some(impulse) = self.impulse_for(pose.position) {
                host.add_impulse_at(obj.handle, impulse, self.position);
                hit += 1;
            }
        }
        hit
    }
}

impl Default for Explosion {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            impulse: 5000.0,
            falloff_min: 10.0,
            falloff_max: 100.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum EventKind {
    /// Fires a notification only.
    Trigger,
    Explosion(Explosion),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScriptedEvent {
    pub name: String,
    /// Seconds from the start of the bake.
    pub time: f32,
    pub kind: EventKind,
}

impl ScriptedEvent {
    pub fn trigger(name: impl Into<String>, time: f32) -> Self {
        Self {
            name: name.into(),
            time,
            kind: EventKind::Trigger,
        }
    }

    pub fn explosion(name: impl Into<String>, time: f32, explosion: Explosion) -> Self {
        Self {
            name: name.into(),
            time,
            kind: EventKind::Explosion(explosion),
        }
    }

    pub fn apply_to_backend(&self, backend: &mut dyn PhysicsBackend) {
        match &self.kind {
            EventKind::Trigger => {}
            EventKind::Explosion(e) => {
                let hit = e.apply_to_backend(backend);
                log::debug!("Event '{}' pushed {} bodies", self.name, hit);
            }
        }
    }

    pub fn apply_to_host(&self, host: &mut dyn SceneHost, objects: &[TrackedBody]) {
        match &self.kind {
            EventKind::Trigger => {}
            EventKind::Explosion(e) => {
                let hit = e.apply_to_host(host, objects);
                log::debug!("Event '{}' pushed {} live objects", self.name, hit);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// Event ids bucketed by the recorded frame they fire on.
#[derive(Debug, Clone, Default)]
pub struct EventSchedule {
    buckets: Vec<Vec<EventId>>,
}

impl EventSchedule {
    /// Frame an event at `time` fires on: `min(floor(time / interval), frame_count - 1)`.
    pub fn frame_for(time: f32, interval: f32, frame_count: usize) -> usize {
        if frame_count == 0 || interval <= 0.0 {
            return 0;
        }
        let frame = (time.max(0.0) / interval).floor();
        (frame as usize).min(frame_count - 1)
    }

    pub fn build(events: &[ScriptedEvent], interval: f32, frame_count: usize) -> Self {
        let mut buckets = vec![Vec::new(); frame_count];
        if frame_count > 0 {
            for (id, event) in events.iter().enumerate() {
                buckets[Self::frame_for(event.time, interval, frame_count)].push(id);
            }
        }
        Self { buckets }
    }

    pub fn events_at(&self, frame: usize) -> &[EventId] {
        self.buckets.get(frame).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_bucket_by_frame_and_clamp() {
        let events = vec![
            ScriptedEvent::trigger("start", 0.0),
            ScriptedEvent::trigger("early", -2.0),
            ScriptedEvent::trigger("mid", 0.55),
            ScriptedEvent::trigger("late", 99.0),
        ];
        let schedule = EventSchedule::build(&events, 0.1, 10);
        assert_eq!(schedule.events_at(0), &[0, 1]);
        assert_eq!(schedule.events_at(5), &[2]);
        assert_eq!(schedule.events_at(9), &[3]);
        assert!(schedule.events_at(42).is_empty());
        assert_eq!(schedule.len(), 4);
    }

    #[test]
    fn explosion_falloff() {
        let e = Explosion {
            position: Vec3::ZERO,
            impulse: 100.0,
            falloff_min: 1.0,
            falloff_max: 3.0,
        };
        let near = e.impulse_for(Vec3::new(0.5, 0.0, 0.0)).unwrap();
        assert!((near - Vec3::new(100.0, 0.0, 0.0)).length() < 1e-4);

        let mid = e.impulse_for(Vec3::new(0.0, 2.0, 0.0)).unwrap();
        assert!((mid.y - 50.0).abs() < 1e-4);

        assert!(e.impulse_for(Vec3::new(0.0, 0.0, 3.5)).is_none());
    }
}
