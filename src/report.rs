//! Everything the scene reports outward: per-tick events and bake summaries.
//!
//! All types are `Serialize + Deserialize` so the demo binary (or any other
//! consumer) can emit them as JSON directly.

use crate::event::EventId;
use crate::types::{ObjectHandle, SceneAction};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Bake summary  (broadcast once per finished bake)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BakeSummary {
    pub frame_count: usize,
    pub frame_interval: f32,
    /// Dynamic objects recorded.
    pub object_count: usize,
    pub static_count: usize,
    pub sod_enabled: bool,
    /// Simulated seconds covered by the bake.
    pub sim_duration: f32,
    /// Wall-clock milliseconds the worker ran.
    pub bake_millis: u64,
}

/// Result of [`BakeScene::add_tagged_objects`](crate::scene::BakeScene::add_tagged_objects).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaggedCounts {
    pub dynamic: usize,
    pub statics: usize,
    pub activators: usize,
    pub elapsed_millis: u64,
}

// ---------------------------------------------------------------------------
// Tick events
// ---------------------------------------------------------------------------

/// Events produced by one [`BakeScene::tick`](crate::scene::BakeScene::tick).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickEvents {
    /// Mode after the tick.
    pub action: SceneAction,
    /// Playback time in seconds, when playing.
    pub time: Option<f32>,
    /// Scripted events that fired this tick, by id.
    pub fired_events: Vec<EventId>,
    /// Objects simulate-on-demand handed back to live physics.
    pub activated: Vec<ObjectHandle>,
    pub bake_finished: Option<BakeSummary>,
    pub bake_failed: Option<String>,
    pub playback_finished: bool,
}

impl TickEvents {
    pub fn is_quiet(&self) -> bool {
        self.fired_events.is_empty()
            && self.activated.is_empty()
            && self.bake_finished.is_none()
            && self.bake_failed.is_none()
            && !self.playback_finished
    }
}
