//! Baked Physics
//!
//! Records a rigid-body simulation into a dense per-frame pose buffer on a
//! background thread, then replays it deterministically, optionally waking
//! individual bodies back into live physics when an activator comes near
//! them (simulate-on-demand).
//!
//! ## Architecture
//!
//! ```text
//! BakeScene  (scene.rs)               ← commands, tick, status
//!   ├── BakeRecorder  (recorder.rs)   ← worker thread, FrameGrid buffers
//!   │     └── PhysicsBackend  (backend.rs)
//!   │           ├── BallisticBackend  (ballistic.rs)
//!   │           └── RapierBackend     (rapier.rs, feature "rapier")
//!   ├── PlaybackEngine  (playback.rs) ← interpolation, SOD, event dispatch
//!   │     └── HashGrid  (hash.rs)     ← cell hashing + cubic sweep
//!   ├── SceneController  (controller.rs)
//!   └── SceneHost  (host.rs)          ← the objects being driven
//! ```
//!
//! Physics engines are shared across scenes through a reference-counted
//! [`EngineRegistry`]; each scene holds an [`EngineLease`] while initialized.

pub mod backend;
pub mod ballistic;
pub mod clock;
pub mod controller;
pub mod engine;
pub mod error;
pub mod event;
pub mod geometry;
pub mod hash;
pub mod host;
pub mod playback;
pub mod recorder;
pub mod report;
pub mod scene;
pub mod types;

#[cfg(feature = "rapier")]
pub mod rapier;

pub use backend::{BodyHandle, PhysicsBackend};
pub use ballistic::{BallisticBackend, BallisticEngine};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use controller::{
    shared, FrozenBakeController, RandomVelocityController, SceneController, SharedController,
    StagedReleaseController,
};
pub use engine::{EngineLease, EngineRegistry, PhysicsEngine};
pub use error::{BackendError, SceneError};
pub use event::{EventKind, EventSchedule, Explosion, ScriptedEvent};
pub use geometry::{BodyDescriptor, CookCache, MeshKey, ShapeDescriptor, ShapeGeometry, SurfaceMaterial};
pub use hash::{CellRange, HashGrid, GRID_SIDE};
pub use host::{LiveHost, ObjectDescription, SceneHost};
pub use playback::{frame_span, FrameSpan, PlaybackEngine};
pub use recorder::{BakeData, BakeRecorder, FrameBuffer, SodBuffer};
pub use report::{BakeSummary, TaggedCounts, TickEvents};
pub use scene::BakeScene;
pub use types::{
    Aabb, BodyRole, ObjectHandle, Pose, SceneAction, SceneConfig, SceneStats, SodAlgorithm,
    SodConfig, TrackedBody,
};

#[cfg(feature = "rapier")]
pub use rapier::{RapierBackend, RapierEngine};
