//! Background bake recording.
//!
//! ```text
//! BakeScene::record ──► BakeRecorder::start(RecordJob)
//!                          │  spawns "bake-recorder" thread (owns backend + buffers)
//!                          ▼
//!            for frame in 0..frame_count
//!              ├── stop requested?  ──► Cancelled
//!              ├── scheduled events ──► backend
//!              ├── controller.on_bake_tick
//!              ├── backend.step_and_fetch(interval)
//!              ├── poses (+ bounds, cell range) ──► FrameGrid
//!              └── progress = (frame + 1) / frame_count
//!                          │
//!                          ▼
//!          JoinHandle<RecordResult> ──► try_collect / join
//! ```
//!
//! Only atomics are shared with the tick thread. The buffers travel back
//! through the join handle, so nothing reads them before the worker is done.

use crate::backend::PhysicsBackend;
use crate::controller::SharedController;
use crate::error::{BackendError, SceneError};
use crate::event::{EventSchedule, ScriptedEvent};
use crate::hash::{CellRange, HashGrid};
use crate::types::{Aabb, Pose};
use glam::Vec3;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

// ---------------------------------------------------------------------------
// Buffers
// ---------------------------------------------------------------------------

/// Dense `frame * object_count + object` array.
#[derive(Debug, Clone)]
pub struct FrameGrid<T> {
    data: Vec<T>,
    frame_count: usize,
    object_count: usize,
}

impl<T: Clone + Default> FrameGrid<T> {
    pub fn new(frame_count: usize, object_count: usize) -> Self {
        Self {
            data: vec![T::default(); frame_count * object_count],
            frame_count,
            object_count,
        }
    }
}

impl<T> FrameGrid<T> {
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn object_count(&self) -> usize {
        self.object_count
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn index(&self, frame: usize, object: usize) -> Option<usize> {
        (frame < self.frame_count && object < self.object_count)
            .then(|| frame * self.object_count + object)
    }

    pub fn get(&self, frame: usize, object: usize) -> Option<&T> {
        self.index(frame, object).map(|i| &self.data[i])
    }

    /// Returns `false` (and writes nothing) when out of range.
    pub fn set(&mut self, frame: usize, object: usize, value: T) -> bool {
        match self.index(frame, object) {
            Some(i) => {
                self.data[i] = value;
                true
            }
            None => false,
        }
    }

    /// All samples of one frame, in object order.
    pub fn frame(&self, frame: usize) -> Option<&[T]> {
        if frame >= self.frame_count {
            return None;
        }
        let start = frame * self.object_count;
        Some(&self.data[start..start + self.object_count])
    }
}

pub type FrameBuffer = FrameGrid<Pose>;

/// Where one object was at one frame, for simulate-on-demand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SodSample {
    pub range: CellRange,
    pub bounds: Aabb,
}

impl Default for SodSample {
    fn default() -> Self {
        Self {
            range: CellRange::default(),
            bounds: Aabb::new(Vec3::ZERO, Vec3::ZERO),
        }
    }
}

pub type SodBuffer = FrameGrid<SodSample>;

// ---------------------------------------------------------------------------
// Session + result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordSession {
    pub frame_count: usize,
    /// Seconds between recorded frames.
    pub frame_interval: f32,
    /// Present when simulate-on-demand data is recorded.
    pub sod_grid: Option<HashGrid>,
}

impl RecordSession {
    pub fn duration(&self) -> f32 {
        self.frame_count as f32 * self.frame_interval
    }
}

/// A finished bake.
#[derive(Debug, Clone)]
pub struct BakeData {
    pub session: RecordSession,
    pub frames: FrameBuffer,
    pub sod: Option<SodBuffer>,
}

impl BakeData {
    pub fn object_count(&self) -> usize {
        self.frames.object_count()
    }

    pub fn frame_count(&self) -> usize {
        self.session.frame_count
    }

    pub fn pose(&self, frame: usize, object: usize) -> Option<Pose> {
        self.frames.get(frame, object).copied()
    }

    pub fn sod_sample(&self, frame: usize, object: usize) -> Option<&SodSample> {
        self.sod.as_ref()?.get(frame, object)
    }
}

#[derive(Debug)]
pub enum RecordOutcome {
    Finished(BakeData),
    Cancelled,
    Failed(String),
}

/// What the worker hands back. `backend` is `None` only if the worker died.
pub struct RecordResult {
    pub backend: Option<Box<dyn PhysicsBackend>>,
    pub outcome: RecordOutcome,
    /// Wall-clock seconds the worker ran.
    pub elapsed: f64,
}

/// Everything a bake needs, moved onto the worker thread.
pub struct RecordJob {
    /// Populated world: static bodies plus one observed body per tracked object.
    pub backend: Box<dyn PhysicsBackend>,
    pub session: RecordSession,
    pub events: Vec<ScriptedEvent>,
    pub controller: SharedController,
}

// ---------------------------------------------------------------------------
// Shared flags
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct RecordShared {
    progress: AtomicU32,
    recording: AtomicBool,
    wants_to_stop: AtomicBool,
    finished: AtomicBool,
    frames_done: AtomicUsize,
}

impl RecordShared {
    fn set_progress(&self, p: f32) {
        self.progress.store(p.to_bits(), Ordering::Release);
    }

    fn progress(&self) -> f32 {
        f32::from_bits(self.progress.load(Ordering::Acquire))
    }

    fn reset(&self) {
        self.set_progress(0.0);
        self.wants_to_stop.store(false, Ordering::Release);
        self.finished.store(false, Ordering::Release);
        self.frames_done.store(0, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

/// Owns at most one bake worker.
pub struct BakeRecorder {
    shared: Arc<RecordShared>,
    worker: Option<JoinHandle<RecordResult>>,
}

impl BakeRecorder {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(RecordShared::default()),
            worker: None,
        }
    }

    pub fn start(&mut self, job: RecordJob) -> Result<(), SceneError> {
        if self.worker.is_some() {
            log::error!("Recorder already has a bake in flight");
            return Err(SceneError::AlreadyRecording);
        }
        self.shared.reset();
        self.shared.recording.store(true, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name("bake-recorder".into())
            .spawn(move || {
                let started = Instant::now();
                let (backend, outcome) = run_bake(job, &shared);
                shared.recording.store(false, Ordering::Release);
                RecordResult {
                    backend: Some(backend),
                    outcome,
                    elapsed: started.elapsed().as_secs_f64(),
                }
            });
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.shared.recording.store(false, Ordering::Release);
                log::error!("Could not spawn bake worker: {}", err);
                Err(SceneError::BakeFailed(err.to_string()))
            }
        }
    }

    /// Ask the worker to exit at the next frame boundary.
    pub fn stop(&self) {
        self.shared.wants_to_stop.store(true, Ordering::Release);
    }

    pub fn is_recording(&self) -> bool {
        self.shared.recording.load(Ordering::Acquire)
    }

    /// True while a worker exists that has not been collected.
    pub fn is_active(&self) -> bool {
        self.worker.is_some()
    }

    pub fn progress(&self) -> f32 {
        self.shared.progress()
    }

    pub fn finished(&self) -> bool {
        self.shared.finished.load(Ordering::Acquire)
    }

    pub fn frames_recorded(&self) -> usize {
        self.shared.frames_done.load(Ordering::Acquire)
    }

    /// Join the worker if it has already exited.
    pub fn try_collect(&mut self) -> Option<RecordResult> {
        if self.worker.as_ref().is_some_and(|h| h.is_finished()) {
            return self.join();
        }
        None
    }

    /// Block until the worker exits.
    pub fn join(&mut self) -> Option<RecordResult> {
        let handle = self.worker.take()?;
        match handle.join() {
            Ok(result) => Some(result),
            Err(_) => {
                log::error!("Bake worker panicked");
                self.shared.recording.store(false, Ordering::Release);
                Some(RecordResult {
                    backend: None,
                    outcome: RecordOutcome::Failed("bake worker panicked".into()),
                    elapsed: 0.0,
                })
            }
        }
    }

    /// Stop and join.
    pub fn cancel(&mut self) -> Option<RecordResult> {
        self.stop();
        self.join()
    }
}

impl Default for BakeRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BakeRecorder {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

fn run_bake(job: RecordJob, shared: &RecordShared) -> (Box<dyn PhysicsBackend>, RecordOutcome) {
    let RecordJob {
        mut backend,
        session,
        events,
        controller,
    } = job;

    let observed = backend.observed_bodies().to_vec();
    let schedule = EventSchedule::build(&events, session.frame_interval, session.frame_count);
    let mut frames = FrameBuffer::new(session.frame_count, observed.len());
    let mut sod = session
        .sod_grid
        .map(|_| SodBuffer::new(session.frame_count, observed.len()));

    controller.lock().on_bake_begin(backend.as_mut());

    for frame in 0..session.frame_count {
        if shared.wants_to_stop.load(Ordering::Acquire) {
            log::info!("Recording stopped at frame {}", frame);
            return (backend, RecordOutcome::Cancelled);
        }

        for id in schedule.events_at(frame) {
            if let Some(event) = events.get(*id) {
                log::debug!("Frame {}: event '{}'", frame, event.name);
                event.apply_to_backend(backend.as_mut());
            }
        }
        controller.lock().on_bake_tick(backend.as_mut(), frame);

        let step = backend.step_and_fetch(session.frame_interval).and_then(|()| {
            capture_frame(
                backend.as_ref(),
                &observed,
                frame,
                session.sod_grid.as_ref(),
                &mut frames,
                sod.as_mut(),
            )
        });
        if let Err(err) = step {
            log::error!("Recording aborted at frame {}: {}", frame, err);
            return (backend, RecordOutcome::Failed(err.to_string()));
        }

        shared.frames_done.store(frame + 1, Ordering::Release);
        shared.set_progress((frame + 1) as f32 / session.frame_count as f32);
    }

    controller.lock().on_bake_end(backend.as_mut());
    shared.finished.store(true, Ordering::Release);

    (
        backend,
        RecordOutcome::Finished(BakeData {
            session,
            frames,
            sod,
        }),
    )
}

fn capture_frame(
    backend: &dyn PhysicsBackend,
    observed: &[crate::backend::BodyHandle],
    frame: usize,
    grid: Option<&HashGrid>,
    frames: &mut FrameBuffer,
    sod: Option<&mut SodBuffer>,
) -> Result<(), BackendError> {
    for (i, body) in observed.iter().enumerate() {
        frames.set(frame, i, backend.pose(*body)?);
    }
    if let (Some(grid), Some(sod)) = (grid, sod) {
        for (i, body) in observed.iter().enumerate() {
            let bounds = backend.world_bounds(*body)?;
            sod.set(
                frame,
                i,
                SodSample {
                    range: grid.hash_box(&bounds),
                    bounds,
                },
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_grid_indexing() {
        let mut grid: FrameGrid<u32> = FrameGrid::new(3, 4);
        assert_eq!(grid.len(), 12);
        assert!(grid.set(2, 3, 7));
        assert!(!grid.set(3, 0, 1));
        assert!(!grid.set(0, 4, 1));
        assert_eq!(grid.get(2, 3), Some(&7));
        assert_eq!(grid.frame(2), Some(&[0, 0, 0, 7][..]));
        assert!(grid.frame(3).is_none());
    }
}
