//! BakeScene: tracked objects, record/play state machine, per-tick driver.

use crate::backend::PhysicsBackend;
use crate::clock::Clock;
use crate::controller::{shared, NoopController, SharedController};
use crate::engine::{EngineLease, EngineRegistry};
use crate::error::SceneError;
use crate::event::{EventId, ScriptedEvent};
use crate::hash::HashGrid;
use crate::host::{SceneHost, PLAYBACK_COLLISION_PROFILE};
use crate::playback::{frame_span, PlaybackContext, PlaybackEngine};
use crate::recorder::{BakeData, BakeRecorder, RecordJob, RecordOutcome, RecordResult, RecordSession};
use crate::report::{BakeSummary, TaggedCounts, TickEvents};
use crate::types::{Aabb, BodyRole, ObjectHandle, SceneAction, SceneConfig, SceneStats, SodConfig, TrackedBody};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Log a rejected command and hand the error back.
fn reject<T>(err: SceneError) -> Result<T, SceneError> {
    error!("{}", err);
    Err(err)
}

pub struct BakeScene<H: SceneHost> {
    config: SceneConfig,
    host: H,
    registry: Arc<EngineRegistry>,
    lease: Option<EngineLease>,
    /// Bake world while idle. Moves to the worker during a bake.
    backend: Option<Box<dyn PhysicsBackend>>,
    clock: Arc<dyn Clock>,
    controller: SharedController,

    dynamic: Vec<TrackedBody>,
    statics: Vec<TrackedBody>,
    activators: Vec<ObjectHandle>,
    events: Vec<ScriptedEvent>,

    recorder: BakeRecorder,
    recording: Option<RecordSession>,
    bake: Option<BakeData>,

    playback: PlaybackEngine,
    action: SceneAction,
    play_start: f64,
    last_play_frame: f64,
    last_sod_check: f64,

    bake_finished: broadcast::Sender<BakeSummary>,
}

impl<H: SceneHost> BakeScene<H> {
    pub fn new(config: SceneConfig, host: H, registry: Arc<EngineRegistry>, clock: Arc<dyn Clock>) -> Self {
        let (bake_finished, _) = broadcast::channel(16);
        Self {
            config,
            host,
            registry,
            lease: None,
            backend: None,
            clock,
            controller: shared(NoopController),
            dynamic: Vec::new(),
            statics: Vec::new(),
            activators: Vec::new(),
            events: Vec::new(),
            recorder: BakeRecorder::new(),
            recording: None,
            bake: None,
            playback: PlaybackEngine::new(),
            action: SceneAction::Idle,
            play_start: 0.0,
            last_play_frame: f64::NEG_INFINITY,
            last_sod_check: f64::NEG_INFINITY,
            bake_finished,
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Take an engine lease and create the bake world.
    pub fn initialize(&mut self) -> Result<(), SceneError> {
        if self.lease.is_some() {
            return reject(SceneError::AlreadyInitialized);
        }
        let lease = self.registry.acquire();
        let mut backend = lease.create_world();
        backend.set_gravity(self.config.gravity);
        debug!("Scene initialized on {} engine", lease.engine_name());
        self.backend = Some(backend);
        self.lease = Some(lease);

        if self.config.add_tagged_on_init {
            self.add_tagged_objects()?;
        }
        Ok(())
    }

    /// Cancel everything, drop the bake world, and release the engine lease.
    pub fn cleanup(&mut self) -> Result<(), SceneError> {
        if self.lease.is_none() {
            return reject(SceneError::NotInitialized);
        }
        self.cancel();
        self.backend = None;
        self.lease = None;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.lease.is_some()
    }

    pub fn set_controller(&mut self, controller: SharedController) {
        self.controller = controller;
    }

    pub fn controller(&self) -> &SharedController {
        &self.controller
    }

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    // -----------------------------------------------------------------------
    // Objects
    // -----------------------------------------------------------------------

    pub fn add_dynamic_object(&mut self, object: ObjectHandle) -> Result<(), SceneError> {
        self.track(object, BodyRole::Dynamic)?;
        if self.config.freeze_on_add {
            self.host.set_simulate_physics(object, false);
        }
        Ok(())
    }

    pub fn add_static_object(&mut self, object: ObjectHandle) -> Result<(), SceneError> {
        self.track(object, BodyRole::Static)
    }

    fn track(&mut self, object: ObjectHandle, role: BodyRole) -> Result<(), SceneError> {
        if self.action == SceneAction::Recording {
            return reject(SceneError::AlreadyRecording);
        }
        let Some(desc) = self.host.describe(object) else {
            return reject(SceneError::UnknownObject(object));
        };
        if self.dynamic.iter().chain(&self.statics).any(|o| o.handle == object) {
            return reject(SceneError::InvalidArgument(format!(
                "object {} is already tracked",
                object
            )));
        }
        let tracked = TrackedBody {
            handle: object,
            initial: desc.transform,
            role,
            collision_profile: desc.collision_profile.clone(),
            descriptor: desc.body_descriptor(),
        };
        match role {
            BodyRole::Dynamic => self.dynamic.push(tracked),
            BodyRole::Static => self.statics.push(tracked),
        }
        self.invalidate_bake();
        Ok(())
    }

    /// Register an object whose live bounds wake baked objects at playback.
    pub fn add_activator(&mut self, object: ObjectHandle) {
        if !self.activators.contains(&object) {
            self.activators.push(object);
        }
    }

    /// Add every host object carrying the configured dynamic, static, or activator tag.
    pub fn add_tagged_objects(&mut self) -> Result<TaggedCounts, SceneError> {
        let started = Instant::now();
        let mut counts = TaggedCounts::default();

        for object in self.host.tagged(&self.config.dynamic_tag) {
            if self.add_dynamic_object(object).is_ok() {
                counts.dynamic += 1;
            }
        }
        for object in self.host.tagged(&self.config.static_tag) {
            if self.add_static_object(object).is_ok() {
                counts.statics += 1;
            }
        }
        for object in self.host.tagged(&self.config.activator_tag) {
            self.add_activator(object);
            counts.activators += 1;
        }

        counts.elapsed_millis = started.elapsed().as_millis() as u64;
        info!(
            "AddTaggedObjects took {}ms, added dynamic: {}, static: {}, activators: {}",
            counts.elapsed_millis, counts.dynamic, counts.statics, counts.activators
        );
        Ok(counts)
    }

    /// Forget every tracked object and any bake made from them.
    pub fn clear_objects(&mut self) {
        self.stop_recorder();
        self.dynamic.clear();
        self.statics.clear();
        self.invalidate_bake();
        if let Some(backend) = self.backend.as_mut() {
            backend.clear();
        }
    }

    pub fn dynamic_objects(&self) -> &[TrackedBody] {
        &self.dynamic
    }

    pub fn static_objects(&self) -> &[TrackedBody] {
        &self.statics
    }

    pub fn activators(&self) -> &[ObjectHandle] {
        &self.activators
    }

    pub fn dynamic_index(&self, object: ObjectHandle) -> Option<usize> {
        self.dynamic.iter().position(|o| o.handle == object)
    }

    fn invalidate_bake(&mut self) {
        self.bake = None;
        self.action = SceneAction::Idle;
        self.playback.reset();
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    pub fn add_event(&mut self, event: ScriptedEvent) -> EventId {
        self.events.push(event);
        self.events.len() - 1
    }

    /// Remove every scripted event. Objects already woken stay live.
    pub fn clear_events(&mut self) {
        self.events.clear();
        self.playback.clear_pending_events();
    }

    pub fn events(&self) -> &[ScriptedEvent] {
        &self.events
    }

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    /// Enable or disable simulate-on-demand for the next bake.
    pub fn configure_sod(&mut self, enabled: bool, cell_size: f32) -> Result<(), SceneError> {
        if !cell_size.is_finite() || cell_size <= 0.0 {
            return reject(SceneError::InvalidArgument(format!(
                "hash cell size must be positive, got {}",
                cell_size
            )));
        }
        self.config.sod.enabled = enabled;
        self.config.sod.cell_size = cell_size;
        Ok(())
    }

    pub fn set_sod_config(&mut self, sod: SodConfig) -> Result<(), SceneError> {
        self.configure_sod(sod.enabled, sod.cell_size)?;
        self.config.sod = sod;
        Ok(())
    }

    /// Playback frames per second. `<= 0` renders on every tick.
    pub fn set_play_fps(&mut self, fps: f32) {
        self.config.play_fps = fps;
    }

    pub fn set_interpolation(&mut self, enabled: bool) {
        self.config.interpolate = enabled;
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Start baking `frame_count` frames of `interval` seconds on a worker thread.
    pub fn record(&mut self, frame_count: usize, interval: f32) -> Result<(), SceneError> {
        if self.lease.is_none() {
            return reject(SceneError::NotInitialized);
        }
        if self.recorder.is_active() {
            // A worker that already finished is collected here instead of on the next tick.
            match self.recorder.try_collect() {
                Some(result) => {
                    self.finish_recording(result);
                }
                None => return reject(SceneError::AlreadyRecording),
            }
        }
        if frame_count == 0 || !interval.is_finite() || interval <= 0.0 {
            return reject(SceneError::InvalidArgument(format!(
                "cannot record {} frames of {}s",
                frame_count, interval
            )));
        }
        info!(
            "Start Recording, {} objects, {} frames, {}s each.",
            self.dynamic.len(),
            frame_count,
            interval
        );

        self.cancel();
        self.bake = None;

        let mut backend = self.take_backend()?;
        backend.clear();
        backend.set_gravity(self.config.gravity);
        let copy_started = Instant::now();
        for obj in &self.dynamic {
            backend.add_dynamic_body(&obj.descriptor);
        }
        for obj in &self.statics {
            backend.add_static_body(&obj.descriptor);
        }
        info!(
            "Copied objects to simulator in {}ms, {} dynamic, {} static.",
            copy_started.elapsed().as_millis(),
            self.dynamic.len(),
            self.statics.len()
        );

        let sod = &self.config.sod;
        let session = RecordSession {
            frame_count,
            frame_interval: interval,
            sod_grid: sod.enabled.then(|| HashGrid::new(sod.grid_origin, sod.cell_size)),
        };
        self.recorder.start(RecordJob {
            backend,
            session,
            events: self.events.clone(),
            controller: Arc::clone(&self.controller),
        })?;
        self.recording = Some(session);
        self.action = SceneAction::Recording;
        Ok(())
    }

    /// Play the finished bake from time zero.
    pub fn play(&mut self) -> Result<(), SceneError> {
        let Some(bake) = self.bake.as_ref() else {
            return reject(SceneError::NoBakeData);
        };
        info!(
            "Start Playing, {} objects, {} frames, {}s each.",
            self.dynamic.len(),
            bake.frame_count(),
            bake.session.frame_interval
        );
        self.cancel();

        for obj in &self.dynamic {
            self.host.set_simulate_physics(obj.handle, false);
            self.host.set_collision_profile(obj.handle, PLAYBACK_COLLISION_PROFILE);
        }
        self.playback.begin(self.dynamic.len(), self.events.len());
        self.start_clock();
        self.action = SceneAction::Playing;

        self.controller
            .lock()
            .on_playback_begin(&mut self.host, &self.dynamic);
        let Some(bake) = self.bake.as_ref() else {
            return reject(SceneError::NoBakeData);
        };
        let ctx = PlaybackContext {
            bake,
            objects: &self.dynamic,
            activators: &self.activators,
            sod: &self.config.sod,
            interpolate: self.config.interpolate,
            controller: &self.controller,
        };
        self.playback.play_frame(&ctx, &mut self.host, 0.0);
        Ok(())
    }

    /// Let the host simulate live, firing scripted events against it.
    pub fn play_live(&mut self) -> Result<(), SceneError> {
        if self.recorder.is_active() {
            return reject(SceneError::AlreadyRecording);
        }
        self.cancel();
        info!("Start live simulation, {} objects.", self.dynamic.len());
        self.unfreeze();
        self.playback.begin(self.dynamic.len(), self.events.len());
        self.start_clock();
        self.action = SceneAction::PlayingLive;
        Ok(())
    }

    /// Put every dynamic object back where it was added, stop any bake, go idle.
    pub fn cancel(&mut self) {
        for obj in &self.dynamic {
            self.host.teleport(obj.handle, obj.initial, false);
            self.host.set_collision_profile(obj.handle, &obj.collision_profile);
        }
        self.stop_recorder();
        self.action = SceneAction::Idle;
        self.playback.reset();
    }

    pub fn freeze(&mut self) {
        for obj in &self.dynamic {
            self.host.set_simulate_physics(obj.handle, false);
        }
    }

    pub fn unfreeze(&mut self) {
        for obj in &self.dynamic {
            self.host.set_simulate_physics(obj.handle, true);
        }
    }

    fn start_clock(&mut self) {
        self.play_start = self.clock.now();
        self.last_play_frame = f64::NEG_INFINITY;
        self.last_sod_check = f64::NEG_INFINITY;
    }

    fn take_backend(&mut self) -> Result<Box<dyn PhysicsBackend>, SceneError> {
        if let Some(backend) = self.backend.take() {
            return Ok(backend);
        }
        match self.lease.as_ref() {
            Some(lease) => {
                warn!("Recreating bake world");
                Ok(lease.create_world())
            }
            None => reject(SceneError::NotInitialized),
        }
    }

    /// Stop and join an in-flight bake. A bake that completed anyway is kept.
    fn stop_recorder(&mut self) {
        if let Some(result) = self.recorder.cancel() {
            self.absorb(result);
        }
        self.recording = None;
    }

    /// Take the backend and bake data back from a joined worker.
    fn absorb(&mut self, result: RecordResult) -> (Option<BakeSummary>, Option<String>) {
        let RecordResult {
            backend,
            outcome,
            elapsed,
        } = result;
        self.backend = backend.map(|mut b| {
            b.clear();
            b
        });
        self.recording = None;
        match outcome {
            RecordOutcome::Finished(data) => {
                info!("Recording finished, took {:.3} seconds.", elapsed);
                let summary = BakeSummary {
                    frame_count: data.frame_count(),
                    frame_interval: data.session.frame_interval,
                    object_count: data.object_count(),
                    static_count: self.statics.len(),
                    sod_enabled: data.sod.is_some(),
                    sim_duration: data.session.duration(),
                    bake_millis: (elapsed * 1000.0) as u64,
                };
                self.bake = Some(data);
                (Some(summary), None)
            }
            RecordOutcome::Cancelled => {
                info!("Recording cancelled after {:.3} seconds.", elapsed);
                (None, None)
            }
            RecordOutcome::Failed(msg) => {
                error!("Recording failed: {}", msg);
                (None, Some(msg))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Main tick
    // -----------------------------------------------------------------------

    /// Advance whatever the scene is doing by one host frame.
    pub fn tick(&mut self) -> TickEvents {
        let mut events = TickEvents::default();
        match self.action {
            SceneAction::Idle => {}
            SceneAction::Recording => self.record_tick(&mut events),
            SceneAction::Playing => self.play_tick(&mut events),
            SceneAction::PlayingLive => self.live_tick(&mut events),
        }
        events.action = self.action;
        events
    }

    fn record_tick(&mut self, events: &mut TickEvents) {
        let Some(result) = self.recorder.try_collect() else {
            return;
        };
        let (finished, failed) = self.finish_recording(result);
        events.bake_finished = finished;
        events.bake_failed = failed;
    }

    /// Absorb a collected worker, publish its summary and go idle.
    fn finish_recording(&mut self, result: RecordResult) -> (Option<BakeSummary>, Option<String>) {
        let (finished, failed) = self.absorb(result);
        if let Some(summary) = &finished {
            // No subscribers is fine.
            let _ = self.bake_finished.send(summary.clone());
        }
        self.action = SceneAction::Idle;
        self.playback.reset();
        (finished, failed)
    }

    fn play_tick(&mut self, events: &mut TickEvents) {
        let now = self.clock.now();
        let time = (now - self.play_start) as f32;
        events.time = Some(time);
        let Some(bake) = self.bake.as_ref() else {
            self.action = SceneAction::Idle;
            return;
        };
        let ctx = PlaybackContext {
            bake,
            objects: &self.dynamic,
            activators: &self.activators,
            sod: &self.config.sod,
            interpolate: self.config.interpolate,
            controller: &self.controller,
        };

        let sod_fps = self.config.sod.check_fps;
        if bake.sod.is_some() && (sod_fps <= 0.0 || now - self.last_sod_check >= 1.0 / f64::from(sod_fps)) {
            let woke = self.playback.check_sod(&ctx, &mut self.host, time);
            events
                .activated
                .extend(woke.into_iter().map(|i| self.dynamic[i].handle));
            self.last_sod_check = now;
        }

        let play_fps = self.config.play_fps;
        if play_fps <= 0.0 || now - self.last_play_frame >= 1.0 / f64::from(play_fps) {
            self.playback.play_frame(&ctx, &mut self.host, time);
            let duration = bake.session.duration();
            events.fired_events =
                self.playback
                    .dispatch_events(&self.events, time, duration, false, &mut self.host, &self.dynamic);
            self.last_play_frame = now;
            if time > duration {
                info!("Playing finished.");
                events.playback_finished = true;
                self.action = SceneAction::Idle;
                self.playback.reset();
            }
        }
    }

    fn live_tick(&mut self, events: &mut TickEvents) {
        let now = self.clock.now();
        let time = (now - self.play_start) as f32;
        events.time = Some(time);
        events.fired_events = self.playback.dispatch_events(
            &self.events,
            time,
            f32::INFINITY,
            true,
            &mut self.host,
            &self.dynamic,
        );
        self.last_play_frame = now;
    }

    // -----------------------------------------------------------------------
    // Direct playback queries
    // -----------------------------------------------------------------------

    /// Write the baked poses at `time` to the host. Returns objects moved.
    pub fn play_frame(&mut self, time: f32) -> Result<usize, SceneError> {
        let Some(bake) = self.bake.as_ref() else {
            return reject(SceneError::NoBakeData);
        };
        let ctx = PlaybackContext {
            bake,
            objects: &self.dynamic,
            activators: &self.activators,
            sod: &self.config.sod,
            interpolate: self.config.interpolate,
            controller: &self.controller,
        };
        Ok(self.playback.play_frame(&ctx, &mut self.host, time))
    }

    /// Run one simulate-on-demand check at `time`. Returns the objects woken.
    pub fn check_sod_at_time(&mut self, time: f32) -> Result<Vec<ObjectHandle>, SceneError> {
        let Some(bake) = self.bake.as_ref() else {
            return reject(SceneError::NoBakeData);
        };
        if bake.sod.is_none() {
            return reject(SceneError::InvalidArgument(
                "bake was recorded without simulate-on-demand".into(),
            ));
        }
        if self.playback.object_count() != self.dynamic.len() {
            self.playback.begin(self.dynamic.len(), self.events.len());
        }
        let ctx = PlaybackContext {
            bake,
            objects: &self.dynamic,
            activators: &self.activators,
            sod: &self.config.sod,
            interpolate: self.config.interpolate,
            controller: &self.controller,
        };
        let woke = self.playback.check_sod(&ctx, &mut self.host, time);
        Ok(woke.into_iter().map(|i| self.dynamic[i].handle).collect())
    }

    /// Baked world bounds of every dynamic object at `frame`, or `None`
    /// without simulate-on-demand data.
    pub fn sod_bounds_at(&self, frame: usize) -> Option<Vec<Aabb>> {
        let sod = self.bake.as_ref()?.sod.as_ref()?;
        Some(sod.frame(frame)?.iter().map(|s| s.bounds).collect())
    }

    /// World boxes of the hash cells each dynamic object occupies at `frame`.
    pub fn sod_cells_at(&self, frame: usize) -> Option<Vec<Aabb>> {
        let bake = self.bake.as_ref()?;
        let grid = bake.session.sod_grid?;
        let sod = bake.sod.as_ref()?;
        Some(sod.frame(frame)?.iter().map(|s| grid.range_bounds(&s.range)).collect())
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    pub fn action(&self) -> SceneAction {
        self.action
    }

    pub fn is_recording(&self) -> bool {
        self.action == SceneAction::Recording
    }

    /// Fraction of the current (or last) bake recorded.
    pub fn progress(&self) -> f32 {
        if self.recorder.is_active() {
            self.recorder.progress()
        } else if self.bake.is_some() {
            1.0
        } else {
            0.0
        }
    }

    pub fn finished(&self) -> bool {
        self.bake.is_some()
    }

    pub fn bake(&self) -> Option<&BakeData> {
        self.bake.as_ref()
    }

    pub fn frame_count(&self) -> usize {
        self.session().map_or(0, |s| s.frame_count)
    }

    pub fn frame_interval(&self) -> f32 {
        self.session().map_or(0.0, |s| s.frame_interval)
    }

    pub fn duration(&self) -> f32 {
        self.session().map_or(0.0, |s| s.duration())
    }

    /// Frame index playback is on, when playing.
    pub fn current_frame(&self) -> Option<usize> {
        if self.action != SceneAction::Playing {
            return None;
        }
        let bake = self.bake.as_ref()?;
        let time = (self.clock.now() - self.play_start) as f32;
        Some(frame_span(time, bake.session.frame_interval, bake.frame_count()).floor)
    }

    fn session(&self) -> Option<&RecordSession> {
        self.recording
            .as_ref()
            .or_else(|| self.bake.as_ref().map(|b| &b.session))
    }

    pub fn stats(&self) -> SceneStats {
        SceneStats {
            action: self.action,
            dynamic_objects: self.dynamic.len(),
            static_objects: self.statics.len(),
            activators: self.activators.len(),
            scheduled_events: self.events.len(),
            frame_count: self.frame_count(),
            frame_interval: self.frame_interval(),
            progress: self.progress(),
            finished: self.finished(),
            activated_objects: self.playback.activated_count(),
        }
    }

    // -----------------------------------------------------------------------
    // Completion
    // -----------------------------------------------------------------------

    /// One message per finished bake.
    pub fn subscribe_bake_finished(&self) -> broadcast::Receiver<BakeSummary> {
        self.bake_finished.subscribe()
    }

    /// Record, then tick every `poll` until the bake finishes.
    pub async fn record_and_wait(
        &mut self,
        frame_count: usize,
        interval: f32,
        poll: Duration,
    ) -> Result<BakeSummary, SceneError> {
        let mut finished = self.subscribe_bake_finished();
        self.record(frame_count, interval)?;
        loop {
            let events = self.tick();
            if let Ok(summary) = finished.try_recv() {
                return Ok(summary);
            }
            if let Some(msg) = events.bake_failed {
                return Err(SceneError::BakeFailed(msg));
            }
            if self.action != SceneAction::Recording {
                return Err(SceneError::BakeCancelled);
            }
            tokio::time::sleep(poll).await;
        }
    }
}

impl<H: SceneHost> Drop for BakeScene<H> {
    fn drop(&mut self) {
        if self.recorder.is_active() {
            self.recorder.cancel();
        }
    }
}
