//! Baked playback, simulate-on-demand, and playback event dispatch.
//!
//! Every query resolves a playback time to a [`FrameSpan`]: the two
//! bracketing recorded frames plus the blend factor between them.
//! Objects that simulate-on-demand has handed back to live physics are
//! never written again until the next playback begins.

use crate::controller::SharedController;
use crate::event::{EventId, ScriptedEvent};
use crate::hash::{CellHash, CellRange};
use crate::host::SceneHost;
use crate::recorder::{BakeData, SodBuffer};
use crate::types::{Aabb, ObjectHandle, Pose, SodAlgorithm, SodConfig, TrackedBody};
use glam::Vec3;
use std::collections::{BTreeSet, HashMap};

/// Frame positions within this distance of an integer snap to it, so
/// `k * interval` resolves to exactly frame `k` despite float error.
pub const FRAME_SNAP_EPSILON: f32 = 1e-4;

/// Largest cell range the indexed check sweeps. Boxes covering more cells
/// than this are tested against every object instead.
pub const MAX_SWEEP_CELLS: u64 = 1 << 16;

// ---------------------------------------------------------------------------
// Frame resolution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSpan {
    pub floor: usize,
    pub ceil: usize,
    /// Blend factor from `floor` towards `ceil`, `0.0` when they match.
    pub alpha: f32,
}

/// Resolve `time` to its bracketing frames, clamped to `[0, frame_count - 1]`.
pub fn frame_span(time: f32, interval: f32, frame_count: usize) -> FrameSpan {
    if frame_count == 0 || interval <= 0.0 || !time.is_finite() {
        return FrameSpan {
            floor: 0,
            ceil: 0,
            alpha: 0.0,
        };
    }
    let mut f = (time / interval).max(0.0);
    let nearest = f.round();
    if (f - nearest).abs() <= FRAME_SNAP_EPSILON {
        f = nearest;
    }
    let last = frame_count - 1;
    let floor = (f.floor() as usize).min(last);
    let ceil = (f.ceil() as usize).min(last);
    let alpha = if floor == ceil { 0.0 } else { f - f.floor() };
    FrameSpan { floor, ceil, alpha }
}

/// Pose of `object` at `span`. Without interpolation the floor frame wins.
pub fn sample_pose(bake: &BakeData, object: usize, span: FrameSpan, interpolate: bool) -> Option<Pose> {
    let start = bake.pose(span.floor, object)?;
    if !interpolate || span.floor == span.ceil {
        return Some(start);
    }
    let end = bake.pose(span.ceil, object)?;
    Some(start.lerp(&end, span.alpha))
}

// ---------------------------------------------------------------------------
// Activation
// ---------------------------------------------------------------------------

/// Seed state for handing one object back to live physics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Activation {
    pub start: Pose,
    pub end: Pose,
    pub linear_velocity: Vec3,
    /// Radians per second.
    pub angular_velocity: Vec3,
}

/// Velocities from the recorded frames bracketing `frame`: `(frame - 1, frame)`,
/// or `(0, 1)` at the first frame.
pub fn activation_for(bake: &BakeData, object: usize, frame: usize) -> Option<Activation> {
    let last = bake.frame_count().checked_sub(1)?;
    let frame = frame.min(last);
    let (a, b) = if frame == 0 {
        (0, 1.min(last))
    } else {
        (frame - 1, frame)
    };
    let start = bake.pose(a, object)?;
    let end = bake.pose(b, object)?;
    let interval = bake.session.frame_interval;
    if interval <= 0.0 {
        return None;
    }

    let linear_velocity = (end.position - start.position) / interval;
    let mut delta = (end.rotation * start.rotation.inverse()).normalize();
    if delta.w < 0.0 {
        delta = -delta;
    }
    let (axis, angle) = delta.to_axis_angle();
    let angular_velocity = if angle.abs() <= f32::EPSILON {
        Vec3::ZERO
    } else {
        axis * (angle / interval)
    };

    Some(Activation {
        start,
        end,
        linear_velocity,
        angular_velocity,
    })
}

// ---------------------------------------------------------------------------
// Spatial hash map
// ---------------------------------------------------------------------------

/// Cell hash → indices of objects whose recorded cell range covers it.
///
/// Objects spanning more than [`MAX_SWEEP_CELLS`] cells are kept aside and
/// returned as candidates for every query.
#[derive(Debug, Default)]
pub struct SpatialHashMap {
    cells: HashMap<CellHash, Vec<usize>>,
    oversized: Vec<usize>,
    frame: Option<usize>,
}

impl SpatialHashMap {
    /// Rebuild from `frame` of the bake, skipping activated objects.
    pub fn rebuild(&mut self, sod: &SodBuffer, frame: usize, activated: &[bool]) {
        self.cells.clear();
        self.oversized.clear();
        let Some(samples) = sod.frame(frame) else {
            self.frame = None;
            return;
        };
        for (i, sample) in samples.iter().enumerate() {
            if activated.get(i).copied().unwrap_or(false) {
                continue;
            }
            if sample.range.cell_count() > MAX_SWEEP_CELLS {
                self.oversized.push(i);
                continue;
            }
            sample.range.sweep(|hash| self.cells.entry(hash).or_default().push(i));
        }
        self.frame = Some(frame);
    }

    pub fn built_for(&self) -> Option<usize> {
        self.frame
    }

    pub fn invalidate(&mut self) {
        self.cells.clear();
        self.oversized.clear();
        self.frame = None;
    }

    /// Every object index filed under a cell of `range`, deduplicated.
    pub fn candidates(&self, range: &CellRange) -> BTreeSet<usize> {
        let mut out: BTreeSet<usize> = self.oversized.iter().copied().collect();
        range.sweep(|hash| {
            if let Some(objects) = self.cells.get(&hash) {
                out.extend(objects.iter().copied());
            }
        });
        out
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn oversized(&self) -> &[usize] {
        &self.oversized
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty() && self.oversized.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Borrowed scene state a playback pass runs against.
pub struct PlaybackContext<'a> {
    pub bake: &'a BakeData,
    /// Dynamic objects, in bake order.
    pub objects: &'a [TrackedBody],
    pub activators: &'a [ObjectHandle],
    pub sod: &'a SodConfig,
    pub interpolate: bool,
    pub controller: &'a SharedController,
}

/// Per-pass playback state.
#[derive(Debug, Default)]
pub struct PlaybackEngine {
    activated: Vec<bool>,
    map: SpatialHashMap,
    added_activators: Vec<ObjectHandle>,
    pending_events: Vec<EventId>,
}

impl PlaybackEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset for a new pass over `object_count` objects and `event_count` events.
    pub fn begin(&mut self, object_count: usize, event_count: usize) {
        self.activated = vec![false; object_count];
        self.map.invalidate();
        self.added_activators.clear();
        self.pending_events = (0..event_count).collect();
    }

    pub fn reset(&mut self) {
        self.begin(0, 0);
    }

    /// Drop the events still waiting to fire. Activation state is untouched.
    pub fn clear_pending_events(&mut self) {
        self.pending_events.clear();
    }

    /// Objects covered by the current pass.
    pub fn object_count(&self) -> usize {
        self.activated.len()
    }

    pub fn is_activated(&self, object: usize) -> bool {
        self.activated.get(object).copied().unwrap_or(false)
    }

    pub fn activated_count(&self) -> usize {
        self.activated.iter().filter(|a| **a).count()
    }

    pub fn added_activators(&self) -> &[ObjectHandle] {
        &self.added_activators
    }

    pub fn pending_events(&self) -> &[EventId] {
        &self.pending_events
    }

    /// Write the baked pose at `time` to every non-activated object.
    /// Returns how many objects were moved.
    pub fn play_frame(&self, ctx: &PlaybackContext<'_>, host: &mut dyn SceneHost, time: f32) -> usize {
        let span = frame_span(time, ctx.bake.session.frame_interval, ctx.bake.frame_count());
        let mut moved = 0;
        for (i, obj) in ctx.objects.iter().enumerate() {
            if self.is_activated(i) {
                continue;
            }
            if let Some(pose) = sample_pose(ctx.bake, i, span, ctx.interpolate) {
                host.set_transform_no_physics(obj.handle, pose);
                moved += 1;
            }
        }
        moved
    }

    /// Activate every object an activator overlaps at `time`.
    ///
    /// Activators added by chain reaction during this call only take part
    /// from the next call on. Returns the newly activated object indices.
    pub fn check_sod(
        &mut self,
        ctx: &PlaybackContext<'_>,
        host: &mut dyn SceneHost,
        time: f32,
    ) -> Vec<usize> {
        let (Some(sod), Some(grid)) = (ctx.bake.sod.as_ref(), ctx.bake.session.sod_grid) else {
            return Vec::new();
        };
        let frame = frame_span(time, ctx.bake.session.frame_interval, ctx.bake.frame_count()).floor;

        // Snapshot: chain-reaction activators pushed below wait for the next check.
        let mut activators: Vec<(ObjectHandle, f32)> = ctx
            .activators
            .iter()
            .map(|a| (*a, ctx.sod.original_expansion))
            .collect();
        activators.extend(
            self.added_activators
                .iter()
                .map(|a| (*a, ctx.sod.added_expansion)),
        );
        let boxes: Vec<Aabb> = activators
            .iter()
            .filter_map(|(a, margin)| host.bounds(*a).map(|b| b.expand_by(*margin)))
            .collect();

        let mut newly = Vec::new();
        match ctx.sod.algorithm {
            SodAlgorithm::Naive => {
                for i in 0..ctx.objects.len() {
                    if self.is_activated(i) {
                        continue;
                    }
                    let Some(sample) = sod.get(frame, i) else {
                        continue;
                    };
                    if boxes.iter().any(|b| b.intersects(&sample.bounds))
                        && self.activate_object(ctx, host, i, frame)
                    {
                        newly.push(i);
                    }
                }
            }
            SodAlgorithm::Indexed => {
                if self.map.built_for() != Some(frame) {
                    self.map.rebuild(sod, frame, &self.activated);
                }
                for b in &boxes {
                    let range = grid.hash_box(b);
                    let candidates: BTreeSet<usize> = if range.cell_count() > MAX_SWEEP_CELLS {
                        (0..ctx.objects.len()).collect()
                    } else {
                        self.map.candidates(&range)
                    };
                    for i in candidates {
                        if self.is_activated(i) {
                            continue;
                        }
                        let Some(sample) = sod.get(frame, i) else {
                            continue;
                        };
                        if b.intersects(&sample.bounds) && self.activate_object(ctx, host, i, frame) {
                            newly.push(i);
                        }
                    }
                }
            }
        }
        if !newly.is_empty() {
            log::debug!("SOD frame {}: activated {:?}", frame, newly);
        }
        newly
    }

    /// Hand `object` back to live physics at `frame`.
    ///
    /// Returns `false` without side effects when the index is out of range,
    /// the object is already live, or the bake has no data for it.
    pub fn activate_object(
        &mut self,
        ctx: &PlaybackContext<'_>,
        host: &mut dyn SceneHost,
        object: usize,
        frame: usize,
    ) -> bool {
        let Some(obj) = ctx.objects.get(object) else {
            log::error!("Activation of object {} out of range", object);
            return false;
        };
        if object >= self.activated.len() || self.activated[object] {
            return false;
        }
        let Some(act) = activation_for(ctx.bake, object, frame) else {
            log::error!("No baked frames to activate object {} at frame {}", object, frame);
            return false;
        };
        self.activated[object] = true;

        host.set_simulate_physics(obj.handle, true);
        host.set_collision_profile(obj.handle, &obj.collision_profile);
        host.teleport(obj.handle, act.start, false);
        host.teleport(obj.handle, act.end, true);
        host.set_linear_velocity(obj.handle, act.linear_velocity);
        host.set_angular_velocity(obj.handle, act.angular_velocity);

        if ctx.sod.chain_reaction {
            self.added_activators.push(host.attachment_root(obj.handle));
        }
        ctx.controller.lock().on_object_activated(host, obj, frame);
        true
    }

    /// Fire pending events whose time has come.
    ///
    /// During baked playback (`live == false`) every remaining event fires
    /// once `time` passes `duration`. In live mode each fired event is also
    /// applied to the host.
    pub fn dispatch_events(
        &mut self,
        events: &[ScriptedEvent],
        time: f32,
        duration: f32,
        live: bool,
        host: &mut dyn SceneHost,
        objects: &[TrackedBody],
    ) -> Vec<EventId> {
        if !live && time > duration {
            return std::mem::take(&mut self.pending_events);
        }
        let mut fired = Vec::new();
        for i in (0..self.pending_events.len()).rev() {
            let id = self.pending_events[i];
            let Some(event) = events.get(id) else {
                self.pending_events.remove(i);
                continue;
            };
            if event.time > time {
                continue;
            }
            if live {
                event.apply_to_host(host, objects);
            }
            fired.push(id);
            self.pending_events.remove(i);
        }
        fired
    }
}
