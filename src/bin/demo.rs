//! baked-physics-demo binary
//!
//! Builds a small scene on a [`LiveHost`], bakes it on the worker thread,
//! plays the bake back on a manual clock while an activator sweeps through
//! the bodies, and prints a JSON report.
//!
//! ## Configuration (TOML via `--config`, env via `config` crate)
//!
//! | Key                          | Default      | Description                      |
//! |------------------------------|--------------|----------------------------------|
//! | `BAKE__BAKE__FRAMES`         | `120`        | Frames to record                 |
//! | `BAKE__BAKE__INTERVAL`       | `0.016667`   | Seconds per recorded frame       |
//! | `BAKE__BAKE__OBJECTS`        | `24`         | Dynamic bodies to spawn          |
//! | `BAKE__SCENE__INTERPOLATE`   | `true`       | Blend between recorded frames    |
//! | `BAKE__SCENE__SOD__ENABLED`  | `false`      | Record simulate-on-demand data   |
//! | `BAKE__SCENE__SOD__CELL_SIZE`| `1.0`        | Hash cell edge length            |
//!
//! CLI flags override both.

use anyhow::{Context, Result};
use baked_physics::{
    shared, BakeScene, BallisticEngine, BodyDescriptor, BodyRole, Clock, EngineRegistry, Explosion,
    FrozenBakeController, LiveHost, ManualClock, ObjectHandle, PhysicsEngine, Pose,
    RandomVelocityController, RapierEngine, SceneConfig, SceneHost, ScriptedEvent,
    StagedReleaseController,
};
use clap::{Parser, ValueEnum};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scenario {
    /// Random velocities, explosion half way.
    Balls,
    /// Stack released lowest first.
    Stack,
    /// Frozen bake, everything wakes on contact.
    Ruins,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    Ballistic,
    Rapier,
}

#[derive(Parser, Debug)]
#[command(name = "baked-physics-demo", about = "Bake and replay a rigid-body scene", version)]
struct Args {
    /// Optional TOML config file
    #[arg(long, env = "BAKE_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, env = "BAKE_SCENARIO", default_value = "stack")]
    scenario: Scenario,

    #[arg(long, value_enum, env = "BAKE_BACKEND", default_value = "rapier")]
    backend: Backend,

    /// Dynamic bodies to spawn
    #[arg(long)]
    objects: Option<usize>,

    /// Frames to record
    #[arg(long)]
    frames: Option<usize>,

    /// Seconds per recorded frame
    #[arg(long)]
    interval: Option<f32>,

    /// Record simulate-on-demand data
    #[arg(long)]
    sod: bool,

    /// Hash cell size for simulate-on-demand
    #[arg(long)]
    cell_size: Option<f32>,

    /// Scenario seed
    #[arg(long, env = "BAKE_SEED", default_value_t = 7)]
    seed: u64,
}

// ---------------------------------------------------------------------------
// File / env config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct BakeSettings {
    frames: usize,
    interval: f32,
    objects: usize,
}

impl Default for BakeSettings {
    fn default() -> Self {
        Self {
            frames: 120,
            interval: 1.0 / 60.0,
            objects: 24,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct DemoConfig {
    scene: SceneConfig,
    bake: BakeSettings,
}

fn load_config(args: &Args) -> Result<DemoConfig> {
    let mut builder = config::Config::builder();
    if let Some(path) = &args.config {
        builder = builder.add_source(config::File::from(path.as_path()));
    }
    let mut cfg: DemoConfig = builder
        .add_source(config::Environment::with_prefix("BAKE").separator("__"))
        .build()
        .context("reading configuration")?
        .try_deserialize()
        .context("parsing configuration")?;

    if let Some(n) = args.objects {
        cfg.bake.objects = n;
    }
    if let Some(n) = args.frames {
        cfg.bake.frames = n;
    }
    if let Some(dt) = args.interval {
        cfg.bake.interval = dt;
    }
    if args.sod {
        cfg.scene.sod.enabled = true;
    }
    if let Some(size) = args.cell_size {
        cfg.scene.sod.cell_size = size;
    }
    Ok(cfg)
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct DemoReport {
    summary: baked_physics::BakeSummary,
    stats: baked_physics::SceneStats,
    ticks: usize,
    activated: Vec<ObjectHandle>,
    fired_events: Vec<usize>,
}

// ---------------------------------------------------------------------------
// Scene setup
// ---------------------------------------------------------------------------

fn populate(host: &mut LiveHost, cfg: &DemoConfig) -> ObjectHandle {
    let floor = BodyDescriptor::cuboid(
        Pose::from_position(Vec3::new(0.0, -0.5, 0.0)),
        Vec3::new(30.0, 0.5, 30.0),
    );
    host.spawn(floor, BodyRole::Static, &[cfg.scene.static_tag.as_str()]);

    for i in 0..cfg.bake.objects {
        let column = i % 16;
        let layer = i / 16;
        let position = Vec3::new(
            (column % 4) as f32 * 1.1 - 1.65,
            0.5 + layer as f32 * 1.05,
            (column / 4) as f32 * 1.1 - 1.65,
        );
        let body = BodyDescriptor::cuboid(Pose::from_position(position), Vec3::splat(0.5));
        host.spawn(body, BodyRole::Dynamic, &[cfg.scene.dynamic_tag.as_str()]);
    }

    let sweeper = BodyDescriptor::sphere(Pose::from_position(Vec3::new(-12.0, 1.0, 0.0)), 1.0);
    let activator = host.spawn(sweeper, BodyRole::Dynamic, &[cfg.scene.activator_tag.as_str()]);
    host.set_simulate_physics(activator, false);
    activator
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("baked_physics=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let cfg = load_config(&args)?;
    let _span = tracing::info_span!("demo", scenario = ?args.scenario).entered();

    log::info!(
        "Starting baked-physics-demo (objects={}, frames={}, interval={}, sod={})",
        cfg.bake.objects,
        cfg.bake.frames,
        cfg.bake.interval,
        cfg.scene.sod.enabled,
    );

    let engine: Arc<dyn PhysicsEngine> = match args.backend {
        Backend::Ballistic => Arc::new(BallisticEngine),
        Backend::Rapier => Arc::new(RapierEngine::new()),
    };
    let registry = EngineRegistry::new(engine);

    // The host keeps its own lease for its live world.
    let host_lease = registry.acquire();
    let mut host = LiveHost::new(host_lease.create_world());
    let activator = populate(&mut host, &cfg);

    let clock = Arc::new(ManualClock::new());
    let mut scene = BakeScene::new(
        cfg.scene.clone(),
        host,
        Arc::clone(&registry),
        clock.clone() as Arc<dyn Clock>,
    );
    scene.initialize()?;
    if !cfg.scene.add_tagged_on_init {
        scene.add_tagged_objects()?;
    }

    let interval = cfg.bake.interval;
    let duration = cfg.bake.frames as f32 * interval;
    match args.scenario {
        Scenario::Balls => {
            scene.set_controller(shared(RandomVelocityController::new(args.seed, 4.0)));
            scene.add_event(ScriptedEvent::explosion(
                "blast",
                duration * 0.5,
                Explosion {
                    position: Vec3::new(0.0, 0.0, 0.0),
                    impulse: 20.0,
                    falloff_min: 1.0,
                    falloff_max: 6.0,
                },
            ));
        }
        Scenario::Stack => {
            scene.set_controller(shared(StagedReleaseController::new(0, cfg.bake.frames / 2)));
        }
        Scenario::Ruins => scene.set_controller(shared(FrozenBakeController)),
    }
    scene.add_event(ScriptedEvent::trigger("halfway", duration * 0.5));

    let summary = scene
        .record_and_wait(cfg.bake.frames, interval, Duration::from_millis(2))
        .await
        .context("baking scene")?;

    scene.play()?;
    let mut ticks = 0;
    let mut activated = Vec::new();
    let mut fired_events = Vec::new();
    let max_ticks = cfg.bake.frames * 2 + 10;
    while ticks < max_ticks {
        clock.advance(f64::from(interval));
        let t = (ticks + 1) as f32 * interval;
        let x = -12.0 + 24.0 * (t / duration).min(1.0);
        scene
            .host_mut()
            .set_transform_no_physics(activator, Pose::from_position(Vec3::new(x, 1.0, 0.0)));
        scene.host_mut().step(interval)?;

        let events = scene.tick();
        ticks += 1;
        activated.extend(events.activated);
        fired_events.extend(events.fired_events);
        if events.playback_finished {
            break;
        }
    }

    let report = DemoReport {
        summary,
        stats: scene.stats(),
        ticks,
        activated,
        fired_events,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    scene.cleanup()?;
    Ok(())
}
