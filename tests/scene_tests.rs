//! BakeScene command and lifecycle tests

#[cfg(test)]
mod tests {
    use baked_physics::backend::PhysicsBackend;
    use baked_physics::{
        shared, BakeScene, BallisticBackend, BallisticEngine, BodyDescriptor, BodyRole, Clock,
        EngineRegistry, Explosion, LiveHost, ManualClock, ObjectHandle, Pose, SceneAction,
        SceneConfig, SceneController, SceneError, ScriptedEvent,
    };
    use glam::Vec3;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    /// Sleeps on every baked frame so a bake stays in flight.
    struct Slow(Duration);

    impl SceneController for Slow {
        fn on_bake_tick(&mut self, _backend: &mut dyn PhysicsBackend, _frame: usize) {
            std::thread::sleep(self.0);
        }
    }

    struct Fixture {
        scene: BakeScene<LiveHost>,
        registry: Arc<EngineRegistry>,
        clock: Arc<ManualClock>,
        dynamic: Vec<ObjectHandle>,
        floor: ObjectHandle,
    }

    /// Uninitialized scene over a floor and `n` tagged boxes.
    fn make_fixture(config: SceneConfig, n: usize) -> Fixture {
        let mut host = LiveHost::new(Box::new(BallisticBackend::new()));
        let floor = host.spawn(
            BodyDescriptor::cuboid(Pose::from_position(Vec3::new(0.0, -0.5, 0.0)), Vec3::new(20.0, 0.5, 20.0)),
            BodyRole::Static,
            &[config.static_tag.as_str()],
        );
        let dynamic = (0..n)
            .map(|i| {
                host.spawn(
                    BodyDescriptor::cuboid(
                        Pose::from_position(Vec3::new(i as f32 * 1.5, 3.0, 0.0)),
                        Vec3::splat(0.5),
                    ),
                    BodyRole::Dynamic,
                    &[config.dynamic_tag.as_str()],
                )
            })
            .collect();

        let registry = EngineRegistry::new(Arc::new(BallisticEngine));
        let clock = Arc::new(ManualClock::new());
        let scene = BakeScene::new(
            config,
            host,
            Arc::clone(&registry),
            clock.clone() as Arc<dyn Clock>,
        );
        Fixture {
            scene,
            registry,
            clock,
            dynamic,
            floor,
        }
    }

    fn make_ready(n: usize) -> Fixture {
        let mut fx = make_fixture(SceneConfig::default(), n);
        fx.scene.initialize().unwrap();
        fx.scene.add_tagged_objects().unwrap();
        fx
    }

    fn wait_for_bake(fx: &mut Fixture, frames: usize, interval: f32) {
        tokio_test::block_on(fx.scene.record_and_wait(frames, interval, Duration::from_millis(1)))
            .unwrap();
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    #[test]
    fn initialize_and_cleanup_hold_one_lease() {
        let mut fx = make_fixture(SceneConfig::default(), 2);
        assert_eq!(fx.registry.ref_count(), 0);
        assert_eq!(fx.scene.cleanup(), Err(SceneError::NotInitialized));

        fx.scene.initialize().unwrap();
        assert!(fx.scene.is_initialized());
        assert_eq!(fx.registry.ref_count(), 1);
        assert_eq!(fx.scene.initialize(), Err(SceneError::AlreadyInitialized));
        assert_eq!(fx.registry.ref_count(), 1);

        fx.scene.cleanup().unwrap();
        assert!(!fx.scene.is_initialized());
        assert_eq!(fx.registry.ref_count(), 0);
    }

    #[test]
    fn tagged_objects_can_be_added_on_initialize() {
        let config = SceneConfig {
            add_tagged_on_init: true,
            ..SceneConfig::default()
        };
        let mut fx = make_fixture(config, 3);
        let activator = fx.scene.host_mut().spawn(
            BodyDescriptor::sphere(Pose::identity(), 1.0),
            BodyRole::Dynamic,
            &["BakeActivator"],
        );
        fx.scene.initialize().unwrap();

        assert_eq!(fx.scene.dynamic_objects().len(), 3);
        assert_eq!(fx.scene.static_objects().len(), 1);
        assert_eq!(fx.scene.static_objects()[0].handle, fx.floor);
        assert_eq!(fx.scene.activators(), &[activator]);
        for h in &fx.dynamic {
            assert!(!fx.scene.host().is_simulating(*h));
        }
    }

    #[test]
    fn tagged_counts_skip_known_objects() {
        let mut fx = make_ready(4);
        let counts = fx.scene.add_tagged_objects().unwrap();
        assert_eq!((counts.dynamic, counts.statics, counts.activators), (0, 0, 0));
        assert_eq!(fx.scene.dynamic_objects().len(), 4);
    }

    // -----------------------------------------------------------------------
    // Command validation
    // -----------------------------------------------------------------------

    #[test]
    fn commands_need_the_right_state() {
        let mut fx = make_fixture(SceneConfig::default(), 1);
        assert_eq!(fx.scene.record(10, 0.1), Err(SceneError::NotInitialized));
        assert_eq!(fx.scene.play(), Err(SceneError::NoBakeData));
        assert_eq!(fx.scene.play_frame(0.0), Err(SceneError::NoBakeData));
        assert_eq!(fx.scene.check_sod_at_time(0.0), Err(SceneError::NoBakeData));

        fx.scene.initialize().unwrap();
        assert!(matches!(fx.scene.record(0, 0.1), Err(SceneError::InvalidArgument(_))));
        assert!(matches!(fx.scene.record(10, 0.0), Err(SceneError::InvalidArgument(_))));
        assert!(matches!(fx.scene.configure_sod(true, 0.0), Err(SceneError::InvalidArgument(_))));
        assert!(!fx.scene.config().sod.enabled);
    }

    #[test]
    fn unknown_and_duplicate_objects_are_rejected() {
        let mut fx = make_ready(2);
        assert_eq!(
            fx.scene.add_dynamic_object(ObjectHandle(999)),
            Err(SceneError::UnknownObject(ObjectHandle(999)))
        );
        assert!(matches!(
            fx.scene.add_dynamic_object(fx.dynamic[0]),
            Err(SceneError::InvalidArgument(_))
        ));
        assert!(matches!(
            fx.scene.add_static_object(fx.dynamic[1]),
            Err(SceneError::InvalidArgument(_))
        ));
    }

    #[test]
    fn second_record_is_rejected_while_the_first_runs() {
        let mut fx = make_ready(3);
        fx.scene.set_controller(shared(Slow(Duration::from_millis(2))));
        fx.scene.record(500, 0.01).unwrap();
        assert!(fx.scene.is_recording());
        assert_eq!(fx.scene.action(), SceneAction::Recording);
        assert_eq!(fx.scene.record(10, 0.1), Err(SceneError::AlreadyRecording));
        assert_eq!(fx.scene.play_live(), Err(SceneError::AlreadyRecording));

        let extra = fx.scene.host_mut().spawn(
            BodyDescriptor::sphere(Pose::identity(), 0.5),
            BodyRole::Dynamic,
            &[],
        );
        assert_eq!(fx.scene.add_dynamic_object(extra), Err(SceneError::AlreadyRecording));

        fx.scene.cancel();
        assert_eq!(fx.scene.action(), SceneAction::Idle);
        assert!(!fx.scene.is_recording());
        assert_eq!(fx.scene.frame_count(), fx.scene.bake().map_or(0, |b| b.frame_count()));
    }

    #[test]
    fn record_collects_a_finished_worker_before_restarting() {
        let mut fx = make_ready(3);
        let mut finished = fx.scene.subscribe_bake_finished();
        fx.scene.record(20, 0.05).unwrap();

        // Let the worker run to completion without ticking the scene.
        let deadline = Instant::now() + Duration::from_secs(10);
        while fx.scene.progress() < 1.0 {
            assert!(Instant::now() < deadline, "bake timed out");
            std::thread::sleep(Duration::from_millis(1));
        }
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(fx.scene.action(), SceneAction::Recording);

        fx.scene.record(10, 0.1).unwrap();
        let first = finished.try_recv().unwrap();
        assert_eq!(first.frame_count, 20);
        assert!(fx.scene.is_recording());

        loop {
            let events = fx.scene.tick();
            if let Some(summary) = events.bake_finished {
                assert_eq!(summary.frame_count, 10);
                break;
            }
            assert!(Instant::now() < deadline, "second bake timed out");
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(fx.scene.frame_count(), 10);
    }

    // -----------------------------------------------------------------------
    // Bake results
    // -----------------------------------------------------------------------

    #[test]
    fn record_and_wait_publishes_a_summary() {
        let mut fx = make_ready(3);
        let mut finished = fx.scene.subscribe_bake_finished();
        wait_for_bake(&mut fx, 40, 0.05);

        let summary = finished.try_recv().unwrap();
        assert_eq!(summary.frame_count, 40);
        assert_eq!(summary.object_count, 3);
        assert_eq!(summary.static_count, 1);
        assert!(!summary.sod_enabled);
        assert!((summary.sim_duration - 2.0).abs() < 1e-5);

        assert!(fx.scene.finished());
        assert_eq!(fx.scene.progress(), 1.0);
        assert_eq!(fx.scene.frame_count(), 40);
        assert!((fx.scene.duration() - 2.0).abs() < 1e-5);
        assert_eq!(fx.scene.action(), SceneAction::Idle);
    }

    #[test]
    fn re_recording_replaces_the_bake() {
        let mut fx = make_ready(2);
        wait_for_bake(&mut fx, 10, 0.1);
        wait_for_bake(&mut fx, 20, 0.05);
        assert_eq!(fx.scene.bake().unwrap().frame_count(), 20);
        assert_eq!(fx.scene.bake().unwrap().object_count(), 2);
    }

    #[test]
    fn changing_objects_invalidates_the_bake() {
        let mut fx = make_ready(2);
        wait_for_bake(&mut fx, 10, 0.1);
        assert!(fx.scene.finished());

        let extra = fx.scene.host_mut().spawn(
            BodyDescriptor::sphere(Pose::from_position(Vec3::new(-4.0, 2.0, 0.0)), 0.5),
            BodyRole::Dynamic,
            &[],
        );
        fx.scene.add_dynamic_object(extra).unwrap();
        assert!(!fx.scene.finished());
        assert_eq!(fx.scene.play(), Err(SceneError::NoBakeData));

        wait_for_bake(&mut fx, 10, 0.1);
        fx.scene.clear_objects();
        assert!(fx.scene.dynamic_objects().is_empty());
        assert!(fx.scene.bake().is_none());
        assert_eq!(fx.scene.progress(), 0.0);
    }

    // -----------------------------------------------------------------------
    // Playback state
    // -----------------------------------------------------------------------

    #[test]
    fn cancel_restores_poses_and_profiles() {
        let mut fx = make_ready(3);
        let initial: Vec<Pose> = fx
            .dynamic
            .iter()
            .map(|h| fx.scene.host().pose(*h).unwrap())
            .collect();
        wait_for_bake(&mut fx, 30, 0.05);

        fx.scene.play().unwrap();
        fx.clock.advance(1.2);
        fx.scene.tick();
        for (h, start) in fx.dynamic.iter().zip(&initial) {
            assert_ne!(fx.scene.host().pose(*h).unwrap(), *start);
            assert_eq!(fx.scene.host().collision_profile(*h), Some("OverlapAll"));
        }

        fx.scene.cancel();
        assert_eq!(fx.scene.action(), SceneAction::Idle);
        for (h, start) in fx.dynamic.iter().zip(&initial) {
            assert_eq!(fx.scene.host().pose(*h), Some(*start));
            assert_eq!(fx.scene.host().collision_profile(*h), Some("PhysicsActor"));
        }
        // The bake survives a cancel.
        assert!(fx.scene.finished());
    }

    #[test]
    fn play_fps_throttles_pose_writes() {
        let mut fx = make_ready(1);
        wait_for_bake(&mut fx, 50, 0.02);
        fx.scene.set_play_fps(10.0);
        fx.scene.play().unwrap();

        fx.clock.advance(0.04);
        fx.scene.tick();
        let first = fx.scene.host().pose(fx.dynamic[0]).unwrap();
        fx.clock.advance(0.04);
        fx.scene.tick();
        assert_eq!(fx.scene.host().pose(fx.dynamic[0]), Some(first));

        fx.clock.advance(0.08);
        fx.scene.tick();
        assert_ne!(fx.scene.host().pose(fx.dynamic[0]), Some(first));
    }

    #[test]
    fn live_explosion_pushes_host_objects() {
        let config = SceneConfig {
            gravity: Vec3::ZERO,
            ..SceneConfig::default()
        };
        let mut fx = make_fixture(config, 1);
        fx.scene.initialize().unwrap();
        fx.scene.add_tagged_objects().unwrap();
        let blast = fx.scene.add_event(ScriptedEvent::explosion(
            "blast",
            0.5,
            Explosion {
                position: Vec3::new(-1.0, 3.0, 0.0),
                impulse: 10.0,
                falloff_min: 5.0,
                falloff_max: 10.0,
            },
        ));

        fx.scene.play_live().unwrap();
        assert_eq!(fx.scene.action(), SceneAction::PlayingLive);
        let h = fx.dynamic[0];
        assert!(fx.scene.host().is_simulating(h));

        fx.clock.advance(0.25);
        assert!(fx.scene.tick().fired_events.is_empty());
        assert_eq!(fx.scene.host().linear_velocity(h), Some(Vec3::ZERO));

        fx.clock.advance(0.5);
        assert_eq!(fx.scene.tick().fired_events, vec![blast]);
        let v = fx.scene.host().linear_velocity(h).unwrap();
        assert!(v.x > 0.0);
        assert!(v.y.abs() < 1e-5);

        fx.clock.advance(1.0);
        assert!(fx.scene.tick().fired_events.is_empty());
        assert_eq!(fx.scene.action(), SceneAction::PlayingLive);
    }

    #[test]
    fn stats_serialize() {
        let mut fx = make_ready(2);
        wait_for_bake(&mut fx, 8, 0.1);
        fx.scene.add_event(ScriptedEvent::trigger("mark", 0.2));
        fx.scene.play().unwrap();

        let stats = fx.scene.stats();
        assert_eq!(stats.action, SceneAction::Playing);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["action"], "Playing");
        assert_eq!(json["dynamic_objects"], 2);
        assert_eq!(json["static_objects"], 1);
        assert_eq!(json["scheduled_events"], 1);
        assert_eq!(json["frame_count"], 8);
        assert_eq!(json["finished"], true);
    }
}
