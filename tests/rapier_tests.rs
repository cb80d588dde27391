//! Rapier-backed bake tests

#![cfg(feature = "rapier")]

#[cfg(test)]
mod tests {
    use baked_physics::{
        BakeScene, BallisticBackend, BodyDescriptor, BodyRole, Clock, EngineRegistry, LiveHost,
        ManualClock, Pose, RapierEngine, SceneConfig,
    };
    use glam::Vec3;
    use std::sync::Arc;
    use std::time::Duration;

    fn make_stack_scene(engine: Arc<RapierEngine>) -> BakeScene<LiveHost> {
        let config = SceneConfig::default();
        let mut host = LiveHost::new(Box::new(BallisticBackend::new()));
        host.spawn(
            BodyDescriptor::cuboid(Pose::from_position(Vec3::new(0.0, -0.5, 0.0)), Vec3::new(10.0, 0.5, 10.0)),
            BodyRole::Static,
            &[config.static_tag.as_str()],
        );
        for level in 0..4 {
            host.spawn(
                BodyDescriptor::cuboid(
                    Pose::from_position(Vec3::new(0.0, 0.5 + level as f32 * 1.05, 0.0)),
                    Vec3::splat(0.5),
                ),
                BodyRole::Dynamic,
                &[config.dynamic_tag.as_str()],
            );
        }
        let registry = EngineRegistry::new(engine);
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let mut scene = BakeScene::new(config, host, registry, clock);
        scene.initialize().unwrap();
        scene.add_tagged_objects().unwrap();
        scene
    }

    fn bake(scene: &mut BakeScene<LiveHost>, frames: usize) {
        tokio_test::block_on(scene.record_and_wait(frames, 1.0 / 60.0, Duration::from_millis(1)))
            .unwrap();
    }

    #[test]
    fn stack_settles_on_the_floor() {
        let mut scene = make_stack_scene(Arc::new(RapierEngine::new()));
        bake(&mut scene, 120);
        let bake = scene.bake().unwrap();
        for level in 0..4 {
            let y = bake.pose(119, level).unwrap().position.y;
            assert!(y > 0.3, "box {level} fell through at y = {y}");
            assert!(y < 4.5, "box {level} flew off at y = {y}");
        }
    }

    #[test]
    fn fresh_engines_bake_identical_frames() {
        let mut a = make_stack_scene(Arc::new(RapierEngine::new()));
        let mut b = make_stack_scene(Arc::new(RapierEngine::new()));
        bake(&mut a, 60);
        bake(&mut b, 60);
        let (a, b) = (a.bake().unwrap(), b.bake().unwrap());
        for frame in 0..60 {
            for object in 0..4 {
                assert_eq!(a.pose(frame, object), b.pose(frame, object), "frame {frame}");
            }
        }
    }
}
