//! Reference-counted physics engine registry.
//!
//! A process usually runs one engine (and its caches) shared by many scenes.
//! [`EngineRegistry::acquire`] hands out an [`EngineLease`]; the first lease
//! starts the engine up and dropping the last one shuts it down again.

use crate::backend::PhysicsBackend;
use parking_lot::Mutex;
use std::sync::Arc;

pub trait PhysicsEngine: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Called when the first lease is taken.
    fn startup(&self) {}

    /// Called when the last lease is released.
    fn shutdown(&self) {}

    fn create_world(&self) -> Box<dyn PhysicsBackend>;
}

pub struct EngineRegistry {
    engine: Arc<dyn PhysicsEngine>,
    refs: Mutex<usize>,
}

impl EngineRegistry {
    pub fn new(engine: Arc<dyn PhysicsEngine>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            refs: Mutex::new(0),
        })
    }

    pub fn acquire(self: &Arc<Self>) -> EngineLease {
        let mut refs = self.refs.lock();
        if *refs == 0 {
            log::info!("Starting physics engine {}", self.engine.name());
            self.engine.startup();
        }
        *refs += 1;
        EngineLease {
            registry: Arc::clone(self),
        }
    }

    /// Number of live leases.
    pub fn ref_count(&self) -> usize {
        *self.refs.lock()
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    fn release(&self) {
        let mut refs = self.refs.lock();
        *refs = refs.saturating_sub(1);
        if *refs == 0 {
            log::info!("Shutting down physics engine {}", self.engine.name());
            self.engine.shutdown();
        }
    }
}

/// Keeps the engine alive. Cloning takes another reference.
pub struct EngineLease {
    registry: Arc<EngineRegistry>,
}

impl EngineLease {
    pub fn create_world(&self) -> Box<dyn PhysicsBackend> {
        self.registry.engine.create_world()
    }

    pub fn engine_name(&self) -> &str {
        self.registry.engine_name()
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }
}

impl Clone for EngineLease {
    fn clone(&self) -> Self {
        self.registry.acquire()
    }
}

impl Drop for EngineLease {
    fn drop(&mut self) {
        self.registry.release();
    }
}

impl std::fmt::Debug for EngineLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineLease")
            .field("engine", &self.engine_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ballistic::BallisticBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingEngine {
        startups: AtomicUsize,
        shutdowns: AtomicUsize,
    }

    impl PhysicsEngine for CountingEngine {
        fn name(&self) -> &str {
            "counting"
        }
        fn startup(&self) {
            self.startups.fetch_add(1, Ordering::SeqCst);
        }
        fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
        fn create_world(&self) -> Box<dyn PhysicsBackend> {
            Box::new(BallisticBackend::new())
        }
    }

    #[test]
    fn startup_and_shutdown_bracket_all_leases() {
        let engine = Arc::new(CountingEngine::default());
        let registry = EngineRegistry::new(engine.clone());

        let a = registry.acquire();
        let b = a.clone();
        assert_eq!(registry.ref_count(), 2);
        assert_eq!(engine.startups.load(Ordering::SeqCst), 1);

        drop(a);
        assert_eq!(engine.shutdowns.load(Ordering::SeqCst), 0);
        drop(b);
        assert_eq!(engine.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(registry.ref_count(), 0);

        let _c = registry.acquire();
        assert_eq!(engine.startups.load(Ordering::SeqCst), 2);
    }
}
