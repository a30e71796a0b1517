//! The services one CLI invocation runs on, opened from configuration.

use async_trait::async_trait;
use shoplist_core::{
    HostEnvironment, Lifecycle, LifecycleEvent, LifecycleEventSource, LifecycleListener,
    StateManager, Storage, UserTracker,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::Config;

pub struct Services {
    pub storage: Arc<Storage>,
    pub tracker: Arc<UserTracker>,
    pub state: Arc<StateManager>,
    lifecycle: Lifecycle,
    unloaded: Arc<UnloadFlag>,
}

/// Remembers that an `Unload` went through the lifecycle.
#[derive(Default)]
struct UnloadFlag(AtomicBool);

#[async_trait]
impl LifecycleListener for UnloadFlag {
    async fn on_unload(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl Services {
    pub async fn open(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        let env = HostEnvironment::detect();
        let storage = Storage::open(&config.storage_config(), env.user_agent.clone()).await?;
        let storage = Arc::new(storage);

        let tracker = Arc::new(
            UserTracker::new(storage.clone(), env)
                .with_flush_interval(config.state_config().flush_interval()),
        );
        let state = Arc::new(StateManager::new(storage.clone(), tracker.clone()));

        tracker.init().await;
        state.initialize().await;

        let unloaded = Arc::new(UnloadFlag::default());
        let mut lifecycle = Lifecycle::new();
        lifecycle.register(state.clone());
        lifecycle.register(tracker.clone());
        lifecycle.register(unloaded.clone());

        tracing::debug!(
            "Opened storage in {} (tab {})",
            config.data_dir.value.display(),
            storage.tab_id()
        );

        Ok(Self {
            storage,
            tracker,
            state,
            lifecycle,
            unloaded,
        })
    }

    /// Dispatches host events until the source delivers `Unload` or ends.
    pub async fn run_lifecycle<S: LifecycleEventSource + ?Sized>(&self, source: &mut S) -> usize {
        self.lifecycle.run(source).await
    }

    /// Unloads the services unless a lifecycle run already did.
    pub async fn close(&self) {
        if !self.unloaded.0.load(Ordering::SeqCst) {
            self.lifecycle.dispatch(&LifecycleEvent::Unload).await;
        }
        self.state.dispose().await;
    }
}
