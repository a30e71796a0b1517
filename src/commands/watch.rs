use chrono::Local;
use clap::Args;
use shoplist_core::state::ALL_KEYS;
use shoplist_core::{HostEvents, StateEvent};

use super::display_value;
use crate::config::Config;
use crate::services::Services;

#[derive(Args)]
pub struct WatchCommand {
    /// Only report changes to this state key
    #[arg(long, short)]
    key: Option<String>,
}

impl WatchCommand {
    /// Runs until Ctrl-C, syncing on every interval and picking up writes
    /// made by other shoplist processes.
    pub async fn run(
        &self,
        services: &Services,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let key = self.key.as_deref().unwrap_or(ALL_KEYS);
        let subscription = services.state.subscribe(key, |event| {
            let now = Local::now().format("%H:%M:%S");
            match event {
                StateEvent::Changed { key, value } => {
                    println!("{} {} = {}", now, key, display_value(value))
                }
                StateEvent::Reloaded => println!("{} reloaded from storage", now),
                StateEvent::Reset => println!("{} reset to defaults", now),
                StateEvent::Restored => println!("{} restored from backup", now),
            }
        });

        let mut source = HostEvents::new(
            config.state_config().sync_interval(),
            services.storage.local_store().cloned(),
            services.storage.tab_id(),
        );

        println!(
            "Watching {} (sync every {}s, Ctrl-C to stop)",
            config.data_dir.value.display(),
            config.sync_interval_secs.value
        );
        let handled = services.run_lifecycle(&mut source).await;
        subscription.unsubscribe();

        tracing::info!("Watch stopped after {} lifecycle events", handled);
        println!("Stopped");
        Ok(())
    }
}
