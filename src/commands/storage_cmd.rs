use clap::{Args, Subcommand};

use super::OutputFormat;
use crate::services::Services;

#[derive(Args)]
pub struct StorageCommand {
    #[command(subcommand)]
    pub command: StorageSubcommand,
}

#[derive(Subcommand)]
pub enum StorageSubcommand {
    /// Show which backends are available
    Health {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Rewrite every cached value to all backends
    Sync,

    /// Drop everything from the durable store, as a host under storage pressure would
    Evict,

    /// Delete every stored record in every backend and reset state to defaults
    Clear {
        /// Skip the confirmation
        #[arg(long, short)]
        yes: bool,
    },
}

impl StorageCommand {
    pub async fn run(&self, services: &Services) -> Result<(), Box<dyn std::error::Error>> {
        let storage = &services.storage;

        match &self.command {
            StorageSubcommand::Health { format } => {
                let health = storage.storage_health();
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&health)?);
                    }
                    OutputFormat::Text => {
                        println!("Storage");
                        println!("=======\n");
                        for (kind, available) in &health.available {
                            let mark = if *available { "ok" } else { "unavailable" };
                            println!("{:<16} {}", kind.name(), mark);
                        }
                        println!();
                        println!("cached values: {}", health.memory_cache_size);
                        println!("pending writes: {}", services.state.pending_writes());
                    }
                }
                Ok(())
            }

            StorageSubcommand::Sync => {
                let synced = storage.sync_storage().await;
                println!("Synced {} values to all backends", synced);
                Ok(())
            }

            StorageSubcommand::Evict => {
                let Some(local) = storage.local_store() else {
                    return Err("No durable store is open".into());
                };
                let evicted = local.evict_all()?;
                println!("Evicted {} records from the durable store", evicted);
                println!("Values still held by other backends are rewritten on the next sync.");
                Ok(())
            }

            StorageSubcommand::Clear { yes } => {
                if !yes {
                    return Err("Refusing to clear without --yes".into());
                }
                let removed = storage.clear_corrupted_data().await;
                services.state.reset_state().await;
                println!("Removed {} stored records, state reset to defaults", removed);
                Ok(())
            }
        }
    }
}
