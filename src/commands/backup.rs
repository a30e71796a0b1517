use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::services::Services;

#[derive(Args)]
pub struct BackupCommand {
    #[command(subcommand)]
    pub command: BackupSubcommand,
}

#[derive(Subcommand)]
pub enum BackupSubcommand {
    /// Write the full application state to a backup file
    Create {
        /// Backup file path
        output: PathBuf,
    },

    /// Restore application state from a backup file
    Restore {
        /// Backup file path
        file: PathBuf,
    },
}

impl BackupCommand {
    pub async fn run(&self, services: &Services) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            BackupSubcommand::Create { output } => {
                let backup = services.state.write_backup_file(output).await?;
                println!(
                    "Backed up {} state keys to {}",
                    backup.state.len(),
                    output.display()
                );
                Ok(())
            }

            BackupSubcommand::Restore { file } => {
                services.state.read_backup_file(file).await?;
                println!("Restored state from {}", file.display());
                Ok(())
            }
        }
    }
}
