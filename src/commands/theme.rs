use clap::{Args, Subcommand};
use std::path::PathBuf;

use super::{display_value, parse_value};
use crate::services::Services;

#[derive(Args)]
pub struct ThemeCommand {
    #[command(subcommand)]
    pub command: ThemeSubcommand,
}

#[derive(Subcommand)]
pub enum ThemeSubcommand {
    /// Show the current theme
    Show,

    /// Set the theme (a name such as "dark", or a JSON object)
    Set {
        theme: String,

        /// Persist right away instead of on the next sync
        #[arg(long)]
        immediate: bool,
    },

    /// Export the theme with a timestamp and version
    Export {
        /// Write to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

impl ThemeCommand {
    pub async fn run(&self, services: &Services) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ThemeSubcommand::Show => {
                println!("{}", display_value(&services.state.get_theme()));
                Ok(())
            }

            ThemeSubcommand::Set { theme, immediate } => {
                let theme = parse_value(theme);
                services.state.set_theme(theme.clone(), *immediate).await;
                println!("Theme set to {}", display_value(&theme));
                Ok(())
            }

            ThemeSubcommand::Export { output } => {
                let export = serde_json::to_string_pretty(&services.state.export_theme())?;
                match output {
                    Some(path) => {
                        tokio::fs::write(path, export).await?;
                        println!("Exported theme to {}", path.display());
                    }
                    None => println!("{}", export),
                }
                Ok(())
            }
        }
    }
}
