//! User identity CLI commands.

use chrono::Local;
use clap::{Args, Subcommand};
use serde_json::Value;
use std::path::PathBuf;

use super::{display_value, parse_value, OutputFormat};
use crate::services::Services;

#[derive(Args)]
pub struct UserCommand {
    #[command(subcommand)]
    pub command: UserSubcommand,
}

#[derive(Subcommand)]
pub enum UserSubcommand {
    /// Show the user id, name, preferences and session
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Set the display name
    Name {
        name: String,
    },

    /// Forget the display name
    ClearName,

    /// Get a preference, or set it when a value is given
    Pref {
        key: String,

        /// New value (JSON, or a plain string)
        value: Option<String>,
    },

    /// Export identity data as JSON
    Export {
        /// Write to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Import name and preferences from an export file
    Import {
        file: PathBuf,
    },
}

impl UserCommand {
    pub async fn run(&self, services: &Services) -> Result<(), Box<dyn std::error::Error>> {
        let tracker = &services.tracker;

        match &self.command {
            UserSubcommand::Show { format } => {
                let info = tracker.get_user_info().await;
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&info)?);
                    }
                    OutputFormat::Text => {
                        println!("User");
                        println!("====\n");
                        println!("id:       {}", info.id);
                        println!("name:     {}", info.name.as_deref().unwrap_or("(not set)"));
                        println!("session:  {}", info.session.session_id);
                        println!(
                            "started:  {}",
                            info.session
                                .start_time
                                .with_timezone(&Local)
                                .format("%Y-%m-%d %H:%M:%S")
                        );
                        println!("language: {}", info.session.language);

                        if !info.preferences.is_empty() {
                            println!("\nPreferences:");
                            for (key, value) in &info.preferences {
                                println!("  {}: {}", key, display_value(value));
                            }
                        }
                    }
                }
                Ok(())
            }

            UserSubcommand::Name { name } => {
                let name = tracker.set_user_name(name).await?;
                println!("Name set to '{}'", name);
                Ok(())
            }

            UserSubcommand::ClearName => {
                tracker.clear_user_name().await;
                println!("Name cleared");
                Ok(())
            }

            UserSubcommand::Pref { key, value: None } => {
                match tracker.get_preference(key) {
                    Some(value) => println!("{}", display_value(&value)),
                    None => return Err(format!("Preference not set: {}", key).into()),
                }
                Ok(())
            }

            UserSubcommand::Pref {
                key,
                value: Some(raw),
            } => {
                let value = parse_value(raw);
                tracker.set_preference(key, value.clone()).await;
                println!("{} = {}", key, display_value(&value));
                Ok(())
            }

            UserSubcommand::Export { output } => {
                let export = serde_json::to_string_pretty(&tracker.export_user_data().await)?;
                match output {
                    Some(path) => {
                        tokio::fs::write(path, export).await?;
                        println!("Exported user data to {}", path.display());
                    }
                    None => println!("{}", export),
                }
                Ok(())
            }

            UserSubcommand::Import { file } => {
                let contents = tokio::fs::read_to_string(file).await?;
                let data: Value = serde_json::from_str(&contents)?;
                if !tracker.import_user_data(&data).await {
                    return Err(format!("Could not import user data from {}", file.display()).into());
                }
                println!("Imported user data from {}", file.display());
                Ok(())
            }
        }
    }
}
