use clap::{Args, Subcommand};
use std::fs;
use std::io::Write;

use super::OutputFormat;
use crate::config::Config;

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Initialize configuration file
    Init,
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        println!("data_dir: {}", config.data_dir.value.display());
                        println!("  source: {}", config.data_dir.source);
                        println!();

                        println!("sync_interval_secs: {}", config.sync_interval_secs.value);
                        println!("  source: {}", config.sync_interval_secs.source);
                        println!();

                        println!("flush_interval_secs: {}", config.flush_interval_secs.value);
                        println!("  source: {}", config.flush_interval_secs.source);
                        println!();

                        println!("quota_bytes: {}", config.quota_bytes.value);
                        println!("  source: {}", config.quota_bytes.source);
                        println!();

                        println!("enable_cookies: {}", config.enable_cookies.value);
                        println!("  source: {}", config.enable_cookies.source);
                        println!();

                        println!("enable_documents: {}", config.enable_documents.value);
                        println!("  source: {}", config.enable_documents.source);
                    }
                }
                Ok(())
            }

            ConfigSubcommand::Init => {
                let config_path = config
                    .config_file
                    .clone()
                    .unwrap_or_else(Config::default_config_path);

                // Check if config already exists
                if config_path.exists() {
                    println!("Config file already exists: {}", config_path.display());
                    println!("Use 'shoplist config show' to view current configuration.");
                    return Ok(());
                }

                // Create parent directory
                if let Some(parent) = config_path.parent() {
                    fs::create_dir_all(parent)?;
                }

                // Write default config
                let default_config = r#"# shoplist configuration

# Directory for the durable store, document database and cookie jar
# (default: ~/.local/share/shoplist)
# data_dir: ~/.local/share/shoplist

# Seconds between background state syncs while watching
sync_interval_secs: 30

# Seconds between flushes of user name, preferences and activity
flush_interval_secs: 60

# Durable store quota in bytes (default: 5 MiB)
# quota_bytes: 5242880

# Mirror critical values into the cookie jar and the document database
# enable_cookies: true
# enable_documents: true
"#;

                let mut file = fs::File::create(&config_path)?;
                file.write_all(default_config.as_bytes())?;

                println!("Created config file: {}", config_path.display());
                println!("\nEdit this file to customize your settings.");
                Ok(())
            }
        }
    }
}
