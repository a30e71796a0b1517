use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;
mod config;
mod services;

use commands::{
    BackupCommand, ConfigCommand, ListCommand, StorageCommand, ThemeCommand, UserCommand,
    WatchCommand,
};
use config::Config;
use services::Services;

#[derive(Parser)]
#[command(name = "shoplist")]
#[command(version)]
#[command(about = "Shopping lists kept safe across redundant local storage", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage shopping lists and their items
    List(ListCommand),

    /// Show, set or export the theme
    Theme(ThemeCommand),

    /// Manage the anonymous user identity
    User(UserCommand),

    /// Create or restore state backups
    Backup(BackupCommand),

    /// Inspect and maintain the storage backends
    Storage(StorageCommand),

    /// Keep the services running and react to changes from other processes
    Watch(WatchCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("SHOPLIST_LOG")
        .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| "shoplist=warn,shoplist_core=warn".into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    let command = match cli.command {
        Some(Commands::Config(cmd)) => return cmd.run(&config),
        Some(command) => command,
        None => {
            println!("Use --help to see available commands");
            return Ok(());
        }
    };

    let services = Services::open(&config).await?;
    let result = match command {
        Commands::List(cmd) => cmd.run(&services).await,
        Commands::Theme(cmd) => cmd.run(&services).await,
        Commands::User(cmd) => cmd.run(&services).await,
        Commands::Backup(cmd) => cmd.run(&services).await,
        Commands::Storage(cmd) => cmd.run(&services).await,
        Commands::Watch(cmd) => cmd.run(&services, &config).await,
        Commands::Config(_) => Ok(()),
    };
    services.close().await;

    result
}
