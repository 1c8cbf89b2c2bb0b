//! slugsync replica - Entry Point
//!
//! `slugsync run` keeps this replica's feed subscriptions in sync with the
//! shared registry. The other subcommands edit the registry directly.

use anyhow::Result;
use clap::{Parser, Subcommand};
use slugsync_core::{Slug, SlugSet};
use slugsync_node::{AppConfig, Application};
use tracing::info;

/// slugsync replica
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file path (can also be set via SLUGSYNC_CONFIG env var)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the replica until Ctrl-C (default)
    Run,
    /// Add a slug to the shared registry
    Add { slug: String },
    /// Remove a slug from the shared registry
    Remove { slug: String },
    /// Print the registry contents
    List,
    /// Replace the whole registry with the given slugs
    Replace { slugs: Vec<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = AppConfig::resolve_path(cli.config);
    let config = AppConfig::load(&config_path)?;

    slugsync_telemetry::init_logging_with(
        &config.telemetry.log_level,
        config.telemetry.log_format(),
    )?;
    info!(config_path = %config_path, "Configuration loaded");

    let app = Application::new(config)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            info!("Starting slugsync v{}", env!("CARGO_PKG_VERSION"));
            app.run().await?;
        }
        Command::Add { slug } => {
            let slug = Slug::new(slug)?;
            let registry = app.open_registry().await?;
            if registry.add(&slug).await? {
                println!("added {slug}");
            } else {
                println!("{slug} already present");
            }
        }
        Command::Remove { slug } => {
            let slug = Slug::new(slug)?;
            let registry = app.open_registry().await?;
            if registry.remove(&slug).await? {
                println!("removed {slug}");
            } else {
                println!("{slug} not present");
            }
        }
        Command::List => {
            let registry = app.open_registry().await?;
            for slug in registry.list().await? {
                println!("{slug}");
            }
        }
        Command::Replace { slugs } => {
            let set = slugs
                .iter()
                .map(Slug::new)
                .collect::<Result<SlugSet, _>>()?;
            let registry = app.open_registry().await?;
            registry.replace_all(&set).await?;
            println!("registry now holds {} slugs", set.len());
        }
    }

    Ok(())
}
