use std::sync::Arc;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::{fmt, EnvFilter};

use warrant_edge::edge::store::Datastore;
use warrant_edge::edge::sync::Synchronizer;
use warrant_edge::edge::web;
use warrant_edge::settings::Settings;

#[derive(Parser, Debug)]
#[command(
    name = "warrant-edge",
    version,
    about = "Edge agent serving warrant checks from a local cache"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "agent.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    let settings = Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    let store = Arc::new(Datastore::from_settings(&settings.datastore).await?);
    let synchronizer = Synchronizer::new(&settings.upstream, store.clone())?;

    let mut sync_task = tokio::spawn(async move { synchronizer.run().await });

    // Whichever of the server, the synchronizer or ctrl-c finishes first
    // ends the process.
    tokio::select! {
        served = web::serve(&settings.server, store) => served?,
        synced = &mut sync_task => {
            synced.into_diagnostic()??;
            tracing::info!("Synchronizer stopped");
        }
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted, shutting down"),
    }

    sync_task.abort();
    Ok(())
}
