use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{HostClient, HttpSettingsSink, MessageBus, PlaylistController};
use tracing::warn;

mod commands;
mod config;

use commands::Command;
use config::ClientConfig;

/// Manage the print queue of a playlist host.
#[derive(Parser, Debug)]
#[command(name = "playlist")]
struct Args {
    /// Overrides `server_url` from playlist.toml / PLAYLIST_SERVER_URL.
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    api_key: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();
    let args = Args::parse();

    let config = ClientConfig::load()
        .context("failed to read playlist client configuration")?
        .with_overrides(args.server_url, args.api_key);
    let client = HostClient::new(&config.server_url, config.api_key)?;

    let snapshot = client
        .fetch_settings()
        .await
        .with_context(|| format!("could not load playlist from {}", client.base_url()))?;

    let bus = match args.command {
        Command::Watch => match MessageBus::connect(client.base_url()).await {
            Ok(bus) => Some(bus),
            Err(error) => {
                warn!(%error, "push socket unavailable");
                None
            }
        },
        _ => None,
    };

    let (sink, writer) = HttpSettingsSink::spawn(client.clone());
    let mut controller = PlaylistController::new(Arc::new(sink), Arc::new(client.clone()));
    controller.hydrate(&snapshot);

    let outcome = commands::run(args.command, &mut controller, &client, bus).await;

    // Dropping the controller closes the sink so the writer drains and stops.
    drop(controller);
    writer.await.context("settings writer task failed")?;
    outcome
}
