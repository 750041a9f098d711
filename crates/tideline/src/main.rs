//! Tideline: real-time ingestion fabric for the Bluesky Jetstream firehose.
//!
//! Wires the six library crates together — cursor store, DID resolver, job
//! registry, jetstream client, jetstream manager, broker client — and runs
//! until `SIGINT`/`SIGTERM`, consuming `job.start`/`job.cancel` commands
//! from the ingestion queue.

mod config;
mod job_commands;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use miette::Result;
use tideline_broker::BrokerClient;
use tideline_cursor::{CursorStore, FileCursorStore, MemoryCursorStore, RemoteKvCursorStore};
use tideline_jetstream::JetstreamClient;
use tideline_jobs::JobRegistry;
use tideline_manager::JetstreamManager;
use tideline_resolver::DidResolver;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::{Config, CursorBackend};

async fn build_cursor_store(config: &Config) -> Result<Arc<dyn CursorStore>> {
    match config.jetstream_cursor_persistence {
        CursorBackend::Memory => Ok(Arc::new(MemoryCursorStore::new())),
        CursorBackend::File => {
            let path = config.jetstream_cursor_file_path.as_ref().ok_or_else(|| {
                miette::miette!(
                    "JETSTREAM_CURSOR_FILE_PATH is required when JETSTREAM_CURSOR_PERSISTENCE=file"
                )
            })?;
            let store = FileCursorStore::open_with_interval(
                path,
                Duration::from_millis(config.jetstream_cursor_auto_save_ms),
            )
            .await
            .map_err(|e| miette::miette!("{}", e))?;
            Ok(Arc::new(store))
        }
        CursorBackend::RemoteKv => {
            // Deliberately unimplemented (see DESIGN.md's Open Question
            // decision): fail fast at startup rather than silently
            // falling back to another backend.
            let store = RemoteKvCursorStore::connect("remote-kv").map_err(|e| miette::miette!("{}", e))?;
            Ok(Arc::new(store))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tideline=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::parse();

    let cursor_store = build_cursor_store(&config).await?;
    let resolver = Arc::new(DidResolver::new(config.resolver_config()));
    let registry = JobRegistry::new();
    let client = Arc::new(JetstreamClient::new(
        config.jetstream_config(),
        cursor_store,
    ));

    let nats_client = async_nats::connect(&config.nats_url)
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    let jetstream_ctx = async_nats::jetstream::new(nats_client);
    let broker_client = BrokerClient::from_jetstream(jetstream_ctx.clone());

    let manager = JetstreamManager::new(client, registry, resolver, Arc::new(broker_client));

    let mut shutdown_rx = {
        let (tx, rx) = tokio::sync::watch::channel(false);
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("received shutdown signal");
            let _ = tx.send(true);
        });
        rx
    };

    let manager_for_commands = Arc::clone(&manager);
    let default_deadline_ms = config.jetstream_max_duration_ms;
    let commands_handle = tokio::spawn(async move {
        if let Err(e) =
            job_commands::run(jetstream_ctx, manager_for_commands, default_deadline_ms).await
        {
            tracing::error!(error = %e, "job command consumer exited with an error");
        }
    });

    tokio::select! {
        _ = shutdown_rx.changed() => {}
        _ = commands_handle => {}
    }

    tracing::info!("tideline shutting down");
    Ok(())
}
