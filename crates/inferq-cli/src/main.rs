//! `inferq` CLI — operator entry point for inspecting and running the task
//! queue. Set `INFERQ_REDIS_HOST`/`INFERQ_REDIS_PORT`/... (or a `.env` file)
//! to point it at a backing Redis instance.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use inferq_core::EngineConfig;
use inferq_store::RedisStore;
use inferq_worker::Engine;
use serde::Serialize;

#[derive(Parser)]
#[command(name = "inferq", about = "inferq task queue CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print registered workers and queue/processing-set sizes
    Status,
    /// List tasks currently sitting in the main queue
    ListQueued,
    /// Remove a single task from the main queue by id
    RemoveTask {
        /// Task id to remove
        id: String,
    },
    /// Drain the entire main queue
    ClearQueue,
    /// Start the worker loop against the configured store
    RunWorkers {
        /// Advisory worker count (this build runs one handler at a time per process)
        #[arg(long, default_value = "1")]
        workers: u32,
    },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn connect(config: &EngineConfig) -> anyhow::Result<Arc<RedisStore>> {
    RedisStore::connect(&config.redis_url())
        .await
        .map(Arc::new)
        .context("failed to connect to the backing Redis store")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = EngineConfig::from_env();
    let cli = Cli::parse();

    // Only a running worker needs the rolling error-log file (§4.4 step 9);
    // the inspection subcommands stay on a plain stdout subscriber. The guard
    // must live for the process lifetime to flush buffered writes, so it's
    // bound here rather than inside the `RunWorkers` arm.
    let _error_log_guard = match &cli.command {
        Commands::RunWorkers { .. } => {
            Some(inferq_infra::init_tracing_with_error_log(Path::new(
                &config.error_log_dir,
            )))
        }
        _ => {
            inferq_infra::init_tracing();
            None
        }
    };

    match cli.command {
        Commands::Status => {
            let store = connect(&config).await?;
            let engine = Engine::new(store, config);
            let workers = engine.workers().await?;
            let queued = engine.all_queued().await?;
            let processing = engine.processing().await?;
            print_json(&serde_json::json!({
                "workers": workers,
                "queued_count": queued.len(),
                "processing_count": processing.len(),
            }))?;
        }
        Commands::ListQueued => {
            let store = connect(&config).await?;
            let engine = Engine::new(store, config);
            let queued = engine.all_queued().await?;
            print_json(&queued)?;
        }
        Commands::RemoveTask { id } => {
            let store = connect(&config).await?;
            let engine = Engine::new(store, config);
            let removed = engine.remove_from_queue(&id).await?;
            print_json(&serde_json::json!({ "removed": removed }))?;
        }
        Commands::ClearQueue => {
            let store = connect(&config).await?;
            let engine = Engine::new(store, config);
            engine.delete_queue().await?;
            print_json(&serde_json::json!({ "cleared": true }))?;
        }
        Commands::RunWorkers { workers } => {
            if workers > 1 {
                tracing::warn!(
                    workers,
                    "the `workers` count is advisory; this build runs exactly one handler at a time per process"
                );
            }
            let store = connect(&config).await?;
            let engine = Engine::new(store, config);
            tracing::info!(worker_id = %engine.worker_id(), "starting worker loop");
            tokio::select! {
                _ = engine.clone().run() => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("received shutdown signal");
                    engine.stop();
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }

    Ok(())
}
