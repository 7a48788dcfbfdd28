use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::Parser;
use parsing::UsageFileParser;
use registry::ModelEntry;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::info;

use model_worker::cli::{Cli, Command};
use model_worker::config::AppConfig;
use model_worker::model_store::FsModelStore;
use model_worker::queue::{PgModelQueue, DELETE_QUEUE, TRAIN_QUEUE};
use model_worker::registry_pg::PgModelRegistry;
use model_worker::state::{AppState, SharedState};
use model_worker::trainer::ProcessTrainer;
use model_worker::worker_loop::run_worker_pool;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = AppConfig::from_env()?;

    // --- Postgres ---
    let pg_pool = PgPool::connect(&cfg.database_url)
        .await
        .context("Failed to connect to Postgres")?;

    sqlx::migrate!("./migrations")
        .run(&pg_pool)
        .await
        .context("Failed to run migrations")?;

    check_postgres(&pg_pool).await?;
    info!("postgres: ok");

    let state = build_state(&cfg, pg_pool)?;

    match cli.command {
        None => run(state).await,
        Some(Command::Train { model_id, dataset }) => {
            let data = tokio::fs::read(&dataset)
                .await
                .with_context(|| format!("Failed to read dataset {}", dataset.display()))?;
            let submitter = state.submitter();
            submitter.upload_dataset(model_id, Bytes::from(data)).await?;
            let (handle, _) = submitter.submit_train(model_id).await?;
            println!("queued train for {model_id} (message {})", handle.message_id);
            Ok(())
        }
        Some(Command::Delete { model_id }) => {
            let handle = state.submitter().submit_delete(model_id).await?;
            println!("queued delete for {model_id} (message {})", handle.message_id);
            Ok(())
        }
        Some(Command::Status { model_id }) => {
            match state.registry.get(model_id).await? {
                Some(entry) => print_entry(&entry)?,
                None => bail!("model {model_id} not found"),
            }
            Ok(())
        }
        Some(Command::List) => {
            for entry in state.registry.list().await? {
                println!(
                    "{}  {:<11}  {}",
                    entry.model_id,
                    entry.status.as_str(),
                    entry.created_time.to_rfc3339()
                );
            }
            Ok(())
        }
    }
}

fn build_state(cfg: &AppConfig, pg_pool: PgPool) -> Result<SharedState> {
    let store_root = PathBuf::from(&cfg.model_store_root);
    let trainer = ProcessTrainer::from_command_line(&cfg.trainer_command, store_root.join(".work"))
        .context("TRAINER_COMMAND is empty")?;

    Ok(Arc::new(AppState::new(
        Arc::new(PgModelQueue::new(pg_pool.clone(), TRAIN_QUEUE)),
        Arc::new(PgModelQueue::new(pg_pool.clone(), DELETE_QUEUE)),
        Arc::new(PgModelRegistry::new(pg_pool)),
        Arc::new(FsModelStore::new(store_root)),
        Arc::new(trainer),
        Arc::new(UsageFileParser),
        cfg.processor_settings(),
        cfg.pool_settings(),
    )))
}

async fn run(state: SharedState) -> Result<()> {
    let cancel = CancellationToken::new();
    let pool = tokio::spawn(run_worker_pool(state, cancel.clone()));

    shutdown_signal().await;
    info!("shutdown requested; stopping workers");
    cancel.cancel();

    pool.await.context("worker pool panicked")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("ctrl-c handler failed: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler failed: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn print_entry(entry: &ModelEntry) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(entry)?);
    Ok(())
}

async fn check_postgres(pg_pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .execute(pg_pool)
        .await
        .context("Postgres ping failed")?;
    Ok(())
}
