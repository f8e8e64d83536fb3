use anyhow::{Context, Result};
use std::{process::ExitCode, sync::Arc};
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod lock;
mod models;
mod routes;
mod services;
#[cfg(test)]
mod test_utils;

use config::AppConfig;
use lock::ProcessLock;
use services::{
    entry_store::SqliteEntryStore, lifecycle::LifecycleEngine, mediainfo::MediaInfoTool,
    object_storage::S3Archive, recording_source::EpgStationClient,
};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // --- Logging setup (stderr; stdout is for command output) ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // --- Parse config + subcommand ---
    let (cfg, command) = match AppConfig::from_env_and_args() {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("error: {:#}", err);
            return ExitCode::from(2);
        }
    };
    tracing::debug!("Starting with config: {:?}", cfg);

    // --- Serialize mutating invocations ---
    let _lock = if command.is_read_only() {
        None
    } else {
        match ProcessLock::acquire(&cfg.directory) {
            Ok(lock) => Some(lock),
            Err(err) => {
                eprintln!("error: {}", err);
                return ExitCode::from(2);
            }
        }
    };

    let engine = match build_engine(&cfg).await {
        Ok(engine) => engine,
        Err(err) => {
            eprintln!("error: {:#}", err);
            return ExitCode::from(2);
        }
    };

    match routes::routes::dispatch(&engine, command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

/// Wire the adapters named by `cfg` into an engine.
async fn build_engine(cfg: &AppConfig) -> Result<LifecycleEngine> {
    if !cfg.directory.exists() {
        std::fs::create_dir_all(&cfg.directory)
            .with_context(|| format!("creating directory {}", cfg.directory.display()))?;
        tracing::info!("Created download directory at {}", cfg.directory.display());
    }

    let store = SqliteEntryStore::open(&cfg.database_path)
        .await
        .with_context(|| format!("opening database {}", cfg.database_path.display()))?;
    let source = EpgStationClient::new(cfg).context("building the EPGStation client")?;
    let storage = S3Archive::new(cfg)
        .await
        .context("configuring object storage")?;

    Ok(LifecycleEngine::new(
        Arc::new(source),
        Arc::new(storage),
        Arc::new(store),
        cfg.directory.clone(),
        cfg.key_prefix.clone(),
    )
    .with_mediainfo(MediaInfoTool::default()))
}
