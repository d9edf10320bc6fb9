use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use uuid::Uuid;

use quarterdeck_core::config::{QuarterdeckConfig, UPDATE_DOWNLOAD_TASK};
use quarterdeck_store::{SqliteStore, Store};
use quarterdeck_updater::{FsKindsLoader, UpdateChecker, Updater};
use quarterdeck_upstream::UpstreamClient;

mod app;
mod deploy_exec;
mod http;

#[derive(Debug, Parser)]
#[command(name = "quarterdeck-console", version, about = "Cluster admin console")]
struct Args {
    /// Path to quarterdeck.toml (default: ~/.quarterdeck/quarterdeck.toml).
    #[arg(long)]
    config: Option<String>,

    /// Override the configured bind address.
    #[arg(long)]
    bind: Option<String>,

    /// Override the configured port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quarterdeck=info,tower_http=debug".into()),
        )
        .init();

    let args = Args::parse();

    // load config: explicit flag > QUARTERDECK_CONFIG env > default path
    let config_path = args
        .config
        .or_else(|| std::env::var("QUARTERDECK_CONFIG").ok());
    let mut config = QuarterdeckConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        QuarterdeckConfig::default()
    });
    if let Some(bind) = args.bind {
        config.console.bind = bind;
    }
    if let Some(port) = args.port {
        config.console.port = port;
    }

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

    let store = Arc::new(SqliteStore::new(db, &config.database.archives_dir)?);

    let instance_id = Uuid::new_v4().to_string();
    let upstream = Arc::new(UpstreamClient::new(&config.upstream, instance_id)?);
    let deployer = Arc::new(deploy_exec::StoreDeployExecutor::new(store.clone()));

    let checker = UpdateChecker::new(
        store.clone(),
        upstream.clone(),
        upstream.clone(),
        Arc::new(FsKindsLoader),
        deployer.clone(),
        upstream.clone(),
    );
    let updater = Updater::new(checker, store.clone());

    // A crashed prior process cannot have live staging work, so a leftover
    // "running" token is stale by definition here — clear it exactly once,
    // before any schedule can fire.
    store.clear_task_status(UPDATE_DOWNLOAD_TASK)?;

    if config.updates.check_on_start {
        if let Err(e) = updater.start() {
            warn!(error = %e, "failed to bootstrap update-check schedules");
        }
    }

    let bind = config.console.bind.clone();
    let port = config.console.port;
    let state = Arc::new(app::AppState::new(config, store, updater, deployer));
    let router = app::build_router(state.clone());

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!(%addr, "quarterdeck console listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.updater.shutdown();
    info!("quarterdeck console stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install ctrl-c handler");
    }
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
