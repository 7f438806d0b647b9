// Foreman API server

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use foreman_api::{app, AppState};
use foreman_core::{BusConfig, EventBus, ForemanConfig};
use foreman_engine::{build_registry, reaper, EngineBuilder, ShellTestRunner};
use foreman_storage::{EventJournal, StateStore};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "foreman=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("foreman-api starting...");

    let config_path = std::env::var("FOREMAN_CONFIG").unwrap_or_else(|_| "foreman.toml".into());
    let config = ForemanConfig::from_path(&PathBuf::from(&config_path))
        .with_context(|| format!("failed to load configuration from {}", config_path))?;

    // State store (single writer, WAL)
    let store = StateStore::open(&config.state.db_path)
        .await
        .context("failed to open state store")?;
    tracing::info!(db_path = %config.state.db_path.display(), "state store ready");

    // Event bus with the journal sink attached
    let bus = Arc::new(EventBus::new(BusConfig::from(&config.events)));
    let journal =
        Arc::new(EventJournal::open(&config.events.journal_path).context("failed to open journal")?);
    bus.subscribe(journal.handler(), None);

    // Providers and routing from declarative configuration
    let registry = Arc::new(build_registry(&config).context("provider registry")?);
    tracing::info!(providers = ?registry.names(), "provider registry ready");
    let router = config.build_router().context("router configuration")?;

    let mut builder = EngineBuilder::new(store, bus, registry, router, config.clone());
    if let Ok(command) = std::env::var("FOREMAN_TEST_COMMAND") {
        builder = builder.test_runner(Arc::new(ShellTestRunner::new(command)));
    }
    let engine = builder.build();

    // Reconcile state left behind by a previous process
    let parked = engine.recover().await.context("crash recovery")?;
    if parked > 0 {
        tracing::warn!(parked, "workflows parked for resume after restart");
    }

    // Background stuck-workflow sweep
    let (reaper_handle, reaper_shutdown) =
        reaper::spawn_reaper(engine.clone(), Duration::from_secs(60));

    let state = AppState { engine };
    let router = app(state);

    let addr = std::env::var("FOREMAN_LISTEN").unwrap_or_else(|_| "0.0.0.0:9000".into());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let _ = reaper_shutdown.send(true);
    let _ = reaper_handle.await;
    tracing::info!("foreman-api stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
