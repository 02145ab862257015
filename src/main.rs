use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};

use honor_ledger::{
    api::{create_router, SecurityMiddlewareConfig, SecurityState},
    config::HonorConfig,
    database::DatabasePool,
    engine::Engine,
    store::{LedgerStore, MemoryStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Configuration first: missing secrets stop the process here
    let config = HonorConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {:#}", e);
        eprintln!("Please check HONOR_* environment variables.");
        e
    })?;

    init_logging(&config)?;

    info!("Starting Honor Ledger server");
    config.log_summary();

    let store = open_store(&config).await?;
    let engine = Arc::new(Engine::new(&config, store).context("Failed to build engine")?);

    let security_state = SecurityState::new(SecurityMiddlewareConfig::from(&config.security));
    spawn_rate_limit_cleanup(security_state.clone());

    let app = create_router(engine, security_state);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", bind_addr, e))?;

    info!("Honor Ledger listening on {}", bind_addr);
    info!(
        "Security middleware: Rate limit={}/min, Max body={}KB",
        config.security.rate_limit_per_minute,
        config.security.max_request_size / 1024
    );

    // Serve with connect info for client IP extraction
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn init_logging(config: &HonorConfig) -> Result<()> {
    let log_level = match config.logging.level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt().with_max_level(log_level).finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}

/// PostgreSQL when enabled, otherwise the in-memory store
async fn open_store(config: &HonorConfig) -> Result<Arc<dyn LedgerStore>> {
    if !config.database.postgres_enabled {
        warn!("PostgreSQL disabled; ledger state lives in memory and is lost on restart");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let db = DatabasePool::new(&config.database.postgres_url, config.database.max_connections)
        .await
        .context("Failed to connect to PostgreSQL")?;
    db.init_schema()
        .await
        .context("Failed to initialize database schema")?;
    Ok(Arc::new(db))
}

fn spawn_rate_limit_cleanup(state: SecurityState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            state.rate_limiter.cleanup();
        }
    });
}
