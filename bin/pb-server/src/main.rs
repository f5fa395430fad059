//! Postbox Server
//!
//! Serves the HTTP control surface and runs the outbox dispatcher in the
//! background. The dispatcher is idle until `GET /start` (or
//! `dispatcher.autostart = true`).
//!
//! Configuration is read from TOML (`POSTBOX_CONFIG` or the standard search
//! paths) with `POSTBOX_*` environment overrides. `RUST_LOG` sets the log
//! level and `LOG_FORMAT=json` switches to JSON logs.

mod api;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use pb_config::{AppConfig, ConfigLoader, DatabaseConfig, RedisConfig, StoreBackend};
use pb_outbox::{
    DeliveryCache, DispatchController, DispatchLoop, HttpWebhookClient, HttpWebhookConfig,
    InMemoryDeliveryCache, InMemoryMessageStore, LoopConfig, MessageStore, PostgresMessageStore,
    RedisDeliveryCache, SqliteMessageStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    pb_common::logging::init_logging("pb-server");

    info!("Starting Postbox Server");

    let config = ConfigLoader::new().load().context("failed to load configuration")?;

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;

    let store = create_store(&config.database).await?;
    let cache = create_cache(&config.redis).await?;
    let controller = Arc::new(create_controller(&config, store.clone(), cache.clone())?);

    if config.dispatcher.autostart {
        controller.start();
    }

    let state = api::AppState {
        controller: Arc::clone(&controller),
        store,
        cache,
        metrics,
    };

    let app = api::create_router(state)
        .layer(TimeoutLayer::new(Duration::from_secs(config.http.read_timeout_secs)))
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.http.host, config.http.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(addr = %addr, "HTTP server listening");

    let shutdown_controller = Arc::clone(&controller);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown signal received...");
            shutdown_controller.stop();
        })
        .await?;

    let timeout = Duration::from_secs(config.http.shutdown_timeout_secs);
    if let Some(exit) = controller.shutdown(timeout).await {
        info!(reason = exit.reason(), "Dispatcher finished");
    }

    info!("Postbox Server shutdown complete");
    Ok(())
}

async fn create_store(config: &DatabaseConfig) -> Result<Arc<dyn MessageStore>> {
    let store: Arc<dyn MessageStore> = match config.backend {
        StoreBackend::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .connect(&config.connection_url())
                .await
                .context("failed to connect to PostgreSQL")?;
            info!(host = %config.host, database = %config.name, "Using PostgreSQL message store");
            Arc::new(PostgresMessageStore::new(pool))
        }
        StoreBackend::Sqlite => {
            let url = config
                .url
                .as_deref()
                .filter(|url| !url.is_empty())
                .context("database.url is required for the sqlite backend")?;
            let pool = SqlitePoolOptions::new()
                .max_connections(config.max_connections)
                .connect(url)
                .await
                .context("failed to open SQLite database")?;
            info!(url = %url, "Using SQLite message store");
            Arc::new(SqliteMessageStore::new(pool))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory message store; messages are lost on restart");
            Arc::new(InMemoryMessageStore::new())
        }
    };

    if config.init_schema {
        store.init_schema().await?;
    }

    Ok(store)
}

async fn create_cache(config: &RedisConfig) -> Result<Arc<dyn DeliveryCache>> {
    if !config.enabled {
        warn!("Redis disabled; delivery records are kept in memory");
        return Ok(Arc::new(InMemoryDeliveryCache::new()));
    }

    let cache = RedisDeliveryCache::connect(&config.connection_url())
        .await
        .context("failed to connect to Redis")?;
    info!(host = %config.host, port = config.port, "Using Redis delivery cache");
    Ok(Arc::new(cache))
}

fn create_controller(
    config: &AppConfig,
    store: Arc<dyn MessageStore>,
    cache: Arc<dyn DeliveryCache>,
) -> Result<DispatchController> {
    let webhook = HttpWebhookClient::new(HttpWebhookConfig {
        url: config.webhook.url.clone(),
        auth_token: config.webhook.auth_token.clone(),
        connect_timeout: config.webhook.connect_timeout(),
        request_timeout: config.webhook.request_timeout(),
    })?;
    info!(url = %webhook.url(), "Webhook client configured");

    let dispatch_loop = DispatchLoop::new(
        store,
        cache,
        Arc::new(webhook),
        LoopConfig {
            batch_size: config.dispatcher.batch_size,
            poll_interval: config.dispatcher.poll_interval(),
            failure_policy: config.dispatcher.failure_policy,
            max_consecutive_store_failures: config.dispatcher.max_consecutive_store_failures,
        },
    );

    Ok(DispatchController::new(dispatch_loop))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
