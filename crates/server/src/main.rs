//! Orderline server - order store, cache, and stream ingestion.
//!
//! This binary serves the order API on port 8081 and consumes the inbound
//! order topic in a background task.
//!
//! # Architecture
//!
//! - Axum web framework for the HTTP API and the static lookup page
//! - `PostgreSQL` as the system of record
//! - In-memory cache warmed from the store at startup
//! - Kafka for inbound orders and outbound notifications

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;
use std::time::Duration;

use orderline_server::broker::{IngestLoop, KafkaPublisher, KafkaSource, Publisher};
use orderline_server::cache::MemoryCache;
use orderline_server::config::ServerConfig;
use orderline_server::db::{self, PgOrderStore};
use orderline_server::routes;
use orderline_server::services::OrderService;
use orderline_server::state::AppState;
use sentry::integrations::tracing as sentry_tracing;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long shutdown waits for queued outbound messages.
const PRODUCER_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &ServerConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    // Load configuration from environment (needed for Sentry init)
    let config = ServerConfig::from_env().expect("Failed to load configuration");

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "orderline_server=info,tower_http=debug".into());

    // JSON logs for log shippers, text locally
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let json_layer =
        json_logs.then(|| tracing_subscriber::fmt::layer().json().flatten_event(true));
    let text_layer = (!json_logs).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    // Initialize database connection pool
    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");
    tracing::info!("Database pool created");

    // NOTE: Migrations are NOT run automatically on startup.
    // Run them explicitly via: cargo run -p orderline-cli -- migrate

    let publisher = KafkaPublisher::new(
        &config.kafka.brokers,
        &config.kafka.outbound_topic,
        config.kafka.publish_timeout,
    )
    .expect("Failed to create Kafka producer");

    let store = Arc::new(PgOrderStore::new(pool));
    let cache = Arc::new(MemoryCache::new());
    let service = OrderService::new(store, cache, Some(Arc::new(publisher.clone())));

    // A failed warm is not fatal; misses fall through to the store
    match service.warm_cache(config.cache_warm_timeout).await {
        Ok(report) => tracing::info!(loaded = report.loaded, skipped = report.skipped, "Cache warmed"),
        Err(e) => tracing::error!(error = %e, "Cache warm failed, continuing with a partial cache"),
    }

    // Start the ingest loop
    let shutdown = CancellationToken::new();
    let source = KafkaSource::new(
        &config.kafka.brokers,
        &config.kafka.group_id,
        &config.kafka.inbound_topic,
    )
    .expect("Failed to create Kafka consumer");

    let mut ingest = IngestLoop::new(Arc::new(source), service.clone(), shutdown.clone())
        .with_backoff(config.ingest_retry_backoff);
    if let Some(topic) = &config.kafka.dead_letter_topic {
        let dead_letter = KafkaPublisher::new(&config.kafka.brokers, topic, config.kafka.publish_timeout)
            .expect("Failed to create dead-letter producer");
        let dead_letter: Arc<dyn Publisher> = Arc::new(dead_letter);
        ingest = ingest.with_dead_letter(dead_letter);
    }
    let ingest_handle = tokio::spawn(ingest.run());
    tracing::info!(topic = %config.kafka.inbound_topic, "Ingest loop spawned");

    // Build router
    let state = AppState::new(service);
    let app = routes::app(state, &config.static_dir, config.request_timeout)
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction());

    // Start server
    let addr = config.socket_addr();
    tracing::info!("orderline listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    // The signal stops ingestion and HTTP together; HTTP drains in-flight requests
    let signal = {
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .await
        .expect("Server error");

    // Wait for the in-flight message to be committed
    shutdown.cancel();
    match ingest_handle.await {
        Ok(stats) => tracing::info!(?stats, "Ingest loop finished"),
        Err(e) => tracing::error!(error = %e, "Ingest loop task failed"),
    }

    if let Err(e) = publisher.flush(PRODUCER_FLUSH_TIMEOUT).await {
        tracing::warn!(error = %e, "Outbound messages may not have been delivered");
    }

    tracing::info!("Shutdown complete");
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
