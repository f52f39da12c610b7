#![forbid(unsafe_code)]

use anyhow::Result;
use stagecast::analytics::{
    self, AggregatorSettings, AnalyticsAggregator, AnalyticsStore, FileStore, PgStore, SystemClock,
};
use stagecast::config::AppConfig;
use stagecast::db;
use stagecast::metrics::ServerMetrics;
use stagecast::recording::{LocalEgress, RecordingController};
use stagecast::server::AppServer;
use stagecast::service::LocalRoomService;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stagecast=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Stagecast - Starting server");

    let config = AppConfig::from_env();
    let metrics = ServerMetrics::new();

    // Analytics live in PostgreSQL when configured, otherwise in the data directory
    let store: Arc<dyn AnalyticsStore> = match db::connect(config.database_url.as_deref()).await? {
        Some(pool) => Arc::new(PgStore::new(pool)),
        None => {
            info!("Analytics record stored under {}", config.data_dir.display());
            Arc::new(FileStore::new(&config.data_dir))
        }
    };

    let clock = Arc::new(SystemClock);
    let settings = AggregatorSettings {
        timeline_interval: config.timeline_interval,
        timeline_max_samples: config.timeline_max_samples,
    };
    let aggregator = AnalyticsAggregator::load(store, clock.clone(), settings, metrics.clone()).await?;

    let rooms = Arc::new(LocalRoomService::new(config.event_buffer));
    let observer = analytics::spawn_observer(aggregator.clone(), rooms.subscribe(), config.timeline_interval);
    info!(
        "Analytics observer running, timeline every {}s (max {} samples)",
        config.timeline_interval.as_secs(),
        config.timeline_max_samples
    );

    let recording = RecordingController::new(Arc::new(LocalEgress::new()), clock, metrics.clone());

    let port = config.port;
    let server = AppServer::new(config, rooms, aggregator, recording, metrics);

    // Run server with graceful shutdown
    tokio::select! {
        result = server.serve(port) => {
            if let Err(e) = result {
                tracing::error!("HTTP server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    observer.abort();
    info!("Server shutdown complete");
    Ok(())
}
