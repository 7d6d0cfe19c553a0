mod app_state;
mod config;
mod db;
mod models;
mod routes;
mod services;

use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use app_state::AppState;
use config::AppConfig;
use services::{
    events::Analytics,
    queue::JobQueue,
    scoring::GptScorer,
    storage::AudioStore,
    transcription::WhisperTranscriber,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing drill-eval API server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!("evaluation_jobs_total", "Total evaluation jobs submitted");
    metrics::describe_counter!(
        "evaluation_jobs_completed",
        "Total evaluation jobs completed"
    );
    metrics::describe_counter!(
        "evaluation_jobs_failed",
        "Total evaluation jobs that failed terminally"
    );
    metrics::describe_counter!(
        "evaluation_events_total",
        "Analytics events emitted by the pipeline"
    );
    metrics::describe_histogram!(
        "evaluation_processing_seconds",
        "Time to process one evaluation job"
    );
    metrics::describe_gauge!(
        "evaluation_queue_depth",
        "Current number of pending jobs in the queue"
    );

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize audio object storage
    tracing::info!("Initializing audio object storage");
    let storage = AudioStore::new(
        &config.audio_bucket,
        &config.audio_endpoint,
        &config.audio_access_key,
        &config.audio_secret_key,
        &config.audio_encryption_key,
    )
    .expect("Failed to initialize audio storage");

    // Initialize Redis job queue
    tracing::info!("Connecting to Redis job queue");
    let queue = JobQueue::new(
        &config.redis_url,
        config.max_attempts,
        config.retry_backoff_ms,
        config.job_retention_secs,
        config.wait_poll_ms,
    )
    .expect("Failed to initialize job queue");

    // Initialize AI adapters
    tracing::info!("Initializing transcription and scoring clients");
    let transcriber = Arc::new(WhisperTranscriber::new(
        &config.openai_base_url,
        &config.openai_api_key,
        &config.transcription_model,
    ));
    let scorer = Arc::new(GptScorer::new(
        &config.openai_base_url,
        &config.openai_api_key,
        &config.scoring_model,
    ));

    let analytics = Analytics::new(config.analytics_url.clone());

    let bind_addr = config.bind_addr.clone();

    // Create shared application state
    let state = AppState::new(
        config, db_pool, storage, queue, transcriber, scorer, analytics,
    );

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/evaluate", post(routes::evaluate::submit_evaluation))
        .route(
            "/api/v1/evaluate/{job_id}/status",
            get(routes::evaluate::get_evaluation_status),
        )
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(25 * 1024 * 1024)); // audio uploads

    tracing::info!("Starting drill-eval on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
