use sqlx::PgPool;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::{
    events::Analytics,
    queue::JobQueue,
    scoring::Scorer,
    storage::AudioStore,
    transcription::Transcriber,
};

/// Shared application state passed to route handlers and the worker.
///
/// The queue, store handle, and AI adapters are constructed once at
/// startup and injected here; nothing in the pipeline reaches for
/// global state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: PgPool,
    pub storage: Arc<AudioStore>,
    pub queue: Arc<JobQueue>,
    pub transcriber: Arc<dyn Transcriber>,
    pub scorer: Arc<dyn Scorer>,
    pub analytics: Arc<Analytics>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        db: PgPool,
        storage: AudioStore,
        queue: JobQueue,
        transcriber: Arc<dyn Transcriber>,
        scorer: Arc<dyn Scorer>,
        analytics: Analytics,
    ) -> Self {
        Self {
            config: Arc::new(config),
            db,
            storage: Arc::new(storage),
            queue: Arc::new(queue),
            transcriber,
            scorer,
            analytics: Arc::new(analytics),
        }
    }
}
