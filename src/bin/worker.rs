use drill_eval::{
    app_state::AppState,
    config::AppConfig,
    db::{self, results},
    models::evaluation::{EvaluationResult, ResponseSource},
    services::{
        events::Analytics,
        queue::{FailureDisposition, JobQueue, QueuedEvaluation},
        scoring::{GptScorer, RateGate, Scorer},
        storage::AudioStore,
        transcription::{self, Transcriber, Transcript, TranscriptionError, WhisperTranscriber},
    },
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL_MS: u64 = 1000; // 1 second

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting evaluation worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Initialize services
    tracing::info!("Initializing services");
    let storage = AudioStore::new(
        &config.audio_bucket,
        &config.audio_endpoint,
        &config.audio_access_key,
        &config.audio_secret_key,
        &config.audio_encryption_key,
    )
    .expect("Failed to initialize audio storage");

    let queue = JobQueue::new(
        &config.redis_url,
        config.max_attempts,
        config.retry_backoff_ms,
        config.job_retention_secs,
        config.wait_poll_ms,
    )
    .expect("Failed to initialize job queue");

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

    let rate_gate = RateGate::from_rpm(config.scoring_rpm);
    let http = reqwest::Client::new();

    let state = AppState::new(
        config, db_pool, storage, queue, transcriber, scorer, analytics,
    );

    tracing::info!("Worker ready, starting job processing loop");

    // Main processing loop, one job at a time.
    loop {
        if let Err(e) = state.queue.promote_due().await {
            tracing::warn!(error = %e, "failed to promote delayed jobs");
        }

        match process_next_job(&state, &rate_gate, &http).await {
            Ok(true) => {
                tracing::debug!("Job processed, checking for next job");
            }
            Ok(false) => {
                // No job available, record depth and sleep before next poll
                if let Ok(depth) = state.queue.queue_depth().await {
                    metrics::gauge!("evaluation_queue_depth").set(depth as f64);
                }
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error processing job, will retry");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
    }
}

/// Process the next job from the queue.
/// Returns Ok(true) if a job was processed, Ok(false) if no job available.
async fn process_next_job(
    state: &AppState,
    rate_gate: &RateGate,
    http: &reqwest::Client,
) -> Result<bool, Box<dyn std::error::Error>> {
    let Some((job_id, job)) = state.queue.dequeue().await? else {
        return Ok(false);
    };

    tracing::info!(job_id = %job_id, request_id = %job.request_id, "Processing evaluation job");

    // Idempotency guard: at-least-once delivery means the same request
    // id can arrive again after a crash or a duplicate enqueue. Skip
    // all paid work if a result already landed.
    if results::get_by_request_id(&state.db, job.request_id)
        .await?
        .is_some()
    {
        state.queue.mark_completed(job_id).await?;
        state.analytics.capture(
            "evaluation_skipped_duplicate",
            job_id,
            job.user_id.clone(),
            serde_json::json!({}),
        );
        tracing::info!(job_id = %job_id, "Result already persisted, skipping");
        return Ok(true);
    }

    let started = std::time::Instant::now();

    match evaluate_job(state, rate_gate, http, job_id, &job).await {
        Ok(result) => {
            // Persist first; only a durable row justifies reporting
            // success back to the queue.
            results::upsert(
                &state.db,
                &result,
                job.user_id.as_deref(),
                job.metadata.as_ref(),
            )
            .await?;
            state.queue.mark_completed(job_id).await?;

            metrics::counter!("evaluation_jobs_completed").increment(1);
            metrics::histogram!("evaluation_processing_seconds")
                .record(started.elapsed().as_secs_f64());
            state.analytics.capture(
                "evaluation_completed",
                job_id,
                job.user_id.clone(),
                serde_json::json!({
                    "score": result.score,
                    "duration_ms": result.duration_ms,
                    "had_audio": result.transcription.is_some(),
                }),
            );

            tracing::info!(
                job_id = %job_id,
                score = result.score,
                duration_ms = result.duration_ms,
                "Job completed successfully"
            );
            Ok(true)
        }
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Job processing failed");

            match state.queue.record_failure(job_id, &e.to_string()).await? {
                FailureDisposition::Retry { attempts, delay_ms } => {
                    tracing::info!(
                        job_id = %job_id,
                        attempts,
                        delay_ms,
                        "Job re-queued for retry"
                    );
                }
                FailureDisposition::Terminal { attempts } => {
                    metrics::counter!("evaluation_jobs_failed").increment(1);
                    state.analytics.capture(
                        "evaluation_failed",
                        job_id,
                        job.user_id.clone(),
                        serde_json::json!({ "attempts": attempts }),
                    );
                    tracing::warn!(
                        job_id = %job_id,
                        attempts,
                        "Job failed after max retries"
                    );
                }
            }
            Ok(true)
        }
    }
}

/// Run one evaluation end to end: resolve the answer text (transcribing
/// audio when needed), score it, and assemble the result row.
async fn evaluate_job(
    state: &AppState,
    rate_gate: &RateGate,
    http: &reqwest::Client,
    job_id: uuid::Uuid,
    job: &QueuedEvaluation,
) -> Result<EvaluationResult, Box<dyn std::error::Error>> {
    let started = std::time::Instant::now();

    let (answer, transcript) = match &job.source {
        ResponseSource::Text { body } => (body.clone(), None),
        ResponseSource::StoredAudio { key } => {
            tracing::debug!(job_id = %job_id, key = %key, "Loading stored audio");
            let audio = state.storage.load_audio(key).await?;
            let transcript = transcribe(state, job_id, audio).await?;
            (transcript.text.clone(), Some(transcript))
        }
        ResponseSource::RemoteAudio { url } => {
            tracing::debug!(job_id = %job_id, url = %url, "Fetching remote audio");
            let audio = transcription::fetch_remote_audio(http, url).await?;
            let transcript = transcribe(state, job_id, audio).await?;
            (transcript.text.clone(), Some(transcript))
        }
    };

    rate_gate.acquire().await;

    tracing::debug!(job_id = %job_id, "Scoring answer");
    let scored = state.scorer.score(&answer, job.metadata.as_ref()).await?;

    Ok(EvaluationResult {
        request_id: job.request_id,
        job_id,
        score: scored.card.score,
        feedback: scored.card.feedback,
        what_changed: scored.card.what_changed,
        practice_rule: scored.card.practice_rule,
        transcription: transcript.map(|t| t.text),
        duration_ms: started.elapsed().as_millis() as i64,
        tokens_used: scored.tokens_used,
        created_at: chrono::Utc::now(),
    })
}

async fn transcribe(
    state: &AppState,
    job_id: uuid::Uuid,
    audio: Vec<u8>,
) -> Result<Transcript, TranscriptionError> {
    let ext = transcription::sniff_audio_format(&audio).unwrap_or("webm");
    let started = std::time::Instant::now();
    let transcript = state
        .transcriber
        .transcribe(audio, &format!("answer.{ext}"))
        .await?;
    tracing::info!(
        job_id = %job_id,
        transcribe_ms = started.elapsed().as_millis() as u64,
        audio_duration_ms = transcript.duration_ms.unwrap_or(-1),
        "Transcription complete"
    );
    Ok(transcript)
}
