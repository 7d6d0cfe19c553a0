//! Submission orchestrator and status endpoint.
//!
//! The submission path is hybrid sync/async: validate, short-circuit on
//! a persisted result, enqueue, then wait a bounded interval for the
//! worker. When the wait times out (expected under load) the client
//! gets a 202 with a poll URL; the status endpoint serves the rest of
//! the contract.

use axum::extract::{FromRequest, Multipart, Path, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use garde::Validate;
use std::time::Duration;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::results;
use crate::models::evaluation::{
    EvalStatus, EvaluateRequest, EvaluateResponse, EvaluationResult, ResponseSource,
    StatusResponse,
};
use crate::models::job::{JobHandle, JobStatus};
use crate::routes::ApiError;
use crate::services::auth::AuthedUser;
use crate::services::queue::{QueueError, QueuedEvaluation};
use crate::services::storage::AudioStore;
use crate::services::transcription::sniff_audio_format;

fn poll_url(job_id: Uuid) -> String {
    format!("/api/v1/evaluate/{job_id}/status")
}

fn internal(e: impl std::fmt::Display) -> ApiError {
    tracing::error!(error = %e, "internal error in evaluate route");
    ApiError::Internal
}

/// A parsed, validated submission with its audio already persisted.
struct Submission {
    request_id: Uuid,
    source: ResponseSource,
    metadata: Option<serde_json::Value>,
}

/// POST /api/v1/evaluate — submit an answer for evaluation.
pub async fn submit_evaluation(
    State(state): State<AppState>,
    user: AuthedUser,
    request: Request,
) -> Result<Response, ApiError> {
    let submission = parse_submission(&state, request).await?;
    let request_id = submission.request_id;
    metrics::counter!("evaluation_jobs_total").increment(1);

    // Idempotency short-circuit: a persisted result is final, so a
    // retried or double-clicked submission never re-bills the model.
    if let Some(existing) = results::get_by_request_id(&state.db, request_id)
        .await
        .map_err(internal)?
    {
        return Ok(completed_response(existing));
    }

    let job = QueuedEvaluation {
        request_id,
        user_id: Some(user.user_id),
        source: submission.source,
        metadata: submission.metadata,
    };
    state.queue.enqueue(&job).await.map_err(internal)?;

    match state.queue.get_job(request_id).await {
        Ok(None) => {
            // The record is already gone (consumed and retired before we
            // looked). Re-check the store before conceding to polling.
            match results::get_by_request_id(&state.db, request_id)
                .await
                .map_err(internal)?
            {
                Some(existing) => Ok(completed_response(existing)),
                None => Ok(accepted(request_id, EvalStatus::Queued)),
            }
        }
        Ok(Some(handle)) if handle.is_stale_failure() => {
            // A dead handle from an earlier run; waiting on it would
            // resolve instantly to the stale failure. Start fresh.
            tracing::info!(job_id = %request_id, "clearing stale failed handle, re-enqueueing");
            state.queue.requeue(request_id).await.map_err(internal)?;
            Ok(accepted(request_id, EvalStatus::Queued))
        }
        Ok(Some(_)) => wait_for_outcome(&state, request_id).await,
        Err(e) => Err(internal(e)),
    }
}

/// Bounded synchronous wait, then the fallback ladder.
async fn wait_for_outcome(state: &AppState, job_id: Uuid) -> Result<Response, ApiError> {
    let timeout = Duration::from_millis(state.config.sync_wait_ms);

    match state.queue.wait_until_finished(job_id, timeout).await {
        Ok(()) => {
            // Serve the durable row, never the queue's in-flight view.
            // If the write hasn't landed yet, degrade to polling rather
            // than fabricating a result.
            match results::get_by_request_id(&state.db, job_id)
                .await
                .map_err(internal)?
            {
                Some(result) => Ok(completed_response(result)),
                None => Ok(accepted(job_id, EvalStatus::Processing)),
            }
        }
        Err(QueueError::WaitTimeout) | Err(QueueError::JobMissing(_)) => {
            // Expected under load; the client resumes via the poll URL.
            match results::get_by_request_id(&state.db, job_id)
                .await
                .map_err(internal)?
            {
                Some(result) => Ok(completed_response(result)),
                None => Ok(accepted(job_id, EvalStatus::Processing)),
            }
        }
        Err(QueueError::JobFailed(reason)) => {
            // One more store check: a retry may have landed a result
            // after this attempt's failure was recorded.
            if let Some(result) = results::get_by_request_id(&state.db, job_id)
                .await
                .map_err(internal)?
            {
                return Ok(completed_response(result));
            }
            tracing::warn!(job_id = %job_id, reason = %reason, "evaluation failed within sync window");
            Err(ApiError::EvaluationFailed)
        }
        Err(e) => Err(internal(e)),
    }
}

/// GET /api/v1/evaluate/{job_id}/status — polling contract.
pub async fn get_evaluation_status(
    State(state): State<AppState>,
    _user: AuthedUser,
    Path(job_id): Path<Uuid>,
) -> Result<Json<StatusResponse>, ApiError> {
    // The store is authoritative: once a row exists the result is final
    // regardless of what the queue still says.
    if let Some(result) = results::get_by_job_id(&state.db, job_id)
        .await
        .map_err(internal)?
    {
        return Ok(Json(resolved_view(result)));
    }

    let handle = match state.queue.get_job(job_id).await {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!(job_id = %job_id, error = %e, "queue unreachable during status lookup");
            None
        }
    };

    match handle {
        Some(handle) => Ok(Json(pending_view(
            job_id,
            &handle,
            state.config.poll_after_ms,
        ))),
        None => Err(ApiError::NotFound),
    }
}

fn completed_response(result: EvaluationResult) -> Response {
    let body = EvaluateResponse {
        job_id: result.job_id,
        request_id: result.request_id,
        status: EvalStatus::Completed,
        result: Some(result),
        poll_url: None,
    };
    (StatusCode::OK, Json(body)).into_response()
}

fn accepted(job_id: Uuid, status: EvalStatus) -> Response {
    let body = EvaluateResponse {
        job_id,
        request_id: job_id,
        status,
        result: None,
        poll_url: Some(poll_url(job_id)),
    };
    (StatusCode::ACCEPTED, Json(body)).into_response()
}

/// Map a queue-side handle to the client-facing status contract.
/// A queue-completed job without a durable row reports `processing`,
/// never a fabricated result.
fn pending_view(job_id: Uuid, handle: &JobHandle, poll_after_ms: u64) -> StatusResponse {
    let (status, error) = match handle.status {
        JobStatus::Queued => (EvalStatus::Queued, None),
        JobStatus::Active => (EvalStatus::Processing, None),
        JobStatus::Completed => (EvalStatus::Processing, None),
        JobStatus::Failed => (EvalStatus::Failed, Some("evaluation_failed".to_string())),
    };
    StatusResponse {
        job_id,
        request_id: job_id,
        status,
        result: None,
        error,
        poll_after_ms,
    }
}

fn resolved_view(result: EvaluationResult) -> StatusResponse {
    StatusResponse {
        job_id: result.job_id,
        request_id: result.request_id,
        status: EvalStatus::Completed,
        result: Some(result),
        error: None,
        poll_after_ms: 0,
    }
}

/// Parse either a direct-JSON text submission or a multipart audio
/// upload. Validation failures reject before any queue interaction.
async fn parse_submission(state: &AppState, request: Request) -> Result<Submission, ApiError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string();

    if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(request, state)
            .await
            .map_err(|_| ApiError::BadRequest("malformed multipart body".into()))?;
        parse_multipart(state, multipart).await
    } else {
        let Json(body) = Json::<EvaluateRequest>::from_request(request, state)
            .await
            .map_err(|_| ApiError::BadRequest("malformed JSON body".into()))?;
        body.validate()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        let source = body
            .source()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        Ok(Submission {
            request_id: body.request_id,
            source,
            metadata: body.metadata,
        })
    }
}

async fn parse_multipart(
    state: &AppState,
    mut multipart: Multipart,
) -> Result<Submission, ApiError> {
    let mut request_id: Option<Uuid> = None;
    let mut audio: Option<Vec<u8>> = None;
    let mut metadata: Option<serde_json::Value> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::BadRequest("malformed multipart body".into()))?
    {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("request_id") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|_| ApiError::BadRequest("unreadable request_id field".into()))?;
                let parsed = raw
                    .trim()
                    .parse()
                    .map_err(|_| ApiError::BadRequest("request_id must be a UUID".into()))?;
                request_id = Some(parsed);
            }
            Some("audio") => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|_| ApiError::BadRequest("unreadable audio field".into()))?;
                if sniff_audio_format(&data).is_none() {
                    return Err(ApiError::UnsupportedMedia);
                }
                audio = Some(data.to_vec());
            }
            Some("metadata") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|_| ApiError::BadRequest("unreadable metadata field".into()))?;
                let parsed = serde_json::from_str(&raw)
                    .map_err(|_| ApiError::BadRequest("metadata must be valid JSON".into()))?;
                metadata = Some(parsed);
            }
            _ => {}
        }
    }

    let request_id =
        request_id.ok_or_else(|| ApiError::BadRequest("request_id field is required".into()))?;
    let audio = audio.ok_or_else(|| ApiError::BadRequest("audio file field is required".into()))?;

    // Persist the blob before enqueueing so the worker can always reach
    // it under the derived key.
    let key = AudioStore::audio_object_key(request_id);
    state.storage.store_audio(&key, &audio).await.map_err(|e| {
        tracing::error!(error = %e, request_id = %request_id, "audio upload failed");
        ApiError::Internal
    })?;

    Ok(Submission {
        request_id,
        source: ResponseSource::StoredAudio { key },
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn handle(status: JobStatus) -> JobHandle {
        JobHandle {
            job_id: Uuid::new_v4(),
            status,
            attempts: 1,
            failed_reason: (status == JobStatus::Failed).then(|| "scoring blew up".to_string()),
        }
    }

    fn stored_result() -> EvaluationResult {
        let id = Uuid::new_v4();
        EvaluationResult {
            request_id: id,
            job_id: id,
            score: 84,
            feedback: "Clear answer.".into(),
            what_changed: "Less hedging.".into(),
            practice_rule: "Quantify the impact.".into(),
            transcription: None,
            duration_ms: 2100,
            tokens_used: Some(512),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn queued_handle_maps_to_queued_with_poll_hint() {
        let view = pending_view(Uuid::new_v4(), &handle(JobStatus::Queued), 3000);
        assert_eq!(view.status, EvalStatus::Queued);
        assert_eq!(view.poll_after_ms, 3000);
        assert!(view.result.is_none());
    }

    #[test]
    fn active_handle_maps_to_processing() {
        let view = pending_view(Uuid::new_v4(), &handle(JobStatus::Active), 3000);
        assert_eq!(view.status, EvalStatus::Processing);
    }

    #[test]
    fn queue_completed_without_durable_row_is_still_processing() {
        // The worker reported completion but the store read came first;
        // the contract forbids synthesizing a result here.
        let view = pending_view(Uuid::new_v4(), &handle(JobStatus::Completed), 3000);
        assert_eq!(view.status, EvalStatus::Processing);
        assert!(view.result.is_none());
    }

    #[test]
    fn failed_handle_reports_generic_error_code() {
        let view = pending_view(Uuid::new_v4(), &handle(JobStatus::Failed), 3000);
        assert_eq!(view.status, EvalStatus::Failed);
        // Internal failure text must not leak.
        assert_eq!(view.error.as_deref(), Some("evaluation_failed"));
    }

    #[test]
    fn resolved_view_stops_polling() {
        let view = resolved_view(stored_result());
        assert_eq!(view.status, EvalStatus::Completed);
        assert_eq!(view.poll_after_ms, 0);
        assert!(view.result.is_some());
    }

    #[test]
    fn poll_url_references_the_job() {
        let id = Uuid::new_v4();
        assert_eq!(poll_url(id), format!("/api/v1/evaluate/{id}/status"));
    }
}
