//! Evaluation result store.
//!
//! The single writer is the worker; the orchestrator and the status
//! endpoint only read. Rows are keyed on `request_id` and immutable
//! once inserted, which is what makes worker retries and duplicate
//! submissions converge on one result.

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::evaluation::EvaluationResult;

const RESULT_COLUMNS: &str = "request_id, job_id, score, feedback, what_changed, \
     practice_rule, transcription, duration_ms, tokens_used, created_at";

fn row_to_result(row: &PgRow) -> Result<EvaluationResult, sqlx::Error> {
    Ok(EvaluationResult {
        request_id: row.try_get("request_id")?,
        job_id: row.try_get("job_id")?,
        score: row.try_get("score")?,
        feedback: row.try_get("feedback")?,
        what_changed: row.try_get("what_changed")?,
        practice_rule: row.try_get("practice_rule")?,
        transcription: row.try_get("transcription")?,
        duration_ms: row.try_get("duration_ms")?,
        tokens_used: row.try_get("tokens_used")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Fetch a persisted result by its idempotency key.
pub async fn get_by_request_id(
    pool: &PgPool,
    request_id: Uuid,
) -> Result<Option<EvaluationResult>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {RESULT_COLUMNS} FROM evaluation_results WHERE request_id = $1"
    ))
    .bind(request_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_result).transpose()
}

/// Fetch a persisted result by queue job id. Equal to the request id by
/// convention, but queried on its own index so a convention break cannot
/// strand status polling.
pub async fn get_by_job_id(
    pool: &PgPool,
    job_id: Uuid,
) -> Result<Option<EvaluationResult>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {RESULT_COLUMNS} FROM evaluation_results WHERE job_id = $1"
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_result).transpose()
}

/// Persist a completed result. Keyed on `request_id`: a second write
/// under the same key leaves the first row untouched, so a worker crash
/// between persist and report, or a duplicate delivery, is harmless.
pub async fn upsert(
    pool: &PgPool,
    result: &EvaluationResult,
    user_id: Option<&str>,
    metadata: Option<&serde_json::Value>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO evaluation_results
            (request_id, job_id, score, feedback, what_changed, practice_rule,
             transcription, duration_ms, tokens_used, user_id, metadata, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT (request_id) DO NOTHING
        "#,
    )
    .bind(result.request_id)
    .bind(result.job_id)
    .bind(result.score)
    .bind(&result.feedback)
    .bind(&result.what_changed)
    .bind(&result.practice_rule)
    .bind(&result.transcription)
    .bind(result.duration_ms)
    .bind(result.tokens_used)
    .bind(user_id)
    .bind(metadata.cloned())
    .bind(result.created_at)
    .execute(pool)
    .await?;

    Ok(())
}
