use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use uuid::Uuid;

use crate::models::evaluation::ResponseSource;
use crate::models::job::{JobHandle, JobStatus};

const PENDING_KEY: &str = "drill_eval:pending";
const PROCESSING_KEY: &str = "drill_eval:processing";
const DELAYED_KEY: &str = "drill_eval:delayed";

/// Max delayed jobs promoted per worker loop iteration.
const PROMOTE_BATCH: isize = 16;

fn job_key(job_id: Uuid) -> String {
    format!("drill_eval:job:{job_id}")
}

/// Job payload serialized into the per-job Redis hash. The job id is the
/// caller's request id, so duplicate submissions collapse onto one record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedEvaluation {
    pub request_id: Uuid,
    pub user_id: Option<String>,
    pub source: ResponseSource,
    pub metadata: Option<serde_json::Value>,
}

/// Outcome of an idempotent enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new job record was created and pushed to the pending list.
    Enqueued,
    /// A record already exists under this id; nothing was pushed.
    Duplicate,
}

/// What the queue decided to do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    Retry { attempts: u32, delay_ms: u64 },
    Terminal { attempts: u32 },
}

/// Redis-backed evaluation job queue.
///
/// Delivery is at-least-once: a job popped to the processing list that
/// never gets marked completed or failed will be re-delivered by
/// operational tooling, and consumers guard with the result store.
/// Enqueue deduplicates on job id; failed attempts are re-scheduled with
/// exponential backoff up to a bounded attempt count; terminal records
/// are retained for a configurable window, not indefinitely.
pub struct JobQueue {
    client: redis::Client,
    max_attempts: u32,
    backoff_base_ms: u64,
    retention_secs: i64,
    wait_poll_ms: u64,
}

impl JobQueue {
    pub fn new(
        redis_url: &str,
        max_attempts: u32,
        backoff_base_ms: u64,
        retention_secs: i64,
        wait_poll_ms: u64,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            max_attempts: max_attempts.max(1),
            backoff_base_ms,
            retention_secs,
            wait_poll_ms: wait_poll_ms.max(50),
        })
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }

    /// Idempotent enqueue: the first write under a job id wins, later
    /// calls leave the existing record and its execution untouched.
    pub async fn enqueue(&self, job: &QueuedEvaluation) -> Result<EnqueueOutcome, QueueError> {
        let mut conn = self.conn().await?;
        let key = job_key(job.request_id);
        let payload = serde_json::to_string(job).map_err(QueueError::Serialize)?;

        // HSETNX on the payload field is the dedup gate.
        let created: bool = conn
            .hset_nx(&key, "payload", &payload)
            .await
            .map_err(QueueError::Redis)?;
        if !created {
            return Ok(EnqueueOutcome::Duplicate);
        }

        conn.hset_multiple::<_, _, _, ()>(
            &key,
            &[
                ("status", JobStatus::Queued.to_string()),
                ("attempts", "0".to_string()),
                ("created_at", chrono::Utc::now().to_rfc3339()),
            ],
        )
        .await
        .map_err(QueueError::Redis)?;

        conn.lpush::<_, _, ()>(PENDING_KEY, job.request_id.to_string())
            .await
            .map_err(QueueError::Redis)?;

        Ok(EnqueueOutcome::Enqueued)
    }

    /// Reset a job that recorded a terminal failure on a previous attempt
    /// and push it again as a fresh execution under the same id.
    pub async fn requeue(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let key = job_key(job_id);

        conn.hset_multiple::<_, _, _, ()>(
            &key,
            &[
                ("status", JobStatus::Queued.to_string()),
                ("attempts", "0".to_string()),
            ],
        )
        .await
        .map_err(QueueError::Redis)?;
        conn.hdel::<_, _, ()>(&key, "failed_reason")
            .await
            .map_err(QueueError::Redis)?;
        // Clear the failure-retention TTL; the record is live again.
        conn.persist::<_, ()>(&key).await.map_err(QueueError::Redis)?;

        conn.lpush::<_, _, ()>(PENDING_KEY, job_id.to_string())
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Look up a job's queue record.
    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<JobHandle>, QueueError> {
        let mut conn = self.conn().await?;
        let map: HashMap<String, String> = conn
            .hgetall(job_key(job_id))
            .await
            .map_err(QueueError::Redis)?;
        if map.is_empty() {
            return Ok(None);
        }

        let status = map
            .get("status")
            .and_then(|s| s.parse::<JobStatus>().ok())
            .unwrap_or(JobStatus::Queued);
        let attempts = map
            .get("attempts")
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(0);

        Ok(Some(JobHandle {
            job_id,
            status,
            attempts,
            failed_reason: map.get("failed_reason").cloned(),
        }))
    }

    /// Block up to `timeout` for the job to reach a terminal state.
    ///
    /// Timing out is a distinguishable error, never a silent stale
    /// answer, so callers can fall back to the async poll contract.
    pub async fn wait_until_finished(
        &self,
        job_id: Uuid,
        timeout: Duration,
    ) -> Result<(), QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.get_job(job_id).await? {
                None => return Err(QueueError::JobMissing(job_id)),
                Some(handle) => match handle.status {
                    JobStatus::Completed => return Ok(()),
                    JobStatus::Failed => {
                        return Err(QueueError::JobFailed(
                            handle
                                .failed_reason
                                .unwrap_or_else(|| "unknown failure".to_string()),
                        ))
                    }
                    JobStatus::Queued | JobStatus::Active => {}
                },
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(QueueError::WaitTimeout);
            }
            sleep(Duration::from_millis(self.wait_poll_ms)).await;
        }
    }

    /// Move jobs whose retry backoff has elapsed back to the pending
    /// list. Returns the number promoted.
    pub async fn promote_due(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn().await?;
        let due: Vec<String> = conn
            .zrangebyscore_limit(DELAYED_KEY, 0u64, now_ms(), 0, PROMOTE_BATCH)
            .await
            .map_err(QueueError::Redis)?;

        let mut promoted = 0;
        for id in due {
            // ZREM is the claim: only the caller that removed the member
            // pushes it, so concurrent workers cannot double-promote.
            let removed: i64 = conn.zrem(DELAYED_KEY, &id).await.map_err(QueueError::Redis)?;
            if removed == 1 {
                conn.lpush::<_, _, ()>(PENDING_KEY, &id)
                    .await
                    .map_err(QueueError::Redis)?;
                promoted += 1;
            }
        }
        Ok(promoted)
    }

    /// Pop the next pending job, moving it to the processing list and
    /// marking its record active.
    pub async fn dequeue(&self) -> Result<Option<(Uuid, QueuedEvaluation)>, QueueError> {
        let mut conn = self.conn().await?;
        let id: Option<String> = conn
            .rpoplpush(PENDING_KEY, PROCESSING_KEY)
            .await
            .map_err(QueueError::Redis)?;
        let Some(id) = id else { return Ok(None) };

        let job_id = Uuid::parse_str(&id).map_err(|_| QueueError::Corrupt(id.clone()))?;
        let payload: Option<String> = conn
            .hget(job_key(job_id), "payload")
            .await
            .map_err(QueueError::Redis)?;

        match payload {
            Some(raw) => {
                let job: QueuedEvaluation =
                    serde_json::from_str(&raw).map_err(QueueError::Serialize)?;
                conn.hset::<_, _, _, ()>(job_key(job_id), "status", JobStatus::Active.to_string())
                    .await
                    .map_err(QueueError::Redis)?;
                Ok(Some((job_id, job)))
            }
            None => {
                // Record expired or was never written; drop the orphan.
                conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &id)
                    .await
                    .map_err(QueueError::Redis)?;
                Ok(None)
            }
        }
    }

    /// Record terminal success. The job record is retired after the
    /// retention window.
    pub async fn mark_completed(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let key = job_key(job_id);
        conn.hset::<_, _, _, ()>(&key, "status", JobStatus::Completed.to_string())
            .await
            .map_err(QueueError::Redis)?;
        conn.expire::<_, ()>(&key, self.retention_secs)
            .await
            .map_err(QueueError::Redis)?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, job_id.to_string())
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Record a failed attempt: schedules a backoff retry, or records a
    /// terminal failure once attempts are exhausted.
    pub async fn record_failure(
        &self,
        job_id: Uuid,
        reason: &str,
    ) -> Result<FailureDisposition, QueueError> {
        let mut conn = self.conn().await?;
        let key = job_key(job_id);

        let attempts: i64 = conn
            .hincr(&key, "attempts", 1)
            .await
            .map_err(QueueError::Redis)?;
        let attempts = attempts.max(0) as u32;

        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, job_id.to_string())
            .await
            .map_err(QueueError::Redis)?;

        if attempts >= self.max_attempts {
            conn.hset_multiple::<_, _, _, ()>(
                &key,
                &[
                    ("status", JobStatus::Failed.to_string()),
                    ("failed_reason", reason.to_string()),
                ],
            )
            .await
            .map_err(QueueError::Redis)?;
            conn.expire::<_, ()>(&key, self.retention_secs)
                .await
                .map_err(QueueError::Redis)?;
            Ok(FailureDisposition::Terminal { attempts })
        } else {
            let delay_ms = backoff_ms(self.backoff_base_ms, attempts);
            conn.hset::<_, _, _, ()>(&key, "status", JobStatus::Queued.to_string())
                .await
                .map_err(QueueError::Redis)?;
            conn.zadd::<_, _, _, ()>(DELAYED_KEY, job_id.to_string(), now_ms() + delay_ms)
                .await
                .map_err(QueueError::Redis)?;
            Ok(FailureDisposition::Retry { attempts, delay_ms })
        }
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Current number of pending jobs.
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn().await?;
        let depth: u64 = conn.llen(PENDING_KEY).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }
}

/// Exponential backoff: base, 2*base, 4*base, ... for attempts 1, 2, 3.
fn backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    let shift = attempt.saturating_sub(1).min(16);
    base_ms.saturating_mul(1u64 << shift)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("timed out waiting for job completion")]
    WaitTimeout,

    #[error("job failed: {0}")]
    JobFailed(String),

    #[error("job {0} has no queue record")]
    JobMissing(Uuid),

    #[error("corrupt queue entry: {0}")]
    Corrupt(String),
}
