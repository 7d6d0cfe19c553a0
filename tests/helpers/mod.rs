//! Shared helpers for the integration and e2e suites.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Explicit polling bounds for e2e scenarios; keep these generous
/// enough for a cold worker plus one model call.
pub const POLL_MAX_ATTEMPTS: u32 = 40;
pub const POLL_INTERVAL_MS: u64 = 3000;

#[derive(Serialize)]
struct Claims {
    sub: String,
    exp: u64,
}

/// Mint a bearer token the API server will accept.
pub fn make_token(secret: &str, user_id: &str) -> String {
    let exp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
        + 3600;
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &Claims {
            sub: user_id.to_string(),
            exp,
        },
        &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("Failed to encode test JWT")
}

#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    pub job_id: uuid::Uuid,
    pub request_id: uuid::Uuid,
    pub status: String,
    pub result: Option<serde_json::Value>,
    pub poll_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub job_id: uuid::Uuid,
    pub request_id: uuid::Uuid,
    pub status: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub poll_after_ms: u64,
}

/// Submit a text answer and return the raw HTTP status plus parsed body.
pub async fn submit_text(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
    request_id: uuid::Uuid,
    text: &str,
) -> Result<(reqwest::StatusCode, SubmitBody), reqwest::Error> {
    let response = client
        .post(format!("{base_url}/api/v1/evaluate"))
        .bearer_auth(token)
        .json(&serde_json::json!({
            "request_id": request_id,
            "text": text,
        }))
        .send()
        .await?;
    let status = response.status();
    let body = response.json::<SubmitBody>().await?;
    Ok((status, body))
}

/// Fetch the status of a job once.
pub async fn fetch_status(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
    job_id: uuid::Uuid,
) -> Result<(reqwest::StatusCode, Option<StatusBody>), reqwest::Error> {
    let response = client
        .get(format!("{base_url}/api/v1/evaluate/{job_id}/status"))
        .bearer_auth(token)
        .send()
        .await?;
    let status = response.status();
    if status.is_success() {
        let body = response.json::<StatusBody>().await?;
        Ok((status, Some(body)))
    } else {
        Ok((status, None))
    }
}

/// Poll the status endpoint until the evaluation reaches a terminal
/// state, up to the configured attempt bound.
pub async fn wait_for_terminal_status(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
    job_id: uuid::Uuid,
) -> StatusBody {
    for _ in 0..POLL_MAX_ATTEMPTS {
        let (http_status, body) = fetch_status(client, base_url, token, job_id)
            .await
            .expect("status request failed");
        assert!(
            http_status.is_success(),
            "status endpoint returned {http_status}"
        );
        let body = body.unwrap();
        if body.status == "completed" || body.status == "failed" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
    }
    panic!("job {job_id} did not reach a terminal state in time");
}
