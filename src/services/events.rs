use std::time::Duration;

use reqwest::Client;
use serde_json::json;
use uuid::Uuid;

/// Best-effort analytics sink.
///
/// Every event becomes a metrics counter and a structured log line;
/// when a webhook endpoint is configured the event is also POSTed from
/// a detached task. Delivery failures are logged and never reach the
/// job outcome.
pub struct Analytics {
    http: Client,
    endpoint: Option<String>,
}

impl Analytics {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint,
        }
    }

    pub fn capture(
        &self,
        event: &'static str,
        job_id: Uuid,
        user_id: Option<String>,
        properties: serde_json::Value,
    ) {
        metrics::counter!("evaluation_events_total", "event" => event).increment(1);
        tracing::info!(
            event,
            job_id = %job_id,
            user_id = user_id.as_deref().unwrap_or("-"),
            "analytics event"
        );

        let Some(endpoint) = self.endpoint.clone() else {
            return;
        };
        let http = self.http.clone();
        tokio::spawn(async move {
            let body = json!({
                "event": event,
                "job_id": job_id,
                "user_id": user_id,
                "properties": properties,
            });
            let sent = http
                .post(&endpoint)
                .timeout(Duration::from_secs(5))
                .json(&body)
                .send()
                .await;
            if let Err(e) = sent {
                tracing::warn!(error = %e, event, "analytics delivery failed");
            }
        });
    }
}
