use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client-facing status of an evaluation across the queue and the store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EvalStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

/// Where the answer content lives. Audio captured through the multipart
/// upload path is encrypted at rest and referenced by storage key;
/// caller-hosted audio stays a plain URL fetched at processing time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseSource {
    Text { body: String },
    StoredAudio { key: String },
    RemoteAudio { url: String },
}

/// JSON submission body for `POST /api/v1/evaluate`.
///
/// `request_id` is the idempotency key for the whole pipeline: the same
/// logical submission must reuse the same id on every retry.
#[derive(Debug, Deserialize, Validate)]
pub struct EvaluateRequest {
    #[garde(skip)]
    pub request_id: Uuid,

    #[garde(length(min = 1, max = 20000))]
    pub text: Option<String>,

    #[garde(length(min = 1, max = 2000))]
    pub audio_url: Option<String>,

    /// Opaque pass-through (question, content pack, evaluation ids).
    /// Stored alongside the result, never interpreted here.
    #[garde(skip)]
    pub metadata: Option<serde_json::Value>,
}

impl EvaluateRequest {
    /// Exactly one response modality must be present.
    pub fn source(&self) -> Result<ResponseSource, &'static str> {
        match (&self.text, &self.audio_url) {
            (Some(_), Some(_)) => Err("provide exactly one of text or audio_url"),
            (None, None) => Err("one of text or audio_url is required"),
            (Some(text), None) => Ok(ResponseSource::Text { body: text.clone() }),
            (None, Some(url)) => {
                if url.starts_with("http://") || url.starts_with("https://") {
                    Ok(ResponseSource::RemoteAudio { url: url.clone() })
                } else {
                    Err("audio_url must be an http(s) URL")
                }
            }
        }
    }
}

/// Structured scoring output from the LLM, validated before anything is
/// persisted. An out-of-range score is a hard failure, never clamped.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ScoreCard {
    #[garde(range(min = 0, max = 100))]
    pub score: i32,

    #[garde(length(min = 1))]
    pub feedback: String,

    #[garde(skip)]
    pub what_changed: String,

    #[garde(skip)]
    pub practice_rule: String,
}

/// A persisted evaluation outcome. Immutable once written; at most one
/// row ever exists per request id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub request_id: Uuid,
    pub job_id: Uuid,
    pub score: i32,
    pub feedback: String,
    pub what_changed: String,
    pub practice_rule: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<String>,
    pub duration_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// Response body for the submission endpoint. Every branch carries the
/// identifier pair so a client can always resume polling.
#[derive(Debug, Serialize)]
pub struct EvaluateResponse {
    pub job_id: Uuid,
    pub request_id: Uuid,
    pub status: EvalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<EvaluationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_url: Option<String>,
}

/// Response body for the status endpoint.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub job_id: Uuid,
    pub request_id: Uuid,
    pub status: EvalStatus,
    pub result: Option<EvaluationResult>,
    pub error: Option<String>,
    pub poll_after_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(text: Option<&str>, audio_url: Option<&str>) -> EvaluateRequest {
        EvaluateRequest {
            request_id: Uuid::new_v4(),
            text: text.map(String::from),
            audio_url: audio_url.map(String::from),
            metadata: None,
        }
    }

    #[test]
    fn text_submission_resolves_to_text_source() {
        let source = request(Some("my answer"), None).source().unwrap();
        assert_eq!(
            source,
            ResponseSource::Text {
                body: "my answer".into()
            }
        );
    }

    #[test]
    fn audio_url_must_be_http() {
        let req = request(None, Some("https://cdn.example.com/a.webm"));
        assert!(matches!(
            req.source().unwrap(),
            ResponseSource::RemoteAudio { .. }
        ));

        let req = request(None, Some("ftp://cdn.example.com/a.webm"));
        assert!(req.source().is_err());
    }

    #[test]
    fn both_modalities_rejected() {
        let req = request(Some("answer"), Some("https://cdn.example.com/a.webm"));
        assert!(req.source().is_err());
    }

    #[test]
    fn neither_modality_rejected() {
        assert!(request(None, None).source().is_err());
    }

    #[test]
    fn score_out_of_range_fails_validation() {
        let card = ScoreCard {
            score: 150,
            feedback: "solid".into(),
            what_changed: "n/a".into(),
            practice_rule: "n/a".into(),
        };
        assert!(card.validate().is_err());
    }

    #[test]
    fn empty_feedback_fails_validation() {
        let card = ScoreCard {
            score: 80,
            feedback: String::new(),
            what_changed: "n/a".into(),
            practice_rule: "n/a".into(),
        };
        assert!(card.validate().is_err());
    }

    #[test]
    fn missing_feedback_fails_deserialization() {
        let raw = serde_json::json!({
            "score": 80,
            "what_changed": "tighter structure",
            "practice_rule": "lead with the outcome"
        });
        assert!(serde_json::from_value::<ScoreCard>(raw).is_err());
    }

    #[test]
    fn response_source_wire_format_is_tagged() {
        let source = ResponseSource::StoredAudio {
            key: "audio/abc.enc".into(),
        };
        let raw = serde_json::to_value(&source).unwrap();
        assert_eq!(raw["kind"], "stored_audio");
        assert_eq!(raw["key"], "audio/abc.enc");
    }
}
