use std::time::Duration;

use async_trait::async_trait;
use garde::Validate;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::models::evaluation::ScoreCard;

/// A scored answer plus usage accounting from the model call.
#[derive(Debug, Clone)]
pub struct ScoredAnswer {
    pub card: ScoreCard,
    pub tokens_used: Option<i32>,
}

/// Contract for the LLM scoring backend. The worker depends on this
/// trait so tests can substitute a fake.
#[async_trait]
pub trait Scorer: Send + Sync {
    /// Score a candidate answer. `context` is the submission's opaque
    /// metadata, passed through to the prompt verbatim.
    async fn score(
        &self,
        answer: &str,
        context: Option<&serde_json::Value>,
    ) -> Result<ScoredAnswer, ScoringError>;
}

/// Chat-completions scorer with a fixed structured-output schema.
pub struct GptScorer {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: i32,
}

impl GptScorer {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl Scorer for GptScorer {
    async fn score(
        &self,
        answer: &str,
        context: Option<&serde_json::Value>,
    ) -> Result<ScoredAnswer, ScoringError> {
        let url = format!("{}/chat/completions", self.base_url);

        let system = concat!(
            "You are an interview coach scoring a candidate's practice answer. ",
            "Return ONLY a JSON object with these exact fields: ",
            "score (integer 0-100), feedback (specific coaching feedback), ",
            "what_changed (what shifted versus a typical earlier attempt), ",
            "practice_rule (one concrete rule to drill next time)."
        );

        let mut user_prompt = String::new();
        if let Some(ctx) = context {
            user_prompt.push_str("Context:\n");
            user_prompt.push_str(&ctx.to_string());
            user_prompt.push_str("\n\n");
        }
        user_prompt.push_str("Candidate answer:\n");
        user_prompt.push_str(answer);

        let request_body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user_prompt}
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "evaluation_score",
                    "strict": true,
                    "schema": {
                        "type": "object",
                        "properties": {
                            "score": {"type": "integer"},
                            "feedback": {"type": "string"},
                            "what_changed": {"type": "string"},
                            "practice_rule": {"type": "string"}
                        },
                        "required": ["score", "feedback", "what_changed", "practice_rule"],
                        "additionalProperties": false
                    }
                }
            },
            "temperature": 0.2
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(ScoringError::Http)?;

        if !response.status().is_success() {
            return Err(ScoringError::Api(response.status().as_u16()));
        }

        let chat: ChatResponse = response.json().await.map_err(ScoringError::Http)?;
        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or(ScoringError::EmptyResponse)?;

        let card = parse_score_card(content)?;
        Ok(ScoredAnswer {
            card,
            tokens_used: chat.usage.map(|u| u.total_tokens),
        })
    }
}

/// Parse and validate model output against the fixed result schema.
/// A malformed or out-of-range card is a hard failure, never coerced.
pub fn parse_score_card(content: &str) -> Result<ScoreCard, ScoringError> {
    let card: ScoreCard = serde_json::from_str(content).map_err(ScoringError::Parse)?;
    card.validate()
        .map_err(|e| ScoringError::SchemaViolation(e.to_string()))?;
    Ok(card)
}

/// Paces scoring calls to a configured requests-per-minute budget.
/// A zero budget disables pacing.
pub struct RateGate {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn from_rpm(rpm: u32) -> Self {
        let min_interval = if rpm == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(60_000 / u64::from(rpm))
        };
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    /// Wait until the next call is allowed, then reserve the slot.
    pub async fn acquire(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let next_allowed = prev + self.min_interval;
            let now = Instant::now();
            if next_allowed > now {
                tokio::time::sleep(next_allowed - now).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Scoring API returned status {0}")]
    Api(u16),

    #[error("Scoring API returned no choices")]
    EmptyResponse,

    #[error("Failed to parse scoring output: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Scoring output violates result schema: {0}")]
    SchemaViolation(String),
}
