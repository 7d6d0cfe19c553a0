use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Unused by the worker.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the job queue
    pub redis_url: String,

    /// HS256 secret used to verify caller session tokens
    pub jwt_secret: String,

    /// API key for the scoring/transcription provider
    pub openai_api_key: String,

    /// Base URL of the OpenAI-compatible API
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,

    /// Chat model used for scoring
    #[serde(default = "default_scoring_model")]
    pub scoring_model: String,

    /// Speech-to-text model used for audio submissions
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,

    /// Object storage bucket holding uploaded answer audio
    pub audio_bucket: String,

    /// S3-compatible endpoint URL for the audio bucket
    pub audio_endpoint: String,

    /// Access key ID for the audio bucket
    pub audio_access_key: String,

    /// Secret access key for the audio bucket
    pub audio_secret_key: String,

    /// AES-256-GCM key for audio at rest (base64-encoded, 32 bytes)
    pub audio_encryption_key: String,

    /// How long the submission endpoint waits for the job to finish
    /// before degrading to a 202 + poll URL
    #[serde(default = "default_sync_wait_ms")]
    pub sync_wait_ms: u64,

    /// Interval between job-state polls inside the synchronous wait
    #[serde(default = "default_wait_poll_ms")]
    pub wait_poll_ms: u64,

    /// Attempts per job before a failure becomes terminal
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base of the exponential retry backoff (doubles per attempt)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// How long terminal job records stay visible in the queue
    #[serde(default = "default_job_retention_secs")]
    pub job_retention_secs: i64,

    /// Poll-interval hint returned to clients while a job is pending
    #[serde(default = "default_poll_after_ms")]
    pub poll_after_ms: u64,

    /// Scoring calls per minute; 0 disables pacing
    #[serde(default = "default_scoring_rpm")]
    pub scoring_rpm: u32,

    /// Optional webhook receiving analytics events
    #[serde(default)]
    pub analytics_url: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_scoring_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

fn default_sync_wait_ms() -> u64 {
    25_000
}

fn default_wait_poll_ms() -> u64 {
    250
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1_000
}

fn default_job_retention_secs() -> i64 {
    3_600
}

fn default_poll_after_ms() -> u64 {
    3_000
}

fn default_scoring_rpm() -> u32 {
    60
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}
