use async_trait::async_trait;
use reqwest::multipart;
use reqwest::Client;
use serde::Deserialize;

/// Transcript text plus timing reported by the speech-to-text backend.
#[derive(Debug, Clone)]
pub struct Transcript {
    pub text: String,
    pub duration_ms: Option<i64>,
}

/// Contract for the speech-to-text backend. The worker depends on this
/// trait so tests can substitute a fake.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        audio: Vec<u8>,
        filename: &str,
    ) -> Result<Transcript, TranscriptionError>;
}

/// Whisper transcription client (OpenAI audio API).
pub struct WhisperTranscriber {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct WhisperResponse {
    text: String,
    duration: Option<f64>,
}

impl WhisperTranscriber {
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
impl Transcriber for WhisperTranscriber {
    async fn transcribe(
        &self,
        audio: Vec<u8>,
        filename: &str,
    ) -> Result<Transcript, TranscriptionError> {
        let url = format!("{}/audio/transcriptions", self.base_url);

        let part = multipart::Part::bytes(audio).file_name(filename.to_string());
        let form = multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(TranscriptionError::Http)?;

        if !response.status().is_success() {
            return Err(TranscriptionError::Api(response.status().as_u16()));
        }

        let parsed: WhisperResponse = response.json().await.map_err(TranscriptionError::Http)?;
        if parsed.text.trim().is_empty() {
            return Err(TranscriptionError::EmptyTranscript);
        }

        Ok(Transcript {
            text: parsed.text,
            duration_ms: parsed.duration.map(|secs| (secs * 1000.0) as i64),
        })
    }
}

/// Fetch caller-hosted audio bytes.
pub async fn fetch_remote_audio(http: &Client, url: &str) -> Result<Vec<u8>, TranscriptionError> {
    let response = http.get(url).send().await.map_err(TranscriptionError::Http)?;
    if !response.status().is_success() {
        return Err(TranscriptionError::Fetch(response.status().as_u16()));
    }
    let bytes = response.bytes().await.map_err(TranscriptionError::Http)?;
    if bytes.is_empty() {
        return Err(TranscriptionError::EmptyAudio);
    }
    Ok(bytes.to_vec())
}

/// Sniff common browser-recorded audio containers from magic bytes.
/// Returns the file extension used when handing the blob to Whisper.
pub fn sniff_audio_format(data: &[u8]) -> Option<&'static str> {
    if data.len() < 12 {
        return None;
    }
    if &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE" {
        return Some("wav");
    }
    if &data[0..4] == b"OggS" {
        return Some("ogg");
    }
    if &data[0..4] == [0x1A, 0x45, 0xDF, 0xA3] {
        return Some("webm");
    }
    if &data[4..8] == b"ftyp" {
        return Some("m4a");
    }
    if &data[0..3] == b"ID3" || (data[0] == 0xFF && data[1] & 0xE0 == 0xE0) {
        return Some("mp3");
    }
    None
}

#[derive(Debug, thiserror::Error)]
pub enum TranscriptionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transcription API returned status {0}")]
    Api(u16),

    #[error("Audio fetch returned status {0}")]
    Fetch(u16),

    #[error("Audio payload is empty")]
    EmptyAudio,

    #[error("Transcription returned no text")]
    EmptyTranscript,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_wav_header() {
        let mut data = b"RIFF".to_vec();
        data.extend_from_slice(&[0; 4]);
        data.extend_from_slice(b"WAVEdata");
        assert_eq!(sniff_audio_format(&data), Some("wav"));
    }

    #[test]
    fn sniffs_webm_and_ogg() {
        let mut webm = vec![0x1A, 0x45, 0xDF, 0xA3];
        webm.extend_from_slice(&[0; 16]);
        assert_eq!(sniff_audio_format(&webm), Some("webm"));

        let mut ogg = b"OggS".to_vec();
        ogg.extend_from_slice(&[0; 16]);
        assert_eq!(sniff_audio_format(&ogg), Some("ogg"));
    }

    #[test]
    fn rejects_unknown_and_short_payloads() {
        assert_eq!(sniff_audio_format(b"<html><body>nope</body>"), None);
        assert_eq!(sniff_audio_format(b"RIFF"), None);
    }
}
