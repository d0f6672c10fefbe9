use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// Result of a transcription.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Transcription {
    /// Combined text output.
    pub text: String,
    /// Detected or hinted language code.
    #[serde(default)]
    pub language: Option<String>,
    /// Audio duration in seconds, when the provider reports it.
    #[serde(default)]
    pub duration: Option<f32>,
}

/// Speech-to-text provider. Takes raw audio bytes, returns a transcription
/// or an error; the caller degrades to an apology reply on failure.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        audio: &[u8],
        language_hint: Option<&str>,
    ) -> anyhow::Result<Transcription>;
}

/// [`Transcriber`] backed by an HTTP whisper server.
///
/// Posts the raw audio body to `{base_url}/inference` and expects a JSON
/// response shaped like [`Transcription`].
#[derive(Clone, Debug)]
pub struct WhisperHttp {
    base_url: String,
    client: reqwest::Client,
}

impl WhisperHttp {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Transcriber for WhisperHttp {
    async fn transcribe(
        &self,
        audio: &[u8],
        language_hint: Option<&str>,
    ) -> anyhow::Result<Transcription> {
        let url = format!("{}/inference", self.base_url.trim_end_matches('/'));
        let mut req = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(audio.to_vec());
        if let Some(lang) = language_hint {
            req = req.query(&[("language", lang)]);
        }
        let resp = req.send().await?.error_for_status()?;
        let transcription: Transcription = resp.json().await?;
        debug!(
            chars = transcription.text.len(),
            language = transcription.language.as_deref().unwrap_or("unknown"),
            "audio transcribed"
        );
        Ok(transcription)
    }
}
