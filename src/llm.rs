use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, trace};

/// Common interface for chat-based language models.
///
/// Implementations collect the full completion; callers that need structured
/// output parse the returned text themselves.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Complete one system/user exchange and return the response text.
    async fn chat(&self, system: &str, user: &str) -> anyhow::Result<String>;
}

/// Chat client that calls an Ollama instance via HTTP.
#[derive(Clone, Debug)]
pub struct OllamaChat {
    /// Base URL for the Ollama server, e.g. `http://localhost:11434`.
    base_url: String,
    /// Model name such as `mistral` or `llama3`.
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

impl OllamaChat {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            temperature: 0.1,
            client: reqwest::Client::new(),
        }
    }

    /// Override the sampling temperature. Extraction wants it low, reply
    /// generation a little higher.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    async fn chat(&self, system: &str, user: &str) -> anyhow::Result<String> {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
            "stream": false,
            "options": {"temperature": self.temperature}
        });
        trace!(target: "llm", %url, body = %body, "chat request");

        let resp = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let parsed: ChatResponse = resp.json().await?;
        let content = parsed
            .message
            .map(|m| m.content)
            .unwrap_or_default();
        debug!(target: "llm", response = %content, "chat full response");
        Ok(content)
    }
}

/// Chat client returning scripted responses in order. Useful for tests.
///
/// # Examples
/// ```
/// use fieldlog::llm::{ChatModel, ScriptedChat};
/// # tokio_test::block_on(async {
/// let chat = ScriptedChat::repeating("ok");
/// assert_eq!(chat.chat("system", "user").await.unwrap(), "ok");
/// # });
/// ```
#[derive(Default)]
pub struct ScriptedChat {
    responses: std::sync::Mutex<std::collections::VecDeque<anyhow::Result<String>>>,
}

impl ScriptedChat {
    pub fn new(responses: impl IntoIterator<Item = anyhow::Result<String>>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into_iter().collect()),
        }
    }

    /// A client that always answers with `text`.
    pub fn repeating(text: impl Into<String>) -> Self {
        let text = text.into();
        let scripted = Self::default();
        scripted
            .responses
            .lock()
            .unwrap()
            .push_back(Ok(text));
        scripted
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn chat(&self, _system: &str, _user: &str) -> anyhow::Result<String> {
        let mut responses = self.responses.lock().unwrap();
        match responses.len() {
            0 => Err(anyhow::anyhow!("no scripted response left")),
            1 => {
                // Keep the last response so repeated calls stay answered.
                match responses.front().unwrap() {
                    Ok(text) => Ok(text.clone()),
                    Err(e) => Err(anyhow::anyhow!("{e}")),
                }
            }
            _ => responses.pop_front().unwrap(),
        }
    }
}
