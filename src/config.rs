use std::path::{Path, PathBuf};

use serde::Deserialize;

fn default_store_dir() -> PathBuf {
    PathBuf::from("logbook")
}

fn default_ollama_url() -> String {
    "http://localhost:11434".into()
}

fn default_model() -> String {
    "llama3".into()
}

fn default_whisper_url() -> String {
    "http://localhost:8178".into()
}

fn default_whatsapp_number() -> String {
    "whatsapp:+14155238886".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaSettings {
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            model: default_model(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwilioSettings {
    #[serde(default)]
    pub account_sid: String,
    #[serde(default)]
    pub auth_token: String,
    #[serde(default = "default_whatsapp_number")]
    pub whatsapp_number: String,
}

impl Default for TwilioSettings {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            auth_token: String::new(),
            whatsapp_number: default_whatsapp_number(),
        }
    }
}

/// Daemon configuration loaded from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Directory for the JSONL store.
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
    #[serde(default)]
    pub ollama: OllamaSettings,
    #[serde(default)]
    pub twilio: TwilioSettings,
    /// Base URL of the speech-to-text server.
    #[serde(default = "default_whisper_url")]
    pub whisper_url: String,
    /// Optional extraction prompt override, read at startup.
    #[serde(default)]
    pub prompt_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            ollama: OllamaSettings::default(),
            twilio: TwilioSettings::default(),
            whisper_url: default_whisper_url(),
            prompt_path: None,
        }
    }
}

/// Load [`Settings`] from a TOML file. A missing file yields the defaults.
pub async fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Settings> {
    match tokio::fs::read_to_string(path.as_ref()).await {
        Ok(text) => Ok(toml::from_str(&text)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Settings::default()),
        Err(e) => Err(e.into()),
    }
}
