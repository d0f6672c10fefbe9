use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};

use fieldlog::channel::TwilioChannel;
use fieldlog::extract::LlmExtractor;
use fieldlog::lifecycle::Logbook;
use fieldlog::llm::OllamaChat;
use fieldlog::store::FileStore;
use fieldlog::transcribe::WhisperHttp;
use fieldlog::{config, daemon};

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing_subscriber::filter::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing_subscriber::filter::LevelFilter::ERROR,
            LogLevel::Warn => tracing_subscriber::filter::LevelFilter::WARN,
            LogLevel::Info => tracing_subscriber::filter::LevelFilter::INFO,
            LogLevel::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
            LogLevel::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "fieldlogd", about = "WhatsApp farm logbook daemon")]
struct Cli {
    /// Path to the Unix socket the webhook adapter writes inbound messages to
    #[arg(long, default_value = "/run/fieldlog/inbound.sock")]
    socket: PathBuf,

    /// Path to the TOML configuration file
    #[arg(long, env = "FIELDLOG_CONFIG", default_value = "fieldlog.toml")]
    config: PathBuf,

    /// Logging verbosity level
    #[arg(long, default_value = "info")]
    log_level: LogLevel,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(tracing_subscriber::filter::LevelFilter::from(cli.log_level))
        .init();

    let settings = config::load(&cli.config).await?;
    tracing::info!(store_dir = %settings.store_dir.display(), "starting fieldlogd");

    let store = Arc::new(FileStore::open(settings.store_dir.clone()).await?);

    // Same model, two temperatures: extraction wants determinism, reply
    // generation a conversational tone.
    let extraction_chat = Arc::new(
        OllamaChat::new(settings.ollama.base_url.clone(), settings.ollama.model.clone())
            .with_temperature(0.1),
    );
    let reply_chat = Arc::new(
        OllamaChat::new(settings.ollama.base_url.clone(), settings.ollama.model.clone())
            .with_temperature(0.7),
    );

    let mut extractor = LlmExtractor::new(extraction_chat);
    if let Some(prompt_path) = &settings.prompt_path {
        let prompt = tokio::fs::read_to_string(prompt_path).await?;
        extractor = extractor.with_prompt(prompt);
    }

    let transcriber = Arc::new(WhisperHttp::new(settings.whisper_url.clone()));
    let channel = Arc::new(TwilioChannel::new(
        settings.twilio.account_sid.clone(),
        settings.twilio.auth_token.clone(),
        settings.twilio.whatsapp_number.clone(),
    ));

    let logbook = Arc::new(Logbook::new(
        store,
        Arc::new(extractor),
        transcriber,
        channel,
        reply_chat,
    ));

    daemon::run(logbook, cli.socket).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_to_info_log_level() {
        let cli = Cli::try_parse_from(["fieldlogd"]).unwrap();
        assert!(matches!(cli.log_level, LogLevel::Info));
        assert_eq!(cli.config, PathBuf::from("fieldlog.toml"));
    }

    #[test]
    fn parses_debug_log_level_and_socket() {
        let cli = Cli::try_parse_from([
            "fieldlogd",
            "--log-level",
            "debug",
            "--socket",
            "/tmp/inbound.sock",
        ])
        .unwrap();
        assert!(matches!(cli.log_level, LogLevel::Debug));
        assert_eq!(cli.socket, PathBuf::from("/tmp/inbound.sock"));
    }
}
