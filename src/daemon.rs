use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UnixListener;
use tracing::{error, info, warn};

use crate::channel::IncomingMessage;
use crate::lifecycle::Logbook;

/// Run the daemon loop.
///
/// Listens on a Unix socket for inbound messages, one JSON object of webhook
/// form fields per line (`MessageSid`, `From`, `Body`, ...). Each message is
/// handled end-to-end in its own task, so a slow provider call for one farmer
/// never blocks the others.
pub async fn run(logbook: Arc<Logbook>, socket: PathBuf) -> anyhow::Result<()> {
    if socket.exists() {
        tokio::fs::remove_file(&socket).await.ok();
    }
    if let Some(parent) = socket.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }
    let listener = UnixListener::bind(&socket)?;
    info!(socket = %socket.display(), "listening for inbound messages");

    loop {
        let (stream, _) = listener.accept().await?;
        let logbook = logbook.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let form: HashMap<String, String> = match serde_json::from_str(&line) {
                            Ok(form) => form,
                            Err(e) => {
                                warn!(?e, "skipping unparseable inbound line");
                                continue;
                            }
                        };
                        let incoming = IncomingMessage::from_form(&form);
                        if incoming.sid.is_empty() || incoming.from.is_empty() {
                            warn!("skipping inbound line without sid or sender");
                            continue;
                        }
                        let logbook = logbook.clone();
                        tokio::spawn(async move {
                            match logbook.handle_inbound(incoming).await {
                                Ok(Some(outcome)) => {
                                    info!(
                                        created = outcome.created,
                                        has_record = outcome.record.is_some(),
                                        "processed message"
                                    );
                                }
                                Ok(None) => {}
                                Err(e) => error!(?e, "failed to process message"),
                            }
                        });
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(?e, "socket read error");
                        break;
                    }
                }
            }
        });
    }
}
