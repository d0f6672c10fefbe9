use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Parsed inbound message as delivered by the messaging provider webhook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IncomingMessage {
    /// Provider assigned message id.
    pub sid: String,
    /// Sender identifier, e.g. `whatsapp:+628123456`.
    pub from: String,
    /// Receiving number.
    pub to: String,
    pub body: Option<String>,
    pub num_media: u32,
    pub media_url: Option<String>,
    pub media_content_type: Option<String>,
    /// Display name the sender exposes on the channel.
    pub profile_name: Option<String>,
}

impl IncomingMessage {
    /// Build from the provider's webhook form fields (`MessageSid`, `From`,
    /// `Body`, `MediaUrl0`, ...). Missing fields default to empty.
    pub fn from_form(form: &HashMap<String, String>) -> Self {
        let num_media = form
            .get("NumMedia")
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        let (media_url, media_content_type) = if num_media > 0 {
            (
                form.get("MediaUrl0").cloned(),
                form.get("MediaContentType0").cloned(),
            )
        } else {
            (None, None)
        };
        Self {
            sid: form.get("MessageSid").cloned().unwrap_or_default(),
            from: form.get("From").cloned().unwrap_or_default(),
            to: form.get("To").cloned().unwrap_or_default(),
            body: form.get("Body").cloned(),
            num_media,
            media_url,
            media_content_type,
            profile_name: form.get("ProfileName").cloned(),
        }
    }

    /// True when the message carries audio media.
    pub fn is_voice(&self) -> bool {
        self.media_content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("audio/"))
    }

    /// True for a plain text message with no media.
    pub fn is_text(&self) -> bool {
        self.num_media == 0 && self.body.as_deref().is_some_and(|b| !b.is_empty())
    }
}

/// Outbound side of the message channel.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Fire-and-forget text reply. Returns whether the provider accepted it;
    /// failures are logged, never retried.
    async fn send(&self, to: &str, body: &str) -> bool;

    /// Download message media. Provider media URLs usually require the
    /// account credentials.
    async fn download_media(&self, url: &str) -> anyhow::Result<Vec<u8>>;
}

/// [`Channel`] implementation for the Twilio messaging API.
#[derive(Clone, Debug)]
pub struct TwilioChannel {
    account_sid: String,
    auth_token: String,
    /// Sending number, e.g. `whatsapp:+14155238886`.
    from_number: String,
    /// API base, overridable for tests.
    base_url: String,
    client: reqwest::Client,
}

impl TwilioChannel {
    pub fn new(
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
        from_number: impl Into<String>,
    ) -> Self {
        Self::with_base_url(account_sid, auth_token, from_number, "https://api.twilio.com")
    }

    pub fn with_base_url(
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
        from_number: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            from_number: from_number.into(),
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Deserialize)]
struct SendResponse {
    sid: String,
}

#[async_trait]
impl Channel for TwilioChannel {
    async fn send(&self, to: &str, body: &str) -> bool {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url.trim_end_matches('/'),
            self.account_sid
        );
        let form = [
            ("From", self.from_number.as_str()),
            ("To", to),
            ("Body", body),
        ];
        let result = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        match result {
            Ok(resp) => {
                match resp.json::<SendResponse>().await {
                    Ok(sent) => info!(sid = %sent.sid, "sent reply"),
                    Err(_) => info!("sent reply"),
                }
                true
            }
            Err(e) => {
                error!(?e, "failed to send reply");
                false
            }
        }
    }

    async fn download_media(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let resp = self
            .client
            .get(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.bytes().await?.to_vec())
    }
}
