use serde_json::{Map, Value};
use tracing::error;

use crate::llm::ChatModel;
use crate::record::{Record, RecordType};

/// Fixed reply when nothing could be extracted from the message.
pub const APOLOGY_NO_RECORDS: &str =
    "Sorry, I couldn't extract any records from your message. Please try again with more details.";

/// Fixed reply when a voice note could not be transcribed.
pub const APOLOGY_TRANSCRIPTION: &str =
    "Sorry, I couldn't process your voice message. Please try again.";

/// Fixed reply when the voice media could not be downloaded.
pub const APOLOGY_DOWNLOAD: &str =
    "Sorry, I couldn't download your voice message. Please try again.";

/// Fallback when the reply model itself is unavailable.
pub const FALLBACK_REPLY: &str = "Thank you for your message. We'll process it shortly.";

/// Everything the reply generator needs to know about the record state.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyContext {
    pub record_type: RecordType,
    /// Merged data with `occurred_at` folded in as a plain key.
    pub data: Map<String, Value>,
    pub missing_fields: Vec<String>,
    /// Language the farmer wrote or spoke in.
    pub language: String,
    pub farmer_name: String,
}

/// What to say back for one processed turn.
///
/// The apology variants need no model call; the other two carry the payload
/// handed to the external reply generation step.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyPlan {
    /// Canned text, sent as-is.
    Apology(&'static str),
    /// Ask for missing fields, at most two or three per message.
    FollowUp(ReplyContext),
    /// Summarize the complete record and ask the farmer to confirm.
    Confirmation(ReplyContext),
}

const FOLLOWUP_SYSTEM_PROMPT: &str = "\
You are a friendly agricultural assistant helping farmers keep records via WhatsApp.
Generate a natural follow-up question in the specified language that:
1. Briefly acknowledges what was already recorded
2. Asks for the missing information in a conversational way
3. Is specific about what information is needed

IMPORTANT formatting rules:
- Do NOT use asterisks (*) or any markdown formatting
- Use plain text only
- Keep it simple and readable

Be warm, concise, and use simple language that farmers can easily understand.
Ask for 2-3 missing fields at most per message to avoid overwhelming the farmer.
Output ONLY the message text.";

const CONFIRMATION_SYSTEM_PROMPT: &str = "\
You are a friendly agricultural assistant helping farmers keep records via WhatsApp.
Generate a confirmation message in the specified language that:
1. Thanks the farmer
2. Summarizes the recorded data in a clear, readable list format
3. Asks if they want to correct anything (reply 'OK' to confirm or send corrections)

IMPORTANT formatting rules:
- Do NOT use asterisks (*) or any markdown formatting
- Use plain text only
- Use line breaks and dashes (-) for lists
- Keep it simple and readable

Be warm, concise, and use simple language that farmers can easily understand.
Output ONLY the message text.";

/// Build the reply plan for a processed turn.
///
/// No record means the turn produced nothing and earns the retry apology. A
/// confirmed record gets a confirmation summary; an open one a follow-up
/// question.
pub fn plan_reply(record: Option<&Record>, farmer_name: &str) -> ReplyPlan {
    let Some(record) = record else {
        return ReplyPlan::Apology(APOLOGY_NO_RECORDS);
    };

    let mut data = record.data.clone();
    if let Some(date) = record.occurred_at_str() {
        data.insert("occurred_at".to_owned(), Value::String(date));
    }

    let language = if record.source.language.is_empty() || record.source.language == "unknown" {
        "en".to_owned()
    } else {
        record.source.language.clone()
    };

    let context = ReplyContext {
        record_type: record.record_type,
        data,
        missing_fields: record.missing_fields.clone(),
        language,
        farmer_name: farmer_name.to_owned(),
    };

    if record.confirmed {
        ReplyPlan::Confirmation(context)
    } else {
        ReplyPlan::FollowUp(context)
    }
}

/// Render the system and user prompt for a plan, or `None` when the plan is
/// canned text that needs no model call.
pub fn render_prompts(plan: &ReplyPlan) -> Option<(String, String)> {
    match plan {
        ReplyPlan::Apology(_) => None,
        ReplyPlan::FollowUp(ctx) => {
            let user = format!(
                "Language: {}\nFarmer name: {}\nRecord type: {}\nAlready recorded: {}\nMissing fields needed: {}\n\nGenerate a follow-up question without any asterisks or markdown.",
                ctx.language,
                ctx.farmer_name,
                ctx.record_type.display_name(),
                Value::Object(ctx.data.clone()),
                ctx.missing_fields.join(", "),
            );
            Some((FOLLOWUP_SYSTEM_PROMPT.to_owned(), user))
        }
        ReplyPlan::Confirmation(ctx) => {
            let user = format!(
                "Language: {}\nFarmer name: {}\nRecord type: {}\nRecorded data: {}\n\nGenerate a confirmation message without any asterisks or markdown.",
                ctx.language,
                ctx.farmer_name,
                ctx.record_type.display_name(),
                serde_json::to_string_pretty(&Value::Object(ctx.data.clone()))
                    .unwrap_or_else(|_| "{}".into()),
            );
            Some((CONFIRMATION_SYSTEM_PROMPT.to_owned(), user))
        }
    }
}

/// Produce the outbound text for a plan, degrading to [`FALLBACK_REPLY`]
/// when the model call fails.
pub async fn generate(chat: &dyn ChatModel, plan: &ReplyPlan) -> String {
    if let ReplyPlan::Apology(text) = plan {
        return (*text).to_owned();
    }
    let Some((system, user)) = render_prompts(plan) else {
        return FALLBACK_REPLY.to_owned();
    };
    match chat.chat(&system, &user).await {
        Ok(text) => text.trim().to_owned(),
        Err(e) => {
            error!(?e, "reply generation failed");
            FALLBACK_REPLY.to_owned()
        }
    }
}
