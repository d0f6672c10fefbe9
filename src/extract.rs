use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::llm::ChatModel;
use crate::record::{Candidate, Quality, RecordType, SourceInfo};

/// Snapshot of an open record handed to the extractor so a follow-up answer
/// is merged rather than treated as a fresh report.
#[derive(Debug, Clone)]
pub struct ExistingRecordContext {
    pub record_type: RecordType,
    pub data: Map<String, Value>,
    pub missing_fields: Vec<String>,
    pub occurred_at: Option<String>,
}

/// One extraction request.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub transcript: String,
    pub farmer_id: String,
    pub farmer_name: String,
    /// `"text"` or `"voice"`.
    pub input_mode: String,
    /// Anchor for relative date phrases like "yesterday".
    pub current_date: NaiveDate,
    pub existing_record: Option<ExistingRecordContext>,
}

/// Extraction provider: transcript in, zero or more record candidates out.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, request: &ExtractionRequest) -> anyhow::Result<Vec<Candidate>>;
}

/// Default system prompt for the extraction model.
pub const EXTRACTION_PROMPT: &str = r#"You are a data extraction assistant for an agricultural logbook.
Farmers report field activities over WhatsApp, as text or transcribed voice notes, often in informal language.

Extract every distinct activity from the transcript into a JSON object:
{"records": [
  {
    "record_type": one of "seed_purchase_and_sowing", "hazard_evaluation", "chemical_spray",
      "chemical_purchase", "chemical_disposal", "post_harvest_chemical_usage",
      "fertilizer_application", "irrigation", "spraying_tool_sanitation",
      "harvest_and_packaging", "training_update", "correction_report", "unknown",
    "occurred_at": ISO date "YYYY-MM-DD" or null. Resolve relative dates against current_date,
    "source": {"channel": "whatsapp", "input_mode": the given input_mode, "language": ISO code of the transcript language},
    "data": object with every detail the farmer stated, using snake_case keys. Omit nothing said; invent nothing unsaid,
    "quality": {"confidence": 0.0 to 1.0, "missing_fields": [], "needs_followup": false, "notes": null or a short remark}
  }
]}

Rules:
- Output ONLY the JSON object, no prose.
- Use null for anything the farmer did not state.
- When an existing record is provided, the farmer is answering a follow-up question.
  Merge the new information into that record's type and data. Keep existing values unless explicitly corrected.
- If no agricultural activity can be recognized, return {"records": []}."#;

/// [`Extractor`] backed by a [`ChatModel`].
pub struct LlmExtractor {
    chat: Arc<dyn ChatModel>,
    system_prompt: String,
}

impl LlmExtractor {
    pub fn new(chat: Arc<dyn ChatModel>) -> Self {
        Self {
            chat,
            system_prompt: EXTRACTION_PROMPT.to_owned(),
        }
    }

    /// Replace the built-in system prompt, e.g. with one loaded from disk.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    fn build_user_message(request: &ExtractionRequest) -> String {
        let mut message = format!(
            "Input:\n- current_date: \"{}\"\n- farmer_id: \"{}\"\n- farmer_name: \"{}\"\n- input_mode: \"{}\"\n- transcript: \"{}\"\n",
            request.current_date,
            request.farmer_id,
            request.farmer_name,
            request.input_mode,
            request.transcript,
        );
        if let Some(existing) = &request.existing_record {
            message.push_str(&format!(
                "- IMPORTANT: This is a follow-up response to complete an existing record.\n\
                 - existing_record_type: \"{}\"\n\
                 - existing_data: {}\n\
                 - missing_fields: {}\n\
                 - The farmer is providing additional information to fill in the missing fields.\n",
                existing.record_type.as_str(),
                Value::Object(existing.data.clone()),
                serde_json::to_string(&existing.missing_fields).unwrap_or_else(|_| "[]".into()),
            ));
        }
        message
    }
}

#[async_trait]
impl Extractor for LlmExtractor {
    async fn extract(&self, request: &ExtractionRequest) -> anyhow::Result<Vec<Candidate>> {
        let user = Self::build_user_message(request);
        let response = self.chat.chat(&self.system_prompt, &user).await?;
        debug!(chars = response.len(), "extraction response received");
        Ok(parse_candidates(&response))
    }
}

/// Parse a model response into candidates.
///
/// Accepts a bare array, a bare record object, or a `{"records": [...]}`
/// wrapper. A malformed individual candidate is logged and skipped; the rest
/// of the batch survives. An unparseable response yields zero candidates.
pub fn parse_candidates(content: &str) -> Vec<Candidate> {
    let parsed: Value = match serde_json::from_str(content.trim()) {
        Ok(v) => v,
        Err(e) => {
            warn!(?e, "failed to parse extraction response");
            return Vec::new();
        }
    };

    let items: Vec<Value> = match parsed {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("records") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                warn!(kind = other_kind(&other), "records key is not an array");
                Vec::new()
            }
            None => vec![Value::Object(obj)],
        },
        other => {
            warn!(kind = other_kind(&other), "unexpected extraction response shape");
            Vec::new()
        }
    };

    items
        .into_iter()
        .filter_map(|item| {
            let candidate = parse_candidate(&item);
            if candidate.is_none() {
                warn!("skipping malformed candidate");
            }
            candidate
        })
        .collect()
}

fn other_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn parse_candidate(item: &Value) -> Option<Candidate> {
    let obj = item.as_object()?;

    let record_type = match obj.get("record_type") {
        Some(Value::String(s)) => RecordType::parse_lossy(s),
        _ => RecordType::Unknown,
    };

    let occurred_at = match obj.get("occurred_at") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    };

    // A data key of the wrong shape means the candidate is broken, not empty.
    let data = match obj.get("data") {
        Some(Value::Object(map)) => map.clone(),
        None | Some(Value::Null) => Map::new(),
        Some(_) => return None,
    };

    let source = obj
        .get("source")
        .and_then(|s| serde_json::from_value::<SourceInfo>(s.clone()).ok())
        .unwrap_or_default();

    let quality = obj
        .get("quality")
        .and_then(|q| serde_json::from_value::<Quality>(q.clone()).ok())
        .unwrap_or_default();

    Some(Candidate {
        record_type,
        occurred_at,
        source,
        data,
        quality,
    })
}
