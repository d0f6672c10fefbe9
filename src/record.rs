use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Kinds of logbook activity a farmer can report.
///
/// Wire strings use snake case, e.g. `"chemical_spray"`. Strings that do not
/// match any variant decode to [`RecordType::Unknown`] via
/// [`RecordType::parse_lossy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    SeedPurchaseAndSowing,
    HazardEvaluation,
    ChemicalSpray,
    ChemicalPurchase,
    ChemicalDisposal,
    PostHarvestChemicalUsage,
    FertilizerApplication,
    Irrigation,
    SprayingToolSanitation,
    HarvestAndPackaging,
    TrainingUpdate,
    CorrectionReport,
    Unknown,
}

impl RecordType {
    /// Parse a wire string, falling back to [`RecordType::Unknown`] instead of
    /// failing the batch that carried it.
    pub fn parse_lossy(s: &str) -> Self {
        serde_json::from_value(Value::String(s.to_owned())).unwrap_or(RecordType::Unknown)
    }

    /// The snake case wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::SeedPurchaseAndSowing => "seed_purchase_and_sowing",
            RecordType::HazardEvaluation => "hazard_evaluation",
            RecordType::ChemicalSpray => "chemical_spray",
            RecordType::ChemicalPurchase => "chemical_purchase",
            RecordType::ChemicalDisposal => "chemical_disposal",
            RecordType::PostHarvestChemicalUsage => "post_harvest_chemical_usage",
            RecordType::FertilizerApplication => "fertilizer_application",
            RecordType::Irrigation => "irrigation",
            RecordType::SprayingToolSanitation => "spraying_tool_sanitation",
            RecordType::HarvestAndPackaging => "harvest_and_packaging",
            RecordType::TrainingUpdate => "training_update",
            RecordType::CorrectionReport => "correction_report",
            RecordType::Unknown => "unknown",
        }
    }

    /// Human readable form used in prompts, e.g. `"chemical spray"`.
    pub fn display_name(&self) -> String {
        self.as_str().replace('_', " ")
    }
}

/// Direction of a stored channel message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

/// Identity anchor for one reporting farmer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Farmer {
    pub id: Uuid,
    /// Unique channel identifier, e.g. a WhatsApp phone number.
    pub external_id: String,
    pub name: String,
    pub phone_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Farmer {
    /// Create a farmer keyed by `external_id`.
    pub fn new(external_id: impl Into<String>, name: impl Into<String>) -> Self {
        let external_id = external_id.into();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            phone_number: Some(external_id.clone()),
            external_id,
            name: name.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// One raw communication unit persisted for auditing and idempotency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredMessage {
    pub id: Uuid,
    pub farmer_id: Uuid,
    /// Provider assigned id. Unique, so webhook replays do not duplicate.
    pub provider_sid: String,
    pub direction: MessageDirection,
    pub body: Option<String>,
    pub media_url: Option<String>,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn inbound(farmer_id: Uuid, provider_sid: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            farmer_id,
            provider_sid: provider_sid.into(),
            direction: MessageDirection::Inbound,
            body: None,
            media_url: None,
            processed: false,
            created_at: Utc::now(),
        }
    }

    pub fn outbound(farmer_id: Uuid, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            farmer_id,
            provider_sid: format!("out-{}", Uuid::new_v4()),
            direction: MessageDirection::Outbound,
            body: Some(body.into()),
            media_url: None,
            processed: true,
            created_at: Utc::now(),
        }
    }
}

fn default_channel() -> String {
    "whatsapp".into()
}

fn default_input_mode() -> String {
    "text".into()
}

fn default_language() -> String {
    "unknown".into()
}

/// Where and how a record entered the system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceInfo {
    #[serde(default = "default_channel")]
    pub channel: String,
    /// `"text"` or `"voice"`.
    #[serde(default = "default_input_mode")]
    pub input_mode: String,
    /// ISO language code reported by the extractor, or `"unknown"`.
    #[serde(default = "default_language")]
    pub language: String,
}

impl Default for SourceInfo {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            input_mode: default_input_mode(),
            language: default_language(),
        }
    }
}

/// Quality metadata reported by the extraction step for one candidate.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Quality {
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub missing_fields: Vec<String>,
    #[serde(default)]
    pub needs_followup: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

/// One raw record produced by the extraction step, not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub record_type: RecordType,
    /// ISO date string as received. Unparseable dates are kept here but never
    /// make it into [`Record::occurred_at`].
    pub occurred_at: Option<String>,
    pub source: SourceInfo,
    pub data: Map<String, Value>,
    pub quality: Quality,
}

/// The central entity: one structured agricultural activity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub id: Uuid,
    pub farmer_id: Uuid,
    /// Message that originated the record, if it came through the channel.
    pub message_id: Option<Uuid>,
    pub record_type: RecordType,
    pub occurred_at: Option<NaiveDate>,
    /// Open key to value mapping. Required keys come from the field schema
    /// registry for [`Record::record_type`].
    pub data: Map<String, Value>,
    pub source: SourceInfo,
    pub confidence: f32,
    /// Required but absent field names, `"occurred_at"` included as a
    /// pseudo field.
    pub missing_fields: Vec<String>,
    pub needs_followup: bool,
    pub confirmed: bool,
    pub quality_notes: Option<String>,
    /// Cumulative audit log of every transcript that contributed here.
    pub raw_transcript: String,
    pub created_at: DateTime<Utc>,
}

impl Record {
    /// True while the record is eligible to receive continuation data.
    pub fn is_open(&self) -> bool {
        !self.confirmed && self.needs_followup
    }

    /// `occurred_at` rendered the way the completeness evaluator expects it.
    pub fn occurred_at_str(&self) -> Option<String> {
        self.occurred_at.map(|d| d.to_string())
    }
}

/// Parse an extraction supplied occurrence date. Bad input is dropped rather
/// than failing the record.
pub fn parse_occurred_at(raw: Option<&str>) -> Option<NaiveDate> {
    raw.and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_type_round_trips_wire_names() {
        for ty in [
            RecordType::SeedPurchaseAndSowing,
            RecordType::ChemicalSpray,
            RecordType::PostHarvestChemicalUsage,
            RecordType::Unknown,
        ] {
            assert_eq!(RecordType::parse_lossy(ty.as_str()), ty);
        }
    }

    #[test]
    fn unparseable_record_type_falls_back_to_unknown() {
        assert_eq!(RecordType::parse_lossy("greenhouse_party"), RecordType::Unknown);
        assert_eq!(RecordType::parse_lossy(""), RecordType::Unknown);
    }

    #[test]
    fn occurred_at_accepts_iso_dates_only() {
        assert_eq!(
            parse_occurred_at(Some("2026-08-01")),
            Some(NaiveDate::from_ymd_opt(2026, 8, 1).unwrap())
        );
        assert_eq!(parse_occurred_at(Some("last tuesday")), None);
        assert_eq!(parse_occurred_at(Some("")), None);
        assert_eq!(parse_occurred_at(None), None);
    }

    #[test]
    fn display_name_strips_underscores() {
        assert_eq!(RecordType::ChemicalSpray.display_name(), "chemical spray");
    }
}
