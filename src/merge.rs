use serde_json::{Map, Value};

use crate::record::{Candidate, Record, parse_occurred_at};

/// Separator between transcript turns in the cumulative audit log.
pub const TRANSCRIPT_SEPARATOR: &str = "\n---\n";

/// Decide whether a newly extracted value may overwrite what is already
/// stored. Nulls and empty strings never do, so a partial follow-up answer
/// cannot erase previously confirmed information.
fn overwrites(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Merge newly extracted data into an existing mapping.
///
/// Keys unseen before are added; existing values survive unless the new value
/// is non-null and non-empty. Empty new values are dropped outright, so
/// merging an empty mapping is a no-op.
pub fn merge_data(existing: &mut Map<String, Value>, new: &Map<String, Value>) {
    for (key, value) in new {
        if overwrites(value) {
            existing.insert(key.clone(), value.clone());
        }
    }
}

/// Append a new transcript turn to the audit log, never replacing prior text.
pub fn merge_transcript(existing: &str, new: &str) -> String {
    if existing.is_empty() {
        new.to_owned()
    } else {
        format!("{existing}{TRANSCRIPT_SEPARATOR}{new}")
    }
}

/// Fold one follow-up candidate into an open record.
///
/// Applies the data merge, the occurrence date (only when the new one
/// parses), the quality overwrite rules and the transcript append. The caller
/// re-runs the completeness evaluator afterwards; this function never touches
/// `missing_fields`, `needs_followup` or `confirmed`.
pub fn apply_followup(record: &mut Record, candidate: &Candidate, transcript: &str) {
    if let Some(date) = parse_occurred_at(candidate.occurred_at.as_deref()) {
        record.occurred_at = Some(date);
    }

    merge_data(&mut record.data, &candidate.data);

    // Quality metadata is overwritten only by truthy new values.
    if candidate.quality.confidence > 0.0 {
        record.confidence = candidate.quality.confidence;
    }
    if let Some(notes) = &candidate.quality.notes {
        if !notes.is_empty() {
            record.quality_notes = Some(notes.clone());
        }
    }

    record.raw_transcript = merge_transcript(&record.raw_transcript, transcript);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Quality, RecordType, SourceInfo};
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn map(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    #[test]
    fn empty_merge_leaves_data_unchanged() {
        let mut existing = map(&[("a", json!("x")), ("b", json!(3))]);
        let snapshot = existing.clone();
        merge_data(&mut existing, &Map::new());
        assert_eq!(existing, snapshot);
    }

    #[test]
    fn merge_never_erases_with_empty_values() {
        let mut existing = map(&[("a", json!("x"))]);
        merge_data(&mut existing, &map(&[("a", json!("")), ("b", Value::Null)]));
        assert_eq!(existing["a"], json!("x"));
        assert!(!existing.contains_key("b"));
    }

    #[test]
    fn merge_overwrites_with_real_values() {
        let mut existing = map(&[("a", json!("old")), ("n", json!(1))]);
        merge_data(&mut existing, &map(&[("a", json!("new")), ("n", json!(0))]));
        assert_eq!(existing["a"], json!("new"));
        assert_eq!(existing["n"], json!(0));
    }

    #[test]
    fn merge_adds_unknown_keys() {
        let mut existing = Map::new();
        merge_data(&mut existing, &map(&[("fresh", json!("value"))]));
        assert_eq!(existing["fresh"], json!("value"));
    }

    #[test]
    fn transcript_appends_after_separator() {
        let merged = merge_transcript("first turn", "second turn");
        assert_eq!(merged, "first turn\n---\nsecond turn");
        assert_eq!(merge_transcript("", "only turn"), "only turn");
    }

    fn open_record() -> Record {
        Record {
            id: Uuid::new_v4(),
            farmer_id: Uuid::new_v4(),
            message_id: None,
            record_type: RecordType::Irrigation,
            occurred_at: None,
            data: map(&[("crop", json!("tomato"))]),
            source: SourceInfo::default(),
            confidence: 0.8,
            missing_fields: vec!["occurred_at".into(), "water_amount".into()],
            needs_followup: true,
            confirmed: false,
            quality_notes: Some("noisy audio".into()),
            raw_transcript: "watered the tomatoes".into(),
            created_at: Utc::now(),
        }
    }

    fn candidate(
        data: Map<String, Value>,
        quality: Quality,
        occurred_at: Option<&str>,
    ) -> Candidate {
        Candidate {
            record_type: RecordType::Irrigation,
            occurred_at: occurred_at.map(str::to_owned),
            source: SourceInfo::default(),
            data,
            quality,
        }
    }

    #[test]
    fn followup_fills_gaps_and_appends_transcript() {
        let mut record = open_record();
        let cand = candidate(
            map(&[("water_amount", json!("20 liters")), ("crop", json!(""))]),
            Quality::default(),
            Some("2026-08-01"),
        );
        apply_followup(&mut record, &cand, "about twenty liters yesterday");

        assert_eq!(record.data["water_amount"], json!("20 liters"));
        assert_eq!(record.data["crop"], json!("tomato"));
        assert_eq!(record.occurred_at_str().as_deref(), Some("2026-08-01"));
        assert!(record.raw_transcript.ends_with("about twenty liters yesterday"));
        assert!(record.raw_transcript.starts_with("watered the tomatoes"));
    }

    #[test]
    fn followup_keeps_quality_unless_new_is_truthy() {
        let mut record = open_record();
        let cand = candidate(Map::new(), Quality::default(), None);
        apply_followup(&mut record, &cand, "turn");
        assert_eq!(record.confidence, 0.8);
        assert_eq!(record.quality_notes.as_deref(), Some("noisy audio"));

        let cand = candidate(
            Map::new(),
            Quality {
                confidence: 0.95,
                notes: Some("clear".into()),
                ..Quality::default()
            },
            None,
        );
        apply_followup(&mut record, &cand, "turn");
        assert_eq!(record.confidence, 0.95);
        assert_eq!(record.quality_notes.as_deref(), Some("clear"));
    }

    #[test]
    fn unparseable_date_keeps_existing_one() {
        let mut record = open_record();
        record.occurred_at = chrono::NaiveDate::from_ymd_opt(2026, 7, 1);
        let cand = candidate(Map::new(), Quality::default(), Some("sometime in july"));
        apply_followup(&mut record, &cand, "turn");
        assert_eq!(record.occurred_at_str().as_deref(), Some("2026-07-01"));
    }
}
