use serde_json::{Map, Value};

use crate::record::RecordType;
use crate::schema::required_fields;

/// Pseudo field name reported when the occurrence date is absent.
pub const OCCURRED_AT_FIELD: &str = "occurred_at";

/// Verdict of the completeness evaluator.
///
/// `needs_followup` and confirmability are always logical negations of each
/// other and both derive solely from `missing_fields`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completeness {
    /// Required but absent field names, in registry order with
    /// [`OCCURRED_AT_FIELD`] first when the date is missing.
    pub missing_fields: Vec<String>,
    pub needs_followup: bool,
}

impl Completeness {
    /// True when every required field is filled.
    pub fn confirmable(&self) -> bool {
        !self.needs_followup
    }
}

/// Decide whether a value counts as missing. Only absence and emptiness do;
/// explicit falsy values such as `0` or `false` are real answers.
fn is_empty_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(_) => false,
    }
}

/// Evaluate a record's completeness.
///
/// This is the single source of truth for "is this record done". It is called
/// at record creation and again after every merge. Deterministic and total:
/// absent data yields missing field entries, never an error.
pub fn evaluate(
    record_type: RecordType,
    occurred_at: Option<&str>,
    data: &Map<String, Value>,
) -> Completeness {
    let mut missing_fields = Vec::new();

    // The occurrence date check is independent of the per type field table,
    // so even `unknown` records stay open until they carry a date.
    if occurred_at.is_none_or(str::is_empty) {
        missing_fields.push(OCCURRED_AT_FIELD.to_owned());
    }

    for field in required_fields(record_type) {
        if is_empty_value(data.get(*field)) {
            missing_fields.push((*field).to_owned());
        }
    }

    Completeness {
        needs_followup: !missing_fields.is_empty(),
        missing_fields,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::required_fields;
    use serde_json::json;

    fn data_for(record_type: RecordType) -> Map<String, Value> {
        required_fields(record_type)
            .iter()
            .map(|f| ((*f).to_owned(), json!("filled")))
            .collect()
    }

    #[test]
    fn complete_chemical_spray_is_confirmable() {
        let data = data_for(RecordType::ChemicalSpray);
        assert_eq!(data.len(), 10);
        let verdict = evaluate(RecordType::ChemicalSpray, Some("2026-07-30"), &data);
        assert!(verdict.confirmable());
        assert!(verdict.missing_fields.is_empty());
    }

    #[test]
    fn followup_iff_missing_fields_nonempty() {
        for (ty, occurred_at, data) in [
            (RecordType::Irrigation, Some("2026-07-30"), Map::new()),
            (RecordType::Irrigation, None, data_for(RecordType::Irrigation)),
            (RecordType::Unknown, Some("2026-07-30"), Map::new()),
            (
                RecordType::ChemicalDisposal,
                Some("2026-07-30"),
                data_for(RecordType::ChemicalDisposal),
            ),
        ] {
            let verdict = evaluate(ty, occurred_at, &data);
            assert_eq!(verdict.needs_followup, !verdict.missing_fields.is_empty());
            assert_eq!(verdict.confirmable(), !verdict.needs_followup);
        }
    }

    #[test]
    fn missing_date_reports_pseudo_field() {
        let verdict = evaluate(RecordType::Unknown, None, &Map::new());
        assert_eq!(verdict.missing_fields, vec![OCCURRED_AT_FIELD]);
        assert!(verdict.needs_followup);

        let verdict = evaluate(RecordType::Unknown, Some(""), &Map::new());
        assert_eq!(verdict.missing_fields, vec![OCCURRED_AT_FIELD]);
    }

    #[test]
    fn unknown_type_needs_only_the_date() {
        let mut data = Map::new();
        data.insert("anything".into(), json!("at all"));
        let verdict = evaluate(RecordType::Unknown, Some("2026-07-30"), &data);
        assert!(verdict.confirmable());
        assert!(verdict.missing_fields.is_empty());
    }

    #[test]
    fn empty_string_and_empty_list_count_as_missing() {
        let mut data = data_for(RecordType::Irrigation);
        data.insert("water_amount".into(), json!(""));
        data.insert("rainfall".into(), json!([]));
        let verdict = evaluate(RecordType::Irrigation, Some("2026-07-30"), &data);
        assert_eq!(verdict.missing_fields, vec!["water_amount", "rainfall"]);
    }

    #[test]
    fn falsy_but_present_values_are_not_missing() {
        let mut data = data_for(RecordType::Irrigation);
        data.insert("water_amount".into(), json!(0));
        data.insert("rainfall".into(), json!(false));
        let verdict = evaluate(RecordType::Irrigation, Some("2026-07-30"), &data);
        assert!(verdict.confirmable());
    }

    #[test]
    fn null_value_is_missing() {
        let mut data = data_for(RecordType::ChemicalDisposal);
        data.insert("disposal_method".into(), Value::Null);
        let verdict = evaluate(RecordType::ChemicalDisposal, Some("2026-07-30"), &data);
        assert_eq!(verdict.missing_fields, vec!["disposal_method"]);
    }

    #[test]
    fn identical_inputs_identical_outputs() {
        let data = data_for(RecordType::HazardEvaluation);
        let a = evaluate(RecordType::HazardEvaluation, None, &data);
        let b = evaluate(RecordType::HazardEvaluation, None, &data);
        assert_eq!(a, b);
    }
}
