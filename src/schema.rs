use crate::record::RecordType;

/// Required data fields per record type. Every listed field must carry a
/// non-empty value before a record of that type can be confirmed. New record
/// types are added here, not in the evaluator.
pub const REQUIRED_FIELDS: &[(RecordType, &[&str])] = &[
    (
        RecordType::ChemicalSpray,
        &[
            "crop_variety",
            "plot_or_row",
            "growth_stage",
            "chemical_name",
            "dosage",
            "application_rate",
            "spraying_apparatus_and_method",
            "harvesting_period_days",
            "weather_condition",
            "sprayed_by",
        ],
    ),
    (
        RecordType::FertilizerApplication,
        &[
            "crop_variety",
            "plot_or_row",
            "fertilizer_name",
            "input_dealer",
            "rate",
            "farmer_perspective",
            "applied_by",
        ],
    ),
    (
        RecordType::Irrigation,
        &[
            "crop",
            "variety",
            "plot_or_row",
            "water_amount",
            "rainfall",
            "farmer_perspective",
        ],
    ),
    (
        RecordType::SeedPurchaseAndSowing,
        &[
            "crop_name",
            "variety",
            "shop_name_and_address",
            "amount_or_number",
            "place_of_sowing",
        ],
    ),
    (
        RecordType::HarvestAndPackaging,
        &[
            "crop_variety",
            "planting_date",
            "plot_number",
            "harvesting_date",
            "packaging_date",
            "trade_mark",
            "number_of_packs",
            "destination",
            "product_registration_number",
            "farmer_perspective",
        ],
    ),
    (
        RecordType::ChemicalPurchase,
        &[
            "date_of_buying",
            "chemical_name",
            "quantity",
            "place_of_buying",
            "product_registration_number",
            "production_date",
            "expiry_date",
        ],
    ),
    (
        RecordType::ChemicalDisposal,
        &["chemical_name", "disposal_date", "disposal_method"],
    ),
    (
        RecordType::PostHarvestChemicalUsage,
        &[
            "chemical_name",
            "container_size",
            "solution_rate",
            "application_method",
            "chemical_quantity",
            "solution_amount_added",
            "application_time",
            "chemical_type",
            "farmer_perspective",
            "signature",
        ],
    ),
    (
        RecordType::HazardEvaluation,
        &[
            "crop_name",
            "cause_of_hazard",
            "evaluation",
            "remedies",
            "signature",
        ],
    ),
    (
        RecordType::SprayingToolSanitation,
        &[
            "cleaning_place",
            "frequency",
            "duty_and_responsibility",
            "cleaning_method",
        ],
    ),
    (
        RecordType::TrainingUpdate,
        &[
            "name",
            "chemical_usage",
            "fertilizer_usage",
            "irrigation",
            "harvesting",
            "grading_packaging",
            "sanitation",
            "personal_hygiene",
            "repair_and_maintenance",
            "personal_evaluation",
        ],
    ),
    (
        RecordType::CorrectionReport,
        &[
            "date_reported",
            "problem",
            "source_and_reason",
            "action_taken",
            "signature",
            "date_resolved",
        ],
    ),
    (RecordType::Unknown, &[]),
];

/// Look up the required field names for `record_type`.
///
/// `unknown` maps to the empty list, so unclassified activity never triggers
/// a field follow-up on its own.
pub fn required_fields(record_type: RecordType) -> &'static [&'static str] {
    REQUIRED_FIELDS
        .iter()
        .find(|(ty, _)| *ty == record_type)
        .map(|(_, fields)| *fields)
        .unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_record_type_has_a_registry_entry() {
        for ty in [
            RecordType::SeedPurchaseAndSowing,
            RecordType::HazardEvaluation,
            RecordType::ChemicalSpray,
            RecordType::ChemicalPurchase,
            RecordType::ChemicalDisposal,
            RecordType::PostHarvestChemicalUsage,
            RecordType::FertilizerApplication,
            RecordType::Irrigation,
            RecordType::SprayingToolSanitation,
            RecordType::HarvestAndPackaging,
            RecordType::TrainingUpdate,
            RecordType::CorrectionReport,
            RecordType::Unknown,
        ] {
            assert!(
                REQUIRED_FIELDS.iter().any(|(t, _)| *t == ty),
                "missing registry entry for {ty:?}"
            );
        }
    }

    #[test]
    fn chemical_spray_requires_ten_fields() {
        assert_eq!(required_fields(RecordType::ChemicalSpray).len(), 10);
    }

    #[test]
    fn unknown_requires_nothing() {
        assert!(required_fields(RecordType::Unknown).is_empty());
    }

    #[test]
    fn irrigation_lists_water_amount() {
        assert!(required_fields(RecordType::Irrigation).contains(&"water_amount"));
    }
}
