// elspeth-core/tests/schema.rs
// ============================================================================
// Module: Schema Contract Tests
// Description: Tests for structural schema compatibility rules.
// ============================================================================
//! ## Overview
//! Validates field presence, type assignability, extra-field policy, and the
//! dynamic bypass used by edge validation.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use elspeth_core::ExtraFields;
use elspeth_core::FieldSpec;
use elspeth_core::FieldType;
use elspeth_core::SchemaContract;
use elspeth_core::SchemaIncompatibility;
use serde_json::Map;
use serde_json::json;

/// Builds a fields contract with the default extra policy.
fn fields(specs: Vec<FieldSpec>) -> SchemaContract {
    SchemaContract::Fields {
        fields: specs,
        extra: ExtraFields::Allow,
    }
}

// ============================================================================
// SECTION: Compatibility
// ============================================================================

/// Tests a satisfied consumer reports no incompatibilities.
#[test]
fn test_compatible_contracts_report_nothing() {
    let producer = fields(vec![
        FieldSpec::required("id", FieldType::Int),
        FieldSpec::required("value", FieldType::String),
    ]);
    let consumer = fields(vec![FieldSpec::required("id", FieldType::Int)]);

    assert!(consumer.incompatibilities_with(&producer).is_empty());
}

/// Tests a missing required field is reported by name.
#[test]
fn test_missing_required_field_is_reported() {
    let producer = fields(vec![FieldSpec::required("id", FieldType::Int)]);
    let consumer = fields(vec![FieldSpec::required("score", FieldType::Float)]);

    let found = consumer.incompatibilities_with(&producer);
    assert_eq!(found, vec![SchemaIncompatibility::MissingField {
        field: "score".to_string()
    }]);
}

/// Tests a missing optional field is not reported.
#[test]
fn test_missing_optional_field_is_not_reported() {
    let producer = fields(vec![FieldSpec::required("id", FieldType::Int)]);
    let consumer = fields(vec![FieldSpec::optional("score", FieldType::Float)]);

    assert!(consumer.incompatibilities_with(&producer).is_empty());
}

/// Tests numeric widening from int producer to float consumer is allowed.
#[test]
fn test_int_widens_to_float() {
    let producer = fields(vec![FieldSpec::required("score", FieldType::Int)]);
    let consumer = fields(vec![FieldSpec::required("score", FieldType::Float)]);

    assert!(consumer.incompatibilities_with(&producer).is_empty());
}

/// Tests string and int are never assignable.
#[test]
fn test_string_int_mismatch_is_reported() {
    let producer = fields(vec![FieldSpec::required("id", FieldType::String)]);
    let consumer = fields(vec![FieldSpec::required("id", FieldType::Int)]);

    let found = consumer.incompatibilities_with(&producer);
    assert_eq!(found, vec![SchemaIncompatibility::TypeMismatch {
        field: "id".to_string(),
        expected: FieldType::Int,
        found: FieldType::String,
    }]);
}

/// Tests forbid-extra consumers reject surplus producer fields.
#[test]
fn test_forbid_extra_rejects_surplus_fields() {
    let producer = fields(vec![
        FieldSpec::required("id", FieldType::Int),
        FieldSpec::required("debug", FieldType::String),
    ]);
    let consumer = SchemaContract::Fields {
        fields: vec![FieldSpec::required("id", FieldType::Int)],
        extra: ExtraFields::Forbid,
    };

    let found = consumer.incompatibilities_with(&producer);
    assert_eq!(found, vec![SchemaIncompatibility::UnexpectedField {
        field: "debug".to_string()
    }]);
}

/// Tests dynamic contracts bypass static checking on either side.
#[test]
fn test_dynamic_contract_bypasses_checking() {
    let producer = SchemaContract::Dynamic;
    let consumer = fields(vec![FieldSpec::required("anything", FieldType::Object)]);

    assert!(consumer.incompatibilities_with(&producer).is_empty());
    assert!(SchemaContract::Dynamic.incompatibilities_with(&consumer).is_empty());
}

// ============================================================================
// SECTION: First-Row Observation
// ============================================================================

/// Tests observing a row captures field names and structural types.
#[test]
fn test_observe_captures_field_types() {
    let mut row = Map::new();
    row.insert("id".to_string(), json!(7));
    row.insert("name".to_string(), json!("ada"));
    row.insert("ratio".to_string(), json!(0.5));

    let contract = SchemaContract::observe(&row);

    assert_eq!(contract.field("id").map(|spec| spec.field_type), Some(FieldType::Int));
    assert_eq!(contract.field("name").map(|spec| spec.field_type), Some(FieldType::String));
    assert_eq!(contract.field("ratio").map(|spec| spec.field_type), Some(FieldType::Float));
}
