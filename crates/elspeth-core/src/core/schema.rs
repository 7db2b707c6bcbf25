// elspeth-core/src/core/schema.rs
// ============================================================================
// Module: Elspeth Schema Contracts
// Description: Structural field contracts for plugin inputs and outputs.
// Purpose: Validate edge compatibility at graph-build time without compile-time types.
// Dependencies: crate::core::row, serde, serde_json
// ============================================================================

//! ## Overview
//! Plugin schemas are structural contracts: a list of `(name, type, required)`
//! fields plus a policy for extra fields. Compatibility is checked per edge
//! when the graph is validated: required consumer fields must be satisfiable
//! by the producer, field types must be assignable (numeric widening allowed,
//! string/int never), and `Forbid`-extra consumers reject producers with
//! surplus fields. A `Dynamic` contract bypasses static checking entirely.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::row::RowData;

// ============================================================================
// SECTION: Field Type
// ============================================================================

/// Structural field types for schema contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Boolean field.
    Bool,
    /// Integer field.
    Int,
    /// Floating-point field. Accepts integer producers (numeric widening).
    Float,
    /// String field.
    String,
    /// Nested object field.
    Object,
    /// Array field.
    Array,
    /// Any value; bypasses type checking for this field.
    Any,
}

impl FieldType {
    /// Returns true when a consumer of this type accepts a producer field
    /// of type `producer`.
    #[must_use]
    pub const fn accepts(self, producer: Self) -> bool {
        matches!(
            (self, producer),
            (Self::Any, _)
                | (Self::Float, Self::Float | Self::Int | Self::Any)
                | (Self::Bool, Self::Bool | Self::Any)
                | (Self::Int, Self::Int | Self::Any)
                | (Self::String, Self::String | Self::Any)
                | (Self::Object, Self::Object | Self::Any)
                | (Self::Array, Self::Array | Self::Any)
        )
    }

    /// Classifies a JSON value into a structural field type.
    #[must_use]
    pub fn of_value(value: &Value) -> Self {
        match value {
            Value::Bool(_) => Self::Bool,
            Value::Number(number) => {
                if number.is_i64() || number.is_u64() {
                    Self::Int
                } else {
                    Self::Float
                }
            }
            Value::String(_) => Self::String,
            Value::Object(_) => Self::Object,
            Value::Array(_) => Self::Array,
            Value::Null => Self::Any,
        }
    }

    /// Returns the stable lowercase label for the type.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "string",
            Self::Object => "object",
            Self::Array => "array",
            Self::Any => "any",
        }
    }
}

// ============================================================================
// SECTION: Field Spec
// ============================================================================

/// One declared field in a schema contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name.
    pub name: String,
    /// Declared structural type.
    pub field_type: FieldType,
    /// Whether the field must be present.
    pub required: bool,
}

impl FieldSpec {
    /// Creates a required field spec.
    #[must_use]
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
        }
    }

    /// Creates an optional field spec.
    #[must_use]
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
        }
    }
}

// ============================================================================
// SECTION: Extra Field Policy
// ============================================================================

/// Policy for fields not named by the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtraFields {
    /// Surplus producer fields are ignored.
    #[default]
    Allow,
    /// Surplus producer fields are rejected at validation time.
    Forbid,
}

// ============================================================================
// SECTION: Schema Contract
// ============================================================================

/// Structural schema contract declared by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaContract {
    /// Bypass static checking for this surface.
    Dynamic,
    /// Declared field list with an extra-field policy.
    Fields {
        /// Declared fields.
        fields: Vec<FieldSpec>,
        /// Policy for undeclared fields.
        extra: ExtraFields,
    },
}

/// One specific incompatibility between a producer and a consumer contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaIncompatibility {
    /// A required consumer field is absent from the producer contract.
    MissingField {
        /// Name of the missing field.
        field: String,
    },
    /// A field's producer type is not assignable to the consumer type.
    TypeMismatch {
        /// Name of the mismatched field.
        field: String,
        /// Type expected by the consumer.
        expected: FieldType,
        /// Type offered by the producer.
        found: FieldType,
    },
    /// The consumer forbids extras and the producer declares surplus fields.
    UnexpectedField {
        /// Name of the surplus field.
        field: String,
    },
}

impl std::fmt::Display for SchemaIncompatibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField { field } => {
                write!(f, "required field '{field}' is not produced upstream")
            }
            Self::TypeMismatch { field, expected, found } => write!(
                f,
                "field '{field}' has type {} but the consumer requires {}",
                found.label(),
                expected.label()
            ),
            Self::UnexpectedField { field } => {
                write!(f, "field '{field}' is not accepted by the consumer (extra = forbid)")
            }
        }
    }
}

impl SchemaContract {
    /// Builds a contract by observing the fields of a row (first-row
    /// observation). All observed fields are recorded as required.
    #[must_use]
    pub fn observe(row: &RowData) -> Self {
        let fields = row
            .iter()
            .map(|(name, value)| FieldSpec::required(name.clone(), FieldType::of_value(value)))
            .collect();
        Self::Fields {
            fields,
            extra: ExtraFields::Allow,
        }
    }

    /// Returns the declared spec for a field, if any.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        match self {
            Self::Dynamic => None,
            Self::Fields { fields, .. } => fields.iter().find(|spec| spec.name == name),
        }
    }

    /// Checks that this consumer contract is satisfiable by the `producer`
    /// output contract, collecting every incompatibility.
    #[must_use]
    pub fn incompatibilities_with(&self, producer: &Self) -> Vec<SchemaIncompatibility> {
        let (consumer_fields, extra) = match self {
            Self::Dynamic => return Vec::new(),
            Self::Fields { fields, extra } => (fields, *extra),
        };
        let producer_fields = match producer {
            Self::Dynamic => return Vec::new(),
            Self::Fields { fields, .. } => fields,
        };

        let mut found = Vec::new();
        for consumer_field in consumer_fields {
            match producer_fields.iter().find(|spec| spec.name == consumer_field.name) {
                None => {
                    if consumer_field.required {
                        found.push(SchemaIncompatibility::MissingField {
                            field: consumer_field.name.clone(),
                        });
                    }
                }
                Some(producer_field) => {
                    if !consumer_field.field_type.accepts(producer_field.field_type) {
                        found.push(SchemaIncompatibility::TypeMismatch {
                            field: consumer_field.name.clone(),
                            expected: consumer_field.field_type,
                            found: producer_field.field_type,
                        });
                    }
                }
            }
        }

        if extra == ExtraFields::Forbid {
            for producer_field in producer_fields {
                if !consumer_fields.iter().any(|spec| spec.name == producer_field.name) {
                    found.push(SchemaIncompatibility::UnexpectedField {
                        field: producer_field.name.clone(),
                    });
                }
            }
        }

        found
    }
}
