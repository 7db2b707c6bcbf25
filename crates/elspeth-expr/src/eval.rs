// elspeth-expr/src/eval.rs
// ============================================================================
// Module: Predicate Evaluation
// Description: Typed evaluation of parsed predicates over row documents.
// Purpose: Evaluate sandboxed predicates deterministically, failing closed.
// Dependencies: crate::ast, serde_json
// ============================================================================

//! ## Overview
//! Evaluation walks the expression tree against a row document. Numeric
//! comparisons widen int to float; every other cross-type comparison is a
//! type error rather than a silent false. Missing fields are errors, which
//! keeps gate decisions explicit in the audit trail.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde_json::Map;
use serde_json::Value;

use crate::ast::CmpOp;
use crate::ast::Expr;
use crate::ast::ExprValue;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while evaluating a predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// The row has no field with the requested name.
    UnknownField {
        /// Name of the missing field.
        name: String,
    },
    /// The field value cannot be represented in the predicate language.
    UnsupportedValue {
        /// Name of the offending field.
        name: String,
    },
    /// Operand types cannot be compared.
    TypeMismatch {
        /// Comparison operator applied.
        op: &'static str,
        /// Left operand type label.
        left: &'static str,
        /// Right operand type label.
        right: &'static str,
    },
    /// A boolean operator received a non-boolean operand.
    NotABoolean {
        /// Type label of the offending value.
        found: &'static str,
    },
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownField {
                name,
            } => write!(f, "row has no field `{name}`"),
            Self::UnsupportedValue {
                name,
            } => write!(f, "field `{name}` holds a value the predicate language cannot compare"),
            Self::TypeMismatch {
                op,
                left,
                right,
            } => write!(f, "cannot apply `{op}` to {left} and {right}"),
            Self::NotABoolean {
                found,
            } => write!(f, "predicate must evaluate to a boolean, got {found}"),
        }
    }
}

impl std::error::Error for EvalError {}

// ============================================================================
// SECTION: Evaluation
// ============================================================================

/// Evaluates an expression against a row document.
///
/// # Errors
///
/// Returns [`EvalError`] when a field is missing, a value is unsupported, or
/// operand types are incomparable.
pub fn evaluate(expr: &Expr, row: &Map<String, Value>) -> Result<ExprValue, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Field(name) => field_value(name, row),
        Expr::Compare {
            op,
            left,
            right,
        } => {
            let left_value = evaluate(left, row)?;
            let right_value = evaluate(right, row)?;
            compare(*op, &left_value, &right_value).map(ExprValue::Bool)
        }
        Expr::And(operands) => {
            for operand in operands {
                if !boolean(evaluate(operand, row)?)? {
                    return Ok(ExprValue::Bool(false));
                }
            }
            Ok(ExprValue::Bool(true))
        }
        Expr::Or(operands) => {
            for operand in operands {
                if boolean(evaluate(operand, row)?)? {
                    return Ok(ExprValue::Bool(true));
                }
            }
            Ok(ExprValue::Bool(false))
        }
        Expr::Not(inner) => {
            let value = boolean(evaluate(inner, row)?)?;
            Ok(ExprValue::Bool(!value))
        }
    }
}

/// Looks up a field and converts it to a predicate value.
fn field_value(name: &str, row: &Map<String, Value>) -> Result<ExprValue, EvalError> {
    let value = row.get(name).ok_or_else(|| EvalError::UnknownField {
        name: name.to_string(),
    })?;
    match value {
        Value::Null => Ok(ExprValue::Null),
        Value::Bool(flag) => Ok(ExprValue::Bool(*flag)),
        Value::Number(number) => number.as_i64().map_or_else(
            || {
                number.as_f64().map(ExprValue::Float).ok_or_else(|| EvalError::UnsupportedValue {
                    name: name.to_string(),
                })
            },
            |int| Ok(ExprValue::Int(int)),
        ),
        Value::String(text) => Ok(ExprValue::Str(text.clone())),
        Value::Array(_) | Value::Object(_) => Err(EvalError::UnsupportedValue {
            name: name.to_string(),
        }),
    }
}

/// Coerces a value to a boolean operand.
fn boolean(value: ExprValue) -> Result<bool, EvalError> {
    match value {
        ExprValue::Bool(flag) => Ok(flag),
        other => Err(EvalError::NotABoolean {
            found: other.type_label(),
        }),
    }
}

/// Applies a comparison operator to two typed values.
fn compare(op: CmpOp, left: &ExprValue, right: &ExprValue) -> Result<bool, EvalError> {
    match (left, right) {
        (ExprValue::Int(a), ExprValue::Int(b)) => Ok(compare_ord(op, a.cmp(b))),
        (ExprValue::Float(a), ExprValue::Float(b)) => compare_floats(op, *a, *b),
        (ExprValue::Int(a), ExprValue::Float(b)) => compare_floats(op, int_to_float(*a), *b),
        (ExprValue::Float(a), ExprValue::Int(b)) => compare_floats(op, *a, int_to_float(*b)),
        (ExprValue::Str(a), ExprValue::Str(b)) => match op {
            CmpOp::Eq => Ok(a == b),
            CmpOp::Ne => Ok(a != b),
            CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => Ok(compare_ord(op, a.cmp(b))),
        },
        (ExprValue::Bool(a), ExprValue::Bool(b)) => match op {
            CmpOp::Eq => Ok(a == b),
            CmpOp::Ne => Ok(a != b),
            CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => Err(type_mismatch(op, left, right)),
        },
        (ExprValue::Null, ExprValue::Null) => match op {
            CmpOp::Eq => Ok(true),
            CmpOp::Ne => Ok(false),
            CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => Err(type_mismatch(op, left, right)),
        },
        (ExprValue::Null, _) | (_, ExprValue::Null) => match op {
            CmpOp::Eq => Ok(false),
            CmpOp::Ne => Ok(true),
            CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => Err(type_mismatch(op, left, right)),
        },
        _ => Err(type_mismatch(op, left, right)),
    }
}

/// Builds a type-mismatch error for a comparison.
fn type_mismatch(op: CmpOp, left: &ExprValue, right: &ExprValue) -> EvalError {
    let symbol = match op {
        CmpOp::Eq => "==",
        CmpOp::Ne => "!=",
        CmpOp::Lt => "<",
        CmpOp::Le => "<=",
        CmpOp::Gt => ">",
        CmpOp::Ge => ">=",
    };
    EvalError::TypeMismatch {
        op: symbol,
        left: left.type_label(),
        right: right.type_label(),
    }
}

/// Maps an ordering onto a comparison operator result.
const fn compare_ord(op: CmpOp, ordering: std::cmp::Ordering) -> bool {
    match op {
        CmpOp::Eq => ordering.is_eq(),
        CmpOp::Ne => ordering.is_ne(),
        CmpOp::Lt => ordering.is_lt(),
        CmpOp::Le => ordering.is_le(),
        CmpOp::Gt => ordering.is_gt(),
        CmpOp::Ge => ordering.is_ge(),
    }
}

/// Compares two floats, treating NaN operands as a type error.
fn compare_floats(op: CmpOp, a: f64, b: f64) -> Result<bool, EvalError> {
    if a.is_nan() || b.is_nan() {
        return Err(EvalError::TypeMismatch {
            op: "<=>",
            left: "nan",
            right: "nan",
        });
    }
    Ok(match op {
        CmpOp::Eq => (a - b).abs() == 0.0,
        CmpOp::Ne => (a - b).abs() != 0.0,
        CmpOp::Lt => a < b,
        CmpOp::Le => a <= b,
        CmpOp::Gt => a > b,
        CmpOp::Ge => a >= b,
    })
}

/// Converts an integer operand to a float for widening comparisons.
#[allow(clippy::cast_precision_loss, reason = "widening follows the schema contract rules")]
const fn int_to_float(value: i64) -> f64 {
    value as f64
}
