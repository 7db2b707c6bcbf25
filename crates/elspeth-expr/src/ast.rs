// elspeth-expr/src/ast.rs
// ============================================================================
// Module: Predicate Syntax Tree
// Description: Expression tree and runtime value types.
// Purpose: Represent parsed predicates independently of the source text.
// Dependencies: crate::eval
// ============================================================================

//! ## Overview
//! The syntax tree is deliberately small. Every node is either a literal, a
//! field access, a comparison, or a boolean combinator; there is nothing else
//! to represent, which is what keeps the evaluator auditable.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde_json::Map;
use serde_json::Value;

use crate::eval::EvalError;
use crate::eval::evaluate;

// ============================================================================
// SECTION: Comparison Operators
// ============================================================================

/// Comparison operators supported by the predicate language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// Equality.
    Eq,
    /// Inequality.
    Ne,
    /// Less-than.
    Lt,
    /// Less-than-or-equal.
    Le,
    /// Greater-than.
    Gt,
    /// Greater-than-or-equal.
    Ge,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        };
        f.write_str(symbol)
    }
}

// ============================================================================
// SECTION: Expression Tree
// ============================================================================

/// One node of a parsed predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal value.
    Literal(ExprValue),
    /// Access to a named row field.
    Field(String),
    /// Binary comparison.
    Compare {
        /// Comparison operator.
        op: CmpOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Logical conjunction.
    And(Vec<Expr>),
    /// Logical disjunction.
    Or(Vec<Expr>),
    /// Logical negation.
    Not(Box<Expr>),
}

// ============================================================================
// SECTION: Runtime Values
// ============================================================================

/// Typed value produced while evaluating a predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprValue {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating-point value.
    Float(f64),
    /// String value.
    Str(String),
}

impl ExprValue {
    /// Returns the stable lowercase label for the value's type.
    #[must_use]
    pub const fn type_label(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
        }
    }
}

// ============================================================================
// SECTION: Predicate
// ============================================================================

/// A parsed predicate together with its original source text.
///
/// # Invariants
/// - The tree is fixed at parse time; evaluation never consults the source
///   text again.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// Original source text, kept for audit reasons.
    source: String,
    /// Parsed expression tree.
    expr: Expr,
}

impl Predicate {
    /// Creates a predicate from its parsed parts.
    #[must_use]
    pub const fn new(source: String, expr: Expr) -> Self {
        Self {
            source,
            expr,
        }
    }

    /// Returns the original source text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns the parsed expression tree.
    #[must_use]
    pub const fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Evaluates the predicate against a row document.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError`] when a field is missing, operand types are
    /// incomparable, or the result is not a boolean.
    pub fn evaluate(&self, row: &Map<String, Value>) -> Result<bool, EvalError> {
        match evaluate(&self.expr, row)? {
            ExprValue::Bool(result) => Ok(result),
            other => Err(EvalError::NotABoolean {
                found: other.type_label(),
            }),
        }
    }
}
