// elspeth-expr/src/lib.rs
// ============================================================================
// Module: Elspeth Predicate Language
// Description: Sandboxed predicate expressions for config-driven gates.
// Purpose: Parse once at graph build, evaluate safely against row documents.
// Dependencies: crate::{ast, eval, parse}
// ============================================================================

//! ## Overview
//!
//! Config-driven gates evaluate author-supplied predicates such as
//! `row['value'] > 50 && status == 'active'` against row documents. The
//! language is a small closed grammar: literals, field access, comparison,
//! and boolean composition. There is no reflective access, no method calls,
//! and no assignment; unknown constructs are parse errors at config time, so
//! a predicate that loads is a predicate that cannot escape the sandbox.
//!
//! ### Grammar (informal)
//! - **Field access**: `row['field']`, `row["field"]`, or a bare identifier
//! - **Literals**: integers, floats, single- or double-quoted strings,
//!   `true`, `false`, `null`
//! - **Comparison**: `== != < <= > >=`
//! - **Boolean operators**: infix `a && b`, `a || b`, `!a`; function forms
//!   `and(a, b)`, `or(a, b)`, `not(a)`
//! - **Parentheses**: `( ... )` for explicit grouping
//!
//! ### Example
//!
//! ```
//! use elspeth_expr::parse_predicate;
//! use serde_json::json;
//!
//! let predicate = parse_predicate("row['value'] > 50").unwrap();
//! let row = json!({"value": 100});
//! let object = row.as_object().unwrap();
//! assert!(predicate.evaluate(object).unwrap());
//! ```

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod ast;
pub mod eval;
pub mod parse;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use ast::CmpOp;
pub use ast::Expr;
pub use ast::ExprValue;
pub use ast::Predicate;
pub use eval::EvalError;
pub use parse::MAX_EXPR_INPUT_BYTES;
pub use parse::MAX_EXPR_NESTING;
pub use parse::ParseError;
pub use parse::parse_predicate;
