// elspeth-expr/tests/parse.rs
// ============================================================================
// Module: Predicate Parser Tests
// Description: Tests for the closed predicate grammar.
// ============================================================================
//! ## Overview
//! Validates accepted syntax, positioned rejections, and grammar limits.

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

use elspeth_expr::CmpOp;
use elspeth_expr::Expr;
use elspeth_expr::ExprValue;
use elspeth_expr::ParseError;
use elspeth_expr::parse_predicate;

// ============================================================================
// SECTION: Accepted Syntax
// ============================================================================

/// Tests the canonical threshold predicate parses.
#[test]
fn test_threshold_predicate_parses() {
    let predicate = parse_predicate("row['value'] > 50").unwrap();

    assert_eq!(predicate.expr(), &Expr::Compare {
        op: CmpOp::Gt,
        left: Box::new(Expr::Field("value".to_string())),
        right: Box::new(Expr::Literal(ExprValue::Int(50))),
    });
}

/// Tests bare identifiers parse as field access.
#[test]
fn test_bare_identifier_is_field_access() {
    let predicate = parse_predicate("status == 'active'").unwrap();

    assert_eq!(predicate.expr(), &Expr::Compare {
        op: CmpOp::Eq,
        left: Box::new(Expr::Field("status".to_string())),
        right: Box::new(Expr::Literal(ExprValue::Str("active".to_string()))),
    });
}

/// Tests function forms are equivalent to infix operators.
#[test]
fn test_function_forms_parse() {
    let infix = parse_predicate("a && b || !c").unwrap();
    let functions = parse_predicate("or(and(a, b), not(c))").unwrap();

    assert_eq!(infix.expr(), functions.expr());
}

/// Tests parentheses group explicitly.
#[test]
fn test_parentheses_group() {
    let predicate = parse_predicate("(a || b) && c").unwrap();

    assert_eq!(predicate.expr(), &Expr::And(vec![
        Expr::Or(vec![Expr::Field("a".to_string()), Expr::Field("b".to_string())]),
        Expr::Field("c".to_string()),
    ]));
}

/// Tests double-quoted field access parses.
#[test]
fn test_double_quoted_field_access() {
    let predicate = parse_predicate("row[\"score\"] >= 0.5").unwrap();

    assert_eq!(predicate.expr(), &Expr::Compare {
        op: CmpOp::Ge,
        left: Box::new(Expr::Field("score".to_string())),
        right: Box::new(Expr::Literal(ExprValue::Float(0.5))),
    });
}

// ============================================================================
// SECTION: Rejections
// ============================================================================

/// Tests empty input is rejected.
#[test]
fn test_empty_input_is_rejected() {
    assert_eq!(parse_predicate("   "), Err(ParseError::EmptyInput));
}

/// Tests trailing input is rejected with its position.
#[test]
fn test_trailing_input_is_rejected() {
    let result = parse_predicate("a == 1 b");

    assert!(matches!(result, Err(ParseError::TrailingInput { position: 7 })));
}

/// Tests characters outside the alphabet are rejected.
#[test]
fn test_unknown_characters_are_rejected() {
    let result = parse_predicate("value @ 3");

    assert!(matches!(result, Err(ParseError::UnexpectedCharacter { character: '@', .. })));
}

/// Tests method-call syntax is not part of the grammar.
#[test]
fn test_method_calls_are_rejected() {
    let result = parse_predicate("row.keys() == 1");

    assert!(matches!(result, Err(ParseError::UnexpectedCharacter { character: '.', .. })));
}

/// Tests unterminated strings are rejected.
#[test]
fn test_unterminated_string_is_rejected() {
    let result = parse_predicate("status == 'active");

    assert!(matches!(result, Err(ParseError::UnterminatedString { .. })));
}

/// Tests single `&` and `=` are rejected.
#[test]
fn test_single_ampersand_and_equals_are_rejected() {
    assert!(matches!(
        parse_predicate("a & b"),
        Err(ParseError::UnexpectedCharacter { character: '&', .. })
    ));
    assert!(matches!(
        parse_predicate("a = b"),
        Err(ParseError::UnexpectedCharacter { character: '=', .. })
    ));
}

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Tests the nesting depth limit is enforced.
#[test]
fn test_nesting_limit_is_enforced() {
    let deep = format!("{}a{}", "(".repeat(64), ")".repeat(64));

    let result = parse_predicate(&deep);
    assert!(matches!(result, Err(ParseError::NestingTooDeep { .. })));
}

/// Tests the input size limit is enforced.
#[test]
fn test_size_limit_is_enforced() {
    let oversized = format!("a == '{}'", "x".repeat(elspeth_expr::MAX_EXPR_INPUT_BYTES));

    let result = parse_predicate(&oversized);
    assert!(matches!(result, Err(ParseError::InputTooLarge { .. })));
}
