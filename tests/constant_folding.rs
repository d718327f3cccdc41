//! Integration tests for constant folding
//!
//! Constant arithmetic folds at compile time; anything that could divide
//! by zero keeps its runtime guard instead.

mod common;

use common::{compile_metric, load_taxons, post_sql, sql};

#[test]
fn test_integer_addition_folds() {
    let taxons = load_taxons();

    let result = compile_metric("1 + 10", &taxons);

    assert!(result.pre_formulas.is_empty());
    assert_eq!(post_sql(&result), "11");
}

#[test]
fn test_nested_arithmetic_folds() {
    let taxons = load_taxons();

    let result = compile_metric("1 * (10 - 123)", &taxons);

    assert_eq!(post_sql(&result), "-113");
}

#[test]
fn test_division_by_zero_never_folds() {
    let taxons = load_taxons();

    let result = compile_metric("1 / 0", &taxons);

    assert_eq!(post_sql(&result), "1 / NULLIF(0, 0)");
}

#[test]
fn test_taxon_division_keeps_guard() {
    let taxons = load_taxons();

    let result = compile_metric("spend / impressions", &taxons);

    assert_eq!(post_sql(&result), "__1 / NULLIF(__2, 0)");
}

#[test]
fn test_constant_mixes_with_aggregated_taxon() {
    let taxons = load_taxons();

    let result = compile_metric("spend + 5", &taxons);

    // the constant joins in after aggregation
    assert_eq!(result.pre_formulas.len(), 1);
    assert_eq!(sql(&result.pre_formulas[0].formula), "spend");
    assert_eq!(post_sql(&result), "COALESCE(__1, 0) + COALESCE(5, 0)");
}

#[test]
fn test_boolean_conditions_fold() {
    let taxons = load_taxons();

    let result = compile_metric("iff(1 < 2, spend, impressions)", &taxons);

    // the comparison folds to a boolean constant before rendering
    assert_eq!(post_sql(&result), "__1");
    let rendered = sql(&result.pre_formulas[0].formula);
    assert!(rendered.starts_with("CASE WHEN TRUE THEN spend"), "got: {}", rendered);
}
