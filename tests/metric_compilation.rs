//! Integration tests for metric calculations
//!
//! Covers the cut into pre-aggregation formulas and a post-aggregation
//! formula over their labels.

mod common;

use common::{compile_metric, load_taxons, post_sql, sql};
use tel::taxonomy::aggregation::AggregationType;
use tel::{compile, compile_taxon, CompileOptions, Phase};

#[test]
fn test_cpm_splits_into_two_aggregations() {
    let taxons = load_taxons();

    let result = compile_metric("(spend * 1000) / impressions", &taxons);

    assert_eq!(result.phase, Phase::MetricPost);
    assert!(!result.invalid);

    // each division side aggregates separately, then the post formula
    // divides the aggregated columns
    assert_eq!(result.pre_formulas.len(), 2);
    assert_eq!(sql(&result.pre_formulas[0].formula), "spend * 1000");
    assert_eq!(result.pre_formulas[0].aggregation.kind, AggregationType::Sum);
    assert_eq!(sql(&result.pre_formulas[1].formula), "impressions");
    assert_eq!(post_sql(&result), "__1 / NULLIF(__2, 0)");
}

#[test]
fn test_computed_taxon_expands_to_its_calculation() {
    let taxons = load_taxons();

    let direct = compile_metric("(spend * 1000) / impressions", &taxons);
    let through_taxon = compile_taxon("generic_cpm", &taxons, &CompileOptions::default()).unwrap();

    assert_eq!(direct.pre_formulas.len(), through_taxon.pre_formulas.len());
    assert_eq!(
        sql(&direct.pre_formulas[0].formula),
        sql(&through_taxon.pre_formulas[0].formula)
    );
    assert_eq!(post_sql(&direct), post_sql(&through_taxon));
}

#[test]
fn test_single_metric_taxon() {
    let taxons = load_taxons();

    let result = compile_metric("spend", &taxons);

    assert_eq!(result.pre_formulas.len(), 1);
    assert_eq!(sql(&result.pre_formulas[0].formula), "spend");
    assert_eq!(result.pre_formulas[0].aggregation.kind, AggregationType::Sum);
    assert_eq!(post_sql(&result), "__1");
    assert!(result.used_taxons.required_slugs.contains("spend"));
}

#[test]
fn test_addition_is_tolerant_to_nulls() {
    let taxons = load_taxons();

    let result = compile_metric("spend + impressions", &taxons);

    // both taxons aggregate in one pre formula; the missing-value guards
    // stay inside it
    assert_eq!(result.pre_formulas.len(), 1);
    assert_eq!(
        sql(&result.pre_formulas[0].formula),
        "COALESCE(spend, 0) + COALESCE(impressions, 0)"
    );
}

#[test]
fn test_optional_missing_taxon_drops_out() {
    let taxons = load_taxons();

    let result = compile_metric("?not_a_taxon + spend", &taxons);

    assert!(!result.invalid);
    assert_eq!(result.pre_formulas.len(), 1);
    assert_eq!(sql(&result.pre_formulas[0].formula), "spend");
    assert!(result.used_taxons.required_slugs.contains("spend"));
    assert!(!result.used_taxons.optional_slugs.contains("not_a_taxon"));
}

#[test]
fn test_benchmark_compilation_reads_comparison_columns() {
    let taxons = load_taxons();
    let options = CompileOptions { is_benchmark: true, ..CompileOptions::default() };

    let result = compile("spend", &taxons, &options).unwrap();

    assert_eq!(sql(&result.pre_formulas[0].formula), "\"comparison@spend\"");
}

#[test]
fn test_cumulative_window_carries_a_template() {
    let taxons = load_taxons();

    let result = compile_metric("cumulative(spend, date)", &taxons);

    let post = result.post_formula.unwrap();
    let template = post.template.expect("cumulative must produce a template");
    let rendered = sql(&template);
    assert!(rendered.contains("SUM(__1) OVER ("), "got: {}", rendered);
    assert!(rendered.contains("${dimension_slugs}"), "got: {}", rendered);
    // the time dimension itself never partitions the window
    assert!(post.exclude_slugs.contains("date"), "got: {:?}", post.exclude_slugs);
}
