//! Integration tests for compile errors
//!
//! Every validation message carries the position, line and source
//! expression it occurred in.

mod common;

use common::load_taxons;
use tel::{compile, CompileError, CompileOptions, TaxonType, MAX_TAXON_REFERENCE_DEPTH};

fn compile_err(expression: &str, options: &CompileOptions) -> CompileError {
    let taxons = load_taxons();
    compile(expression, &taxons, options)
        .err()
        .unwrap_or_else(|| panic!("expected \"{}\" to fail", expression))
}

fn validation_messages(err: CompileError) -> Vec<String> {
    match err {
        CompileError::Validation { errors } => errors,
        other => panic!("expected validation errors, got {:?}", other),
    }
}

#[test]
fn test_missing_taxon() {
    let errors = validation_messages(compile_err("not_a_taxon", &CompileOptions::default()));
    assert!(errors[0].contains("Taxon \"not_a_taxon\" not found"), "got: {}", errors[0]);
    assert!(errors[0].contains("Occurred at position 1, line 1"), "got: {}", errors[0]);
}

#[test]
fn test_arithmetic_over_text_dimension() {
    let errors = validation_messages(compile_err("spend + gender", &CompileOptions::default()));
    assert_eq!(errors.len(), 1);
    assert!(
        errors[0].contains("Operand 2 in addition expression must be of type: number"),
        "got: {}",
        errors[0]
    );
    assert!(errors[0].contains("in expression \"spend + gender\""), "got: {}", errors[0]);
}

#[test]
fn test_syntax_error_is_not_a_validation_error() {
    let err = compile_err("spend +", &CompileOptions::default());
    assert!(matches!(err, CompileError::Syntax { .. }), "got: {:?}", err);
}

#[test]
fn test_cyclic_taxon_references() {
    let err = compile_err("cycle_a", &CompileOptions::default());
    assert!(matches!(err, CompileError::MaxDepth { .. }));
    assert_eq!(
        err.to_string(),
        format!(
            "Reached maximum depth of taxon references ({}).",
            MAX_TAXON_REFERENCE_DEPTH
        )
    );
}

#[test]
fn test_metric_calculation_for_dimension_taxon() {
    let options = CompileOptions { taxon_type: TaxonType::Dimension, ..CompileOptions::default() };
    let errors = validation_messages(compile_err("spend / impressions", &options));
    assert!(
        errors[0].contains("Taxon is of type dimension, but calculation is for type metric"),
        "got: {}",
        errors[0]
    );
}

#[test]
fn test_subrequest_rejects_post_aggregation_logic() {
    let options = CompileOptions {
        subrequest_only: true,
        taxon_type: TaxonType::Dimension,
        ..CompileOptions::default()
    };
    let errors = validation_messages(compile_err("spend / impressions", &options));
    assert!(errors[0].contains("subrequest"), "got: {}", errors[0]);
}

#[test]
fn test_unknown_function() {
    let err = compile_err("frobnicate(spend)", &CompileOptions::default());
    assert!(matches!(err, CompileError::Syntax { .. }), "got: {:?}", err);
}

#[test]
fn test_date_trunc_rejects_unknown_unit() {
    let errors = validation_messages(compile_err(
        "date_trunc(facebook_ads|date, 'CENTURY')",
        &CompileOptions::for_dimension(),
    ));
    assert!(errors[0].contains("CENTURY") || errors[0].contains("date_trunc"), "got: {}", errors[0]);
}
