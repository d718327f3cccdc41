//! Shared test utilities for integration tests

use tel::{compile, render_formula, CompileOptions, ExprResult, Formula, SqlDialect, TaxonMap};

/// Load the taxon fixture from the test_data directory
pub fn load_taxons() -> TaxonMap {
    tel::taxonomy::parse_file("test_data/taxons.yaml")
        .unwrap_or_else(|e| panic!("Failed to load test_data/taxons.yaml: {}", e))
}

/// Compile with default (metric) options
pub fn compile_metric(expression: &str, taxons: &TaxonMap) -> ExprResult {
    compile(expression, taxons, &CompileOptions::default())
        .unwrap_or_else(|e| panic!("Failed to compile \"{}\": {}", expression, e))
}

/// Compile with dimension options
pub fn compile_dimension(expression: &str, taxons: &TaxonMap) -> ExprResult {
    compile(expression, taxons, &CompileOptions::for_dimension())
        .unwrap_or_else(|e| panic!("Failed to compile \"{}\": {}", expression, e))
}

/// Render a formula to Snowflake SQL
pub fn sql(formula: &Formula) -> String {
    render_formula(formula, SqlDialect::Snowflake)
}

/// Render the post formula to Snowflake SQL, without dimension substitution
pub fn post_sql(result: &ExprResult) -> String {
    result
        .post_formula
        .as_ref()
        .map(|post| post.render(SqlDialect::Snowflake, &Default::default()))
        .unwrap_or_else(|| panic!("expected a post formula"))
}
