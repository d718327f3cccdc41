//! Compilation pipeline (verb module)
//!
//! `compile` runs the whole pipeline: parse, validate, rewrite, plan,
//! render, and package the render result into an [`ExprResult`].
//! `compile_unplanned` stops after the rewrite and hands back the tree,
//! for callers that inspect a calculation without producing SQL.

use std::collections::BTreeSet;

use crate::ast::{queries, Ast, ExprKind, NodeId};
use crate::context::CompileContext;
use crate::error::CompileError;
use crate::formula::Formula;
use crate::parser;
use crate::planner;
use crate::renderer::{self, RenderResult};
use crate::result::{ExprResult, PostFormula};
use crate::rewriter;
use crate::taxonomy::aggregation::AggregationDefinition;
use crate::taxonomy::{TaxonMap, TaxonType};
use crate::validator;

/// How many levels of computed-taxon references the parser follows
/// before giving up on a definition cycle.
pub const MAX_TAXON_REFERENCE_DEPTH: usize = 10;

/// Caller-facing knobs of one compilation.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Data sources the expression may read; `None` allows everything
    pub allowed_data_sources: Option<BTreeSet<String>>,
    /// Kind of taxon the calculation is for
    pub taxon_type: TaxonType,
    /// Slug of the taxon being compiled, when there is one
    pub taxon_slug: Option<String>,
    /// Aggregation forced by the caller
    pub aggregation: Option<AggregationDefinition>,
    /// The result feeds a subrequest and must stay simple
    pub subrequest_only: bool,
    /// Compile against comparison (benchmark) columns
    pub is_benchmark: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            allowed_data_sources: None,
            taxon_type: TaxonType::Metric,
            taxon_slug: None,
            aggregation: None,
            subrequest_only: false,
            is_benchmark: false,
        }
    }
}

impl CompileOptions {
    pub fn for_dimension() -> Self {
        Self { taxon_type: TaxonType::Dimension, ..Self::default() }
    }

    /// Build the context the passes consult.
    pub fn context<'a>(&self, taxons: &'a TaxonMap) -> CompileContext<'a> {
        CompileContext {
            taxons,
            allowed_data_sources: self.allowed_data_sources.clone(),
            taxon_type: self.taxon_type,
            taxon_slug: self.taxon_slug.clone(),
            aggregation: self.aggregation.clone(),
            subrequest_only: self.subrequest_only,
            is_benchmark: self.is_benchmark,
        }
    }
}

/// Compile an expression all the way to an [`ExprResult`].
pub fn compile(
    expression: &str,
    taxons: &TaxonMap,
    options: &CompileOptions,
) -> Result<ExprResult, CompileError> {
    let ctx = options.context(taxons);
    let (mut ast, node) = parser::parse(expression, &ctx)?;
    let location = ast.location(node);
    let root = ast.add(ExprKind::Root { value: node }, location);
    validator::validate(&ast, &ctx, root).raise_for_errors()?;
    let rewritten = rewriter::rewrite(&mut ast, &ctx, root);
    let planned = planner::plan(&mut ast, &ctx, rewritten);
    let rendered = renderer::render(&ast, &ctx, planned)?;
    Ok(adapt(&ast, &ctx, planned, rendered))
}

/// Parse, validate and rewrite an expression without planning it.
///
/// The returned node is the rewritten expression without the root
/// wrapper; pair it with the queries in [`crate::ast::queries`] to
/// inspect the calculation.
pub fn compile_unplanned(
    expression: &str,
    taxons: &TaxonMap,
    options: &CompileOptions,
) -> Result<(Ast, NodeId), CompileError> {
    let ctx = options.context(taxons);
    let (mut ast, node) = parser::parse(expression, &ctx)?;
    let location = ast.location(node);
    let root = ast.add(ExprKind::Root { value: node }, location);
    validator::validate(&ast, &ctx, root).raise_for_errors()?;
    let rewritten = rewriter::rewrite(&mut ast, &ctx, root);
    match ast.kind(rewritten) {
        ExprKind::Root { value } => {
            let value = *value;
            Ok((ast, value))
        }
        _ => Ok((ast, rewritten)),
    }
}

/// Package a render result and the tree queries into the public result.
fn adapt(
    ast: &Ast,
    ctx: &CompileContext<'_>,
    planned: NodeId,
    rendered: RenderResult,
) -> ExprResult {
    // The post formula reads the collected label when the root value was
    // collected into an aggregation, otherwise it is the value itself.
    let formula = match &rendered.label {
        Some(label) => Formula::column(label),
        None => rendered.formula,
    };
    let post_formula = PostFormula {
        formula,
        template: rendered.template,
        exclude_slugs: rendered.exclude_slugs,
    };
    ExprResult {
        pre_formulas: rendered.aggregations,
        post_formula: Some(post_formula),
        dimension_formulas: rendered.dimension_formulas,
        data_source_formula_templates: rendered.data_source_formula_templates,
        phase: queries::phase(ast, ctx, planned),
        used_taxons: queries::used_taxons(ast, ctx, planned),
        invalid: queries::invalid(ast, ctx, planned),
        return_data_sources: queries::return_data_sources(ast, ctx, planned),
        return_type: queries::return_type(ast, ctx, planned),
        template_slugs: queries::template_slugs(ast, ctx, planned),
        override_mappings: rendered.override_mappings,
    }
}

/// Convenience wrapper: compile the calculation of a taxon from the map.
pub fn compile_taxon(
    slug: &str,
    taxons: &TaxonMap,
    options: &CompileOptions,
) -> Result<ExprResult, CompileError> {
    let taxon = taxons.get(slug).ok_or_else(|| CompileError::Internal {
        message: format!("unknown taxon: {}", slug),
    })?;
    let expression = match &taxon.calculation {
        Some(calculation) => calculation.clone(),
        None => slug.to_string(),
    };
    let options = CompileOptions {
        taxon_type: taxon.taxon_type,
        taxon_slug: Some(slug.to_string()),
        ..options.clone()
    };
    compile(&expression, taxons, &options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::{render_formula, SqlDialect};
    use crate::phase::Phase;
    use crate::taxonomy::aggregation::AggregationType;

    fn taxons() -> TaxonMap {
        crate::taxonomy::parse_file("test_data/taxons.yaml").unwrap()
    }

    fn sql(formula: &Formula) -> String {
        render_formula(formula, SqlDialect::Snowflake)
    }

    #[test]
    fn test_compile_generic_cpm() {
        let taxons = taxons();
        let result = compile("(spend * 1000) / impressions", &taxons, &CompileOptions::default())
            .unwrap();

        assert_eq!(result.phase, Phase::MetricPost);
        assert!(!result.invalid);
        assert_eq!(result.pre_formulas.len(), 2);
        assert_eq!(sql(&result.pre_formulas[0].formula), "spend * 1000");
        assert_eq!(result.pre_formulas[0].label, "__1");
        assert_eq!(result.pre_formulas[0].aggregation.kind, AggregationType::Sum);
        assert_eq!(sql(&result.pre_formulas[1].formula), "impressions");
        assert_eq!(result.pre_formulas[1].label, "__2");

        let post = result.post_formula.unwrap();
        assert_eq!(sql(&post.formula), "__1 / NULLIF(__2, 0)");
        assert!(post.template.is_none());

        assert!(result.used_taxons.required_slugs.contains("spend"));
        assert!(result.used_taxons.required_slugs.contains("impressions"));
    }

    #[test]
    fn test_compile_computed_taxon_reference() {
        let taxons = taxons();
        let result = compile_taxon("generic_cpm", &taxons, &CompileOptions::default()).unwrap();
        assert_eq!(result.phase, Phase::MetricPost);
        assert_eq!(result.pre_formulas.len(), 2);
    }

    #[test]
    fn test_compile_dimension_merge() {
        let taxons = taxons();
        let result = compile(
            "merge(facebook_ads|gender, twitter|gender)",
            &taxons,
            &CompileOptions::for_dimension(),
        )
        .unwrap();

        assert_eq!(result.data_source_formula_templates.len(), 2);
        assert_eq!(result.data_source_formula_templates[0].data_source, "facebook_ads");
        assert_eq!(result.data_source_formula_templates[1].data_source, "twitter");
        assert_eq!(sql(&result.dimension_formulas[0].formula), "COALESCE(__1, __2)");
        assert_eq!(result.return_data_sources, [None].into_iter().collect());
    }

    #[test]
    fn test_compile_validation_error_carries_location() {
        let taxons = taxons();
        let err = compile("spend + gender", &taxons, &CompileOptions::default()).unwrap_err();
        match err {
            CompileError::Validation { errors } => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].contains("Occurred at position"), "got: {}", errors[0]);
                assert!(errors[0].contains("spend + gender"), "got: {}", errors[0]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_compile_cyclic_taxon_hits_depth_limit() {
        let taxons = taxons();
        let err = compile("cycle_a", &taxons, &CompileOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::MaxDepth { limit: MAX_TAXON_REFERENCE_DEPTH }));
        assert!(err.to_string().contains("maximum depth"));
    }

    #[test]
    fn test_compile_subrequest_rejects_metric_logic() {
        let taxons = taxons();
        let options = CompileOptions {
            subrequest_only: true,
            taxon_type: TaxonType::Dimension,
            ..CompileOptions::default()
        };
        let err = compile("spend / impressions", &taxons, &options).unwrap_err();
        match err {
            CompileError::Validation { errors } => {
                assert!(errors[0].contains("subrequest"), "got: {}", errors[0]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_compile_single_data_source_skips_coalesce() {
        let taxons = taxons();
        let options = CompileOptions {
            allowed_data_sources: Some(["facebook_ads".to_string()].into()),
            taxon_type: TaxonType::Dimension,
            ..CompileOptions::default()
        };
        let result =
            compile("merge(?facebook_ads|gender, ?twitter|gender)", &taxons, &options).unwrap();
        assert!(!result.invalid);
        assert_eq!(result.data_source_formula_templates.len(), 1);
        assert_eq!(result.data_source_formula_templates[0].data_source, "facebook_ads");
    }

    #[test]
    fn test_compile_constant_folds() {
        let taxons = taxons();
        let result = compile("1 + 10", &taxons, &CompileOptions::default()).unwrap();
        let post = result.post_formula.unwrap();
        assert_eq!(sql(&post.formula), "11");
        assert!(result.pre_formulas.is_empty());
    }
}
