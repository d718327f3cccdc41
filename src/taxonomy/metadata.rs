//! Calculation metadata
//!
//! Dependency tracking for computed taxons: which taxons a calculation
//! reads, which of those are raw columns, which data sources they come
//! from, and what the calculation aggregates to. Query planners use this
//! to decide what to fetch before compiling anything.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::ast::{queries, Ast, ExprKind, NodeId};
use crate::compiler::{self, CompileOptions};
use crate::error::CompileError;
use crate::phase::Phase;
use crate::taxonomy::aggregation::AggregationDefinition;
use crate::taxonomy::{Taxon, TaxonMap};

/// Metadata derived from a taxon's calculation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaxonTelMetadata {
    /// Data sources referenced by the raw taxons, sorted
    pub used_data_sources: Vec<String>,
    /// Required raw (non-computed) taxon slugs, sorted
    pub required_raw_taxons: Vec<String>,
    /// Optional raw (non-computed) taxon slugs, sorted
    pub optional_raw_taxons: Vec<String>,
    /// Every taxon slug the calculation reads, sorted
    pub used_taxons: Vec<String>,
    pub phase: Phase,
    /// Whether the calculation gives enough hints to be usable as a
    /// metric in a comparison query
    pub can_compute_comparison: bool,
    /// Aggregation deduced from the calculation, or declared by a raw
    /// taxon
    pub aggregation_definition: Option<AggregationDefinition>,
}

/// Calculate metadata for one taxon.
///
/// A raw taxon reports its declared aggregation and no dependencies; a
/// computed taxon has its calculation compiled (without planning) and
/// inspected. The taxon's own slug never appears in the used-taxon sets.
pub fn taxon_metadata(taxon: &Taxon, taxons: &TaxonMap) -> Result<TaxonTelMetadata, CompileError> {
    let Some(calculation) = &taxon.calculation else {
        return Ok(TaxonTelMetadata {
            used_data_sources: Vec::new(),
            required_raw_taxons: Vec::new(),
            optional_raw_taxons: Vec::new(),
            used_taxons: Vec::new(),
            phase: Phase::Any,
            can_compute_comparison: false,
            aggregation_definition: taxon.aggregation.clone(),
        });
    };

    let options = CompileOptions {
        taxon_type: taxon.taxon_type,
        taxon_slug: Some(taxon.slug.clone()),
        ..CompileOptions::default()
    };
    let ctx = options.context(taxons);
    let (ast, node) = compiler::compile_unplanned(calculation, taxons, &options)?;

    let mut used = queries::used_taxons(&ast, &ctx, node);
    used.required_slugs.remove(&taxon.slug);
    used.optional_slugs.remove(&taxon.slug);

    let is_raw = |slug: &String| {
        taxons
            .get(slug)
            .map(|taxon| !taxon.is_computed())
            .unwrap_or(false)
    };
    let required_raw: BTreeSet<String> =
        used.required_slugs.iter().filter(|slug| is_raw(slug)).cloned().collect();
    let optional_raw: BTreeSet<String> =
        used.optional_slugs.iter().filter(|slug| is_raw(slug)).cloned().collect();
    let used_data_sources: BTreeSet<String> = required_raw
        .union(&optional_raw)
        .filter_map(|slug| slug.split_once('|').map(|(ns, _)| ns.to_string()))
        .collect();

    Ok(TaxonTelMetadata {
        used_data_sources: used_data_sources.into_iter().collect(),
        required_raw_taxons: required_raw.into_iter().collect(),
        optional_raw_taxons: optional_raw.into_iter().collect(),
        used_taxons: used.all_slugs().into_iter().collect(),
        phase: queries::phase(&ast, &ctx, node),
        can_compute_comparison: can_become_comparison_metric(&ast, node),
        aggregation_definition: queries::aggregation_definition(&ast, &ctx, node),
    })
}

/// Whether the calculation can be used as a metric in a comparison
/// query: some strict (multiplicative) operation must relate a taxon on
/// its right side, directly or below another strict operation on its
/// left.
fn can_become_comparison_metric(ast: &Ast, id: NodeId) -> bool {
    match ast.kind(id) {
        ExprKind::Arithmetic { op, left, right, .. } if op.is_strict() => {
            can_become_comparison_metric(ast, *left) || contains_taxon(ast, *right)
        }
        _ => ast
            .children(id)
            .into_iter()
            .any(|child| can_become_comparison_metric(ast, child)),
    }
}

fn contains_taxon(ast: &Ast, id: NodeId) -> bool {
    match ast.kind(id) {
        ExprKind::Taxon(_) => true,
        _ => ast.children(id).into_iter().any(|child| contains_taxon(ast, child)),
    }
}
