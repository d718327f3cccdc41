//! Compiled results (noun module)
//!
//! Containers handed to the surrounding query builder: pre-aggregation
//! formulas, the post-aggregation formula, per-data-source dimension
//! templates, and the bookkeeping needed to assemble the final query.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::emitter::{render_formula, SqlDialect};
use crate::formula::Formula;
use crate::phase::Phase;
use crate::taxonomy::aggregation::AggregationDefinition;
use crate::types::TelType;

/// Placeholder substituted with the query's dimension columns.
pub const DIMENSION_SLUGS_TEMPLATE_PARAM: &str = "dimension_slugs";

/// A formula evaluated before (or at) the aggregation step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreFormula {
    pub formula: Formula,
    pub label: String,
    pub aggregation: AggregationDefinition,
    /// Data source the formula is evaluated in, when pinned to one
    pub data_source: Option<String>,
}

impl PreFormula {
    pub fn new(formula: Formula, label: impl Into<String>) -> Self {
        Self {
            formula,
            label: label.into(),
            aggregation: AggregationDefinition::sum(),
            data_source: None,
        }
    }

    pub fn with_aggregation(mut self, aggregation: AggregationDefinition) -> Self {
        self.aggregation = aggregation;
        self
    }
}

/// The formula evaluated after aggregation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostFormula {
    pub formula: Formula,
    /// Variant with a `${dimension_slugs}` substitution point, when the
    /// formula depends on the query's dimension grain (window functions)
    pub template: Option<Formula>,
    /// Dimension slugs excluded from the substitution
    pub exclude_slugs: BTreeSet<String>,
}

impl PostFormula {
    pub fn new(formula: Formula) -> Self {
        Self { formula, template: None, exclude_slugs: BTreeSet::new() }
    }

    /// Render to SQL, substituting the query's dimension columns into the
    /// template when one exists.
    pub fn render(&self, dialect: SqlDialect, dimension_slugs: &BTreeSet<String>) -> String {
        match &self.template {
            Some(template) => {
                let kept: Vec<&str> = dimension_slugs
                    .iter()
                    .filter(|slug| !self.exclude_slugs.contains(*slug))
                    .map(|slug| slug.as_str())
                    .collect();
                let sql = render_formula(template, dialect);
                sql.replace(
                    &format!("${{{}}}", DIMENSION_SLUGS_TEMPLATE_PARAM),
                    &kept.join(", "),
                )
            }
            None => render_formula(&self.formula, dialect),
        }
    }
}

/// A dimension formula evaluated inside a single data source subquery.
///
/// The formula references raw taxons through `${slug}` placeholders; the
/// query builder substitutes physical columns when it assembles the
/// subquery for `data_source`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlFormulaTemplate {
    pub formula: Formula,
    pub label: String,
    pub data_source: String,
    /// Raw taxon slugs the template consumes
    pub used_taxons: BTreeSet<String>,
}

/// Dimension override requested by the `override` function.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverrideMapping {
    /// Dimension formula the mapping applies to
    pub formula: Formula,
    pub override_mapping_slug: String,
    pub include_missing_values: bool,
}

/// Required and optional taxon slugs referenced by an expression.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsedTaxonsContainer {
    pub required_slugs: BTreeSet<String>,
    pub optional_slugs: BTreeSet<String>,
}

impl UsedTaxonsContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_required(&mut self, slug: impl Into<String>) {
        self.required_slugs.insert(slug.into());
    }

    pub fn add_optional(&mut self, slug: impl Into<String>) {
        self.optional_slugs.insert(slug.into());
    }

    pub fn update(&mut self, other: &UsedTaxonsContainer) {
        self.required_slugs.extend(other.required_slugs.iter().cloned());
        self.optional_slugs.extend(other.optional_slugs.iter().cloned());
    }

    pub fn has_some(&self) -> bool {
        !self.required_slugs.is_empty() || !self.optional_slugs.is_empty()
    }

    pub fn all_slugs(&self) -> BTreeSet<String> {
        self.required_slugs.union(&self.optional_slugs).cloned().collect()
    }
}

/// The compiler's public product for one expression.
#[derive(Debug, Clone, Serialize)]
pub struct ExprResult {
    /// Aggregated inputs feeding the post formula
    pub pre_formulas: Vec<PreFormula>,
    pub post_formula: Option<PostFormula>,
    /// Dimension formulas evaluated over the joined data sources
    pub dimension_formulas: Vec<PreFormula>,
    /// Dimension fragments evaluated inside data source subqueries
    pub data_source_formula_templates: Vec<SqlFormulaTemplate>,
    pub phase: Phase,
    pub used_taxons: UsedTaxonsContainer,
    /// True when the expression referenced no usable taxon
    pub invalid: bool,
    /// Data sources the expression reads from (`None` = global)
    pub return_data_sources: BTreeSet<Option<String>>,
    pub return_type: TelType,
    /// Slugs still awaiting substitution in templates
    pub template_slugs: BTreeSet<String>,
    pub override_mappings: Vec<OverrideMapping>,
}
