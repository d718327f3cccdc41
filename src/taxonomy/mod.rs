//! Taxonomy (noun module)
//!
//! Taxons are the named fields TEL expressions reference: raw columns
//! provided by a data source, or computed taxons whose value is another TEL
//! calculation. Taxon definitions are loaded from YAML.
//!
//! A slug is globally unique and may carry a data source namespace:
//! `facebook_ads|spend` is the `spend` column of the `facebook_ads` data
//! source, `spend` alone is a namespace-less (global) taxon.

pub mod aggregation;
pub mod metadata;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::taxonomy::aggregation::{AggregationDefinition, AggregationType};
use crate::types::ValidationType;

/// Whether a taxon is a dimension or a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxonType {
    Dimension,
    Metric,
}

impl TaxonType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaxonType::Dimension => "dimension",
            TaxonType::Metric => "metric",
        }
    }
}

impl fmt::Display for TaxonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A taxon definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Taxon {
    /// Globally unique slug, optionally namespaced: `data_source|name`
    pub slug: String,
    pub taxon_type: TaxonType,
    pub validation_type: ValidationType,
    /// TEL calculation; present only on computed taxons
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculation: Option<String>,
    /// Aggregation declaration; present only on raw taxons
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<AggregationDefinition>,
}

impl Taxon {
    pub fn is_computed(&self) -> bool {
        self.calculation.is_some()
    }

    pub fn is_metric(&self) -> bool {
        self.taxon_type == TaxonType::Metric
    }

    pub fn is_dimension(&self) -> bool {
        self.taxon_type == TaxonType::Dimension
    }

    /// Data source namespace, if the slug carries one.
    pub fn data_source(&self) -> Option<&str> {
        self.slug.split_once('|').map(|(ns, _)| ns)
    }

    /// Column name without the namespace prefix.
    pub fn name(&self) -> &str {
        self.slug.split_once('|').map_or(self.slug.as_str(), |(_, name)| name)
    }

    /// Column holding the comparison (benchmark) variant of this taxon.
    pub fn comparison_slug(&self) -> String {
        format!("comparison@{}", self.slug)
    }

    /// Aggregation to apply when the taxon is used without an explicit one.
    pub fn default_aggregation(&self) -> AggregationDefinition {
        match (&self.aggregation, self.taxon_type) {
            (Some(definition), _) => definition.clone(),
            (None, TaxonType::Dimension) => AggregationDefinition::group_by(),
            (None, TaxonType::Metric) => AggregationDefinition::not_set(),
        }
    }

    fn check_invariants(&self) -> Result<(), String> {
        if self.is_computed() && self.aggregation.is_some() {
            return Err("computed taxons cannot declare an aggregation".into());
        }
        if !self.is_computed() && self.is_metric() {
            let declared = self
                .aggregation
                .as_ref()
                .map(|a| a.kind != AggregationType::NotSet)
                .unwrap_or(false);
            if !declared {
                return Err("raw metric taxons must declare an aggregation".into());
            }
        }
        Ok(())
    }
}

/// Taxons indexed by slug, with deterministic iteration order.
pub type TaxonMap = BTreeMap<String, Taxon>;

/// Build a taxon map from a list of definitions, checking invariants.
pub fn build_taxon_map(taxons: Vec<Taxon>) -> Result<TaxonMap, ParseError> {
    let mut map = TaxonMap::new();
    for taxon in taxons {
        taxon.check_invariants().map_err(|message| ParseError::Taxon {
            slug: taxon.slug.clone(),
            message,
        })?;
        if map.insert(taxon.slug.clone(), taxon.clone()).is_some() {
            return Err(ParseError::Taxon {
                slug: taxon.slug,
                message: "duplicate taxon slug".into(),
            });
        }
    }
    Ok(map)
}

/// Parse taxon definitions from a YAML string.
pub fn parse_str(content: &str) -> Result<TaxonMap, ParseError> {
    let taxons: Vec<Taxon> = serde_yaml::from_str(content)?;
    build_taxon_map(taxons)
}

/// Parse taxon definitions from a YAML file.
pub fn parse_file(path: impl AsRef<Path>) -> Result<TaxonMap, ParseError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_str(&content)
}
