//! Aggregation definitions
//!
//! Raw metric taxons declare how their column is aggregated. Computed
//! taxons deduce an aggregation from the taxons they reference; when the
//! references disagree the aggregation is undeducible and validation fails.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Kind of aggregation applied to a taxon column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationType {
    Sum,
    Avg,
    Min,
    Max,
    CountAll,
    CountDistinct,
    GroupBy,
    FirstBy,
    LastBy,
    /// No aggregation declared or deduced yet
    NotSet,
}

impl AggregationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationType::Sum => "sum",
            AggregationType::Avg => "avg",
            AggregationType::Min => "min",
            AggregationType::Max => "max",
            AggregationType::CountAll => "count_all",
            AggregationType::CountDistinct => "count_distinct",
            AggregationType::GroupBy => "group_by",
            AggregationType::FirstBy => "first_by",
            AggregationType::LastBy => "last_by",
            AggregationType::NotSet => "not_set",
        }
    }
}

impl fmt::Display for AggregationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sort direction for first_by / last_by aggregations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// A dimension to order by when picking first/last values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortDimension {
    pub taxon: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<SortOrder>,
}

/// Parameters carried by parameterized aggregation kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AggregationParams {
    /// Extra columns for count_distinct
    CountDistinct { fields: Vec<String> },
    /// Ordering dimensions for first_by / last_by
    SortDimensions { sort_dimensions: Vec<SortDimension> },
}

/// A complete aggregation declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregationDefinition {
    #[serde(rename = "type")]
    pub kind: AggregationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<AggregationParams>,
}

impl AggregationDefinition {
    pub fn of(kind: AggregationType) -> Self {
        Self { kind, params: None }
    }

    pub fn not_set() -> Self {
        Self::of(AggregationType::NotSet)
    }

    pub fn sum() -> Self {
        Self::of(AggregationType::Sum)
    }

    pub fn group_by() -> Self {
        Self::of(AggregationType::GroupBy)
    }

    /// Taxon slugs referenced from the aggregation parameters.
    pub fn used_taxon_slugs(&self) -> BTreeSet<String> {
        match &self.params {
            Some(AggregationParams::CountDistinct { fields }) => {
                fields.iter().cloned().collect()
            }
            Some(AggregationParams::SortDimensions { sort_dimensions }) => {
                sort_dimensions.iter().map(|d| d.taxon.clone()).collect()
            }
            None => BTreeSet::new(),
        }
    }
}

impl Default for AggregationDefinition {
    fn default() -> Self {
        Self::not_set()
    }
}

/// Reconcile the aggregation definitions of sibling expressions.
///
/// Returns `None` when reconciliation is impossible: some sibling has no
/// definition at all, or two siblings declare different kinds. When no
/// sibling declares a kind (all not_set), `fallback` decides the result:
/// `Some(kind)` yields that kind, `None` yields a bare not_set definition.
pub fn common_defined_definition(
    defs: &[Option<AggregationDefinition>],
    fallback: Option<AggregationType>,
) -> Option<AggregationDefinition> {
    if defs.iter().any(|d| d.is_none()) {
        return None;
    }

    let defined: Vec<&AggregationDefinition> = defs
        .iter()
        .filter_map(|d| d.as_ref())
        .filter(|d| d.kind != AggregationType::NotSet)
        .collect();

    let kinds: BTreeSet<AggregationType> = defined.iter().map(|d| d.kind).collect();
    match kinds.len() {
        0 => Some(match fallback {
            Some(kind) => AggregationDefinition::of(kind),
            None => AggregationDefinition::not_set(),
        }),
        1 => Some(defined[0].clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(kind: AggregationType) -> Option<AggregationDefinition> {
        Some(AggregationDefinition::of(kind))
    }

    #[test]
    fn test_common_missing_definition() {
        assert_eq!(common_defined_definition(&[def(AggregationType::Sum), None], None), None);
    }

    #[test]
    fn test_common_single_kind() {
        let common = common_defined_definition(
            &[def(AggregationType::Sum), def(AggregationType::NotSet), def(AggregationType::Sum)],
            None,
        );
        assert_eq!(common, Some(AggregationDefinition::sum()));
    }

    #[test]
    fn test_aggregation_kinds_form_an_ordered_set() {
        let kinds: BTreeSet<AggregationType> =
            [AggregationType::GroupBy, AggregationType::Sum, AggregationType::Sum]
                .into_iter()
                .collect();
        assert_eq!(kinds.len(), 2);
        assert_eq!(kinds.into_iter().next(), Some(AggregationType::Sum));
    }

    #[test]
    fn test_common_conflicting_kinds() {
        let common = common_defined_definition(
            &[def(AggregationType::Sum), def(AggregationType::Avg)],
            None,
        );
        assert_eq!(common, None);
    }

    #[test]
    fn test_common_all_not_set() {
        let defs = [def(AggregationType::NotSet), def(AggregationType::NotSet)];
        assert_eq!(
            common_defined_definition(&defs, None),
            Some(AggregationDefinition::not_set())
        );
        assert_eq!(
            common_defined_definition(&defs, Some(AggregationType::GroupBy)),
            Some(AggregationDefinition::group_by())
        );
        assert_eq!(
            common_defined_definition(&defs, Some(AggregationType::Sum)),
            Some(AggregationDefinition::sum())
        );
    }

    #[test]
    fn test_common_keeps_params() {
        let first_by = AggregationDefinition {
            kind: AggregationType::FirstBy,
            params: Some(AggregationParams::SortDimensions {
                sort_dimensions: vec![SortDimension {
                    taxon: "date".into(),
                    order_by: Some(SortOrder::Asc),
                }],
            }),
        };
        let common = common_defined_definition(
            &[Some(first_by.clone()), def(AggregationType::NotSet)],
            None,
        );
        assert_eq!(common, Some(first_by));
    }

    #[test]
    fn test_used_taxon_slugs() {
        let definition = AggregationDefinition {
            kind: AggregationType::CountDistinct,
            params: Some(AggregationParams::CountDistinct {
                fields: vec!["ad_id".into(), "campaign_id".into()],
            }),
        };
        let slugs = definition.used_taxon_slugs();
        assert!(slugs.contains("ad_id"));
        assert!(slugs.contains("campaign_id"));
        assert!(AggregationDefinition::sum().used_taxon_slugs().is_empty());
    }
}
