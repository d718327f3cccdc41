//! Integration tests for calculation metadata

mod common;

use common::load_taxons;
use tel::taxonomy::aggregation::AggregationType;
use tel::{taxon_metadata, Phase};

#[test]
fn test_computed_metric_metadata() {
    let taxons = load_taxons();

    let metadata = taxon_metadata(&taxons["generic_cpm"], &taxons).unwrap();

    assert_eq!(metadata.used_taxons, vec!["impressions", "spend"]);
    assert_eq!(metadata.required_raw_taxons, vec!["impressions", "spend"]);
    assert!(metadata.optional_raw_taxons.is_empty());
    assert_eq!(metadata.phase, Phase::MetricPost);
    assert!(metadata.can_compute_comparison);
    assert_eq!(
        metadata.aggregation_definition.map(|a| a.kind),
        Some(AggregationType::Sum)
    );
}

#[test]
fn test_raw_taxon_reports_declared_aggregation() {
    let taxons = load_taxons();

    let metadata = taxon_metadata(&taxons["twitter|impressions"], &taxons).unwrap();

    assert!(metadata.used_taxons.is_empty());
    assert_eq!(metadata.phase, Phase::Any);
    assert_eq!(
        metadata.aggregation_definition.map(|a| a.kind),
        Some(AggregationType::Sum)
    );
}

#[test]
fn test_merged_dimension_reports_both_data_sources() {
    let taxons = load_taxons();

    let metadata = taxon_metadata(&taxons["merged_gender"], &taxons).unwrap();

    assert_eq!(metadata.used_data_sources, vec!["facebook_ads", "twitter"]);
    assert_eq!(metadata.phase, Phase::Dimension);
    assert_eq!(
        metadata.aggregation_definition.map(|a| a.kind),
        Some(AggregationType::GroupBy)
    );
}
