//! Computation phases
//!
//! Every TEL expression evaluates in a phase of the query pipeline.
//! Phases are totally ordered; combining expressions takes the maximum of
//! their phases, so a calculation can only move forward in the pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Phase of the query pipeline an expression belongs to.
///
/// The discriminants define the ordering used by `Phase::max_of`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Phase-neutral (constants)
    Any = 0,
    /// Dimension evaluated inside a single data source subquery
    DimensionDataSource = 1,
    /// Dimension evaluated over the joined data sources
    Dimension = 2,
    /// Metric input, before aggregation
    MetricPre = 3,
    /// Metric arithmetic over aggregated inputs
    MetricPost = 4,
    /// Projection applied while blending query results
    BlendingProjection = 5,
}

impl Phase {
    pub fn is_metric(&self) -> bool {
        matches!(self, Phase::MetricPre | Phase::MetricPost)
    }

    pub fn is_dimension(&self) -> bool {
        matches!(self, Phase::Dimension | Phase::DimensionDataSource)
    }

    /// Maximum phase of an iterator; `Any` when empty.
    pub fn max_of(phases: impl IntoIterator<Item = Phase>) -> Phase {
        phases.into_iter().max().unwrap_or(Phase::Any)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Any => "any",
            Phase::DimensionDataSource => "dimension_data_source",
            Phase::Dimension => "dimension",
            Phase::MetricPre => "metric_pre",
            Phase::MetricPost => "metric_post",
            Phase::BlendingProjection => "blending_projection",
        }
    }
}

impl Default for Phase {
    fn default() -> Self {
        Phase::Any
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive range of acceptable phases for a function argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseRange {
    pub lower: Phase,
    pub upper: Phase,
}

impl PhaseRange {
    pub const ANY: PhaseRange = PhaseRange {
        lower: Phase::Any,
        upper: Phase::BlendingProjection,
    };

    pub fn at_most(upper: Phase) -> Self {
        Self { lower: Phase::Any, upper }
    }

    pub fn at_least(lower: Phase) -> Self {
        Self { lower, upper: Phase::BlendingProjection }
    }

    pub fn contains(&self, phase: Phase) -> bool {
        self.lower <= phase && phase <= self.upper
    }
}

impl Default for PhaseRange {
    fn default() -> Self {
        PhaseRange::ANY
    }
}

impl fmt::Display for PhaseRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.lower, self.upper) {
            (Phase::Any, upper) => write!(f, "lower or equal than {}", upper),
            (lower, Phase::BlendingProjection) => write!(f, "greater or equal than {}", lower),
            (lower, upper) => write!(f, "between {} and {}", lower, upper),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_ordering() {
        assert!(Phase::Any < Phase::DimensionDataSource);
        assert!(Phase::DimensionDataSource < Phase::Dimension);
        assert!(Phase::Dimension < Phase::MetricPre);
        assert!(Phase::MetricPre < Phase::MetricPost);
        assert!(Phase::MetricPost < Phase::BlendingProjection);
    }

    #[test]
    fn test_max_of_empty_is_any() {
        assert_eq!(Phase::max_of([]), Phase::Any);
    }

    #[test]
    fn test_max_of() {
        assert_eq!(
            Phase::max_of([Phase::Dimension, Phase::Any, Phase::MetricPre]),
            Phase::MetricPre
        );
    }

    #[test]
    fn test_predicates() {
        assert!(Phase::MetricPre.is_metric());
        assert!(Phase::MetricPost.is_metric());
        assert!(Phase::Dimension.is_dimension());
        assert!(Phase::DimensionDataSource.is_dimension());
        assert!(!Phase::Any.is_metric());
        assert!(!Phase::Any.is_dimension());
    }

    #[test]
    fn test_range_contains() {
        let range = PhaseRange::at_most(Phase::Dimension);
        assert!(range.contains(Phase::Any));
        assert!(range.contains(Phase::Dimension));
        assert!(!range.contains(Phase::MetricPre));
    }

    #[test]
    fn test_range_display() {
        assert_eq!(
            PhaseRange::at_most(Phase::Dimension).to_string(),
            "lower or equal than dimension"
        );
        assert_eq!(
            PhaseRange::at_least(Phase::MetricPre).to_string(),
            "greater or equal than metric_pre"
        );
        assert_eq!(
            PhaseRange { lower: Phase::Dimension, upper: Phase::MetricPre }.to_string(),
            "between dimension and metric_pre"
        );
    }
}
