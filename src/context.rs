//! Compilation contexts
//!
//! `CompileContext` carries the settings every query and pass consults:
//! the taxon map, the allowed data sources and the kind of taxon being
//! compiled. `ValidationContext` accumulates located error messages.
//! `LabelMaker` hands out the `__n` column labels; one maker is shared by
//! the whole compilation, nested calculations included.

use std::collections::BTreeSet;

use crate::ast::{Ast, NodeId};
use crate::error::CompileError;
use crate::taxonomy::aggregation::AggregationDefinition;
use crate::taxonomy::{TaxonMap, TaxonType};

/// Settings of one compilation.
#[derive(Debug, Clone)]
pub struct CompileContext<'a> {
    pub taxons: &'a TaxonMap,
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

impl<'a> CompileContext<'a> {
    pub fn new(taxons: &'a TaxonMap) -> Self {
        Self {
            taxons,
            allowed_data_sources: None,
            taxon_type: TaxonType::Metric,
            taxon_slug: None,
            aggregation: None,
            subrequest_only: false,
            is_benchmark: false,
        }
    }

    pub fn is_data_source_allowed(&self, data_source: &str) -> bool {
        match &self.allowed_data_sources {
            None => true,
            Some(allowed) => allowed.contains(data_source),
        }
    }

    /// True when exactly one data source is allowed.
    pub fn has_single_data_source(&self) -> bool {
        self.allowed_data_sources
            .as_ref()
            .map(|allowed| allowed.len() == 1)
            .unwrap_or(false)
    }
}

/// Collects validation errors, each formatted with its source location.
#[derive(Debug, Default)]
pub struct ValidationContext {
    errors: Vec<String>,
}

impl ValidationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_error(&mut self, message: impl Into<String>, ast: &Ast, node: NodeId) {
        let location = ast.location(node);
        let text = ast.source(location.source).trim();
        self.errors.push(format!(
            "{}. Occurred at position {}, line {} in expression \"{}\"",
            message.into(),
            location.position,
            location.line,
            text
        ));
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Fail the compilation if any error was collected.
    pub fn raise_for_errors(self) -> Result<(), CompileError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(CompileError::Validation { errors: self.errors })
        }
    }
}

/// Allocates unique column labels: `__1`, `__2`, ... (optionally prefixed
/// with the compiled taxon's slug).
#[derive(Debug)]
pub struct LabelMaker {
    prefix: String,
    counter: usize,
}

impl LabelMaker {
    pub fn new(prefix: Option<&str>) -> Self {
        Self {
            prefix: prefix.unwrap_or("").to_string(),
            counter: 0,
        }
    }

    pub fn next_label(&mut self) -> String {
        self.counter += 1;
        format!("__{}{}", self.prefix, self.counter)
    }
}
