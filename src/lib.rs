//! tel - Compile taxon calculation expressions to SQL formulas
//!
//! This library provides:
//! - Taxonomy definition types (Taxon, TaxonMap, AggregationDefinition)
//! - Taxonomy parsing from YAML
//! - A parser for the taxon expression language
//! - Validation, constant folding and phase planning passes
//! - Formula rendering and SQL emission (Snowflake, BigQuery)
//!
//! # Architecture
//!
//! **Noun modules** (data structures):
//! - `taxonomy/` - taxon definitions, aggregations, calculation metadata
//! - `ast/` - expression arena (Ast, ExprKind, NodeId) and tree queries
//! - `formula.rs` - dialect-neutral output expressions
//! - `result.rs` - compiled results (ExprResult, PreFormula, PostFormula)
//! - `phase.rs`, `types.rs`, `context.rs` - phases, type lattice, contexts
//!
//! **Verb modules** (transformations):
//! - `lexer/`, `parser/` - expression text → Ast
//! - `validator/` - type, phase and argument checks
//! - `rewriter/` - constant folding and canonicalizing rewrites
//! - `planner/` - phase transition insertion
//! - `renderer/` - planned Ast → formulas and collected aggregations
//! - `emitter/` - Formula → SQL text
//! - `compiler/` - the pipeline driver
//!
//! # Example
//!
//! ```ignore
//! use tel::{compile, CompileOptions, SqlDialect};
//!
//! let taxons = tel::taxonomy::parse_file("taxons.yaml")?;
//! let result = compile("(spend * 1000) / impressions", &taxons, &CompileOptions::default())?;
//! for pre in &result.pre_formulas {
//!     println!("{}", tel::render_formula(&pre.formula, SqlDialect::Snowflake));
//! }
//! ```

pub mod ast;
pub mod compiler;
pub mod context;
pub mod emitter;
pub mod error;
pub mod formula;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod phase;
pub mod planner;
pub mod renderer;
pub mod result;
pub mod rewriter;
pub mod taxonomy;
pub mod types;
pub mod validator;

// Re-export commonly used types
pub use compiler::{compile, compile_taxon, compile_unplanned, CompileOptions, MAX_TAXON_REFERENCE_DEPTH};
pub use context::CompileContext;
pub use emitter::{render_formula, SqlDialect};
pub use error::{CompileError, ParseError};
pub use formula::Formula;
pub use phase::Phase;
pub use result::{ExprResult, OverrideMapping, PostFormula, PreFormula, SqlFormulaTemplate, UsedTaxonsContainer};
pub use taxonomy::metadata::{taxon_metadata, TaxonTelMetadata};
pub use taxonomy::{Taxon, TaxonMap, TaxonType};
pub use types::{TelDataType, TelType};
