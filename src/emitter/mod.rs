//! SQL emitter (verb module)
//!
//! Renders dialect-neutral `Formula` trees to SQL text. The compiler never
//! calls this while compiling; it exists for callers that want SQL strings
//! and for tests.

mod sql;

pub use sql::{render_formula, SqlDialect};
