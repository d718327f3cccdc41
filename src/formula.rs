//! Dialect-neutral output expressions
//!
//! The compiler's product is a `Formula` tree, not SQL text. Null-safe
//! arithmetic is spelled out structurally (`Coalesce`, `NullIf`) so every
//! dialect renders the same semantics. `Placeholder` nodes stand for slugs
//! to be substituted by the surrounding query builder and render as
//! `${slug}`.

use serde::Serialize;
use std::collections::BTreeSet;

/// Literal values
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "!=",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
        }
    }
}

/// Units understood by date_trunc and timestamp arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl TimeUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeUnit::Second => "SECOND",
            TimeUnit::Minute => "MINUTE",
            TimeUnit::Hour => "HOUR",
            TimeUnit::Day => "DAY",
            TimeUnit::Week => "WEEK",
            TimeUnit::Month => "MONTH",
            TimeUnit::Year => "YEAR",
        }
    }
}

/// Date parts understood by EXTRACT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DatePart {
    Hour,
    DayOfWeek,
    Week,
    Month,
    Year,
}

/// Target types for CAST.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CastType {
    Text,
    Boolean,
    Integer,
    /// Fixed-point numeric; precision 16, scale as given
    Decimal { scale: u32 },
}

/// A dialect-neutral scalar expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Formula {
    /// Column reference (label or physical column name)
    Column(String),
    Literal(Literal),
    /// `${slug}` substitution point
    Placeholder(String),
    Add(Box<Formula>, Box<Formula>),
    Subtract(Box<Formula>, Box<Formula>),
    Multiply(Box<Formula>, Box<Formula>),
    Divide(Box<Formula>, Box<Formula>),
    NullIf(Box<Formula>, Box<Formula>),
    Coalesce(Vec<Formula>),
    Compare {
        op: CompareOp,
        left: Box<Formula>,
        right: Box<Formula>,
    },
    And(Box<Formula>, Box<Formula>),
    Or(Box<Formula>, Box<Formula>),
    Not(Box<Formula>),
    IsNull(Box<Formula>),
    IsNotNull(Box<Formula>),
    Case {
        when_then: Vec<(Formula, Formula)>,
        else_result: Option<Box<Formula>>,
    },
    Concat(Vec<Formula>),
    Upper(Box<Formula>),
    Lower(Box<Formula>),
    Trim(Box<Formula>),
    Like {
        expr: Box<Formula>,
        pattern: String,
        escape: Option<char>,
    },
    Cast {
        expr: Box<Formula>,
        to: CastType,
    },
    DateTrunc {
        unit: TimeUnit,
        expr: Box<Formula>,
    },
    Extract {
        part: DatePart,
        expr: Box<Formula>,
    },
    ConvertTimezone {
        expr: Box<Formula>,
        from_tz: String,
        to_tz: Option<String>,
    },
    SplitPart {
        expr: Box<Formula>,
        delimiter: String,
        position: i64,
    },
    ParseDate {
        expr: Box<Formula>,
        format: Option<String>,
    },
    TimestampDiff {
        unit: TimeUnit,
        start: Box<Formula>,
        end: Box<Formula>,
    },
    /// `SUM(expr) OVER (...)` window
    WindowSum {
        expr: Box<Formula>,
        partition_by: Vec<Formula>,
        order_by: Option<Box<Formula>>,
        /// Restrict the frame to rows up to the current one
        cumulative: bool,
    },
    Now,
}

impl Default for Formula {
    fn default() -> Self {
        Formula::null()
    }
}

impl Formula {
    pub fn column(name: impl Into<String>) -> Self {
        Formula::Column(name.into())
    }

    pub fn placeholder(slug: impl Into<String>) -> Self {
        Formula::Placeholder(slug.into())
    }

    pub fn int(value: i64) -> Self {
        Formula::Literal(Literal::Int(value))
    }

    pub fn float(value: f64) -> Self {
        Formula::Literal(Literal::Float(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Formula::Literal(Literal::String(value.into()))
    }

    pub fn boolean(value: bool) -> Self {
        Formula::Literal(Literal::Bool(value))
    }

    pub fn null() -> Self {
        Formula::Literal(Literal::Null)
    }

    /// `COALESCE(a, 0) + COALESCE(b, 0)`
    pub fn tolerant_add(left: Formula, right: Formula) -> Self {
        Formula::Add(
            Box::new(Formula::Coalesce(vec![left, Formula::int(0)])),
            Box::new(Formula::Coalesce(vec![right, Formula::int(0)])),
        )
    }

    /// `COALESCE(a, 0) - COALESCE(b, 0)`
    pub fn tolerant_subtract(left: Formula, right: Formula) -> Self {
        Formula::Subtract(
            Box::new(Formula::Coalesce(vec![left, Formula::int(0)])),
            Box::new(Formula::Coalesce(vec![right, Formula::int(0)])),
        )
    }

    /// `a / NULLIF(b, 0)`
    pub fn guarded_divide(left: Formula, right: Formula) -> Self {
        Formula::Divide(
            Box::new(left),
            Box::new(Formula::NullIf(Box::new(right), Box::new(Formula::int(0)))),
        )
    }

    pub fn compare(op: CompareOp, left: Formula, right: Formula) -> Self {
        Formula::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Slugs of all placeholders in the tree.
    pub fn placeholders(&self) -> BTreeSet<String> {
        let mut slugs = BTreeSet::new();
        self.collect_placeholders(&mut slugs);
        slugs
    }

    fn collect_placeholders(&self, slugs: &mut BTreeSet<String>) {
        match self {
            Formula::Placeholder(slug) => {
                slugs.insert(slug.clone());
            }
            Formula::Column(_) | Formula::Literal(_) | Formula::Now => {}
            Formula::Add(a, b)
            | Formula::Subtract(a, b)
            | Formula::Multiply(a, b)
            | Formula::Divide(a, b)
            | Formula::NullIf(a, b)
            | Formula::And(a, b)
            | Formula::Or(a, b) => {
                a.collect_placeholders(slugs);
                b.collect_placeholders(slugs);
            }
            Formula::Compare { left, right, .. } => {
                left.collect_placeholders(slugs);
                right.collect_placeholders(slugs);
            }
            Formula::TimestampDiff { start, end, .. } => {
                start.collect_placeholders(slugs);
                end.collect_placeholders(slugs);
            }
            Formula::Coalesce(items) | Formula::Concat(items) => {
                for item in items {
                    item.collect_placeholders(slugs);
                }
            }
            Formula::Not(inner)
            | Formula::IsNull(inner)
            | Formula::IsNotNull(inner)
            | Formula::Upper(inner)
            | Formula::Lower(inner)
            | Formula::Trim(inner) => inner.collect_placeholders(slugs),
            Formula::Like { expr, .. }
            | Formula::Cast { expr, .. }
            | Formula::DateTrunc { expr, .. }
            | Formula::Extract { expr, .. }
            | Formula::ConvertTimezone { expr, .. }
            | Formula::SplitPart { expr, .. }
            | Formula::ParseDate { expr, .. } => expr.collect_placeholders(slugs),
            Formula::Case { when_then, else_result } => {
                for (cond, then) in when_then {
                    cond.collect_placeholders(slugs);
                    then.collect_placeholders(slugs);
                }
                if let Some(el) = else_result {
                    el.collect_placeholders(slugs);
                }
            }
            Formula::WindowSum { expr, partition_by, order_by, .. } => {
                expr.collect_placeholders(slugs);
                for p in partition_by {
                    p.collect_placeholders(slugs);
                }
                if let Some(o) = order_by {
                    o.collect_placeholders(slugs);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_collected() {
        let formula = Formula::guarded_divide(
            Formula::placeholder("facebook_ads|spend"),
            Formula::Coalesce(vec![Formula::placeholder("facebook_ads|impressions")]),
        );
        let slugs = formula.placeholders();
        assert!(slugs.contains("facebook_ads|spend"));
        assert!(slugs.contains("facebook_ads|impressions"));
        assert_eq!(slugs.len(), 2);
    }

    #[test]
    fn test_guarded_divide_shape() {
        let formula = Formula::guarded_divide(Formula::column("a"), Formula::column("b"));
        match formula {
            Formula::Divide(_, right) => {
                assert!(matches!(*right, Formula::NullIf(_, _)));
            }
            other => panic!("unexpected formula: {:?}", other),
        }
    }
}
