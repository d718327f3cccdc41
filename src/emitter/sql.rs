//! SQL renderer
//!
//! Transforms a Formula tree into a SQL string for a target dialect.
//! Dialect differences are confined to cast names, date/time function
//! spellings and identifier quoting; everything else is shared.

use serde::Serialize;

use crate::formula::{CastType, DatePart, Formula, Literal};

/// SQL dialects the emitter can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlDialect {
    Snowflake,
    BigQuery,
}

/// Render a formula to SQL text.
pub fn render_formula(formula: &Formula, dialect: SqlDialect) -> String {
    render(formula, dialect)
}

fn render(formula: &Formula, dialect: SqlDialect) -> String {
    match formula {
        Formula::Column(name) => quote_identifier(name, dialect),
        Formula::Literal(lit) => render_literal(lit),
        Formula::Placeholder(slug) => format!("${{{}}}", slug),
        Formula::Add(a, b) => render_infix(a, "+", b, dialect),
        Formula::Subtract(a, b) => render_infix(a, "-", b, dialect),
        Formula::Multiply(a, b) => render_infix(a, "*", b, dialect),
        Formula::Divide(a, b) => render_infix(a, "/", b, dialect),
        Formula::NullIf(a, b) => {
            format!("NULLIF({}, {})", render(a, dialect), render(b, dialect))
        }
        Formula::Coalesce(items) => format!("COALESCE({})", render_list(items, dialect)),
        Formula::Compare { op, left, right } => render_infix(left, op.as_str(), right, dialect),
        Formula::And(a, b) => render_infix(a, "AND", b, dialect),
        Formula::Or(a, b) => render_infix(a, "OR", b, dialect),
        Formula::Not(inner) => format!("NOT {}", render_operand(inner, dialect)),
        Formula::IsNull(inner) => format!("{} IS NULL", render_operand(inner, dialect)),
        Formula::IsNotNull(inner) => format!("{} IS NOT NULL", render_operand(inner, dialect)),
        Formula::Case { when_then, else_result } => {
            let mut sql = String::from("CASE");
            for (cond, then) in when_then {
                sql.push_str(&format!(
                    " WHEN {} THEN {}",
                    render(cond, dialect),
                    render(then, dialect)
                ));
            }
            if let Some(el) = else_result {
                sql.push_str(&format!(" ELSE {}", render(el, dialect)));
            }
            sql.push_str(" END");
            sql
        }
        Formula::Concat(items) => format!("CONCAT({})", render_list(items, dialect)),
        Formula::Upper(inner) => format!("UPPER({})", render(inner, dialect)),
        Formula::Lower(inner) => format!("LOWER({})", render(inner, dialect)),
        Formula::Trim(inner) => format!("TRIM({})", render(inner, dialect)),
        Formula::Like { expr, pattern, escape } => {
            let mut sql = format!(
                "{} LIKE {}",
                render_operand(expr, dialect),
                string_literal(pattern)
            );
            if let Some(c) = escape {
                sql.push_str(&format!(" ESCAPE {}", string_literal(&c.to_string())));
            }
            sql
        }
        Formula::Cast { expr, to } => format!(
            "CAST({} AS {})",
            render(expr, dialect),
            cast_type_name(*to, dialect)
        ),
        Formula::DateTrunc { unit, expr } => match dialect {
            SqlDialect::Snowflake => {
                format!("DATE_TRUNC('{}', {})", unit.as_str(), render(expr, dialect))
            }
            SqlDialect::BigQuery => {
                format!("TIMESTAMP_TRUNC({}, {})", render(expr, dialect), unit.as_str())
            }
        },
        Formula::Extract { part, expr } => {
            format!("EXTRACT({} FROM {})", date_part_name(*part), render(expr, dialect))
        }
        Formula::ConvertTimezone { expr, from_tz, to_tz } => match dialect {
            SqlDialect::Snowflake => match to_tz {
                Some(to) => format!(
                    "CONVERT_TIMEZONE({}, {}, {})",
                    string_literal(from_tz),
                    string_literal(to),
                    render(expr, dialect)
                ),
                None => format!(
                    "CONVERT_TIMEZONE({}, {})",
                    string_literal(from_tz),
                    render(expr, dialect)
                ),
            },
            SqlDialect::BigQuery => match to_tz {
                Some(to) => format!(
                    "DATETIME(TIMESTAMP({}, {}), {})",
                    render(expr, dialect),
                    string_literal(from_tz),
                    string_literal(to)
                ),
                None => format!(
                    "DATETIME(TIMESTAMP({}), {})",
                    render(expr, dialect),
                    string_literal(from_tz)
                ),
            },
        },
        Formula::SplitPart { expr, delimiter, position } => match dialect {
            SqlDialect::Snowflake => format!(
                "SPLIT_PART({}, {}, {})",
                render(expr, dialect),
                string_literal(delimiter),
                position
            ),
            SqlDialect::BigQuery => format!(
                "SPLIT({}, {})[SAFE_OFFSET({})]",
                render(expr, dialect),
                string_literal(delimiter),
                position - 1
            ),
        },
        Formula::ParseDate { expr, format } => match dialect {
            SqlDialect::Snowflake => match format {
                Some(fmt) => format!(
                    "TO_TIMESTAMP({}, {})",
                    render(expr, dialect),
                    string_literal(fmt)
                ),
                None => format!("TO_TIMESTAMP({})", render(expr, dialect)),
            },
            SqlDialect::BigQuery => match format {
                Some(fmt) => format!(
                    "PARSE_TIMESTAMP({}, {})",
                    string_literal(fmt),
                    render(expr, dialect)
                ),
                None => format!("TIMESTAMP({})", render(expr, dialect)),
            },
        },
        Formula::TimestampDiff { unit, start, end } => match dialect {
            SqlDialect::Snowflake => format!(
                "TIMESTAMPDIFF({}, {}, {})",
                unit.as_str(),
                render(start, dialect),
                render(end, dialect)
            ),
            SqlDialect::BigQuery => format!(
                "TIMESTAMP_DIFF({}, {}, {})",
                render(end, dialect),
                render(start, dialect),
                unit.as_str()
            ),
        },
        Formula::WindowSum { expr, partition_by, order_by, cumulative } => {
            let mut over = Vec::new();
            if !partition_by.is_empty() {
                over.push(format!("PARTITION BY {}", render_list(partition_by, dialect)));
            }
            if let Some(order) = order_by {
                over.push(format!("ORDER BY {}", render(order, dialect)));
            }
            if *cumulative {
                over.push("ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW".to_string());
            }
            format!("SUM({}) OVER ({})", render(expr, dialect), over.join(" "))
        }
        Formula::Now => "CURRENT_TIMESTAMP()".to_string(),
    }
}

/// Render an operand of an infix operator, parenthesizing nested infix
/// expressions so operator precedence survives the round trip.
fn render_operand(operand: &Formula, dialect: SqlDialect) -> String {
    let needs_parens = matches!(
        operand,
        Formula::Add(_, _)
            | Formula::Subtract(_, _)
            | Formula::Multiply(_, _)
            | Formula::Divide(_, _)
            | Formula::Compare { .. }
            | Formula::And(_, _)
            | Formula::Or(_, _)
            | Formula::Not(_)
            | Formula::IsNull(_)
            | Formula::IsNotNull(_)
            | Formula::Like { .. }
    );
    if needs_parens {
        format!("({})", render(operand, dialect))
    } else {
        render(operand, dialect)
    }
}

fn render_infix(left: &Formula, op: &str, right: &Formula, dialect: SqlDialect) -> String {
    format!(
        "{} {} {}",
        render_operand(left, dialect),
        op,
        render_operand(right, dialect)
    )
}

fn render_list(items: &[Formula], dialect: SqlDialect) -> String {
    items
        .iter()
        .map(|item| render(item, dialect))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_literal(lit: &Literal) -> String {
    match lit {
        Literal::Null => "NULL".to_string(),
        Literal::Bool(b) => if *b { "TRUE".to_string() } else { "FALSE".to_string() },
        Literal::Int(i) => i.to_string(),
        Literal::Float(f) => format!("{}", f),
        Literal::String(s) => string_literal(s),
    }
}

fn string_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

/// Quote a column reference; dotted names are qualified references and
/// each part is quoted on its own.
fn quote_identifier(name: &str, dialect: SqlDialect) -> String {
    name.split('.')
        .map(|part| quote_identifier_part(part, dialect))
        .collect::<Vec<_>>()
        .join(".")
}

fn quote_identifier_part(name: &str, dialect: SqlDialect) -> String {
    let plain = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if plain {
        name.to_string()
    } else {
        match dialect {
            SqlDialect::Snowflake => format!("\"{}\"", name.replace('"', "\"\"")),
            SqlDialect::BigQuery => format!("`{}`", name),
        }
    }
}

fn cast_type_name(to: CastType, dialect: SqlDialect) -> String {
    match (to, dialect) {
        (CastType::Text, SqlDialect::Snowflake) => "VARCHAR".to_string(),
        (CastType::Text, SqlDialect::BigQuery) => "STRING".to_string(),
        (CastType::Boolean, SqlDialect::Snowflake) => "BOOLEAN".to_string(),
        (CastType::Boolean, SqlDialect::BigQuery) => "BOOL".to_string(),
        (CastType::Integer, SqlDialect::Snowflake) => "INTEGER".to_string(),
        (CastType::Integer, SqlDialect::BigQuery) => "INT64".to_string(),
        (CastType::Decimal { scale }, SqlDialect::Snowflake) => format!("DECIMAL(16, {})", scale),
        (CastType::Decimal { .. }, SqlDialect::BigQuery) => "NUMERIC".to_string(),
    }
}

fn date_part_name(part: DatePart) -> &'static str {
    match part {
        DatePart::Hour => "HOUR",
        DatePart::DayOfWeek => "DAYOFWEEK",
        DatePart::Week => "WEEK",
        DatePart::Month => "MONTH",
        DatePart::Year => "YEAR",
    }
}
