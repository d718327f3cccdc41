//! TEL function registry (noun module)
//!
//! The function set is closed: every TEL function is a `FunctionKind`
//! variant, dispatched by `match` in the passes. Argument checking is
//! table-driven through `FunctionSpec`; `iff` and `ifs` have dynamic
//! argument lists and are validated by hand in the validator.

use crate::ast::{Ast, NodeId};
use crate::context::ValidationContext;
use crate::phase::{Phase, PhaseRange};
use crate::types::{are_compatible, TelType};

/// A TEL built-in function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    Coalesce,
    Iff,
    Ifs,
    Concat,
    Merge,
    ConvertTimezone,
    Upper,
    Lower,
    Trim,
    Parse,
    Contains,
    DateTrunc,
    DateHour,
    Date,
    DateWeek,
    DateMonth,
    HourOfDay,
    DayOfWeek,
    WeekOfYear,
    MonthOfYear,
    Year,
    ToBool,
    ToDate,
    ToText,
    ToNumber,
    DateDiff,
    Override,
    Cumulative,
    Overall,
    Now,
}

impl FunctionKind {
    pub fn from_name(name: &str) -> Option<FunctionKind> {
        Some(match name {
            "coalesce" => FunctionKind::Coalesce,
            "iff" => FunctionKind::Iff,
            "ifs" => FunctionKind::Ifs,
            "concat" => FunctionKind::Concat,
            "merge" => FunctionKind::Merge,
            "convert_timezone" => FunctionKind::ConvertTimezone,
            "upper" => FunctionKind::Upper,
            "lower" => FunctionKind::Lower,
            "trim" => FunctionKind::Trim,
            "parse" => FunctionKind::Parse,
            "contains" => FunctionKind::Contains,
            "date_trunc" => FunctionKind::DateTrunc,
            "date_hour" => FunctionKind::DateHour,
            "date" => FunctionKind::Date,
            "date_week" => FunctionKind::DateWeek,
            "date_month" => FunctionKind::DateMonth,
            "hour_of_day" => FunctionKind::HourOfDay,
            "day_of_week" => FunctionKind::DayOfWeek,
            "week_of_year" => FunctionKind::WeekOfYear,
            "month_of_year" => FunctionKind::MonthOfYear,
            "year" => FunctionKind::Year,
            "to_bool" => FunctionKind::ToBool,
            "to_date" => FunctionKind::ToDate,
            "to_text" => FunctionKind::ToText,
            "to_number" => FunctionKind::ToNumber,
            "date_diff" => FunctionKind::DateDiff,
            "override" => FunctionKind::Override,
            "cumulative" => FunctionKind::Cumulative,
            "overall" => FunctionKind::Overall,
            "now" => FunctionKind::Now,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            FunctionKind::Coalesce => "coalesce",
            FunctionKind::Iff => "iff",
            FunctionKind::Ifs => "ifs",
            FunctionKind::Concat => "concat",
            FunctionKind::Merge => "merge",
            FunctionKind::ConvertTimezone => "convert_timezone",
            FunctionKind::Upper => "upper",
            FunctionKind::Lower => "lower",
            FunctionKind::Trim => "trim",
            FunctionKind::Parse => "parse",
            FunctionKind::Contains => "contains",
            FunctionKind::DateTrunc => "date_trunc",
            FunctionKind::DateHour => "date_hour",
            FunctionKind::Date => "date",
            FunctionKind::DateWeek => "date_week",
            FunctionKind::DateMonth => "date_month",
            FunctionKind::HourOfDay => "hour_of_day",
            FunctionKind::DayOfWeek => "day_of_week",
            FunctionKind::WeekOfYear => "week_of_year",
            FunctionKind::MonthOfYear => "month_of_year",
            FunctionKind::Year => "year",
            FunctionKind::ToBool => "to_bool",
            FunctionKind::ToDate => "to_date",
            FunctionKind::ToText => "to_text",
            FunctionKind::ToNumber => "to_number",
            FunctionKind::DateDiff => "date_diff",
            FunctionKind::Override => "override",
            FunctionKind::Cumulative => "cumulative",
            FunctionKind::Overall => "overall",
            FunctionKind::Now => "now",
        }
    }

    /// Functions that silently drop invalid arguments at parse time
    /// instead of becoming invalid themselves.
    pub fn drops_invalid_args(&self) -> bool {
        matches!(self, FunctionKind::Coalesce | FunctionKind::Merge)
    }

    /// Table-driven argument spec; `None` for the dynamically shaped
    /// functions (`iff`, `ifs`), which the validator handles by hand.
    pub fn table_spec(&self) -> Option<&'static FunctionSpec> {
        spec_for(*self)
    }
}

/// Type family accepted by a function argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCheck {
    Any,
    String,
    Number,
    Integer,
    DateTime,
    Boolean,
    NumberStringBoolean,
    NumberStringDate,
}

impl TypeCheck {
    pub fn matches(&self, tel_type: &TelType) -> bool {
        match self {
            TypeCheck::Any => true,
            TypeCheck::String => tel_type.is_string(),
            TypeCheck::Number => tel_type.is_number(),
            TypeCheck::Integer => tel_type.is_integer(),
            TypeCheck::DateTime => tel_type.is_datetime(),
            TypeCheck::Boolean => tel_type.is_boolean(),
            TypeCheck::NumberStringBoolean => {
                tel_type.is_number() || tel_type.is_string() || tel_type.is_boolean()
            }
            TypeCheck::NumberStringDate => {
                tel_type.is_number() || tel_type.is_string() || tel_type.is_datetime()
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TypeCheck::Any => "any",
            TypeCheck::String => "string",
            TypeCheck::Number => "number",
            TypeCheck::Integer => "integer",
            TypeCheck::DateTime => "datetime",
            TypeCheck::Boolean => "boolean",
            TypeCheck::NumberStringBoolean => "number or string or boolean",
            TypeCheck::NumberStringDate => "number or string or datetime",
        }
    }
}

/// One positional argument.
#[derive(Debug, Clone, Copy)]
pub struct ArgSpec {
    pub name: &'static str,
    pub check: TypeCheck,
    pub constant: bool,
    pub phase: PhaseRange,
    pub optional: bool,
}

/// Arguments after the fixed positions.
#[derive(Debug, Clone, Copy)]
pub enum Tail {
    None,
    /// Uniformly checked repeated arguments
    Variadic {
        name: &'static str,
        check: TypeCheck,
        constant: bool,
        min: usize,
    },
    /// Repeated arguments that must share a common type
    Compatible { min: usize },
}

/// Argument table of one function.
#[derive(Debug, Clone, Copy)]
pub struct FunctionSpec {
    pub name: &'static str,
    pub args: &'static [ArgSpec],
    pub tail: Tail,
}

const ANY_RANGE: PhaseRange = PhaseRange {
    lower: Phase::Any,
    upper: Phase::BlendingProjection,
};
const DIM_RANGE: PhaseRange = PhaseRange {
    lower: Phase::Any,
    upper: Phase::Dimension,
};

const fn arg(name: &'static str, check: TypeCheck) -> ArgSpec {
    ArgSpec { name, check, constant: false, phase: ANY_RANGE, optional: false }
}

const fn dim_arg(name: &'static str, check: TypeCheck) -> ArgSpec {
    ArgSpec { name, check, constant: false, phase: DIM_RANGE, optional: false }
}

const fn const_arg(name: &'static str, check: TypeCheck) -> ArgSpec {
    ArgSpec { name, check, constant: true, phase: ANY_RANGE, optional: false }
}

const fn optional_const_arg(name: &'static str, check: TypeCheck) -> ArgSpec {
    ArgSpec { name, check, constant: true, phase: ANY_RANGE, optional: true }
}

const DATETIME_EXPR: [ArgSpec; 1] = [dim_arg("expression", TypeCheck::DateTime)];

fn spec_for(kind: FunctionKind) -> Option<&'static FunctionSpec> {
    static COALESCE: FunctionSpec =
        FunctionSpec { name: "coalesce", args: &[], tail: Tail::Compatible { min: 1 } };
    static CONCAT: FunctionSpec = FunctionSpec {
        name: "concat",
        args: &[],
        tail: Tail::Variadic { name: "taxon", check: TypeCheck::Any, constant: false, min: 1 },
    };
    static MERGE: FunctionSpec =
        FunctionSpec { name: "merge", args: &[], tail: Tail::Compatible { min: 1 } };
    static CONVERT_TIMEZONE: FunctionSpec = FunctionSpec {
        name: "convert_timezone",
        args: &[
            dim_arg("expression", TypeCheck::DateTime),
            const_arg("timezone_from", TypeCheck::String),
            optional_const_arg("timezone_to", TypeCheck::String),
        ],
        tail: Tail::None,
    };
    static STRING_TAXON: FunctionSpec = FunctionSpec {
        name: "",
        args: &[dim_arg("taxon", TypeCheck::String)],
        tail: Tail::None,
    };
    static PARSE: FunctionSpec = FunctionSpec {
        name: "parse",
        args: &[
            dim_arg("expression", TypeCheck::String),
            const_arg("delimiter", TypeCheck::String),
            const_arg("position", TypeCheck::Integer),
        ],
        tail: Tail::None,
    };
    static CONTAINS: FunctionSpec = FunctionSpec {
        name: "contains",
        args: &[dim_arg("expression", TypeCheck::String)],
        tail: Tail::Variadic {
            name: "searched_constant",
            check: TypeCheck::String,
            constant: true,
            min: 1,
        },
    };
    static DATE_TRUNC: FunctionSpec = FunctionSpec {
        name: "date_trunc",
        args: &[
            dim_arg("expression", TypeCheck::DateTime),
            const_arg("time_unit", TypeCheck::String),
        ],
        tail: Tail::None,
    };
    static DATETIME_ONLY: FunctionSpec =
        FunctionSpec { name: "", args: &DATETIME_EXPR, tail: Tail::None };
    static TO_TEXT: FunctionSpec = FunctionSpec {
        name: "to_text",
        args: &[arg("taxon", TypeCheck::Any)],
        tail: Tail::None,
    };
    static TO_BOOL: FunctionSpec = FunctionSpec {
        name: "to_bool",
        args: &[arg("taxon", TypeCheck::NumberStringBoolean)],
        tail: Tail::None,
    };
    static TO_NUMBER: FunctionSpec = FunctionSpec {
        name: "to_number",
        args: &[
            arg("expression", TypeCheck::NumberStringBoolean),
            optional_const_arg("precision", TypeCheck::Integer),
        ],
        tail: Tail::None,
    };
    static TO_DATE: FunctionSpec = FunctionSpec {
        name: "to_date",
        args: &[
            arg("expression", TypeCheck::NumberStringDate),
            optional_const_arg("format", TypeCheck::String),
        ],
        tail: Tail::None,
    };
    static DATE_DIFF: FunctionSpec = FunctionSpec {
        name: "date_diff",
        args: &[
            const_arg("time_unit", TypeCheck::String),
            dim_arg("start_taxon", TypeCheck::DateTime),
            dim_arg("end_taxon", TypeCheck::DateTime),
        ],
        tail: Tail::None,
    };
    static OVERRIDE: FunctionSpec = FunctionSpec {
        name: "override",
        args: &[
            dim_arg("original_dimension", TypeCheck::String),
            const_arg("override_mapping_slug", TypeCheck::String),
            optional_const_arg("include_missing_values", TypeCheck::Boolean),
        ],
        tail: Tail::None,
    };
    static CUMULATIVE: FunctionSpec = FunctionSpec {
        name: "cumulative",
        args: &[
            arg("metric", TypeCheck::Number),
            dim_arg("time_dimension", TypeCheck::DateTime),
        ],
        tail: Tail::None,
    };
    static OVERALL: FunctionSpec = FunctionSpec {
        name: "overall",
        args: &[arg("metric", TypeCheck::Number)],
        tail: Tail::None,
    };
    static NOW: FunctionSpec = FunctionSpec { name: "now", args: &[], tail: Tail::None };

    Some(match kind {
        FunctionKind::Coalesce => &COALESCE,
        FunctionKind::Iff | FunctionKind::Ifs => return None,
        FunctionKind::Concat => &CONCAT,
        FunctionKind::Merge => &MERGE,
        FunctionKind::ConvertTimezone => &CONVERT_TIMEZONE,
        FunctionKind::Upper | FunctionKind::Lower | FunctionKind::Trim => &STRING_TAXON,
        FunctionKind::Parse => &PARSE,
        FunctionKind::Contains => &CONTAINS,
        FunctionKind::DateTrunc => &DATE_TRUNC,
        FunctionKind::DateHour
        | FunctionKind::Date
        | FunctionKind::DateWeek
        | FunctionKind::DateMonth
        | FunctionKind::HourOfDay
        | FunctionKind::DayOfWeek
        | FunctionKind::WeekOfYear
        | FunctionKind::MonthOfYear
        | FunctionKind::Year => &DATETIME_ONLY,
        FunctionKind::ToBool => &TO_BOOL,
        FunctionKind::ToDate => &TO_DATE,
        FunctionKind::ToText => &TO_TEXT,
        FunctionKind::ToNumber => &TO_NUMBER,
        FunctionKind::DateDiff => &DATE_DIFF,
        FunctionKind::Override => &OVERRIDE,
        FunctionKind::Cumulative => &CUMULATIVE,
        FunctionKind::Overall => &OVERALL,
        FunctionKind::Now => &NOW,
    })
}

/// What the validator knows about one argument.
#[derive(Debug, Clone, Copy)]
pub struct ArgInfo {
    pub node: NodeId,
    pub tel_type: TelType,
    pub phase: Phase,
    pub invalid: bool,
}

/// Validate a function call against its argument table.
pub fn validate_args(
    kind: FunctionKind,
    args: &[ArgInfo],
    ast: &Ast,
    node: NodeId,
    vctx: &mut ValidationContext,
) {
    let Some(spec) = kind.table_spec() else {
        return;
    };
    let name = kind.name();

    let required = spec.args.iter().filter(|a| !a.optional).count();
    if args.len() < required {
        vctx.with_error(requires_message(name, spec, args.len()), ast, node);
        return;
    }

    for (i, (arg_spec, info)) in spec.args.iter().zip(args.iter()).enumerate() {
        check_arg(name, i, arg_spec, info, ast, vctx);
    }

    let fixed = spec.args.len().min(args.len());
    let tail_args = &args[fixed..];
    match spec.tail {
        Tail::None => {
            if args.len() > spec.args.len() {
                vctx.with_error(
                    format!(
                        "Function {} was provided with an incorrect number of arguments {}, instead of expected {}",
                        name,
                        args.len(),
                        spec.args.len()
                    ),
                    ast,
                    node,
                );
            }
        }
        Tail::Variadic { name: tail_name, check, constant, min } => {
            if tail_args.len() < min {
                vctx.with_error(format!("{} requires at least 1 argument", name), ast, node);
                return;
            }
            let tail_spec = ArgSpec {
                name: tail_name,
                check,
                constant,
                phase: ANY_RANGE,
                optional: false,
            };
            for (i, info) in tail_args.iter().enumerate() {
                check_arg(name, fixed + i, &tail_spec, info, ast, vctx);
            }
        }
        Tail::Compatible { min } => {
            if tail_args.len() < min {
                vctx.with_error(format!("{} requires at least 1 argument", name), ast, node);
                return;
            }
            let types: Vec<TelType> = tail_args
                .iter()
                .filter(|info| !info.invalid)
                .map(|info| info.tel_type)
                .collect();
            if !types.is_empty() && !are_compatible(&types) {
                vctx.with_error(
                    format!("Arguments in function {} must have compatible data types", name),
                    ast,
                    node,
                );
            }
        }
    }
}

fn check_arg(
    name: &str,
    index: usize,
    spec: &ArgSpec,
    info: &ArgInfo,
    ast: &Ast,
    vctx: &mut ValidationContext,
) {
    let position = index + 1;
    if spec.constant && !info.tel_type.is_constant {
        vctx.with_error(
            format!(
                "Argument {} in function {} must be a constant of type: {}",
                position,
                name,
                spec.check.name()
            ),
            ast,
            info.node,
        );
    } else if !spec.check.matches(&info.tel_type) {
        vctx.with_error(
            format!(
                "Argument {} in function {} must be of type: {}",
                position,
                name,
                spec.check.name()
            ),
            ast,
            info.node,
        );
    }
    if !spec.phase.contains(info.phase) {
        vctx.with_error(
            format!(
                "Argument {} in function {} must have a phase {}",
                position, name, spec.phase
            ),
            ast,
            info.node,
        );
    }
}

fn requires_message(name: &str, spec: &FunctionSpec, given: usize) -> String {
    let required: Vec<&str> = spec
        .args
        .iter()
        .filter(|a| !a.optional)
        .map(|a| a.name)
        .collect();
    let optional: Vec<&str> = spec
        .args
        .iter()
        .filter(|a| a.optional)
        .map(|a| a.name)
        .collect();

    let counts = if optional.is_empty() {
        format!("{}", required.len())
    } else {
        format!("{} or {}", required.len(), spec.args.len())
    };
    let names = if optional.is_empty() {
        required.join(", ")
    } else {
        format!("{}(optionally also, {})", required.join(", "), optional.join(", "))
    };
    let given_phrase = match given {
        0 => "none were".to_string(),
        1 => "only one was".to_string(),
        n => format!("{} were", n),
    };
    format!("{} requires {} arguments: {}, but {} given", name, counts, names, given_phrase)
}

/// Time units accepted by `date_trunc`.
pub const DATE_TRUNC_UNITS: [&str; 4] = ["HOUR", "DAY", "WEEK", "MONTH"];
