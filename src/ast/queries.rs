//! Pure queries over the expression tree
//!
//! Every query walks the arena without mutating it. Binary operations use
//! the invalid flags captured at construction time, so a side replaced by
//! the rewriter keeps its original standing.

use std::collections::BTreeSet;

use crate::ast::{ArithmeticOp, Ast, ExprKind, LogicalOp, NodeId, TaxonExpr};
use crate::context::CompileContext;
use crate::functions::FunctionKind;
use crate::phase::Phase;
use crate::result::UsedTaxonsContainer;
use crate::taxonomy::aggregation::{
    common_defined_definition, AggregationDefinition, AggregationType,
};
use crate::taxonomy::{Taxon, TaxonType};
use crate::types::{return_common_type, TelDataType, TelType};

/// A constant value an expression folds to.
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl LiteralValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            LiteralValue::Int(i) => Some(*i as f64),
            LiteralValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, LiteralValue::Int(0)) || matches!(self, LiteralValue::Float(f) if *f == 0.0)
    }
}

fn taxon_of<'a>(ctx: &CompileContext<'a>, taxon: &TaxonExpr) -> Option<&'a Taxon> {
    ctx.taxons.get(&taxon.slug)
}

fn namespace_allowed(ctx: &CompileContext<'_>, taxon: &TaxonExpr) -> bool {
    match &taxon.namespace {
        None => true,
        Some(ns) => ctx.is_data_source_allowed(ns),
    }
}

// ---------------------------------------------------------------------------
// phase
// ---------------------------------------------------------------------------

pub fn phase(ast: &Ast, ctx: &CompileContext<'_>, id: NodeId) -> Phase {
    match ast.kind(id) {
        ExprKind::Integer(_)
        | ExprKind::Real(_)
        | ExprKind::StringLit(_)
        | ExprKind::Boolean(_) => Phase::Any,
        ExprKind::Parens(inner) => phase(ast, ctx, *inner),
        ExprKind::Taxon(taxon) => match taxon.calc {
            Some(calc) => phase(ast, ctx, calc),
            None => {
                let is_metric = taxon_of(ctx, taxon).map(|t| t.is_metric()).unwrap_or(false);
                if is_metric {
                    Phase::MetricPre
                } else if taxon.namespace.is_some() {
                    Phase::DimensionDataSource
                } else {
                    Phase::Dimension
                }
            }
        },
        ExprKind::Arithmetic { .. } => {
            if is_post_aggregation(ast, ctx, id) {
                Phase::MetricPost
            } else {
                Phase::MetricPre
            }
        }
        ExprKind::Logical { left, right, left_invalid, right_invalid, .. } => {
            let sides = [(*left, *left_invalid), (*right, *right_invalid)];
            let post = sides
                .iter()
                .any(|(side, invalid)| !invalid && phase(ast, ctx, *side) == Phase::MetricPost);
            if post {
                Phase::MetricPost
            } else {
                Phase::max_of(sides.iter().map(|(side, _)| phase(ast, ctx, *side)))
            }
        }
        ExprKind::Not(inner) => phase(ast, ctx, *inner),
        ExprKind::IsNull { operand, .. } => phase(ast, ctx, *operand),
        ExprKind::Function { kind, args } => function_phase(ast, ctx, *kind, args),
        ExprKind::DimensionPhase { .. } => Phase::Dimension,
        ExprKind::AggregationPhase { .. } => Phase::MetricPre,
        ExprKind::PostAggregationPhase { .. } => Phase::MetricPost,
        ExprKind::Root { .. } => Phase::MetricPost,
    }
}

fn function_phase(ast: &Ast, ctx: &CompileContext<'_>, kind: FunctionKind, args: &[NodeId]) -> Phase {
    let first = args.first().map(|arg| phase(ast, ctx, *arg)).unwrap_or(Phase::Any);
    match kind {
        FunctionKind::Coalesce | FunctionKind::Cumulative | FunctionKind::Overall => {
            Phase::MetricPost
        }
        FunctionKind::Merge | FunctionKind::Override => Phase::Dimension,
        FunctionKind::Now => Phase::Any,
        FunctionKind::ConvertTimezone
        | FunctionKind::Upper
        | FunctionKind::Lower
        | FunctionKind::Trim
        | FunctionKind::Parse
        | FunctionKind::Contains
        | FunctionKind::DateTrunc
        | FunctionKind::DateHour
        | FunctionKind::Date
        | FunctionKind::DateWeek
        | FunctionKind::DateMonth
        | FunctionKind::HourOfDay
        | FunctionKind::DayOfWeek
        | FunctionKind::WeekOfYear
        | FunctionKind::MonthOfYear
        | FunctionKind::Year => first.max(Phase::DimensionDataSource),
        FunctionKind::DateDiff => Phase::max_of(
            args.iter().skip(1).map(|arg| phase(ast, ctx, *arg)),
        )
        .max(Phase::DimensionDataSource),
        FunctionKind::ToText | FunctionKind::ToBool | FunctionKind::ToDate => {
            first.min(Phase::Dimension)
        }
        FunctionKind::ToNumber => first.max(Phase::MetricPre),
        FunctionKind::Iff | FunctionKind::Ifs | FunctionKind::Concat => {
            Phase::max_of(args.iter().map(|arg| phase(ast, ctx, *arg)))
        }
    }
}

/// Whether an arithmetic node evaluates over already-aggregated inputs.
pub fn is_post_aggregation(ast: &Ast, ctx: &CompileContext<'_>, id: NodeId) -> bool {
    let ExprKind::Arithmetic { op, left, right, left_invalid, right_invalid } = ast.kind(id) else {
        return false;
    };
    let sides = [(*left, *left_invalid), (*right, *right_invalid)];
    let has_post = sides
        .iter()
        .any(|(side, invalid)| !invalid && phase(ast, ctx, *side) == Phase::MetricPost);
    if has_post {
        return true;
    }
    if op.is_strict() {
        let both_constant = return_type(ast, ctx, *left).is_constant
            && return_type(ast, ctx, *right).is_constant;
        let both_carry_taxons = used_taxons(ast, ctx, *left).has_some()
            && used_taxons(ast, ctx, *right).has_some();
        both_constant || both_carry_taxons
    } else {
        let left_pure_constant =
            !left_invalid && !used_taxons(ast, ctx, *left).has_some();
        let right_pure_constant =
            !right_invalid && !used_taxons(ast, ctx, *right).has_some();
        left_pure_constant || right_pure_constant
    }
}

// ---------------------------------------------------------------------------
// return_type
// ---------------------------------------------------------------------------

pub fn return_type(ast: &Ast, ctx: &CompileContext<'_>, id: NodeId) -> TelType {
    match ast.kind(id) {
        ExprKind::Integer(_) => TelType::constant(TelDataType::Integer),
        ExprKind::Real(_) => TelType::constant(TelDataType::Numeric),
        ExprKind::StringLit(_) => TelType::constant(TelDataType::String),
        ExprKind::Boolean(_) => TelType::constant(TelDataType::Boolean),
        ExprKind::Parens(inner) => return_type(ast, ctx, *inner),
        ExprKind::Taxon(taxon) => match taxon.calc {
            Some(calc) => return_type(ast, ctx, calc),
            None => match taxon_of(ctx, taxon) {
                Some(t) => t.validation_type.to_tel_type(),
                None => TelType::column(TelDataType::NoneOptional),
            },
        },
        ExprKind::Arithmetic { left, right, left_invalid, right_invalid, .. } => {
            let types = valid_side_types(ast, ctx, *left, *right, *left_invalid, *right_invalid);
            if types.is_empty() {
                TelType::column(TelDataType::Any)
            } else {
                return_common_type(&types)
            }
        }
        ExprKind::Logical { left, right, left_invalid, right_invalid, .. } => {
            let types = valid_side_types(ast, ctx, *left, *right, *left_invalid, *right_invalid);
            return_common_type(&types).with_data_type(TelDataType::Boolean)
        }
        ExprKind::Not(inner) => return_type(ast, ctx, *inner),
        ExprKind::IsNull { operand, .. } => {
            return_type(ast, ctx, *operand).with_data_type(TelDataType::Boolean)
        }
        ExprKind::Function { kind, args } => function_return_type(ast, ctx, *kind, args),
        ExprKind::DimensionPhase { value }
        | ExprKind::AggregationPhase { value, .. }
        | ExprKind::PostAggregationPhase { value, .. }
        | ExprKind::Root { value } => return_type(ast, ctx, *value),
    }
}

fn valid_side_types(
    ast: &Ast,
    ctx: &CompileContext<'_>,
    left: NodeId,
    right: NodeId,
    left_invalid: bool,
    right_invalid: bool,
) -> Vec<TelType> {
    let mut types = Vec::new();
    if !left_invalid {
        types.push(return_type(ast, ctx, left));
    }
    if !right_invalid {
        types.push(return_type(ast, ctx, right));
    }
    types
}

fn function_return_type(
    ast: &Ast,
    ctx: &CompileContext<'_>,
    kind: FunctionKind,
    args: &[NodeId],
) -> TelType {
    let arg_types = |args: &[NodeId]| -> Vec<TelType> {
        args.iter().map(|arg| return_type(ast, ctx, *arg)).collect()
    };
    let first = args
        .first()
        .map(|arg| return_type(ast, ctx, *arg))
        .unwrap_or_else(|| TelType::column(TelDataType::Any));
    match kind {
        FunctionKind::Coalesce | FunctionKind::Merge => {
            return_common_type(&arg_types(args)).with_constant(false)
        }
        FunctionKind::Upper | FunctionKind::Lower | FunctionKind::Trim => {
            return_common_type(&arg_types(args)).with_constant(false)
        }
        FunctionKind::Concat => TelType::column(TelDataType::String),
        FunctionKind::ConvertTimezone => first.with_constant(false),
        FunctionKind::Parse => TelType::column(TelDataType::Any),
        FunctionKind::Contains => first.with_data_type(TelDataType::Boolean).with_constant(false),
        FunctionKind::DateTrunc
        | FunctionKind::DateHour
        | FunctionKind::Date
        | FunctionKind::DateWeek
        | FunctionKind::DateMonth => {
            first.with_data_type(TelDataType::DateTime).with_constant(false)
        }
        FunctionKind::HourOfDay
        | FunctionKind::DayOfWeek
        | FunctionKind::WeekOfYear
        | FunctionKind::MonthOfYear
        | FunctionKind::Year => first.with_data_type(TelDataType::Integer).with_constant(false),
        FunctionKind::ToText => first.with_data_type(TelDataType::String).with_constant(false),
        FunctionKind::ToBool => first.with_data_type(TelDataType::Boolean).with_constant(false),
        // constancy of the expression is kept here on purpose
        FunctionKind::ToNumber => {
            if args.len() > 1 {
                first.with_data_type(TelDataType::Numeric)
            } else {
                first.with_data_type(TelDataType::Integer)
            }
        }
        FunctionKind::ToDate => first.with_data_type(TelDataType::DateTime).with_constant(false),
        FunctionKind::DateDiff => {
            let times: Vec<TelType> = args
                .iter()
                .skip(1)
                .map(|arg| return_type(ast, ctx, *arg))
                .collect();
            return_common_type(&times).with_constant(false)
        }
        FunctionKind::Override => TelType::column(TelDataType::String),
        FunctionKind::Cumulative | FunctionKind::Overall => first.with_constant(false),
        FunctionKind::Now => TelType::column(TelDataType::DateTime),
        FunctionKind::Iff | FunctionKind::Ifs => {
            let (pairs, negative) = iff_parts(args);
            let mut types: Vec<TelType> = pairs
                .iter()
                .map(|(_, outcome)| return_type(ast, ctx, *outcome))
                .collect();
            if let Some(negative) = negative {
                types.push(return_type(ast, ctx, negative));
            }
            return_common_type(&types).with_constant(false)
        }
    }
}

/// Split iff/ifs arguments into (condition, outcome) pairs and the
/// optional trailing negative outcome.
pub fn iff_parts(args: &[NodeId]) -> (Vec<(NodeId, NodeId)>, Option<NodeId>) {
    let negative = if args.len() > 2 && args.len() % 2 == 1 {
        args.last().copied()
    } else {
        None
    };
    let paired = if negative.is_some() { &args[..args.len() - 1] } else { args };
    let pairs = paired
        .chunks(2)
        .filter(|chunk| chunk.len() == 2)
        .map(|chunk| (chunk[0], chunk[1]))
        .collect();
    (pairs, negative)
}

// ---------------------------------------------------------------------------
// invalid
// ---------------------------------------------------------------------------

pub fn invalid(ast: &Ast, ctx: &CompileContext<'_>, id: NodeId) -> bool {
    match ast.kind(id) {
        ExprKind::Integer(_)
        | ExprKind::Real(_)
        | ExprKind::StringLit(_)
        | ExprKind::Boolean(_) => false,
        ExprKind::Parens(inner) | ExprKind::Not(inner) => invalid(ast, ctx, *inner),
        ExprKind::IsNull { operand, .. } => invalid(ast, ctx, *operand),
        ExprKind::Taxon(taxon) => {
            let base = match taxon.calc {
                Some(calc) => invalid(ast, ctx, calc),
                None => taxon_of(ctx, taxon).is_none(),
            };
            if taxon.optional {
                base || !namespace_allowed(ctx, taxon)
            } else {
                base
            }
        }
        ExprKind::Arithmetic { op, left_invalid, right_invalid, .. } => match op {
            ArithmeticOp::Multiply | ArithmeticOp::Divide => *left_invalid || *right_invalid,
            ArithmeticOp::Add => *left_invalid && *right_invalid,
            ArithmeticOp::Subtract => *left_invalid,
        },
        ExprKind::Logical { left_invalid, right_invalid, .. } => *left_invalid || *right_invalid,
        ExprKind::Function { kind, args } => match kind {
            FunctionKind::Coalesce | FunctionKind::Merge => args.is_empty(),
            FunctionKind::Contains => args
                .first()
                .map(|arg| invalid(ast, ctx, *arg))
                .unwrap_or(true),
            FunctionKind::Iff | FunctionKind::Ifs => {
                let (pairs, negative) = iff_parts(args);
                let any_pair_valid = pairs.iter().any(|(cond, outcome)| {
                    !invalid(ast, ctx, *cond) && !invalid(ast, ctx, *outcome)
                });
                let negative_valid =
                    negative.map(|n| !invalid(ast, ctx, n)).unwrap_or(false);
                !any_pair_valid && !negative_valid
            }
            _ => args.iter().any(|arg| invalid(ast, ctx, *arg)),
        },
        ExprKind::DimensionPhase { value }
        | ExprKind::AggregationPhase { value, .. }
        | ExprKind::PostAggregationPhase { value, .. }
        | ExprKind::Root { value } => invalid(ast, ctx, *value),
    }
}

// ---------------------------------------------------------------------------
// used_taxons
// ---------------------------------------------------------------------------

pub fn used_taxons(ast: &Ast, ctx: &CompileContext<'_>, id: NodeId) -> UsedTaxonsContainer {
    let mut container = UsedTaxonsContainer::new();
    collect_used_taxons(ast, ctx, id, &mut container);
    container
}

fn collect_used_taxons(
    ast: &Ast,
    ctx: &CompileContext<'_>,
    id: NodeId,
    container: &mut UsedTaxonsContainer,
) {
    match ast.kind(id) {
        ExprKind::Taxon(taxon) => {
            if let Some(calc) = taxon.calc {
                collect_used_taxons(ast, ctx, calc, container);
            }
            if taxon_of(ctx, taxon).is_some() {
                if taxon.optional {
                    container.add_optional(taxon.slug.clone());
                } else {
                    container.add_required(taxon.slug.clone());
                }
            }
        }
        ExprKind::Arithmetic { left, right, left_invalid, right_invalid, .. }
        | ExprKind::Logical { left, right, left_invalid, right_invalid, .. } => {
            if !left_invalid {
                collect_used_taxons(ast, ctx, *left, container);
            }
            if !right_invalid {
                collect_used_taxons(ast, ctx, *right, container);
            }
        }
        _ => {
            for child in ast.children(id) {
                collect_used_taxons(ast, ctx, child, container);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// return_data_sources
// ---------------------------------------------------------------------------

pub fn return_data_sources(
    ast: &Ast,
    ctx: &CompileContext<'_>,
    id: NodeId,
) -> BTreeSet<Option<String>> {
    match ast.kind(id) {
        ExprKind::Integer(_)
        | ExprKind::Real(_)
        | ExprKind::StringLit(_)
        | ExprKind::Boolean(_) => BTreeSet::new(),
        ExprKind::Parens(inner) | ExprKind::Not(inner) => return_data_sources(ast, ctx, *inner),
        ExprKind::IsNull { operand, .. } => return_data_sources(ast, ctx, *operand),
        ExprKind::Taxon(taxon) => {
            let mut sources = BTreeSet::new();
            match (&taxon.namespace, taxon.calc, taxon_of(ctx, taxon)) {
                (Some(ns), calc, _) => {
                    sources.insert(Some(ns.clone()));
                    if let Some(calc) = calc {
                        sources.extend(return_data_sources(ast, ctx, calc));
                    }
                }
                (None, None, Some(_)) => {
                    sources.insert(None);
                }
                (None, Some(calc), _) => {
                    sources.extend(return_data_sources(ast, ctx, calc));
                }
                (None, None, None) => {}
            }
            sources
        }
        ExprKind::Arithmetic { left, right, .. } | ExprKind::Logical { left, right, .. } => {
            let mut sources = return_data_sources(ast, ctx, *left);
            sources.extend(return_data_sources(ast, ctx, *right));
            sources
        }
        ExprKind::Function { kind, args } => match kind {
            // merge reconciles its inputs into one namespace-less value
            FunctionKind::Merge => [None].into_iter().collect(),
            _ => {
                let mut sources = BTreeSet::new();
                for arg in args {
                    sources.extend(return_data_sources(ast, ctx, *arg));
                }
                sources
            }
        },
        ExprKind::DimensionPhase { value }
        | ExprKind::AggregationPhase { value, .. }
        | ExprKind::PostAggregationPhase { value, .. }
        | ExprKind::Root { value } => return_data_sources(ast, ctx, *value),
    }
}

// ---------------------------------------------------------------------------
// template_slugs
// ---------------------------------------------------------------------------

/// Slugs of raw data-source dimensions that render as `${slug}`
/// placeholders awaiting substitution.
pub fn template_slugs(ast: &Ast, ctx: &CompileContext<'_>, id: NodeId) -> BTreeSet<String> {
    match ast.kind(id) {
        ExprKind::Taxon(taxon) => match (taxon.calc, taxon_of(ctx, taxon)) {
            (Some(calc), _) => template_slugs(ast, ctx, calc),
            (None, Some(t)) if taxon.namespace.is_some() && !t.is_metric() => {
                [taxon.slug.clone()].into()
            }
            _ => BTreeSet::new(),
        },
        ExprKind::Arithmetic { left, right, .. } | ExprKind::Logical { left, right, .. } => {
            let mut slugs = template_slugs(ast, ctx, *left);
            slugs.extend(template_slugs(ast, ctx, *right));
            slugs
        }
        _ => {
            let mut slugs = BTreeSet::new();
            for child in ast.children(id) {
                slugs.extend(template_slugs(ast, ctx, child));
            }
            slugs
        }
    }
}

// ---------------------------------------------------------------------------
// aggregation_definition
// ---------------------------------------------------------------------------

pub fn aggregation_definition(
    ast: &Ast,
    ctx: &CompileContext<'_>,
    id: NodeId,
) -> Option<AggregationDefinition> {
    match ast.kind(id) {
        ExprKind::Integer(_)
        | ExprKind::Real(_)
        | ExprKind::StringLit(_)
        | ExprKind::Boolean(_) => Some(AggregationDefinition::not_set()),
        ExprKind::Parens(inner) => aggregation_definition(ast, ctx, *inner),
        ExprKind::Taxon(taxon) => match taxon.calc {
            Some(calc) => aggregation_definition(ast, ctx, calc),
            None => Some(
                taxon_of(ctx, taxon)
                    .map(|t| t.default_aggregation())
                    .unwrap_or_else(AggregationDefinition::not_set),
            ),
        },
        ExprKind::Arithmetic { left, right, .. } => {
            let defs = [
                aggregation_definition(ast, ctx, *left),
                aggregation_definition(ast, ctx, *right),
            ];
            common_defined_definition(&defs, None)
        }
        ExprKind::Logical { .. } | ExprKind::Not(_) | ExprKind::IsNull { .. } => {
            Some(AggregationDefinition::group_by())
        }
        ExprKind::Function { kind, args } => {
            function_aggregation(ast, ctx, *kind, args)
        }
        ExprKind::DimensionPhase { value } => aggregation_definition(ast, ctx, *value),
        ExprKind::AggregationPhase { aggregation, .. }
        | ExprKind::PostAggregationPhase { aggregation, .. } => Some(aggregation.clone()),
        ExprKind::Root { value } => aggregation_definition(ast, ctx, *value),
    }
}

fn function_aggregation(
    ast: &Ast,
    ctx: &CompileContext<'_>,
    kind: FunctionKind,
    args: &[NodeId],
) -> Option<AggregationDefinition> {
    match kind {
        FunctionKind::Parse | FunctionKind::ToText | FunctionKind::ToBool => {
            Some(AggregationDefinition::group_by())
        }
        FunctionKind::ToNumber => Some(AggregationDefinition::sum()),
        FunctionKind::Cumulative | FunctionKind::Overall => args
            .first()
            .and_then(|arg| aggregation_definition(ast, ctx, *arg)),
        FunctionKind::Iff | FunctionKind::Ifs => {
            let (pairs, negative) = iff_parts(args);
            let mut defs: Vec<Option<AggregationDefinition>> = pairs
                .iter()
                .map(|(_, outcome)| aggregation_definition(ast, ctx, *outcome))
                .collect();
            if let Some(negative) = negative {
                defs.push(aggregation_definition(ast, ctx, negative));
            }
            let fallback = match ctx.taxon_type {
                TaxonType::Dimension => AggregationType::GroupBy,
                TaxonType::Metric => AggregationType::Sum,
            };
            common_defined_definition(&defs, Some(fallback))
        }
        _ => {
            let defs: Vec<Option<AggregationDefinition>> = args
                .iter()
                .map(|arg| aggregation_definition(ast, ctx, *arg))
                .collect();
            common_defined_definition(&defs, None)
        }
    }
}

// ---------------------------------------------------------------------------
// literal_value
// ---------------------------------------------------------------------------

/// Constant value of the subtree, when it folds to one.
pub fn literal_value(ast: &Ast, id: NodeId) -> Option<LiteralValue> {
    match ast.kind(id) {
        ExprKind::Integer(i) => Some(LiteralValue::Int(*i)),
        ExprKind::Real(f) => Some(LiteralValue::Float(*f)),
        ExprKind::StringLit(s) => Some(LiteralValue::Str(s.clone())),
        ExprKind::Boolean(b) => Some(LiteralValue::Bool(*b)),
        ExprKind::Parens(inner) => literal_value(ast, *inner),
        ExprKind::Arithmetic { op, left, right, .. } => {
            let l = literal_value(ast, *left)?;
            let r = literal_value(ast, *right)?;
            fold_arithmetic(*op, &l, &r)
        }
        ExprKind::Logical { op, left, right, .. } => {
            let l = literal_value(ast, *left)?;
            let r = literal_value(ast, *right)?;
            fold_logical(*op, &l, &r)
        }
        ExprKind::Not(inner) => match literal_value(ast, *inner)? {
            LiteralValue::Bool(b) => Some(LiteralValue::Bool(!b)),
            _ => None,
        },
        ExprKind::DimensionPhase { value }
        | ExprKind::AggregationPhase { value, .. }
        | ExprKind::PostAggregationPhase { value, .. }
        | ExprKind::Root { value } => literal_value(ast, *value),
        _ => None,
    }
}

fn fold_arithmetic(op: ArithmeticOp, l: &LiteralValue, r: &LiteralValue) -> Option<LiteralValue> {
    if let (LiteralValue::Int(a), LiteralValue::Int(b)) = (l, r) {
        return match op {
            ArithmeticOp::Add => Some(LiteralValue::Int(a.checked_add(*b)?)),
            ArithmeticOp::Subtract => Some(LiteralValue::Int(a.checked_sub(*b)?)),
            ArithmeticOp::Multiply => Some(LiteralValue::Int(a.checked_mul(*b)?)),
            ArithmeticOp::Divide => {
                // division by zero never folds; the NULLIF guard handles it
                if *b == 0 {
                    None
                } else {
                    Some(LiteralValue::Float(*a as f64 / *b as f64))
                }
            }
        };
    }
    let a = l.as_f64()?;
    let b = r.as_f64()?;
    match op {
        ArithmeticOp::Add => Some(LiteralValue::Float(a + b)),
        ArithmeticOp::Subtract => Some(LiteralValue::Float(a - b)),
        ArithmeticOp::Multiply => Some(LiteralValue::Float(a * b)),
        ArithmeticOp::Divide => {
            if b.trunc() == 0.0 {
                None
            } else {
                Some(LiteralValue::Float(a / b))
            }
        }
    }
}

fn fold_logical(op: LogicalOp, l: &LiteralValue, r: &LiteralValue) -> Option<LiteralValue> {
    match op {
        LogicalOp::And => match (l, r) {
            (LiteralValue::Bool(a), LiteralValue::Bool(b)) => Some(LiteralValue::Bool(*a && *b)),
            _ => None,
        },
        LogicalOp::Or => match (l, r) {
            (LiteralValue::Bool(a), LiteralValue::Bool(b)) => Some(LiteralValue::Bool(*a || *b)),
            _ => None,
        },
        LogicalOp::Eq => literal_eq(l, r).map(LiteralValue::Bool),
        LogicalOp::NotEq => literal_eq(l, r).map(|eq| LiteralValue::Bool(!eq)),
        LogicalOp::Lt | LogicalOp::LtEq | LogicalOp::Gt | LogicalOp::GtEq => {
            let a = l.as_f64()?;
            let b = r.as_f64()?;
            let verdict = match op {
                LogicalOp::Lt => a < b,
                LogicalOp::LtEq => a <= b,
                LogicalOp::Gt => a > b,
                LogicalOp::GtEq => a >= b,
                _ => unreachable!(),
            };
            Some(LiteralValue::Bool(verdict))
        }
    }
}

fn literal_eq(l: &LiteralValue, r: &LiteralValue) -> Option<bool> {
    match (l, r) {
        (LiteralValue::Str(a), LiteralValue::Str(b)) => Some(a == b),
        (LiteralValue::Bool(a), LiteralValue::Bool(b)) => Some(a == b),
        _ => {
            let a = l.as_f64()?;
            let b = r.as_f64()?;
            Some(a == b)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Location;

    fn ctx_fixture() -> crate::taxonomy::TaxonMap {
        crate::taxonomy::parse_file("test_data/taxons.yaml").unwrap()
    }

    fn arith(ast: &mut Ast, op: ArithmeticOp, left: NodeId, right: NodeId) -> NodeId {
        ast.add(
            ExprKind::Arithmetic { op, left, right, left_invalid: false, right_invalid: false },
            Location::default(),
        )
    }

    #[test]
    fn test_literal_fold_addition() {
        let mut ast = Ast::new("1 + 10");
        let a = ast.add(ExprKind::Integer(1), Location::default());
        let b = ast.add(ExprKind::Integer(10), Location::default());
        let sum = arith(&mut ast, ArithmeticOp::Add, a, b);
        assert_eq!(literal_value(&ast, sum), Some(LiteralValue::Int(11)));
    }

    #[test]
    fn test_literal_fold_never_divides_by_zero() {
        let mut ast = Ast::new("1 / 0");
        let a = ast.add(ExprKind::Integer(1), Location::default());
        let b = ast.add(ExprKind::Integer(0), Location::default());
        let div = arith(&mut ast, ArithmeticOp::Divide, a, b);
        assert_eq!(literal_value(&ast, div), None);
    }

    #[test]
    fn test_raw_taxon_phases() {
        let taxons = ctx_fixture();
        let ctx = crate::context::CompileContext::new(&taxons);
        let mut ast = Ast::new("");

        let metric = ast.add(
            ExprKind::Taxon(TaxonExpr {
                slug: "spend".into(),
                namespace: None,
                name: "spend".into(),
                optional: false,
                calc: None,
            }),
            Location::default(),
        );
        assert_eq!(phase(&ast, &ctx, metric), Phase::MetricPre);

        let dimension = ast.add(
            ExprKind::Taxon(TaxonExpr {
                slug: "gender".into(),
                namespace: None,
                name: "gender".into(),
                optional: false,
                calc: None,
            }),
            Location::default(),
        );
        assert_eq!(phase(&ast, &ctx, dimension), Phase::Dimension);

        let namespaced = ast.add(
            ExprKind::Taxon(TaxonExpr {
                slug: "facebook_ads|gender".into(),
                namespace: Some("facebook_ads".into()),
                name: "gender".into(),
                optional: false,
                calc: None,
            }),
            Location::default(),
        );
        assert_eq!(phase(&ast, &ctx, namespaced), Phase::DimensionDataSource);
        assert_eq!(
            template_slugs(&ast, &ctx, namespaced),
            ["facebook_ads|gender".to_string()].into()
        );
    }

    #[test]
    fn test_missing_taxon_is_invalid_and_none_optional() {
        let taxons = ctx_fixture();
        let ctx = crate::context::CompileContext::new(&taxons);
        let mut ast = Ast::new("");
        let node = ast.add(
            ExprKind::Taxon(TaxonExpr {
                slug: "nope".into(),
                namespace: None,
                name: "nope".into(),
                optional: false,
                calc: None,
            }),
            Location::default(),
        );
        assert!(invalid(&ast, &ctx, node));
        assert_eq!(
            return_type(&ast, &ctx, node).data_type,
            TelDataType::NoneOptional
        );
    }

    #[test]
    fn test_iff_parts() {
        let ids: Vec<NodeId> = {
            let mut ast = Ast::new("");
            (0..5)
                .map(|i| ast.add(ExprKind::Integer(i), Location::default()))
                .collect()
        };

        let (pairs, negative) = iff_parts(&ids[..2]);
        assert_eq!(pairs.len(), 1);
        assert!(negative.is_none());

        let (pairs, negative) = iff_parts(&ids[..3]);
        assert_eq!(pairs.len(), 1);
        assert_eq!(negative, Some(ids[2]));

        let (pairs, negative) = iff_parts(&ids[..5]);
        assert_eq!(pairs.len(), 2);
        assert_eq!(negative, Some(ids[4]));
    }
}
