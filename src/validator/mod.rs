//! Semantic validation (verb module)
//!
//! Walks the expression tree and collects every violation into a
//! `ValidationContext`; compilation aborts only after the whole tree was
//! seen, so the caller gets all errors at once. The root node is the
//! exception: its own checks run only when the subtree is clean.

use std::collections::BTreeMap;

use crate::ast::queries::{self, LiteralValue};
use crate::ast::{Ast, ExprKind, NodeId};
use crate::context::{CompileContext, ValidationContext};
use crate::functions::{self, ArgInfo, FunctionKind, DATE_TRUNC_UNITS};
use crate::phase::Phase;
use crate::taxonomy::TaxonType;
use crate::types::{are_compatible, TelDataType};

/// Validate a parsed expression tree.
pub fn validate(ast: &Ast, ctx: &CompileContext<'_>, node: NodeId) -> ValidationContext {
    let mut vctx = ValidationContext::new();
    validate_node(ast, ctx, node, &mut vctx);
    vctx
}

fn validate_node(ast: &Ast, ctx: &CompileContext<'_>, id: NodeId, vctx: &mut ValidationContext) {
    match ast.kind(id) {
        ExprKind::Integer(_)
        | ExprKind::Real(_)
        | ExprKind::StringLit(_)
        | ExprKind::Boolean(_) => {}
        ExprKind::Parens(inner) => validate_node(ast, ctx, *inner, vctx),
        ExprKind::Taxon(taxon) => {
            if let Some(calc) = taxon.calc {
                validate_node(ast, ctx, calc, vctx);
            }
            if !taxon.optional {
                let allowed = match &taxon.namespace {
                    Some(ns) => ctx.is_data_source_allowed(ns),
                    None => true,
                };
                if !allowed {
                    vctx.with_error(
                        format!("Missing required taxon \"{}\"", taxon.slug),
                        ast,
                        id,
                    );
                }
                if !ctx.taxons.contains_key(&taxon.slug) {
                    vctx.with_error(format!("Taxon \"{}\" not found", taxon.slug), ast, id);
                }
            }
        }
        ExprKind::Not(inner) => {
            validate_node(ast, ctx, *inner, vctx);
            if !queries::return_type(ast, ctx, *inner).is_boolean() {
                vctx.with_error("Operand in not expression must be of type: boolean", ast, id);
            }
        }
        ExprKind::IsNull { operand, .. } => validate_node(ast, ctx, *operand, vctx),
        ExprKind::Arithmetic { op, left, right, left_invalid, right_invalid } => {
            validate_node(ast, ctx, *left, vctx);
            validate_node(ast, ctx, *right, vctx);
            // operand checks would only pile noise on top of earlier errors
            if vctx.has_errors() {
                return;
            }
            if !left_invalid && !queries::return_type(ast, ctx, *left).is_number() {
                vctx.with_error(
                    format!(
                        "Operand 1 in {} expression must be of type: number",
                        op.expression_name()
                    ),
                    ast,
                    *left,
                );
            }
            if !right_invalid && !queries::return_type(ast, ctx, *right).is_number() {
                vctx.with_error(
                    format!(
                        "Operand 2 in {} expression must be of type: number",
                        op.expression_name()
                    ),
                    ast,
                    *right,
                );
            }
        }
        ExprKind::Logical { left, right, .. } => {
            validate_node(ast, ctx, *left, vctx);
            validate_node(ast, ctx, *right, vctx);
            let types = [
                queries::return_type(ast, ctx, *left),
                queries::return_type(ast, ctx, *right),
            ];
            if !are_compatible(&types) {
                vctx.with_error(
                    "Operands in logical expression must have compatible data types",
                    ast,
                    id,
                );
            }
        }
        ExprKind::Function { kind, args } => validate_function(ast, ctx, id, *kind, args, vctx),
        ExprKind::DimensionPhase { value }
        | ExprKind::AggregationPhase { value, .. }
        | ExprKind::PostAggregationPhase { value, .. } => validate_node(ast, ctx, *value, vctx),
        ExprKind::Root { value } => {
            validate_node(ast, ctx, *value, vctx);
            if vctx.has_errors() {
                return;
            }
            validate_root(ast, ctx, id, *value, vctx);
        }
    }
}

fn validate_root(
    ast: &Ast,
    ctx: &CompileContext<'_>,
    id: NodeId,
    value: NodeId,
    vctx: &mut ValidationContext,
) {
    let phase = queries::phase(ast, ctx, value);

    if ctx.subrequest_only && phase > Phase::Dimension {
        vctx.with_error(
            "Taxon used for subrequest cannot use complex calculation logic after merge() function.",
            ast,
            id,
        );
    } else if phase.is_metric() && ctx.taxon_type != TaxonType::Metric {
        vctx.with_error(
            format!(
                "Taxon is of type {}, but calculation is for type metric",
                ctx.taxon_type
            ),
            ast,
            id,
        );
    }

    if queries::aggregation_definition(ast, ctx, id).is_none() {
        vctx.with_error("It was not possible to deduce aggregation type", ast, id);
    }
}

fn validate_function(
    ast: &Ast,
    ctx: &CompileContext<'_>,
    id: NodeId,
    kind: FunctionKind,
    args: &[NodeId],
    vctx: &mut ValidationContext,
) {
    match kind {
        FunctionKind::Merge => {
            validate_merge_data_sources(ast, ctx, id, args, vctx);
            validate_table(ast, ctx, id, kind, args, vctx);
        }
        FunctionKind::Concat => {
            if queries::return_data_sources(ast, ctx, id).len() > 1 {
                vctx.with_error(
                    "concat accepts only taxons from same data source or after merge() is applied",
                    ast,
                    id,
                );
            }
            validate_table(ast, ctx, id, kind, args, vctx);
        }
        FunctionKind::DateTrunc => {
            if args.len() >= 2 {
                validate_date_trunc_unit(ast, args[1], vctx);
            }
            validate_table(ast, ctx, id, kind, args, vctx);
        }
        FunctionKind::ToDate => {
            if validate_to_date(ast, ctx, args, vctx) {
                // custom argument errors make the remaining checks moot
                return;
            }
            validate_table(ast, ctx, id, kind, args, vctx);
        }
        FunctionKind::Override => {
            if let Some(include_missing) = args.get(2) {
                if !matches!(ast.kind(*include_missing), ExprKind::Boolean(_)) {
                    vctx.with_error(
                        "Argument 3 in function override must be a boolean constant",
                        ast,
                        *include_missing,
                    );
                }
            }
            validate_table(ast, ctx, id, kind, args, vctx);
        }
        FunctionKind::ConvertTimezone => {
            for (index, timezone) in args.iter().enumerate().skip(1) {
                let valid = matches!(
                    queries::literal_value(ast, *timezone),
                    Some(LiteralValue::Str(name)) if !name.is_empty()
                );
                if !valid {
                    vctx.with_error(
                        format!(
                            "Argument {} in function convert_timezone is not a valid timezone name",
                            index + 1
                        ),
                        ast,
                        *timezone,
                    );
                }
            }
            validate_table(ast, ctx, id, kind, args, vctx);
        }
        FunctionKind::Iff | FunctionKind::Ifs => {
            validate_condition_shape(ast, ctx, id, kind, args, vctx);
            validate_condition_phases(ast, ctx, id, kind, args, vctx);
        }
        _ => {
            validate_table(ast, ctx, id, kind, args, vctx);
        }
    }

    for arg in args {
        validate_node(ast, ctx, *arg, vctx);
    }

    if kind == FunctionKind::DateDiff && !vctx.has_errors() {
        let non_global: Vec<_> = queries::return_data_sources(ast, ctx, id)
            .into_iter()
            .flatten()
            .collect();
        if non_global.len() > 1 {
            vctx.with_error(
                "date_diff accepts only taxons from the same data source or after merge() is applied",
                ast,
                id,
            );
        }
    }
}

fn validate_table(
    ast: &Ast,
    ctx: &CompileContext<'_>,
    id: NodeId,
    kind: FunctionKind,
    args: &[NodeId],
    vctx: &mut ValidationContext,
) {
    let infos: Vec<ArgInfo> = args
        .iter()
        .map(|arg| ArgInfo {
            node: *arg,
            tel_type: queries::return_type(ast, ctx, *arg),
            phase: queries::phase(ast, ctx, *arg),
            invalid: queries::invalid(ast, ctx, *arg),
        })
        .collect();
    functions::validate_args(kind, &infos, ast, id, vctx);
}

fn validate_merge_data_sources(
    ast: &Ast,
    ctx: &CompileContext<'_>,
    id: NodeId,
    args: &[NodeId],
    vctx: &mut ValidationContext,
) {
    if args.is_empty() {
        return;
    }
    let mut counts: BTreeMap<Option<String>, usize> = BTreeMap::new();
    for arg in args {
        for data_source in queries::return_data_sources(ast, ctx, *arg) {
            *counts.entry(data_source).or_insert(0) += 1;
        }
    }
    let duplicates: Vec<String> = counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(data_source, _)| data_source.unwrap_or_else(|| "global".to_string()))
        .collect();
    if !duplicates.is_empty() {
        vctx.with_error(
            format!(
                "merge() accepts only one taxon per distinct data source, but more taxons were provided for following data sources: {}",
                duplicates.join(", ")
            ),
            ast,
            id,
        );
    }
}

fn validate_date_trunc_unit(ast: &Ast, unit: NodeId, vctx: &mut ValidationContext) {
    let unit_name = match queries::literal_value(ast, unit) {
        Some(LiteralValue::Str(name)) => name,
        _ => "None".to_string(),
    };
    if !DATE_TRUNC_UNITS.contains(&unit_name.as_str()) {
        vctx.with_error(
            format!(
                "Function date_trunc does not support time unit \"{}\". Supported values are: {}",
                unit_name,
                DATE_TRUNC_UNITS.join(", ")
            ),
            ast,
            unit,
        );
    }
}

/// Custom checks of `to_date`: the format argument is required exactly when
/// the expression is not a number. Returns true when an error was raised.
fn validate_to_date(
    ast: &Ast,
    ctx: &CompileContext<'_>,
    args: &[NodeId],
    vctx: &mut ValidationContext,
) -> bool {
    let Some(expression) = args.first() else {
        return false;
    };
    let expression_type = queries::return_type(ast, ctx, *expression);

    if !expression_type.is_number() && args.len() < 2 {
        vctx.with_error(
            "Argument 2 in function to_date is required, if the first argument is not a number",
            ast,
            *expression,
        );
        return true;
    }
    if let Some(format) = args.get(1) {
        if expression_type.is_number() {
            vctx.with_error(
                "Argument 2 in function to_date is allowed only if the first argument is not a number",
                ast,
                *format,
            );
            return true;
        }
    }
    false
}

fn validate_condition_shape(
    ast: &Ast,
    ctx: &CompileContext<'_>,
    id: NodeId,
    kind: FunctionKind,
    args: &[NodeId],
    vctx: &mut ValidationContext,
) {
    let name = kind.name();
    let pair_count = match kind {
        // one condition-outcome pair, plus the optional negative outcome
        FunctionKind::Iff => 1,
        _ => {
            let paired = if args.len() > 2 && args.len() % 2 == 1 {
                args.len() - 1
            } else {
                args.len()
            };
            ((paired + 1) / 2).max(1)
        }
    };
    let required = pair_count * 2;

    if args.len() < required {
        let required_names: Vec<String> = if kind == FunctionKind::Iff {
            vec!["condition".to_string(), "positive_outcome".to_string()]
        } else {
            (1..=pair_count)
                .flat_map(|i| [format!("condition_{}", i), format!("positive_outcome_{}", i)])
                .collect()
        };
        let given = match args.len() {
            0 => "none were".to_string(),
            1 => "only one was".to_string(),
            n => format!("{} were", n),
        };
        vctx.with_error(
            format!(
                "{} requires {} or {} arguments: {}(optionally also, negative_outcome), but {} given",
                name,
                required,
                required + 1,
                required_names.join(", "),
                given
            ),
            ast,
            id,
        );
        return;
    }

    if kind == FunctionKind::Iff && args.len() > 3 {
        vctx.with_error(
            format!(
                "Function iff was provided with an incorrect number of arguments {}, instead of expected 3",
                args.len()
            ),
            ast,
            id,
        );
        return;
    }

    let (pairs, _) = queries::iff_parts(args);
    for (index, (condition, _)) in pairs.iter().enumerate() {
        if !queries::return_type(ast, ctx, *condition).is_boolean() {
            vctx.with_error(
                format!(
                    "Argument {} in function {} must be of type: boolean",
                    index * 2 + 1,
                    name
                ),
                ast,
                *condition,
            );
        }
    }
}

fn validate_condition_phases(
    ast: &Ast,
    ctx: &CompileContext<'_>,
    id: NodeId,
    kind: FunctionKind,
    args: &[NodeId],
    vctx: &mut ValidationContext,
) {
    let name = kind.name();
    let (pairs, negative) = queries::iff_parts(args);

    let condition_phases: Vec<Phase> = pairs
        .iter()
        .map(|(condition, _)| *condition)
        .filter(|condition| !queries::invalid(ast, ctx, *condition))
        .map(|condition| queries::phase(ast, ctx, condition))
        .collect();
    let mut outcome_phases: Vec<Phase> = pairs
        .iter()
        .map(|(_, outcome)| *outcome)
        .filter(|outcome| !queries::invalid(ast, ctx, *outcome))
        .map(|outcome| queries::phase(ast, ctx, outcome))
        .collect();
    if let Some(negative) = negative {
        if !queries::invalid(ast, ctx, negative) {
            outcome_phases.push(queries::phase(ast, ctx, negative));
        }
    }

    let max_outcome = outcome_phases.iter().copied().max();

    if outcome_phases.iter().any(|phase| phase.is_dimension())
        && outcome_phases.iter().any(|phase| phase.is_metric())
    {
        vctx.with_error(
            format!("{} cannot combine dimension and metric outcomes", name),
            ast,
            id,
        );
    }

    if condition_phases.iter().any(|phase| phase.is_metric())
        && max_outcome.map(|phase| phase.is_dimension()).unwrap_or(false)
    {
        vctx.with_error(
            format!(
                "Condition arguments in function {} must be dimension taxons when the outcome is dimension",
                name
            ),
            ast,
            id,
        );
    }

    if condition_phases.iter().any(|phase| phase.is_dimension())
        && max_outcome == Some(Phase::MetricPost)
    {
        vctx.with_error(
            format!(
                "Condition arguments in function {} must be metric taxons when the outcome is post-aggregation metric",
                name
            ),
            ast,
            id,
        );
    }

    if queries::return_type(ast, ctx, id).data_type == TelDataType::Unknown {
        vctx.with_error(
            format!(
                "Outcome arguments in function {} must have compatible data types",
                name
            ),
            ast,
            id,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;
    use crate::taxonomy::TaxonMap;

    fn fixture() -> TaxonMap {
        crate::taxonomy::parse_file("test_data/taxons.yaml").unwrap()
    }

    fn errors_for(expression: &str) -> Vec<String> {
        let taxons = fixture();
        let ctx = CompileContext::new(&taxons);
        let (ast, top) = parser::parse(expression, &ctx).unwrap();
        validate(&ast, &ctx, top).errors().to_vec()
    }

    #[test]
    fn test_arithmetic_operand_must_be_number() {
        let errors = errors_for("spend + gender");
        assert_eq!(errors.len(), 1);
        assert!(
            errors[0].starts_with("Operand 2 in addition expression must be of type: number"),
            "unexpected: {}",
            errors[0]
        );
    }

    #[test]
    fn test_logical_operands_must_be_compatible() {
        let errors = errors_for("gender == 1");
        assert!(errors[0]
            .starts_with("Operands in logical expression must have compatible data types"));
    }

    #[test]
    fn test_required_taxon_not_found() {
        let errors = errors_for("no_such_taxon * spend");
        assert!(errors[0].starts_with("Taxon \"no_such_taxon\" not found"));
    }

    #[test]
    fn test_merge_rejects_duplicate_data_sources() {
        let errors = errors_for("merge(facebook_ads|gender, facebook_ads|gender)");
        assert!(errors[0].starts_with(
            "merge() accepts only one taxon per distinct data source, but more taxons were \
             provided for following data sources: facebook_ads"
        ));
    }

    #[test]
    fn test_date_trunc_rejects_unknown_unit() {
        let errors = errors_for("date_trunc(date, 'CENTURY')");
        assert!(errors[0].starts_with(
            "Function date_trunc does not support time unit \"CENTURY\". \
             Supported values are: HOUR, DAY, WEEK, MONTH"
        ));
    }

    #[test]
    fn test_iff_condition_phase_must_match_outcome() {
        let errors = errors_for("iff(spend > 100, gender)");
        assert!(errors.iter().any(|e| e.starts_with(
            "Condition arguments in function iff must be dimension taxons when the outcome is dimension"
        )));
    }

    #[test]
    fn test_to_date_requires_format_for_strings() {
        let errors = errors_for("to_date(gender)");
        assert!(errors[0].starts_with(
            "Argument 2 in function to_date is required, if the first argument is not a number"
        ));
    }

    #[test]
    fn test_dimension_taxon_cannot_hold_metric_calculation() {
        let taxons = fixture();
        let mut ctx = CompileContext::new(&taxons);
        ctx.taxon_type = TaxonType::Dimension;
        let (mut ast, top) = parser::parse("spend", &ctx).unwrap();
        let root = ast.add(ExprKind::Root { value: top }, ast.location(top));
        let errors = validate(&ast, &ctx, root).errors().to_vec();
        assert!(errors[0]
            .starts_with("Taxon is of type dimension, but calculation is for type metric"));
    }

    #[test]
    fn test_valid_expression_has_no_errors() {
        assert!(errors_for("(spend * 1000) / impressions").is_empty());
        assert!(errors_for("generic_cpm").is_empty());
    }
}
