//! Phase planning (verb module)
//!
//! Inserts phase transition nodes into a validated, rewritten tree so
//! that every subtree ends up in the phase its parent needs. A transition
//! node marks the point where the renderer cuts the expression into a
//! pre-aggregation formula, an aggregation, or a post-aggregation
//! formula. The root is taken all the way to the post-aggregation phase.

use crate::ast::queries;
use crate::ast::{Ast, ExprKind, Location, NodeId, TaxonExpr};
use crate::context::CompileContext;
use crate::functions::FunctionKind;
use crate::phase::Phase;
use crate::taxonomy::aggregation::AggregationDefinition;

/// Plan phase transitions for the subtree rooted at `id`.
pub fn plan(ast: &mut Ast, ctx: &CompileContext<'_>, id: NodeId) -> NodeId {
    let location = ast.location(id);
    match ast.kind(id).clone() {
        ExprKind::Integer(_)
        | ExprKind::Real(_)
        | ExprKind::StringLit(_)
        | ExprKind::Boolean(_) => id,
        ExprKind::Parens(inner) => {
            let inner = plan(ast, ctx, inner);
            ast.add(ExprKind::Parens(inner), location)
        }
        ExprKind::Not(inner) => {
            let inner = plan(ast, ctx, inner);
            ast.add(ExprKind::Not(inner), location)
        }
        ExprKind::IsNull { operand, negated } => {
            let operand = plan(ast, ctx, operand);
            ast.add(ExprKind::IsNull { operand, negated }, location)
        }
        ExprKind::Taxon(taxon) => match taxon.calc {
            Some(calc) if !queries::invalid(ast, ctx, calc) => {
                let calc = plan(ast, ctx, calc);
                ast.add(ExprKind::Taxon(TaxonExpr { calc: Some(calc), ..taxon }), location)
            }
            _ => id,
        },
        ExprKind::Arithmetic { op, left, right, left_invalid, right_invalid } => {
            let post = queries::is_post_aggregation(ast, ctx, id);
            let left = plan_arithmetic_side(ast, ctx, left, post);
            let right = plan_arithmetic_side(ast, ctx, right, post);
            ast.add(
                ExprKind::Arithmetic { op, left, right, left_invalid, right_invalid },
                location,
            )
        }
        ExprKind::Logical { op, left, right, left_invalid, right_invalid } => {
            let parent_phase = ast.parent(id).map(|parent| queries::phase(ast, ctx, parent));
            let left = plan_logical_side(ast, ctx, left, parent_phase);
            let right = plan_logical_side(ast, ctx, right, parent_phase);
            ast.add(ExprKind::Logical { op, left, right, left_invalid, right_invalid }, location)
        }
        ExprKind::Function { kind, args } => plan_function(ast, ctx, id, kind, &args, location),
        // already planned transitions pass through unchanged
        ExprKind::DimensionPhase { .. } | ExprKind::PostAggregationPhase { .. } => id,
        ExprKind::AggregationPhase { value, label, .. } => {
            if queries::phase(ast, ctx, value) == Phase::DimensionDataSource {
                let value = plan(ast, ctx, value);
                let dim = ast.add(ExprKind::DimensionPhase { value }, location);
                ast.add(
                    ExprKind::AggregationPhase {
                        value: dim,
                        aggregation: AggregationDefinition::not_set(),
                        label,
                    },
                    location,
                )
            } else {
                id
            }
        }
        ExprKind::Root { value } => plan_root(ast, ctx, id, value, location),
    }
}

/// Lift one side of an arithmetic operation to the post-aggregation phase
/// when the operation itself evaluates post-aggregation.
fn plan_arithmetic_side(
    ast: &mut Ast,
    ctx: &CompileContext<'_>,
    side: NodeId,
    post: bool,
) -> NodeId {
    let location = ast.location(side);
    if post && queries::phase(ast, ctx, side) != Phase::MetricPost {
        let aggregation = queries::aggregation_definition(ast, ctx, side)
            .unwrap_or_else(AggregationDefinition::sum);
        let value = plan(ast, ctx, side);
        ast.add(
            ExprKind::PostAggregationPhase { value, aggregation, label: None },
            location,
        )
    } else {
        plan(ast, ctx, side)
    }
}

/// Bring a comparison operand to the phase of the surrounding expression.
fn plan_logical_side(
    ast: &mut Ast,
    ctx: &CompileContext<'_>,
    side: NodeId,
    parent_phase: Option<Phase>,
) -> NodeId {
    let location = ast.location(side);
    let mut planned = side;
    let mut wrapped = false;

    if parent_phase.map(|phase| phase.is_metric()).unwrap_or(false)
        && queries::phase(ast, ctx, side).is_dimension()
    {
        let aggregation = queries::aggregation_definition(ast, ctx, side)
            .unwrap_or_else(AggregationDefinition::not_set);
        let value = plan(ast, ctx, side);
        planned = add_aggregation_phase(ast, ctx, value, aggregation, None, location);
        wrapped = true;
    }

    if parent_phase == Some(Phase::MetricPost)
        && queries::phase(ast, ctx, planned) == Phase::MetricPre
    {
        let aggregation = queries::aggregation_definition(ast, ctx, planned)
            .unwrap_or_else(AggregationDefinition::sum);
        let value = if wrapped { planned } else { plan(ast, ctx, planned) };
        return ast.add(
            ExprKind::PostAggregationPhase { value, aggregation, label: None },
            location,
        );
    }

    if wrapped {
        planned
    } else {
        plan(ast, ctx, side)
    }
}

/// Add an aggregation transition over an already planned value. A value
/// still in the data-source dimension phase gets a dimension transition
/// first; the aggregation over it carries no aggregation function.
fn add_aggregation_phase(
    ast: &mut Ast,
    ctx: &CompileContext<'_>,
    value: NodeId,
    aggregation: AggregationDefinition,
    label: Option<String>,
    location: Location,
) -> NodeId {
    if queries::phase(ast, ctx, value) == Phase::DimensionDataSource {
        let dim = ast.add(ExprKind::DimensionPhase { value }, location);
        ast.add(
            ExprKind::AggregationPhase {
                value: dim,
                aggregation: AggregationDefinition::not_set(),
                label,
            },
            location,
        )
    } else {
        ast.add(ExprKind::AggregationPhase { value, aggregation, label }, location)
    }
}

fn plan_function(
    ast: &mut Ast,
    ctx: &CompileContext<'_>,
    id: NodeId,
    kind: FunctionKind,
    args: &[NodeId],
    location: Location,
) -> NodeId {
    let planned_args: Vec<NodeId> = match kind {
        // aggregation phase arguments move to the post-aggregation phase,
        // dimension arguments stay as they are
        FunctionKind::Coalesce => {
            let aggregation = queries::aggregation_definition(ast, ctx, id)
                .unwrap_or_else(AggregationDefinition::sum);
            args.iter()
                .map(|&arg| {
                    let arg_location = ast.location(arg);
                    if queries::phase(ast, ctx, arg) == Phase::MetricPre {
                        let value = plan(ast, ctx, arg);
                        ast.add(
                            ExprKind::PostAggregationPhase {
                                value,
                                aggregation: aggregation.clone(),
                                label: None,
                            },
                            arg_location,
                        )
                    } else {
                        plan(ast, ctx, arg)
                    }
                })
                .collect()
        }
        FunctionKind::Merge => args
            .iter()
            .map(|&arg| {
                let value = plan(ast, ctx, arg);
                ast.add(ExprKind::DimensionPhase { value }, location)
            })
            .collect(),
        FunctionKind::Contains if contains_needs_aggregation(ast, ctx, id) && !args.is_empty() => {
            let mut planned = Vec::with_capacity(args.len());
            let first_location = ast.location(args[0]);
            let value = plan(ast, ctx, args[0]);
            planned.push(add_aggregation_phase(
                ast,
                ctx,
                value,
                AggregationDefinition::not_set(),
                None,
                first_location,
            ));
            for &arg in &args[1..] {
                planned.push(plan(ast, ctx, arg));
            }
            planned
        }
        FunctionKind::DateDiff
            if args.len() == 3 && queries::phase(ast, ctx, id) == Phase::Dimension =>
        {
            let unit = plan(ast, ctx, args[0]);
            let start_location = ast.location(args[1]);
            let end_location = ast.location(args[2]);
            let start = plan(ast, ctx, args[1]);
            let start = ast.add(ExprKind::DimensionPhase { value: start }, start_location);
            let end = plan(ast, ctx, args[2]);
            let end = ast.add(ExprKind::DimensionPhase { value: end }, end_location);
            vec![unit, start, end]
        }
        FunctionKind::Override if args.len() >= 2 => {
            let value = plan(ast, ctx, args[0]);
            let dim = ast.add(ExprKind::DimensionPhase { value }, ast.location(args[1]));
            let mut planned = vec![dim, args[1]];
            planned.extend(args.get(2).copied());
            planned
        }
        FunctionKind::Cumulative if args.len() == 2 => {
            let aggregation = queries::aggregation_definition(ast, ctx, id)
                .unwrap_or_else(AggregationDefinition::sum);
            let metric_location = ast.location(args[0]);
            let time_location = ast.location(args[1]);

            let metric = plan(ast, ctx, args[0]);
            let metric = ast.add(
                ExprKind::PostAggregationPhase { value: metric, aggregation, label: None },
                metric_location,
            );

            let time = plan(ast, ctx, args[1]);
            let time = add_aggregation_phase(
                ast,
                ctx,
                time,
                AggregationDefinition::not_set(),
                None,
                time_location,
            );
            let time = ast.add(
                ExprKind::PostAggregationPhase {
                    value: time,
                    aggregation: AggregationDefinition::group_by(),
                    label: None,
                },
                time_location,
            );
            vec![metric, time]
        }
        FunctionKind::Overall if args.len() == 1 => {
            let aggregation = queries::aggregation_definition(ast, ctx, id)
                .unwrap_or_else(AggregationDefinition::sum);
            let metric_location = ast.location(args[0]);
            let metric = plan(ast, ctx, args[0]);
            vec![ast.add(
                ExprKind::PostAggregationPhase { value: metric, aggregation, label: None },
                metric_location,
            )]
        }
        // conditions and outcomes all move to the phase of the result
        FunctionKind::Iff | FunctionKind::Ifs => {
            let result_phase = queries::phase(ast, ctx, id);
            args.iter()
                .map(|&arg| plan_for_phase(ast, ctx, arg, result_phase))
                .collect()
        }
        _ => args.iter().map(|&arg| plan(ast, ctx, arg)).collect(),
    };
    ast.add(ExprKind::Function { kind, args: planned_args }, location)
}

/// A contained dimension needs lifting when the comparison feeds a metric
/// expression rather than standing on its own under the root.
fn contains_needs_aggregation(ast: &Ast, ctx: &CompileContext<'_>, id: NodeId) -> bool {
    match ast.parent(id) {
        Some(parent) => {
            !matches!(ast.kind(parent), ExprKind::Root { .. })
                && queries::phase(ast, ctx, parent).is_metric()
        }
        None => false,
    }
}

fn plan_for_phase(
    ast: &mut Ast,
    ctx: &CompileContext<'_>,
    arg: NodeId,
    result_phase: Phase,
) -> NodeId {
    let location = ast.location(arg);
    match result_phase {
        Phase::Dimension => {
            let value = plan(ast, ctx, arg);
            ast.add(ExprKind::DimensionPhase { value }, location)
        }
        Phase::MetricPre => {
            let aggregation = queries::aggregation_definition(ast, ctx, arg)
                .unwrap_or_else(AggregationDefinition::not_set);
            let value = plan(ast, ctx, arg);
            add_aggregation_phase(ast, ctx, value, aggregation, None, location)
        }
        Phase::MetricPost => {
            let aggregation = queries::aggregation_definition(ast, ctx, arg)
                .unwrap_or_else(AggregationDefinition::sum);
            let value = plan(ast, ctx, arg);
            ast.add(
                ExprKind::PostAggregationPhase { value, aggregation, label: None },
                location,
            )
        }
        _ => plan(ast, ctx, arg),
    }
}

/// Take the root's value to the post-aggregation phase, whatever phase it
/// settled in. Subrequest compilations stop at the dimension phase
/// instead: their result feeds another query.
fn plan_root(
    ast: &mut Ast,
    ctx: &CompileContext<'_>,
    id: NodeId,
    value: NodeId,
    location: Location,
) -> NodeId {
    if queries::invalid(ast, ctx, value) {
        return id;
    }

    let value = plan(ast, ctx, value);
    let phase = queries::phase(ast, ctx, value);
    let slug = ctx.taxon_slug.clone();

    let planned = if ctx.subrequest_only {
        if phase == Phase::DimensionDataSource {
            ast.add(ExprKind::DimensionPhase { value }, location)
        } else {
            value
        }
    } else if phase == Phase::DimensionDataSource {
        let aggregation = queries::aggregation_definition(ast, ctx, value)
            .unwrap_or_else(AggregationDefinition::sum);
        let dim = ast.add(ExprKind::DimensionPhase { value }, location);
        let agg = ast.add(
            ExprKind::AggregationPhase {
                value: dim,
                aggregation: AggregationDefinition::not_set(),
                label: slug.clone(),
            },
            location,
        );
        ast.add(
            ExprKind::PostAggregationPhase { value: agg, aggregation, label: slug },
            location,
        )
    } else if phase.is_dimension() {
        let aggregation = queries::aggregation_definition(ast, ctx, value)
            .unwrap_or_else(AggregationDefinition::sum);
        let agg = add_aggregation_phase(
            ast,
            ctx,
            value,
            AggregationDefinition::not_set(),
            slug.clone(),
            location,
        );
        ast.add(
            ExprKind::PostAggregationPhase { value: agg, aggregation, label: slug },
            location,
        )
    } else if phase == Phase::Any {
        let agg = add_aggregation_phase(
            ast,
            ctx,
            value,
            AggregationDefinition::not_set(),
            None,
            location,
        );
        ast.add(
            ExprKind::PostAggregationPhase {
                value: agg,
                aggregation: AggregationDefinition::not_set(),
                label: None,
            },
            location,
        )
    } else if phase == Phase::MetricPre {
        let aggregation = queries::aggregation_definition(ast, ctx, value)
            .unwrap_or_else(AggregationDefinition::sum);
        ast.add(
            ExprKind::PostAggregationPhase { value, aggregation, label: slug },
            location,
        )
    } else {
        value
    };

    ast.add(ExprKind::Root { value: planned }, location)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CompileContext;
    use crate::parser;
    use crate::rewriter;
    use crate::taxonomy::aggregation::AggregationType;
    use crate::taxonomy::TaxonMap;

    fn fixture() -> TaxonMap {
        crate::taxonomy::parse_file("test_data/taxons.yaml").unwrap()
    }

    fn planned(expression: &str, ctx: &CompileContext<'_>) -> (Ast, NodeId) {
        let (mut ast, top) = parser::parse(expression, ctx).unwrap();
        let top = rewriter::rewrite(&mut ast, ctx, top);
        let root = ast.add(ExprKind::Root { value: top }, ast.location(top));
        let root = plan(&mut ast, ctx, root);
        (ast, root)
    }

    fn root_value(ast: &Ast, root: NodeId) -> NodeId {
        match ast.kind(root) {
            ExprKind::Root { value } => *value,
            other => panic!("expected root, got {:?}", other),
        }
    }

    #[test]
    fn test_metric_taxon_lifted_to_post_aggregation() {
        let taxons = fixture();
        let mut ctx = CompileContext::new(&taxons);
        ctx.taxon_slug = Some("spend".to_string());
        let (ast, root) = planned("spend", &ctx);
        match ast.kind(root_value(&ast, root)) {
            ExprKind::PostAggregationPhase { value, aggregation, label } => {
                assert_eq!(aggregation.kind, AggregationType::Sum);
                assert_eq!(label.as_deref(), Some("spend"));
                assert!(matches!(ast.kind(*value), ExprKind::Taxon(_)));
            }
            other => panic!("expected post aggregation transition, got {:?}", other),
        }
    }

    #[test]
    fn test_post_arithmetic_lifts_both_sides() {
        let taxons = fixture();
        let ctx = CompileContext::new(&taxons);
        // division of two taxons aggregates each side first
        let (ast, root) = planned("spend / impressions", &ctx);
        match ast.kind(root_value(&ast, root)) {
            ExprKind::Arithmetic { left, right, .. } => {
                assert!(matches!(
                    ast.kind(*left),
                    ExprKind::PostAggregationPhase { .. }
                ));
                assert!(matches!(
                    ast.kind(*right),
                    ExprKind::PostAggregationPhase { .. }
                ));
            }
            other => panic!("expected arithmetic, got {:?}", other),
        }
    }

    #[test]
    fn test_dimension_root_gets_aggregation_transition() {
        let taxons = fixture();
        let mut ctx = CompileContext::new(&taxons);
        ctx.taxon_type = crate::taxonomy::TaxonType::Dimension;
        ctx.taxon_slug = Some("gender".to_string());
        let (ast, root) = planned("gender", &ctx);
        match ast.kind(root_value(&ast, root)) {
            ExprKind::PostAggregationPhase { value, .. } => {
                assert!(matches!(ast.kind(*value), ExprKind::AggregationPhase { .. }));
            }
            other => panic!("expected post aggregation transition, got {:?}", other),
        }
    }

    #[test]
    fn test_namespaced_dimension_passes_three_phases() {
        let taxons = fixture();
        let mut ctx = CompileContext::new(&taxons);
        ctx.taxon_type = crate::taxonomy::TaxonType::Dimension;
        let (ast, root) = planned("facebook_ads|gender", &ctx);
        let post = root_value(&ast, root);
        let ExprKind::PostAggregationPhase { value: agg, .. } = ast.kind(post) else {
            panic!("expected post aggregation transition");
        };
        let ExprKind::AggregationPhase { value: dim, .. } = ast.kind(*agg) else {
            panic!("expected aggregation transition");
        };
        assert!(matches!(ast.kind(*dim), ExprKind::DimensionPhase { .. }));
    }

    #[test]
    fn test_subrequest_dimension_stays_in_dimension_phase() {
        let taxons = fixture();
        let mut ctx = CompileContext::new(&taxons);
        ctx.subrequest_only = true;
        ctx.taxon_type = crate::taxonomy::TaxonType::Dimension;
        let (ast, root) = planned("facebook_ads|gender", &ctx);
        assert!(matches!(
            ast.kind(root_value(&ast, root)),
            ExprKind::DimensionPhase { .. }
        ));
    }

    #[test]
    fn test_invalid_root_not_planned() {
        let taxons = fixture();
        let ctx = CompileContext::new(&taxons);
        let (ast, root) = planned("?missing", &ctx);
        assert!(matches!(ast.kind(root_value(&ast, root)), ExprKind::Taxon(_)));
    }

    #[test]
    fn test_merge_arguments_move_to_dimension_phase() {
        let taxons = fixture();
        let mut ctx = CompileContext::new(&taxons);
        ctx.taxon_type = crate::taxonomy::TaxonType::Dimension;
        let (ast, root) = planned("merge(?facebook_ads|gender, ?twitter|gender)", &ctx);
        let post = root_value(&ast, root);
        let ExprKind::PostAggregationPhase { value: agg, .. } = ast.kind(post) else {
            panic!("expected post aggregation transition");
        };
        let ExprKind::AggregationPhase { value: merge, .. } = ast.kind(*agg) else {
            panic!("expected aggregation transition");
        };
        match ast.kind(*merge) {
            ExprKind::Function { kind: FunctionKind::Merge, args } => {
                for arg in args {
                    assert!(matches!(ast.kind(*arg), ExprKind::DimensionPhase { .. }));
                }
            }
            other => panic!("expected merge, got {:?}", other),
        }
    }
}
