//! Expression rewriting (verb module)
//!
//! Runs between validation and phase planning. The pass folds constant
//! subtrees into literals, drops operands that resolved to nothing and
//! removes type casts that would be no-ops, so the later passes and the
//! generated SQL only see work that has to happen at query time.
//!
//! Rewritten nodes are allocated into the same arena; the original
//! subtree stays behind as garbage, which is fine for a single
//! compilation.

use crate::ast::queries::{self, LiteralValue};
use crate::ast::{ArithmeticOp, Ast, ExprKind, Location, LogicalOp, NodeId, TaxonExpr};
use crate::context::CompileContext;
use crate::functions::FunctionKind;

/// Rewrite the subtree rooted at `id`, returning the replacement root.
pub fn rewrite(ast: &mut Ast, ctx: &CompileContext<'_>, id: NodeId) -> NodeId {
    let location = ast.location(id);
    match ast.kind(id).clone() {
        ExprKind::Integer(_)
        | ExprKind::Real(_)
        | ExprKind::StringLit(_)
        | ExprKind::Boolean(_) => id,
        ExprKind::Parens(inner) => {
            let inner = rewrite(ast, ctx, inner);
            ast.add(ExprKind::Parens(inner), location)
        }
        ExprKind::Not(inner) => {
            let inner = rewrite(ast, ctx, inner);
            ast.add(ExprKind::Not(inner), location)
        }
        ExprKind::IsNull { operand, negated } => {
            let operand = rewrite(ast, ctx, operand);
            ast.add(ExprKind::IsNull { operand, negated }, location)
        }
        ExprKind::Taxon(taxon) => match taxon.calc {
            Some(calc) => {
                let calc = rewrite(ast, ctx, calc);
                ast.add(ExprKind::Taxon(TaxonExpr { calc: Some(calc), ..taxon }), location)
            }
            None => id,
        },
        ExprKind::Arithmetic { op, left, right, left_invalid, right_invalid } => {
            // a nothing-operand disappears from the tolerant operators
            match op {
                ArithmeticOp::Add if left_invalid => return rewrite(ast, ctx, right),
                ArithmeticOp::Add if right_invalid => return rewrite(ast, ctx, left),
                ArithmeticOp::Subtract if right_invalid && !left_invalid => {
                    return rewrite(ast, ctx, left)
                }
                _ => {}
            }
            if let Some(value) = queries::literal_value(ast, id) {
                return add_literal(ast, value, location);
            }
            let left = rewrite(ast, ctx, left);
            let right = rewrite(ast, ctx, right);
            ast.add(
                ExprKind::Arithmetic { op, left, right, left_invalid, right_invalid },
                location,
            )
        }
        ExprKind::Logical { op, left, right, left_invalid, right_invalid } => {
            if let Some(value) = queries::literal_value(ast, id) {
                return add_literal(ast, value, location);
            }
            let left = rewrite(ast, ctx, left);
            let right = rewrite(ast, ctx, right);
            ast.add(ExprKind::Logical { op, left, right, left_invalid, right_invalid }, location)
        }
        ExprKind::Function { kind, args } => rewrite_function(ast, ctx, kind, &args, location),
        ExprKind::DimensionPhase { value } => {
            let value = rewrite(ast, ctx, value);
            ast.add(ExprKind::DimensionPhase { value }, location)
        }
        ExprKind::AggregationPhase { value, aggregation, label } => {
            let value = rewrite(ast, ctx, value);
            ast.add(ExprKind::AggregationPhase { value, aggregation, label }, location)
        }
        ExprKind::PostAggregationPhase { value, aggregation, label } => {
            let value = rewrite(ast, ctx, value);
            ast.add(ExprKind::PostAggregationPhase { value, aggregation, label }, location)
        }
        ExprKind::Root { value } => {
            let value = rewrite(ast, ctx, value);
            ast.add(ExprKind::Root { value }, location)
        }
    }
}

fn add_literal(ast: &mut Ast, value: LiteralValue, location: Location) -> NodeId {
    let kind = match value {
        LiteralValue::Int(i) => ExprKind::Integer(i),
        LiteralValue::Float(f) => ExprKind::Real(f),
        LiteralValue::Str(s) => ExprKind::StringLit(s),
        LiteralValue::Bool(b) => ExprKind::Boolean(b),
    };
    ast.add(kind, location)
}

fn rewrite_function(
    ast: &mut Ast,
    ctx: &CompileContext<'_>,
    kind: FunctionKind,
    args: &[NodeId],
    location: Location,
) -> NodeId {
    match kind {
        // no reason to coalesce with just one argument
        FunctionKind::Coalesce if args.len() == 1 => rewrite(ast, ctx, args[0]),
        FunctionKind::Merge if ctx.has_single_data_source() && !args.is_empty() => {
            rewrite(ast, ctx, args[0])
        }
        FunctionKind::ToText => match args.first() {
            Some(&arg) if queries::return_type(ast, ctx, arg).is_string() => {
                rewrite(ast, ctx, arg)
            }
            _ => rewrite_default(ast, ctx, kind, args, location),
        },
        FunctionKind::ToBool if !args.is_empty() => rewrite_to_bool(ast, ctx, args, location),
        FunctionKind::ToNumber if !args.is_empty() => {
            rewrite_to_number(ast, ctx, args, location)
        }
        FunctionKind::ToDate => match args.first() {
            Some(&arg) if queries::return_type(ast, ctx, arg).is_datetime() => {
                rewrite(ast, ctx, arg)
            }
            _ => rewrite_default(ast, ctx, kind, args, location),
        },
        FunctionKind::Cumulative if args.len() == 2 => {
            rewrite_cumulative(ast, ctx, args, location)
        }
        _ => rewrite_default(ast, ctx, kind, args, location),
    }
}

fn rewrite_default(
    ast: &mut Ast,
    ctx: &CompileContext<'_>,
    kind: FunctionKind,
    args: &[NodeId],
    location: Location,
) -> NodeId {
    let args: Vec<NodeId> = args.iter().map(|arg| rewrite(ast, ctx, *arg)).collect();
    ast.add(ExprKind::Function { kind, args }, location)
}

/// Casting to boolean becomes a CASE expression over the underlying value;
/// values that are already boolean pass through untouched.
fn rewrite_to_bool(
    ast: &mut Ast,
    ctx: &CompileContext<'_>,
    args: &[NodeId],
    location: Location,
) -> NodeId {
    let arg = args[0];
    let arg_type = queries::return_type(ast, ctx, arg);
    if arg_type.is_boolean() {
        return rewrite(ast, ctx, arg);
    }

    let arg_location = ast.location(arg);
    let arg = rewrite(ast, ctx, arg);

    let condition = if arg_type.is_number() {
        // 0 maps to false, every other number to true
        let zero = ast.add(ExprKind::Integer(0), arg_location);
        ast.add(
            ExprKind::Logical {
                op: LogicalOp::Eq,
                left: arg,
                right: zero,
                left_invalid: false,
                right_invalid: false,
            },
            arg_location,
        )
    } else {
        // the string 'false' (case-insensitive) maps to false
        let lower = ast.add(
            ExprKind::Function { kind: FunctionKind::Lower, args: vec![arg] },
            arg_location,
        );
        let false_text = ast.add(ExprKind::StringLit("false".to_string()), arg_location);
        ast.add(
            ExprKind::Logical {
                op: LogicalOp::Eq,
                left: lower,
                right: false_text,
                left_invalid: false,
                right_invalid: false,
            },
            arg_location,
        )
    };

    let negative = ast.add(ExprKind::Boolean(false), arg_location);
    let positive = ast.add(ExprKind::Boolean(true), arg_location);
    let case = ast.add(
        ExprKind::Function { kind: FunctionKind::Iff, args: vec![condition, negative, positive] },
        location,
    );
    ast.add(ExprKind::Function { kind: FunctionKind::ToBool, args: vec![case] }, location)
}

/// Casting a number to a number without a precision is a no-op; booleans
/// become a CASE expression first.
fn rewrite_to_number(
    ast: &mut Ast,
    ctx: &CompileContext<'_>,
    args: &[NodeId],
    location: Location,
) -> NodeId {
    let expression = args[0];
    let precision = args.get(1).copied();
    let expression_type = queries::return_type(ast, ctx, expression);

    if expression_type.is_number() && precision.is_none() {
        return rewrite(ast, ctx, expression);
    }

    let expression_location = ast.location(expression);
    let rewritten = rewrite(ast, ctx, expression);

    let inner = if expression_type.is_boolean() {
        let true_literal = ast.add(ExprKind::Boolean(true), expression_location);
        let condition = ast.add(
            ExprKind::Logical {
                op: LogicalOp::Eq,
                left: rewritten,
                right: true_literal,
                left_invalid: false,
                right_invalid: false,
            },
            expression_location,
        );
        let one = ast.add(ExprKind::Integer(1), expression_location);
        let zero = ast.add(ExprKind::Integer(0), expression_location);
        ast.add(
            ExprKind::Function { kind: FunctionKind::Iff, args: vec![condition, one, zero] },
            expression_location,
        )
    } else {
        rewritten
    };

    let mut new_args = vec![inner];
    if let Some(precision) = precision {
        new_args.push(rewrite(ast, ctx, precision));
    }
    ast.add(ExprKind::Function { kind: FunctionKind::ToNumber, args: new_args }, location)
}

/// When the metric contains a division of two non-constant operands, the
/// cumulation is applied to each operand instead of the division result:
///
///   cumulative(spend, date)               -> cumulative(spend, date)
///   cumulative(spend / 1000, date)        -> cumulative(spend / 1000, date)
///   cumulative(spend / impressions, date) -> cumulative(spend, date) / cumulative(impressions, date)
fn rewrite_cumulative(
    ast: &mut Ast,
    ctx: &CompileContext<'_>,
    args: &[NodeId],
    location: Location,
) -> NodeId {
    let metric = args[0];
    if !has_distributable_division(ast, ctx, metric) {
        return rewrite_default(ast, ctx, FunctionKind::Cumulative, args, location);
    }

    let time_dimension = rewrite(ast, ctx, args[1]);
    let metric = rewrite(ast, ctx, metric);
    distribute_cumulative(ast, ctx, metric, time_dimension)
}

fn has_distributable_division(ast: &Ast, ctx: &CompileContext<'_>, id: NodeId) -> bool {
    if let ExprKind::Arithmetic { op: ArithmeticOp::Divide, left, right, .. } = ast.kind(id) {
        if !queries::return_type(ast, ctx, *left).is_constant
            && !queries::return_type(ast, ctx, *right).is_constant
        {
            return true;
        }
    }
    ast.children(id)
        .iter()
        .any(|child| has_distributable_division(ast, ctx, *child))
}

fn distribute_cumulative(
    ast: &mut Ast,
    ctx: &CompileContext<'_>,
    id: NodeId,
    time_dimension: NodeId,
) -> NodeId {
    let location = ast.location(id);
    match ast.kind(id).clone() {
        ExprKind::Arithmetic { op: ArithmeticOp::Divide, left, right, .. }
            if !queries::return_type(ast, ctx, left).is_constant
                && !queries::return_type(ast, ctx, right).is_constant =>
        {
            let left = distribute_cumulative(ast, ctx, left, time_dimension);
            let right = distribute_cumulative(ast, ctx, right, time_dimension);
            let left_location = ast.location(left);
            let right_location = ast.location(right);
            let left = ast.add(
                ExprKind::Function {
                    kind: FunctionKind::Cumulative,
                    args: vec![left, time_dimension],
                },
                left_location,
            );
            let right = ast.add(
                ExprKind::Function {
                    kind: FunctionKind::Cumulative,
                    args: vec![right, time_dimension],
                },
                right_location,
            );
            ast.add(
                ExprKind::Arithmetic {
                    op: ArithmeticOp::Divide,
                    left,
                    right,
                    left_invalid: false,
                    right_invalid: false,
                },
                location,
            )
        }
        ExprKind::Arithmetic { op, left, right, left_invalid, right_invalid } => {
            let left = distribute_cumulative(ast, ctx, left, time_dimension);
            let right = distribute_cumulative(ast, ctx, right, time_dimension);
            ast.add(
                ExprKind::Arithmetic { op, left, right, left_invalid, right_invalid },
                location,
            )
        }
        ExprKind::Logical { op, left, right, left_invalid, right_invalid } => {
            let left = distribute_cumulative(ast, ctx, left, time_dimension);
            let right = distribute_cumulative(ast, ctx, right, time_dimension);
            ast.add(ExprKind::Logical { op, left, right, left_invalid, right_invalid }, location)
        }
        ExprKind::Parens(inner) => {
            let inner = distribute_cumulative(ast, ctx, inner, time_dimension);
            ast.add(ExprKind::Parens(inner), location)
        }
        ExprKind::Not(inner) => {
            let inner = distribute_cumulative(ast, ctx, inner, time_dimension);
            ast.add(ExprKind::Not(inner), location)
        }
        ExprKind::IsNull { operand, negated } => {
            let operand = distribute_cumulative(ast, ctx, operand, time_dimension);
            ast.add(ExprKind::IsNull { operand, negated }, location)
        }
        ExprKind::Taxon(taxon) => match taxon.calc {
            Some(calc) => {
                let calc = distribute_cumulative(ast, ctx, calc, time_dimension);
                ast.add(ExprKind::Taxon(TaxonExpr { calc: Some(calc), ..taxon }), location)
            }
            None => id,
        },
        ExprKind::Function { kind, args } => {
            let args: Vec<NodeId> = args
                .iter()
                .map(|arg| distribute_cumulative(ast, ctx, *arg, time_dimension))
                .collect();
            ast.add(ExprKind::Function { kind, args }, location)
        }
        _ => id,
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

    fn rewritten(expression: &str) -> (Ast, NodeId) {
        let taxons = fixture();
        let ctx = CompileContext::new(&taxons);
        let (mut ast, top) = parser::parse(expression, &ctx).unwrap();
        let top = rewrite(&mut ast, &ctx, top);
        (ast, top)
    }

    /// Structure of a subtree, independent of node ids.
    fn shape(ast: &Ast, id: NodeId) -> String {
        let label = match ast.kind(id) {
            ExprKind::Integer(i) => format!("int({})", i),
            ExprKind::Real(f) => format!("real({})", f),
            ExprKind::StringLit(s) => format!("str({})", s),
            ExprKind::Boolean(b) => format!("bool({})", b),
            ExprKind::Taxon(taxon) => format!("taxon({})", taxon.slug),
            ExprKind::Arithmetic { op, .. } => format!("{:?}", op),
            ExprKind::Logical { op, .. } => format!("{:?}", op),
            ExprKind::Not(_) => "not".to_string(),
            ExprKind::IsNull { .. } => "is_null".to_string(),
            ExprKind::Parens(_) => "parens".to_string(),
            ExprKind::Function { kind, .. } => kind.name().to_string(),
            ExprKind::DimensionPhase { .. } => "dim".to_string(),
            ExprKind::AggregationPhase { .. } => "agg".to_string(),
            ExprKind::PostAggregationPhase { .. } => "post".to_string(),
            ExprKind::Root { .. } => "root".to_string(),
        };
        let children: Vec<String> = ast
            .children(id)
            .into_iter()
            .map(|child| shape(ast, child))
            .collect();
        if children.is_empty() {
            label
        } else {
            format!("{}({})", label, children.join(", "))
        }
    }

    #[test]
    fn test_constant_addition_folds() {
        let (ast, top) = rewritten("1 + 2");
        assert_eq!(ast.kind(top), &ExprKind::Integer(3));
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let taxons = fixture();
        let ctx = CompileContext::new(&taxons);
        let (mut ast, top) =
            parser::parse("?missing + spend * (1 + 10) / impressions", &ctx).unwrap();
        let once = rewrite(&mut ast, &ctx, top);
        let twice = rewrite(&mut ast, &ctx, once);
        assert_eq!(shape(&ast, once), shape(&ast, twice));
    }

    #[test]
    fn test_constant_division_folds_to_real() {
        let (ast, top) = rewritten("10 / 4");
        assert_eq!(ast.kind(top), &ExprKind::Real(2.5));
    }

    #[test]
    fn test_division_by_zero_not_folded() {
        let (ast, top) = rewritten("1 / 0");
        assert!(matches!(ast.kind(top), ExprKind::Arithmetic { .. }));
    }

    #[test]
    fn test_comparison_folds_to_boolean() {
        let (ast, top) = rewritten("2 > 1");
        assert_eq!(ast.kind(top), &ExprKind::Boolean(true));
    }

    #[test]
    fn test_addition_drops_missing_operand() {
        let (ast, top) = rewritten("?missing + spend");
        match ast.kind(top) {
            ExprKind::Taxon(taxon) => assert_eq!(taxon.slug, "spend"),
            other => panic!("expected taxon, got {:?}", other),
        }
    }

    #[test]
    fn test_subtraction_drops_missing_right_operand() {
        let (ast, top) = rewritten("spend - ?missing");
        match ast.kind(top) {
            ExprKind::Taxon(taxon) => assert_eq!(taxon.slug, "spend"),
            other => panic!("expected taxon, got {:?}", other),
        }
    }

    #[test]
    fn test_single_argument_coalesce_collapses() {
        let (ast, top) = rewritten("coalesce(spend)");
        match ast.kind(top) {
            ExprKind::Taxon(taxon) => assert_eq!(taxon.slug, "spend"),
            other => panic!("expected taxon, got {:?}", other),
        }
    }

    #[test]
    fn test_merge_collapses_for_single_data_source() {
        let taxons = fixture();
        let mut ctx = CompileContext::new(&taxons);
        ctx.allowed_data_sources = Some(["facebook_ads".to_string()].into());
        let (mut ast, top) =
            parser::parse("merge(?facebook_ads|gender, ?twitter|gender)", &ctx).unwrap();
        let top = rewrite(&mut ast, &ctx, top);
        match ast.kind(top) {
            ExprKind::Taxon(taxon) => assert_eq!(taxon.slug, "facebook_ads|gender"),
            other => panic!("expected taxon, got {:?}", other),
        }
    }

    #[test]
    fn test_to_text_of_string_is_dropped() {
        let (ast, top) = rewritten("to_text(gender)");
        match ast.kind(top) {
            ExprKind::Taxon(taxon) => assert_eq!(taxon.slug, "gender"),
            other => panic!("expected taxon, got {:?}", other),
        }
    }

    #[test]
    fn test_to_bool_of_number_becomes_case() {
        let (ast, top) = rewritten("to_bool(spend)");
        match ast.kind(top) {
            ExprKind::Function { kind: FunctionKind::ToBool, args } => {
                assert_eq!(args.len(), 1);
                assert!(matches!(
                    ast.kind(args[0]),
                    ExprKind::Function { kind: FunctionKind::Iff, .. }
                ));
            }
            other => panic!("expected to_bool, got {:?}", other),
        }
    }

    #[test]
    fn test_to_number_of_number_is_dropped() {
        let (ast, top) = rewritten("to_number(spend)");
        match ast.kind(top) {
            ExprKind::Taxon(taxon) => assert_eq!(taxon.slug, "spend"),
            other => panic!("expected taxon, got {:?}", other),
        }
    }

    #[test]
    fn test_to_number_with_precision_is_kept() {
        let (ast, top) = rewritten("to_number(spend, 2)");
        assert!(matches!(
            ast.kind(top),
            ExprKind::Function { kind: FunctionKind::ToNumber, .. }
        ));
    }

    #[test]
    fn test_cumulative_distributes_over_division() {
        let (ast, top) = rewritten("cumulative(spend / impressions, date)");
        match ast.kind(top) {
            ExprKind::Arithmetic { op: ArithmeticOp::Divide, left, right, .. } => {
                assert!(matches!(
                    ast.kind(*left),
                    ExprKind::Function { kind: FunctionKind::Cumulative, .. }
                ));
                assert!(matches!(
                    ast.kind(*right),
                    ExprKind::Function { kind: FunctionKind::Cumulative, .. }
                ));
            }
            other => panic!("expected division, got {:?}", other),
        }
    }

    #[test]
    fn test_cumulative_with_constant_divisor_is_kept() {
        let (ast, top) = rewritten("cumulative(spend / 1000, date)");
        assert!(matches!(
            ast.kind(top),
            ExprKind::Function { kind: FunctionKind::Cumulative, .. }
        ));
    }
}
