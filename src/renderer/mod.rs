//! Render pass (verb module)
//!
//! Walks a planned tree and produces the formulas the surrounding query
//! builder consumes. Phase transition nodes are the collection points:
//! a `DimensionPhase` emits a `SqlFormulaTemplate` per data source, an
//! `AggregationPhase` emits a dimension `PreFormula` and a
//! `PostAggregationPhase` emits an aggregation `PreFormula`. Everything
//! above a collection point refers to the collected value by its label.
//!
//! Labels allocated here are cached per node, so a node shared by two
//! parents (the time dimension of a distributed `cumulative`) collects
//! once and is referenced twice.

use std::collections::{BTreeSet, HashMap};

use crate::ast::queries::{self, LiteralValue};
use crate::ast::{ArithmeticOp, Ast, ExprKind, LogicalOp, NodeId, TaxonExpr};
use crate::context::{CompileContext, LabelMaker};
use crate::error::CompileError;
use crate::formula::{CastType, CompareOp, Formula, TimeUnit};
use crate::functions::FunctionKind;
use crate::phase::Phase;
use crate::result::{
    OverrideMapping, PreFormula, SqlFormulaTemplate, DIMENSION_SLUGS_TEMPLATE_PARAM,
};
use crate::taxonomy::aggregation::AggregationDefinition;

/// Everything one subtree contributes to the compiled expression.
#[derive(Debug, Clone, Default)]
pub struct RenderResult {
    /// Value of the subtree at its own phase
    pub formula: Formula,
    /// Variant with a `${dimension_slugs}` substitution point, when the
    /// value depends on the query's dimension grain
    pub template: Option<Formula>,
    /// Label the value was collected under, if it was
    pub label: Option<String>,
    /// Aggregation inputs collected so far
    pub aggregations: Vec<PreFormula>,
    /// Dimension formulas collected so far
    pub dimension_formulas: Vec<PreFormula>,
    /// Per-data-source dimension fragments collected so far
    pub data_source_formula_templates: Vec<SqlFormulaTemplate>,
    pub override_mappings: Vec<OverrideMapping>,
    /// Dimension slugs excluded from `${dimension_slugs}` substitution
    pub exclude_slugs: BTreeSet<String>,
}

impl RenderResult {
    fn new(formula: Formula) -> Self {
        RenderResult { formula, ..Default::default() }
    }

    /// The template when there is one, otherwise the plain formula.
    pub fn template_or_sql(&self) -> Formula {
        self.template.clone().unwrap_or_else(|| self.formula.clone())
    }

    /// Combine the contributions of several child results under a new
    /// formula. The label never survives a merge.
    fn merge(formula: Formula, template: Option<Formula>, parts: &[&RenderResult]) -> Self {
        let mut merged = RenderResult::new(formula);
        merged.template = template;
        for part in parts {
            merged.aggregations.extend(part.aggregations.iter().cloned());
            merged
                .dimension_formulas
                .extend(part.dimension_formulas.iter().cloned());
            merged
                .data_source_formula_templates
                .extend(part.data_source_formula_templates.iter().cloned());
            merged
                .override_mappings
                .extend(part.override_mappings.iter().cloned());
            merged.exclude_slugs.extend(part.exclude_slugs.iter().cloned());
        }
        merged
    }

    /// Replace the formula, keeping contributions and label.
    fn update(mut self, formula: Formula, template: Option<Formula>) -> Self {
        self.formula = formula;
        if template.is_some() {
            self.template = template;
        }
        self
    }
}

/// Build one formula over two child results, templating when either
/// child carries a template.
fn combine2(
    left: &RenderResult,
    right: &RenderResult,
    build: impl Fn(Formula, Formula) -> Formula,
) -> (Formula, Option<Formula>) {
    let formula = build(left.formula.clone(), right.formula.clone());
    let template = if left.template.is_some() || right.template.is_some() {
        Some(build(left.template_or_sql(), right.template_or_sql()))
    } else {
        None
    };
    (formula, template)
}

fn combine1(part: &RenderResult, build: impl Fn(Formula) -> Formula) -> (Formula, Option<Formula>) {
    let formula = build(part.formula.clone());
    let template = part.template.as_ref().map(|t| build(t.clone()));
    (formula, template)
}

fn combine_n(
    parts: &[RenderResult],
    build: impl Fn(Vec<Formula>) -> Formula,
) -> (Formula, Option<Formula>) {
    let formula = build(parts.iter().map(|p| p.formula.clone()).collect());
    let template = if parts.iter().any(|p| p.template.is_some()) {
        Some(build(parts.iter().map(|p| p.template_or_sql()).collect()))
    } else {
        None
    };
    (formula, template)
}

/// Render a planned tree into its result.
pub fn render(
    ast: &Ast,
    ctx: &CompileContext<'_>,
    id: NodeId,
) -> Result<RenderResult, CompileError> {
    let mut renderer = Renderer {
        ast,
        ctx,
        labels: LabelMaker::new(None),
        cached: HashMap::new(),
    };
    renderer.render_node(id)
}

struct Renderer<'a, 'b> {
    ast: &'a Ast,
    ctx: &'a CompileContext<'b>,
    labels: LabelMaker,
    cached: HashMap<NodeId, String>,
}

impl Renderer<'_, '_> {
    fn render_node(&mut self, id: NodeId) -> Result<RenderResult, CompileError> {
        match self.ast.kind(id) {
            ExprKind::Integer(i) => Ok(RenderResult::new(Formula::int(*i))),
            ExprKind::Real(f) => Ok(RenderResult::new(Formula::float(*f))),
            ExprKind::StringLit(s) => Ok(RenderResult::new(Formula::string(s.clone()))),
            ExprKind::Boolean(b) => Ok(RenderResult::new(Formula::boolean(*b))),
            // structural parenthesization is the emitter's concern
            ExprKind::Parens(inner) => self.render_node(*inner),
            ExprKind::Taxon(taxon) => self.render_taxon(taxon),
            ExprKind::Arithmetic { op, left, right, left_invalid, right_invalid } => {
                self.render_arithmetic(*op, *left, *right, *left_invalid, *right_invalid)
            }
            ExprKind::Logical { op, left, right, .. } => self.render_logical(*op, *left, *right),
            ExprKind::Not(inner) => {
                let result = self.render_node(*inner)?;
                let (formula, template) = combine1(&result, |f| Formula::Not(Box::new(f)));
                Ok(result.update(formula, template))
            }
            ExprKind::IsNull { operand, negated } => {
                let result = self.render_node(*operand)?;
                let negated = *negated;
                let (formula, template) = combine1(&result, |f| {
                    if negated {
                        Formula::IsNotNull(Box::new(f))
                    } else {
                        Formula::IsNull(Box::new(f))
                    }
                });
                Ok(result.update(formula, template))
            }
            ExprKind::Function { kind, args } => {
                let args = args.clone();
                self.render_function(id, *kind, &args)
            }
            ExprKind::DimensionPhase { value } => self.render_dimension_phase(id, *value),
            ExprKind::AggregationPhase { value, label, .. } => {
                let label = label.clone();
                self.render_aggregation_phase(id, *value, label)
            }
            ExprKind::PostAggregationPhase { value, aggregation, label } => {
                let aggregation = aggregation.clone();
                let label = label.clone();
                self.render_post_aggregation_phase(id, *value, aggregation, label)
            }
            ExprKind::Root { value } => {
                if queries::invalid(self.ast, self.ctx, *value) {
                    Ok(RenderResult::new(Formula::null()))
                } else {
                    self.render_node(*value)
                }
            }
        }
    }

    fn render_taxon(&mut self, taxon: &TaxonExpr) -> Result<RenderResult, CompileError> {
        if let Some(calc) = taxon.calc {
            return self.render_node(calc);
        }
        let definition = self.ctx.taxons.get(&taxon.slug);
        let is_metric = definition.map(|t| t.is_metric()).unwrap_or(false);
        let column_name = if self.ctx.is_benchmark && is_metric {
            format!("comparison@{}", taxon.slug)
        } else {
            taxon.slug.clone()
        };
        let formula = if !is_metric && taxon.namespace.is_some() {
            // raw data source dimensions await substitution by the query
            // builder inside the data source subquery
            Formula::placeholder(taxon.slug.clone())
        } else {
            Formula::column(column_name)
        };
        Ok(RenderResult::new(formula))
    }

    fn render_arithmetic(
        &mut self,
        op: ArithmeticOp,
        left: NodeId,
        right: NodeId,
        left_invalid: bool,
        right_invalid: bool,
    ) -> Result<RenderResult, CompileError> {
        let left_result = self.render_node(left)?;
        let right_result = self.render_node(right)?;
        let (formula, template) = combine2(&left_result, &right_result, |l, r| match op {
            ArithmeticOp::Multiply => Formula::Multiply(Box::new(l), Box::new(r)),
            ArithmeticOp::Divide => Formula::guarded_divide(l, r),
            ArithmeticOp::Add => Formula::tolerant_add(l, r),
            ArithmeticOp::Subtract => Formula::tolerant_subtract(l, r),
        });
        // an invalid side still appears in the formula, but contributes
        // no collected formulas
        let mut parts = Vec::new();
        if !left_invalid {
            parts.push(&left_result);
        }
        if !right_invalid {
            parts.push(&right_result);
        }
        Ok(RenderResult::merge(formula, template, &parts))
    }

    fn render_logical(
        &mut self,
        op: LogicalOp,
        left: NodeId,
        right: NodeId,
    ) -> Result<RenderResult, CompileError> {
        let left_result = self.render_node(left)?;
        let right_result = self.render_node(right)?;
        let (formula, template) = combine2(&left_result, &right_result, |l, r| match op {
            LogicalOp::And => Formula::And(Box::new(l), Box::new(r)),
            LogicalOp::Or => Formula::Or(Box::new(l), Box::new(r)),
            LogicalOp::Eq => Formula::compare(CompareOp::Eq, l, r),
            LogicalOp::NotEq => Formula::compare(CompareOp::NotEq, l, r),
            LogicalOp::Lt => Formula::compare(CompareOp::Lt, l, r),
            LogicalOp::LtEq => Formula::compare(CompareOp::LtEq, l, r),
            LogicalOp::Gt => Formula::compare(CompareOp::Gt, l, r),
            LogicalOp::GtEq => Formula::compare(CompareOp::GtEq, l, r),
        });
        Ok(RenderResult::merge(formula, template, &[&left_result, &right_result]))
    }

    // -----------------------------------------------------------------
    // phase transitions
    // -----------------------------------------------------------------

    fn label_for(&mut self, id: NodeId) -> String {
        if let Some(label) = self.cached.get(&id) {
            return label.clone();
        }
        let label = self.labels.next_label();
        self.cached.insert(id, label.clone());
        label
    }

    fn render_dimension_phase(
        &mut self,
        id: NodeId,
        value: NodeId,
    ) -> Result<RenderResult, CompileError> {
        let result = self.render_node(value)?;
        let value_phase = queries::phase(self.ast, self.ctx, value);
        if value_phase == Phase::Dimension {
            return Ok(result);
        }
        if !matches!(value_phase, Phase::DimensionDataSource | Phase::Any) {
            return Err(CompileError::Internal {
                message: format!("cannot move to dimension phase from {}", value_phase),
            });
        }

        let mut templates = Vec::new();
        let used = queries::used_taxons(self.ast, self.ctx, value);
        let (formula, template) = if used.has_some() {
            let label = self.label_for(id);
            let sources = queries::return_data_sources(self.ast, self.ctx, value);
            if sources.len() != 1 {
                return Err(CompileError::Internal {
                    message: format!(
                        "dimension phase expects exactly one data source, found {}",
                        sources.len()
                    ),
                });
            }
            let data_source = sources.into_iter().flatten().next().ok_or_else(|| {
                CompileError::Internal {
                    message: "dimension phase requires a named data source".into(),
                }
            })?;
            templates.push(SqlFormulaTemplate {
                formula: result.formula.clone(),
                label: label.clone(),
                data_source,
                used_taxons: queries::template_slugs(self.ast, self.ctx, value),
            });
            let column = Formula::column(label);
            // grain dependence survives collection, nothing else does
            let template = result.template.as_ref().map(|_| column.clone());
            (column, template)
        } else {
            (result.formula.clone(), result.template.clone())
        };

        let label = self.cached.get(&id).cloned().or_else(|| result.label.clone());

        if !queries::invalid(self.ast, self.ctx, value) {
            templates.extend(result.data_source_formula_templates.iter().cloned());
            Ok(RenderResult {
                formula,
                template,
                label,
                aggregations: result.aggregations,
                dimension_formulas: result.dimension_formulas,
                data_source_formula_templates: templates,
                override_mappings: Vec::new(),
                exclude_slugs: result.exclude_slugs,
            })
        } else {
            Ok(RenderResult {
                formula,
                label,
                data_source_formula_templates: templates,
                ..Default::default()
            })
        }
    }

    fn render_aggregation_phase(
        &mut self,
        id: NodeId,
        value: NodeId,
        node_label: Option<String>,
    ) -> Result<RenderResult, CompileError> {
        let result = self.render_node(value)?;
        let value_phase = queries::phase(self.ast, self.ctx, value);
        if value_phase == Phase::MetricPre {
            return Ok(result);
        }
        if !matches!(value_phase, Phase::Dimension | Phase::Any) {
            return Err(CompileError::Internal {
                message: format!("cannot move to aggregation phase from {}", value_phase),
            });
        }

        let mut dimension_formulas = Vec::new();
        let used = queries::used_taxons(self.ast, self.ctx, value);
        let (formula, template) = if used.has_some() {
            let label = match &node_label {
                Some(label) => label.clone(),
                None => self.label_for(id),
            };
            // the dimension builder never aggregates
            dimension_formulas.push(
                PreFormula::new(result.formula.clone(), label.clone())
                    .with_aggregation(AggregationDefinition::not_set()),
            );
            let column = Formula::column(label);
            let template = result.template.as_ref().map(|_| column.clone());
            (column, template)
        } else {
            (result.formula.clone(), result.template.clone())
        };

        let label = node_label
            .or_else(|| self.cached.get(&id).cloned())
            .or_else(|| result.label.clone());

        if !queries::invalid(self.ast, self.ctx, value) {
            dimension_formulas.extend(result.dimension_formulas.iter().cloned());
            Ok(RenderResult {
                formula,
                template,
                label,
                aggregations: result.aggregations,
                dimension_formulas,
                data_source_formula_templates: result.data_source_formula_templates,
                override_mappings: result.override_mappings,
                exclude_slugs: result.exclude_slugs,
            })
        } else {
            Ok(RenderResult { formula, label, dimension_formulas, ..Default::default() })
        }
    }

    fn render_post_aggregation_phase(
        &mut self,
        id: NodeId,
        value: NodeId,
        aggregation: AggregationDefinition,
        node_label: Option<String>,
    ) -> Result<RenderResult, CompileError> {
        let result = self.render_node(value)?;
        let value_phase = queries::phase(self.ast, self.ctx, value);
        if value_phase == Phase::MetricPost {
            return Ok(result);
        }
        if !matches!(value_phase, Phase::MetricPre | Phase::Any) {
            return Err(CompileError::Internal {
                message: format!("cannot move to post-aggregation phase from {}", value_phase),
            });
        }

        let mut aggregations = Vec::new();
        let used = queries::used_taxons(self.ast, self.ctx, value);
        let (formula, template) = if used.has_some() {
            let label = match &node_label {
                Some(label) => label.clone(),
                None => self.label_for(id),
            };
            aggregations.push(
                PreFormula::new(result.formula.clone(), label.clone())
                    .with_aggregation(aggregation),
            );
            let column = Formula::column(label);
            let template = result.template.as_ref().map(|_| column.clone());
            (column, template)
        } else {
            (result.formula.clone(), result.template.clone())
        };

        let label = node_label
            .or_else(|| self.cached.get(&id).cloned())
            .or_else(|| result.label.clone());

        if !queries::invalid(self.ast, self.ctx, value) {
            aggregations.extend(result.aggregations.iter().cloned());
            Ok(RenderResult {
                formula,
                template,
                label,
                aggregations,
                dimension_formulas: result.dimension_formulas,
                data_source_formula_templates: result.data_source_formula_templates,
                override_mappings: result.override_mappings,
                exclude_slugs: result.exclude_slugs,
            })
        } else {
            Ok(RenderResult { formula, label, aggregations, ..Default::default() })
        }
    }

    // -----------------------------------------------------------------
    // functions
    // -----------------------------------------------------------------

    fn render_function(
        &mut self,
        id: NodeId,
        kind: FunctionKind,
        args: &[NodeId],
    ) -> Result<RenderResult, CompileError> {
        match kind {
            FunctionKind::Coalesce => {
                let results = self.render_args(args)?;
                let (formula, template) = combine_n(&results, Formula::Coalesce);
                Ok(RenderResult::merge(formula, template, &results.iter().collect::<Vec<_>>()))
            }
            FunctionKind::Concat => {
                let results = self.render_args(args)?;
                let (formula, template) = combine_n(&results, Formula::Concat);
                Ok(RenderResult::merge(formula, template, &results.iter().collect::<Vec<_>>()))
            }
            FunctionKind::Merge => {
                let results = self.render_args(args)?;
                let (formula, template) = if results.len() == 1 {
                    (results[0].formula.clone(), results[0].template.clone())
                } else {
                    combine_n(&results, Formula::Coalesce)
                };
                Ok(RenderResult::merge(formula, template, &results.iter().collect::<Vec<_>>()))
            }
            FunctionKind::ConvertTimezone => {
                let result = self.render_node(args[0])?;
                let from_tz = self.literal_str(args[1])?;
                let to_tz = match args.get(2) {
                    Some(arg) => Some(self.literal_str(*arg)?),
                    None => None,
                };
                let (formula, template) = combine1(&result, |f| Formula::ConvertTimezone {
                    expr: Box::new(f),
                    from_tz: from_tz.clone(),
                    to_tz: to_tz.clone(),
                });
                Ok(result.update(formula, template))
            }
            FunctionKind::Upper => self.render_unary(args[0], |f| Formula::Upper(Box::new(f))),
            FunctionKind::Lower => self.render_unary(args[0], |f| Formula::Lower(Box::new(f))),
            FunctionKind::Trim => self.render_unary(args[0], |f| Formula::Trim(Box::new(f))),
            FunctionKind::Parse => {
                let result = self.render_node(args[0])?;
                let delimiter = self.literal_str(args[1])?;
                let position = self.literal_int(args[2])?;
                let (formula, template) = combine1(&result, |f| Formula::SplitPart {
                    expr: Box::new(f),
                    delimiter: delimiter.clone(),
                    position,
                });
                Ok(RenderResult::merge(formula, template, &[&result]))
            }
            FunctionKind::Contains => {
                let result = self.render_node(args[0])?;
                let mut patterns = Vec::new();
                for arg in &args[1..] {
                    patterns.push(escape_like_pattern(&self.literal_str(*arg)?));
                }
                let (formula, template) = combine1(&result, |f| like_any(f, &patterns));
                Ok(result.update(formula, template))
            }
            FunctionKind::DateTrunc => {
                let unit = time_unit(&self.literal_str(args[1])?)?;
                self.render_unary(args[0], move |f| Formula::DateTrunc {
                    unit,
                    expr: Box::new(f),
                })
            }
            FunctionKind::DateHour => self.render_date_trunc(args[0], TimeUnit::Hour),
            FunctionKind::Date => self.render_date_trunc(args[0], TimeUnit::Day),
            FunctionKind::DateWeek => self.render_date_trunc(args[0], TimeUnit::Week),
            FunctionKind::DateMonth => self.render_date_trunc(args[0], TimeUnit::Month),
            FunctionKind::HourOfDay => self.render_extract(args[0], crate::formula::DatePart::Hour),
            FunctionKind::DayOfWeek => {
                self.render_extract(args[0], crate::formula::DatePart::DayOfWeek)
            }
            FunctionKind::WeekOfYear => self.render_extract(args[0], crate::formula::DatePart::Week),
            FunctionKind::MonthOfYear => {
                self.render_extract(args[0], crate::formula::DatePart::Month)
            }
            FunctionKind::Year => self.render_extract(args[0], crate::formula::DatePart::Year),
            FunctionKind::ToText => self.render_unary(args[0], |f| Formula::Cast {
                expr: Box::new(f),
                to: CastType::Text,
            }),
            FunctionKind::ToBool => {
                let result = self.render_node(args[0])?;
                if queries::return_type(self.ast, self.ctx, args[0]).is_boolean() {
                    return Ok(result);
                }
                let (formula, template) = combine1(&result, |f| Formula::Cast {
                    expr: Box::new(f),
                    to: CastType::Boolean,
                });
                Ok(result.update(formula, template))
            }
            FunctionKind::ToNumber => {
                let result = self.render_node(args[0])?;
                let to = match args.get(1) {
                    Some(arg) => CastType::Decimal { scale: self.literal_int(*arg)? as u32 },
                    None => CastType::Integer,
                };
                let (formula, template) =
                    combine1(&result, |f| Formula::Cast { expr: Box::new(f), to });
                Ok(result.update(formula, template))
            }
            FunctionKind::ToDate => {
                let result = self.render_node(args[0])?;
                let format = match args.get(1) {
                    Some(arg) => Some(self.literal_str(*arg)?),
                    None => None,
                };
                let (formula, template) = combine1(&result, |f| Formula::ParseDate {
                    expr: Box::new(f),
                    format: format.clone(),
                });
                Ok(result.update(formula, template))
            }
            FunctionKind::DateDiff => {
                let unit = time_unit(&self.literal_str(args[0])?)?;
                let start = self.render_node(args[1])?;
                let end = self.render_node(args[2])?;
                let (formula, template) = combine2(&start, &end, |s, e| Formula::TimestampDiff {
                    unit,
                    start: Box::new(s),
                    end: Box::new(e),
                });
                Ok(RenderResult::merge(formula, template, &[&start, &end]))
            }
            FunctionKind::Override => self.render_override(args),
            FunctionKind::Cumulative => self.render_cumulative(args),
            FunctionKind::Overall => {
                let result = self.render_node(args[0])?;
                let (formula, template) = combine1(&result, |f| Formula::WindowSum {
                    expr: Box::new(f),
                    partition_by: Vec::new(),
                    order_by: None,
                    cumulative: false,
                });
                Ok(RenderResult::merge(formula, template, &[&result]))
            }
            FunctionKind::Now => Ok(RenderResult::new(Formula::Now)),
            FunctionKind::Iff | FunctionKind::Ifs => self.render_condition(id, args),
        }
    }

    fn render_args(&mut self, args: &[NodeId]) -> Result<Vec<RenderResult>, CompileError> {
        args.iter().map(|arg| self.render_node(*arg)).collect()
    }

    fn render_unary(
        &mut self,
        arg: NodeId,
        build: impl Fn(Formula) -> Formula,
    ) -> Result<RenderResult, CompileError> {
        let result = self.render_node(arg)?;
        let (formula, template) = combine1(&result, build);
        Ok(result.update(formula, template))
    }

    fn render_date_trunc(
        &mut self,
        arg: NodeId,
        unit: TimeUnit,
    ) -> Result<RenderResult, CompileError> {
        self.render_unary(arg, move |f| Formula::DateTrunc { unit, expr: Box::new(f) })
    }

    fn render_extract(
        &mut self,
        arg: NodeId,
        part: crate::formula::DatePart,
    ) -> Result<RenderResult, CompileError> {
        self.render_unary(arg, move |f| Formula::Extract { part, expr: Box::new(f) })
    }

    fn render_override(&mut self, args: &[NodeId]) -> Result<RenderResult, CompileError> {
        let result = self.render_node(args[0])?;
        let mapping_slug = self.literal_str(args[1])?;
        let include_missing = match args.get(2) {
            Some(arg) => self.literal_bool(*arg)?,
            None => true,
        };

        // the query builder joins the mapping CTE under this identifier
        let dimension_name = formula_column_text(&result.formula);
        let identifier = safe_identifier(&format!(
            "__om_{}_{}_{}",
            dimension_name, mapping_slug, include_missing
        ));
        let changed = Formula::column(format!("{}.changed", identifier));

        let fallback = if include_missing {
            Formula::Coalesce(vec![changed.clone(), Formula::string("Unknown")])
        } else {
            changed.clone()
        };
        // NULL survives the mapping CTE as a marker string
        let formula = Formula::Case {
            when_then: vec![(
                Formula::compare(CompareOp::Eq, changed, Formula::string(PANO_NULL)),
                Formula::null(),
            )],
            else_result: Some(Box::new(fallback)),
        };

        let mapping = OverrideMapping {
            formula: result.formula.clone(),
            override_mapping_slug: mapping_slug,
            include_missing_values: include_missing,
        };
        let mut result = result.update(formula, None);
        result.override_mappings.push(mapping);
        Ok(result)
    }

    fn render_cumulative(&mut self, args: &[NodeId]) -> Result<RenderResult, CompileError> {
        let metric = self.render_node(args[0])?;
        let time = self.render_node(args[1])?;

        let window = |partition_by: Vec<Formula>| Formula::WindowSum {
            expr: Box::new(metric.formula.clone()),
            partition_by,
            order_by: Some(Box::new(time.formula.clone())),
            cumulative: true,
        };
        let formula = window(Vec::new());
        // the template partitions by the query's dimensions, except the
        // time dimension that orders the frame
        let template = window(vec![Formula::placeholder(DIMENSION_SLUGS_TEMPLATE_PARAM)]);

        let mut result = RenderResult::merge(formula, Some(template), &[&metric, &time]);
        result
            .exclude_slugs
            .insert(formula_column_text(&time.formula));
        result.exclude_slugs.extend(
            queries::used_taxons(self.ast, self.ctx, args[1])
                .all_slugs()
                .into_iter(),
        );
        Ok(result)
    }

    fn render_condition(
        &mut self,
        id: NodeId,
        args: &[NodeId],
    ) -> Result<RenderResult, CompileError> {
        let result_phase = queries::phase(self.ast, self.ctx, id);
        let invalid_outcome = if result_phase.is_metric() {
            Formula::int(0)
        } else {
            Formula::null()
        };

        let (pairs, negative) = queries::iff_parts(args);
        let mut parts: Vec<RenderResult> = Vec::new();
        let mut when_then = Vec::new();
        let mut when_then_template = Vec::new();
        let mut any_template = false;

        for (cond, outcome) in pairs {
            let cond_invalid = queries::invalid(self.ast, self.ctx, cond);
            let outcome_invalid = queries::invalid(self.ast, self.ctx, outcome);
            let cond_result = self.render_node(cond)?;
            let outcome_result = self.render_node(outcome)?;

            let cond_formula = if cond_invalid {
                Formula::boolean(false)
            } else {
                cond_result.formula.clone()
            };
            let cond_template = if cond_invalid {
                Formula::boolean(false)
            } else {
                cond_result.template_or_sql()
            };
            let outcome_formula = if outcome_invalid {
                invalid_outcome.clone()
            } else {
                outcome_result.formula.clone()
            };
            let outcome_template = if outcome_invalid {
                invalid_outcome.clone()
            } else {
                outcome_result.template_or_sql()
            };
            any_template |= cond_result.template.is_some() || outcome_result.template.is_some();

            when_then.push((cond_formula, outcome_formula));
            when_then_template.push((cond_template, outcome_template));
            if !cond_invalid {
                parts.push(cond_result);
            }
            if !outcome_invalid {
                parts.push(outcome_result);
            }
        }

        let (else_formula, else_template) = match negative {
            Some(negative) if !queries::invalid(self.ast, self.ctx, negative) => {
                let negative_result = self.render_node(negative)?;
                any_template |= negative_result.template.is_some();
                let pair = (negative_result.formula.clone(), negative_result.template_or_sql());
                parts.push(negative_result);
                pair
            }
            _ => (invalid_outcome.clone(), invalid_outcome),
        };

        let formula = Formula::Case {
            when_then,
            else_result: Some(Box::new(else_formula)),
        };
        let template = if any_template {
            Some(Formula::Case {
                when_then: when_then_template,
                else_result: Some(Box::new(else_template)),
            })
        } else {
            None
        };
        Ok(RenderResult::merge(formula, template, &parts.iter().collect::<Vec<_>>()))
    }

    // -----------------------------------------------------------------
    // literal argument helpers
    // -----------------------------------------------------------------

    fn literal_str(&self, id: NodeId) -> Result<String, CompileError> {
        match queries::literal_value(self.ast, id) {
            Some(LiteralValue::Str(s)) => Ok(s),
            other => Err(CompileError::Internal {
                message: format!("expected a string constant, found {:?}", other),
            }),
        }
    }

    fn literal_int(&self, id: NodeId) -> Result<i64, CompileError> {
        match queries::literal_value(self.ast, id) {
            Some(LiteralValue::Int(i)) => Ok(i),
            other => Err(CompileError::Internal {
                message: format!("expected an integer constant, found {:?}", other),
            }),
        }
    }

    fn literal_bool(&self, id: NodeId) -> Result<bool, CompileError> {
        match queries::literal_value(self.ast, id) {
            Some(LiteralValue::Bool(b)) => Ok(b),
            other => Err(CompileError::Internal {
                message: format!("expected a boolean constant, found {:?}", other),
            }),
        }
    }
}

/// Marker the override mapping CTE substitutes for NULL values.
pub const PANO_NULL: &str = "--PANO-NULL--";

/// Characters escaped inside LIKE patterns built by `contains`.
pub const LIKE_PATTERN_ESCAPE_CHAR: char = '/';

fn escape_like_pattern(pattern: &str) -> String {
    let mut escaped = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if c == '%' || c == '_' {
            escaped.push(LIKE_PATTERN_ESCAPE_CHAR);
        }
        escaped.push(c);
    }
    escaped
}

fn time_unit(name: &str) -> Result<TimeUnit, CompileError> {
    Ok(match name.to_ascii_uppercase().as_str() {
        "SECOND" => TimeUnit::Second,
        "MINUTE" => TimeUnit::Minute,
        "HOUR" => TimeUnit::Hour,
        "DAY" => TimeUnit::Day,
        "WEEK" => TimeUnit::Week,
        "MONTH" => TimeUnit::Month,
        "YEAR" => TimeUnit::Year,
        other => {
            return Err(CompileError::Internal {
                message: format!("unsupported time unit \"{}\"", other),
            })
        }
    })
}

fn like_any(expr: Formula, patterns: &[String]) -> Formula {
    let mut clauses = patterns.iter().map(|pattern| Formula::Like {
        expr: Box::new(expr.clone()),
        pattern: format!("%{}%", pattern),
        escape: Some(LIKE_PATTERN_ESCAPE_CHAR),
    });
    let first = clauses.next().unwrap_or_else(|| Formula::boolean(false));
    clauses.fold(first, |acc, clause| Formula::Or(Box::new(acc), Box::new(clause)))
}

/// Portable identifier: letters, digits and underscores only, lowercase.
fn safe_identifier(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 1);
    let starts_ok = value
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(true);
    if !starts_ok {
        out.push('_');
    }
    for c in value.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c.to_ascii_lowercase());
        } else {
            out.push('_');
        }
    }
    out
}

/// Textual column form of a formula, used where the surrounding query
/// identifies a dimension by name.
fn formula_column_text(formula: &Formula) -> String {
    match formula {
        Formula::Column(name) => name.clone(),
        Formula::Placeholder(slug) => format!("${{{}}}", slug),
        other => crate::emitter::render_formula(other, crate::emitter::SqlDialect::Snowflake),
    }
}
