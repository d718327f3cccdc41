//! Expression tree (noun module)
//!
//! Nodes live in a per-compilation arena; `NodeId` is a node's identity.
//! Passes never mutate a node in place: they allocate transformed copies
//! into the same arena, so ids stay stable and parents are cheap to track.
//!
//! Binary operations capture the invalid flags of their operands when the
//! node is built. The flags travel with copies, which keeps the tolerant
//! `+`/`-` behavior stable even after a rewrite replaces an invalid side.

pub mod queries;

use crate::functions::FunctionKind;
use crate::taxonomy::aggregation::AggregationDefinition;

/// Identity of a node within one compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Source location of a node: 1-based position and line within the
/// expression text identified by `source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub position: usize,
    pub line: usize,
    /// Index into the arena's source list (nested calculations have their
    /// own source text)
    pub source: usize,
}

impl Default for Location {
    fn default() -> Self {
        Location { position: 1, line: 1, source: 0 }
    }
}

/// Arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Multiply,
    Divide,
    Add,
    Subtract,
}

impl ArithmeticOp {
    /// Name used in validation messages.
    pub fn expression_name(&self) -> &'static str {
        match self {
            ArithmeticOp::Multiply => "multiplication",
            ArithmeticOp::Divide => "division",
            ArithmeticOp::Add => "addition",
            ArithmeticOp::Subtract => "subtraction",
        }
    }

    /// `*` and `/` propagate invalid operands; `+` and `-` tolerate them.
    pub fn is_strict(&self) -> bool {
        matches!(self, ArithmeticOp::Multiply | ArithmeticOp::Divide)
    }
}

/// Comparison and boolean connective operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

/// A taxon reference, possibly with an inlined calculation subtree.
#[derive(Debug, Clone, PartialEq)]
pub struct TaxonExpr {
    /// Full slug: `namespace|name` or bare `name`
    pub slug: String,
    pub namespace: Option<String>,
    pub name: String,
    /// `?`-prefixed references (and everything inlined under one)
    pub optional: bool,
    /// Inlined calculation of a computed taxon
    pub calc: Option<NodeId>,
}

/// What a node is.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Integer(i64),
    Real(f64),
    StringLit(String),
    Boolean(bool),
    Parens(NodeId),
    Taxon(TaxonExpr),
    Arithmetic {
        op: ArithmeticOp,
        left: NodeId,
        right: NodeId,
        left_invalid: bool,
        right_invalid: bool,
    },
    Logical {
        op: LogicalOp,
        left: NodeId,
        right: NodeId,
        left_invalid: bool,
        right_invalid: bool,
    },
    Not(NodeId),
    IsNull {
        operand: NodeId,
        negated: bool,
    },
    Function {
        kind: FunctionKind,
        args: Vec<NodeId>,
    },
    /// Boundary: evaluate `value` as a dimension over joined data sources
    DimensionPhase {
        value: NodeId,
    },
    /// Boundary: `value` becomes an aggregation input
    AggregationPhase {
        value: NodeId,
        aggregation: AggregationDefinition,
        label: Option<String>,
    },
    /// Boundary: `value` is aggregated with `aggregation`
    PostAggregationPhase {
        value: NodeId,
        aggregation: AggregationDefinition,
        label: Option<String>,
    },
    Root {
        value: NodeId,
    },
}

/// A node in the arena.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub location: Location,
    pub kind: ExprKind,
}

/// Per-compilation node arena.
#[derive(Debug, Default)]
pub struct Ast {
    nodes: Vec<Node>,
    sources: Vec<String>,
}

impl Ast {
    pub fn new(expression: impl Into<String>) -> Self {
        Ast {
            nodes: Vec::new(),
            sources: vec![expression.into()],
        }
    }

    /// Register a nested source text (an inlined calculation) and return
    /// its index for locations.
    pub fn add_source(&mut self, expression: impl Into<String>) -> usize {
        self.sources.push(expression.into());
        self.sources.len() - 1
    }

    pub fn source(&self, index: usize) -> &str {
        &self.sources[index]
    }

    /// Allocate a node and re-parent its children to it.
    pub fn add(&mut self, kind: ExprKind, location: Location) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let children = children_of(&kind);
        self.nodes.push(Node { id, parent: None, location, kind });
        for child in children {
            self.nodes[child.index()].parent = Some(id);
        }
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn kind(&self, id: NodeId) -> &ExprKind {
        &self.nodes[id.index()].kind
    }

    pub fn location(&self, id: NodeId) -> Location {
        self.nodes[id.index()].location
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].parent
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        children_of(&self.nodes[id.index()].kind)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Direct children of a kind, in evaluation order.
pub fn children_of(kind: &ExprKind) -> Vec<NodeId> {
    match kind {
        ExprKind::Integer(_)
        | ExprKind::Real(_)
        | ExprKind::StringLit(_)
        | ExprKind::Boolean(_) => Vec::new(),
        ExprKind::Parens(inner) | ExprKind::Not(inner) => vec![*inner],
        ExprKind::IsNull { operand, .. } => vec![*operand],
        ExprKind::Taxon(taxon) => taxon.calc.into_iter().collect(),
        ExprKind::Arithmetic { left, right, .. } | ExprKind::Logical { left, right, .. } => {
            vec![*left, *right]
        }
        ExprKind::Function { args, .. } => args.clone(),
        ExprKind::DimensionPhase { value }
        | ExprKind::AggregationPhase { value, .. }
        | ExprKind::PostAggregationPhase { value, .. }
        | ExprKind::Root { value } => vec![*value],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_sets_parents() {
        let mut ast = Ast::new("1 + 2");
        let left = ast.add(ExprKind::Integer(1), Location::default());
        let right = ast.add(ExprKind::Integer(2), Location::default());
        let add = ast.add(
            ExprKind::Arithmetic {
                op: ArithmeticOp::Add,
                left,
                right,
                left_invalid: false,
                right_invalid: false,
            },
            Location::default(),
        );

        assert_eq!(ast.parent(left), Some(add));
        assert_eq!(ast.parent(right), Some(add));
        assert_eq!(ast.parent(add), None);
        assert_eq!(ast.children(add), vec![left, right]);
    }

    #[test]
    fn test_ids_are_monotonic() {
        let mut ast = Ast::new("");
        let a = ast.add(ExprKind::Integer(1), Location::default());
        let b = ast.add(ExprKind::Integer(2), Location::default());
        assert!(a < b);
        assert_eq!(ast.len(), 2);
    }

    #[test]
    fn test_nested_sources() {
        let mut ast = Ast::new("outer");
        let nested = ast.add_source("inner");
        assert_eq!(ast.source(0), "outer");
        assert_eq!(ast.source(nested), "inner");
    }
}
