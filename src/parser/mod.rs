//! Expression parser (verb module)
//!
//! Transforms TEL source text into the expression tree. Taxon references
//! are bound against the taxon map while parsing: a computed taxon's
//! calculation is parsed recursively into the same arena, with a depth
//! guard that also catches reference cycles.

use crate::ast::{ArithmeticOp, Ast, ExprKind, Location, LogicalOp, NodeId, TaxonExpr};
use crate::ast::queries;
use crate::compiler::MAX_TAXON_REFERENCE_DEPTH;
use crate::context::CompileContext;
use crate::error::CompileError;
use crate::functions::FunctionKind;
use crate::lexer::{lex, line_col, Spanned, Token};

/// Parse a TEL expression into a fresh arena. Returns the arena and the
/// id of the expression's top node (not yet wrapped in a root).
pub fn parse(expression: &str, ctx: &CompileContext<'_>) -> Result<(Ast, NodeId), CompileError> {
    let mut ast = Ast::new(expression);
    let top = parse_into(&mut ast, expression, 0, ctx, false, 0)?;
    Ok((ast, top))
}

/// Parse `text` as source `source` of an existing arena.
fn parse_into(
    ast: &mut Ast,
    text: &str,
    source: usize,
    ctx: &CompileContext<'_>,
    force_optional: bool,
    depth: usize,
) -> Result<NodeId, CompileError> {
    let tokens = lex(text).map_err(|err| {
        let (line, col) = line_col(text, err.span.start);
        CompileError::syntax(err.to_string(), col, line, text.trim())
    })?;
    let mut parser = Parser {
        ast,
        tokens,
        pos: 0,
        input: text,
        source,
        ctx,
        force_optional,
        depth,
    };
    let top = parser.parse_expression()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.unexpected());
    }
    Ok(top)
}

struct Parser<'a, 'ctx> {
    ast: &'a mut Ast,
    tokens: Vec<Spanned>,
    pos: usize,
    input: &'a str,
    source: usize,
    ctx: &'a CompileContext<'ctx>,
    /// Everything inlined under a `?taxon` reference stays optional
    force_optional: bool,
    depth: usize,
}

impl<'a, 'ctx> Parser<'a, 'ctx> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn advance(&mut self) -> Option<Spanned> {
        let spanned = self.tokens.get(self.pos).cloned();
        if spanned.is_some() {
            self.pos += 1;
        }
        spanned
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn location_here(&self) -> Location {
        let offset = self
            .tokens
            .get(self.pos)
            .map(|s| s.span.start)
            .unwrap_or(self.input.len());
        self.location_at(offset)
    }

    fn location_at(&self, offset: usize) -> Location {
        let (line, col) = line_col(self.input, offset);
        Location { position: col, line, source: self.source }
    }

    fn unexpected(&self) -> CompileError {
        match self.tokens.get(self.pos) {
            Some(spanned) => {
                let slice = &self.input[spanned.span.clone()];
                let (line, col) = line_col(self.input, spanned.span.start);
                CompileError::syntax(
                    format!("Unexpected symbol \"{}\"", slice),
                    col,
                    line,
                    self.input.trim(),
                )
            }
            None => {
                let (line, col) = line_col(self.input, self.input.len());
                CompileError::syntax("Unexpected end of expression", col, line, self.input.trim())
            }
        }
    }

    fn error_at(&self, message: impl Into<String>, location: Location) -> CompileError {
        CompileError::syntax(message, location.position, location.line, self.input.trim())
    }

    // expression := operand ((== | != | < | <= | > | >= | && | ||) operand)*
    //
    // Comparisons and connectives share one flat left-associative tier.
    fn parse_expression(&mut self) -> Result<NodeId, CompileError> {
        let mut left = self.parse_operand()?;
        while let Some(op) = self.peek_logical_op() {
            self.pos += 1;
            let right = self.parse_operand()?;
            left = self.add_logical(op, left, right);
        }
        Ok(left)
    }

    fn peek_logical_op(&self) -> Option<LogicalOp> {
        match self.peek()? {
            Token::Eq => Some(LogicalOp::Eq),
            Token::NotEq => Some(LogicalOp::NotEq),
            Token::Lt => Some(LogicalOp::Lt),
            Token::LtEq => Some(LogicalOp::LtEq),
            Token::Gt => Some(LogicalOp::Gt),
            Token::GtEq => Some(LogicalOp::GtEq),
            Token::And => Some(LogicalOp::And),
            Token::Or => Some(LogicalOp::Or),
            _ => None,
        }
    }

    // operand := 'not' operand | additive ('is' 'not'? 'null')?
    fn parse_operand(&mut self) -> Result<NodeId, CompileError> {
        if self.peek() == Some(&Token::Not) {
            let location = self.location_here();
            self.pos += 1;
            let inner = self.parse_operand()?;
            return Ok(self.ast.add(ExprKind::Not(inner), location));
        }
        let mut node = self.parse_additive()?;
        while self.eat(&Token::Is) {
            let negated = self.eat(&Token::Not);
            if !self.eat(&Token::Null) {
                return Err(self.unexpected());
            }
            let location = self.ast.location(node);
            node = self
                .ast
                .add(ExprKind::IsNull { operand: node, negated }, location);
        }
        Ok(node)
    }

    fn parse_additive(&mut self) -> Result<NodeId, CompileError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => ArithmeticOp::Add,
                Some(Token::Minus) => ArithmeticOp::Subtract,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_term()?;
            left = self.add_arithmetic(op, left, right);
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<NodeId, CompileError> {
        let mut left = self.parse_primary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => ArithmeticOp::Multiply,
                Some(Token::Slash) => ArithmeticOp::Divide,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_primary()?;
            left = self.add_arithmetic(op, left, right);
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<NodeId, CompileError> {
        let location = self.location_here();
        match self.advance().map(|s| s.token) {
            Some(Token::Integer(value)) => Ok(self.ast.add(ExprKind::Integer(value), location)),
            Some(Token::Real(value)) => Ok(self.ast.add(ExprKind::Real(value), location)),
            Some(Token::StringLiteral(value)) => {
                Ok(self.ast.add(ExprKind::StringLit(value), location))
            }
            Some(Token::True) => Ok(self.ast.add(ExprKind::Boolean(true), location)),
            Some(Token::False) => Ok(self.ast.add(ExprKind::Boolean(false), location)),
            Some(Token::Minus) => match self.advance().map(|s| s.token) {
                Some(Token::Integer(value)) => {
                    Ok(self.ast.add(ExprKind::Integer(-value), location))
                }
                Some(Token::Real(value)) => Ok(self.ast.add(ExprKind::Real(-value), location)),
                Some(_) => {
                    self.pos -= 1;
                    Err(self.unexpected())
                }
                None => Err(self.unexpected()),
            },
            Some(Token::LParen) => {
                let inner = self.parse_expression()?;
                if !self.eat(&Token::RParen) {
                    return Err(self.unexpected());
                }
                Ok(self.ast.add(ExprKind::Parens(inner), location))
            }
            Some(Token::Question) => match self.advance().map(|s| s.token) {
                Some(Token::Word(word)) => self.parse_taxon(word, true, location),
                Some(_) => {
                    self.pos -= 1;
                    Err(self.unexpected())
                }
                None => Err(self.unexpected()),
            },
            Some(Token::Word(word)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    self.parse_function(&word, location)
                } else {
                    self.parse_taxon(word, false, location)
                }
            }
            Some(_) => {
                self.pos -= 1;
                Err(self.unexpected())
            }
            None => Err(self.unexpected()),
        }
    }

    fn parse_function(
        &mut self,
        name: &str,
        location: Location,
    ) -> Result<NodeId, CompileError> {
        let kind = FunctionKind::from_name(name)
            .ok_or_else(|| self.error_at(format!("Unknown function {}", name), location))?;
        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.parse_expression()?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                if self.eat(&Token::RParen) {
                    break;
                }
                return Err(self.unexpected());
            }
        }
        if kind.drops_invalid_args() {
            let ast = &*self.ast;
            args.retain(|arg| !queries::invalid(ast, self.ctx, *arg));
        }
        Ok(self.ast.add(ExprKind::Function { kind, args }, location))
    }

    fn parse_taxon(
        &mut self,
        first_word: String,
        optional: bool,
        location: Location,
    ) -> Result<NodeId, CompileError> {
        let (namespace, name) = if self.eat(&Token::Pipe) {
            match self.advance().map(|s| s.token) {
                Some(Token::Word(name)) => (Some(first_word), name),
                Some(_) => {
                    self.pos -= 1;
                    return Err(self.unexpected());
                }
                None => return Err(self.unexpected()),
            }
        } else {
            (None, first_word)
        };
        // a trailing `:tag` is accepted and ignored
        if self.eat(&Token::Colon) {
            match self.advance().map(|s| s.token) {
                Some(Token::Word(_)) => {}
                Some(_) => {
                    self.pos -= 1;
                    return Err(self.unexpected());
                }
                None => return Err(self.unexpected()),
            }
        }
        let slug = match &namespace {
            Some(ns) => format!("{}|{}", ns, name),
            None => name.clone(),
        };
        let optional = optional || self.force_optional;

        let calculation = self
            .ctx
            .taxons
            .get(&slug)
            .and_then(|taxon| taxon.calculation.clone());
        let calc = match calculation {
            Some(text) => {
                if self.depth + 1 >= MAX_TAXON_REFERENCE_DEPTH {
                    return Err(CompileError::MaxDepth { limit: MAX_TAXON_REFERENCE_DEPTH });
                }
                let nested_source = self.ast.add_source(text.clone());
                Some(parse_into(
                    self.ast,
                    &text,
                    nested_source,
                    self.ctx,
                    optional,
                    self.depth + 1,
                )?)
            }
            None => None,
        };

        Ok(self.ast.add(
            ExprKind::Taxon(TaxonExpr { slug, namespace, name, optional, calc }),
            location,
        ))
    }

    fn add_arithmetic(&mut self, op: ArithmeticOp, left: NodeId, right: NodeId) -> NodeId {
        let location = self.ast.location(left);
        let left_invalid = queries::invalid(self.ast, self.ctx, left);
        let right_invalid = queries::invalid(self.ast, self.ctx, right);
        self.ast.add(
            ExprKind::Arithmetic { op, left, right, left_invalid, right_invalid },
            location,
        )
    }

    fn add_logical(&mut self, op: LogicalOp, left: NodeId, right: NodeId) -> NodeId {
        let location = self.ast.location(left);
        let left_invalid = queries::invalid(self.ast, self.ctx, left);
        let right_invalid = queries::invalid(self.ast, self.ctx, right);
        self.ast.add(
            ExprKind::Logical { op, left, right, left_invalid, right_invalid },
            location,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::TaxonMap;

    fn fixture() -> TaxonMap {
        crate::taxonomy::parse_file("test_data/taxons.yaml").unwrap()
    }

    fn parse_fixture(expression: &str) -> Result<(Ast, NodeId), CompileError> {
        let taxons = fixture();
        let ctx = CompileContext::new(&taxons);
        parse(expression, &ctx)
    }

    #[test]
    fn test_multiplication_binds_tighter_than_addition() {
        let (ast, top) = parse_fixture("1 + 2 * 3").unwrap();
        let ExprKind::Arithmetic { op: ArithmeticOp::Add, right, .. } = ast.kind(top) else {
            panic!("expected addition at the top, got {:?}", ast.kind(top));
        };
        assert!(matches!(
            ast.kind(*right),
            ExprKind::Arithmetic { op: ArithmeticOp::Multiply, .. }
        ));
    }

    #[test]
    fn test_parens_group() {
        let (ast, top) = parse_fixture("(spend * 1000) / impressions").unwrap();
        let ExprKind::Arithmetic { op: ArithmeticOp::Divide, left, .. } = ast.kind(top) else {
            panic!("expected division at the top");
        };
        assert!(matches!(ast.kind(*left), ExprKind::Parens(_)));
    }

    #[test]
    fn test_optional_taxon() {
        let (ast, top) = parse_fixture("?facebook_ads|spend").unwrap();
        let ExprKind::Taxon(taxon) = ast.kind(top) else {
            panic!("expected a taxon");
        };
        assert_eq!(taxon.slug, "facebook_ads|spend");
        assert_eq!(taxon.namespace.as_deref(), Some("facebook_ads"));
        assert_eq!(taxon.name, "spend");
        assert!(taxon.optional);
        assert!(taxon.calc.is_none());
    }

    #[test]
    fn test_computed_taxon_inlines_calculation() {
        let (ast, top) = parse_fixture("generic_cpm").unwrap();
        let ExprKind::Taxon(taxon) = ast.kind(top) else {
            panic!("expected a taxon");
        };
        let calc = taxon.calc.unwrap();
        assert!(matches!(
            ast.kind(calc),
            ExprKind::Arithmetic { op: ArithmeticOp::Divide, .. }
        ));
        // nested calculation has its own source text for error messages
        assert_eq!(ast.source(ast.location(calc).source), "(spend * 1000) / impressions");
    }

    #[test]
    fn test_optional_propagates_into_calculation() {
        let (ast, top) = parse_fixture("?generic_cpm").unwrap();
        let ExprKind::Taxon(taxon) = ast.kind(top) else {
            panic!("expected a taxon");
        };
        let ExprKind::Arithmetic { left, .. } = ast.kind(taxon.calc.unwrap()) else {
            panic!("expected the inlined division");
        };
        let ExprKind::Parens(mul) = ast.kind(*left) else {
            panic!("expected parens");
        };
        let ExprKind::Arithmetic { left: spend, .. } = ast.kind(*mul) else {
            panic!("expected the multiplication");
        };
        let ExprKind::Taxon(inner) = ast.kind(*spend) else {
            panic!("expected the spend taxon");
        };
        assert!(inner.optional);
    }

    #[test]
    fn test_cycle_hits_depth_limit() {
        let err = parse_fixture("cycle_a").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Reached maximum depth of taxon references (10)."
        );
    }

    #[test]
    fn test_unknown_function() {
        let err = parse_fixture("frobnicate(spend)").unwrap_err();
        assert!(
            err.to_string().starts_with("Unknown function frobnicate."),
            "unexpected message: {}",
            err
        );
    }

    #[test]
    fn test_is_not_null() {
        let (ast, top) = parse_fixture("spend is not null").unwrap();
        assert!(matches!(ast.kind(top), ExprKind::IsNull { negated: true, .. }));
    }

    #[test]
    fn test_not_prefix_and_connectives() {
        let (ast, top) = parse_fixture("not gender == 'male' && gender is null").unwrap();
        // flat tier: ((not gender == 'male') && (gender is null))
        let ExprKind::Logical { op: LogicalOp::And, left, right, .. } = ast.kind(top) else {
            panic!("expected && at the top, got {:?}", ast.kind(top));
        };
        assert!(matches!(ast.kind(*left), ExprKind::Logical { op: LogicalOp::Eq, .. }));
        assert!(matches!(ast.kind(*right), ExprKind::IsNull { negated: false, .. }));
    }

    #[test]
    fn test_trailing_garbage_is_rejected() {
        let err = parse_fixture("1 + 2 3").unwrap_err();
        assert!(err.to_string().starts_with("Unexpected symbol \"3\""));
    }

    #[test]
    fn test_unexpected_end() {
        let err = parse_fixture("spend +").unwrap_err();
        assert!(err.to_string().starts_with("Unexpected end of expression"));

        let err = parse_fixture("facebook_ads|").unwrap_err();
        assert!(err.to_string().starts_with("Unexpected end of expression"));
    }

    #[test]
    fn test_taxon_tag_is_ignored() {
        let (ast, top) = parse_fixture("spend:cost").unwrap();
        let ExprKind::Taxon(taxon) = ast.kind(top) else {
            panic!("expected a taxon");
        };
        assert_eq!(taxon.slug, "spend");

        let (ast, top) = parse_fixture("facebook_ads|gender:demo").unwrap();
        let ExprKind::Taxon(taxon) = ast.kind(top) else {
            panic!("expected a taxon");
        };
        assert_eq!(taxon.slug, "facebook_ads|gender");
        assert_eq!(taxon.namespace.as_deref(), Some("facebook_ads"));
    }

    #[test]
    fn test_merge_drops_invalid_args() {
        let taxons = fixture();
        let mut ctx = CompileContext::new(&taxons);
        ctx.allowed_data_sources = Some(["facebook_ads".to_string()].into());
        let (ast, top) =
            parse("merge(?facebook_ads|gender, ?twitter|gender)", &ctx).unwrap();
        let ExprKind::Function { kind: FunctionKind::Merge, args } = ast.kind(top) else {
            panic!("expected merge");
        };
        assert_eq!(args.len(), 1);
        let ExprKind::Taxon(taxon) = ast.kind(args[0]) else {
            panic!("expected a taxon arg");
        };
        assert_eq!(taxon.slug, "facebook_ads|gender");
    }

    #[test]
    fn test_negative_literal() {
        let (ast, top) = parse_fixture("-5 + 1").unwrap();
        let ExprKind::Arithmetic { left, .. } = ast.kind(top) else {
            panic!("expected addition");
        };
        assert_eq!(ast.kind(*left), &ExprKind::Integer(-5));
    }
}
