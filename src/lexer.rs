//! Lexical analysis for TEL expressions
//!
//! Tokenization built on logos. Keywords (`true`, `false`, `is`, `not`,
//! `null`) are case-insensitive; words cover taxon names and function
//! names; `|` separates a data source namespace from a taxon name.

use std::fmt;
use std::ops::Range;

use logos::Logos;

/// TEL token.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum Token {
    #[regex(r"[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Real(f64),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Integer(i64),

    #[regex(r"'[^']*'", strip_quotes)]
    #[regex(r#""[^"]*""#, strip_quotes)]
    StringLiteral(String),

    #[token("true", ignore(ascii_case))]
    True,
    #[token("false", ignore(ascii_case))]
    False,
    #[token("is", ignore(ascii_case))]
    Is,
    #[token("not", ignore(ascii_case))]
    Not,
    #[token("null", ignore(ascii_case))]
    Null,

    /// Taxon or function name
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_.]*", |lex| lex.slice().to_string())]
    Word(String),

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("==")]
    Eq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    LtEq,
    #[token("<")]
    Lt,
    #[token(">=")]
    GtEq,
    #[token(">")]
    Gt,
    #[token("&&")]
    And,
    #[token("||")]
    Or,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token("?")]
    Question,
    /// Namespace separator in taxon references
    #[token("|")]
    Pipe,
    /// Tag separator in taxon references
    #[token(":")]
    Colon,
}

fn strip_quotes(lex: &mut logos::Lexer<Token>) -> String {
    let slice = lex.slice();
    slice[1..slice.len() - 1].to_string()
}

/// A token with its byte range in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub span: Range<usize>,
}

/// Lexing failure: an unexpected character sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Range<usize>,
    pub slice: String,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unexpected symbol \"{}\"", self.slice)
    }
}

impl std::error::Error for LexError {}

/// Tokenize a TEL expression.
pub fn lex(input: &str) -> Result<Vec<Spanned>, LexError> {
    let mut lexer = Token::lexer(input);
    let mut tokens = Vec::new();
    while let Some(result) = lexer.next() {
        match result {
            Ok(token) => tokens.push(Spanned { token, span: lexer.span() }),
            Err(()) => {
                return Err(LexError {
                    span: lexer.span(),
                    slice: lexer.slice().to_string(),
                })
            }
        }
    }
    Ok(tokens)
}

/// 1-based line and column of a byte offset.
pub fn line_col(input: &str, offset: usize) -> (usize, usize) {
    let before = &input[..offset.min(input.len())];
    let line = before.matches('\n').count() + 1;
    let col = offset - before.rfind('\n').map(|i| i + 1).unwrap_or(0) + 1;
    (line, col)
}
