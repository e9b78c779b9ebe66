//! Tokens of the expression grammar.

use crate::name::Name;

/// One lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Unsigned integer literal.
    Int(u64),
    /// Float literal (`12.`, `3.25`).
    Float(f64),
    /// `true` / `false`.
    Bool(bool),
    /// Double-quoted string literal, unescaped.
    Str(String),
    /// `$name` or a bare identifier used as a reference.
    Ref(Name),
    /// An identifier immediately followed by `(`; both are consumed.
    FuncOpen(Name),
    /// `.name` postfix field access.
    Field(Name),
    /// The comprehension opener `for $x in`, consumed as one group.
    For(Name),
    /// The comprehension filter keyword.
    If,
    /// A unary or binary operator symbol, including `and` / `or`.
    Op(&'static str),
    Question,
    Colon,
    Comma,
    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,
    OpenBrace,
    CloseBrace,
}

/// A token with its byte range in the source text.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub offset: usize,
    pub length: usize,
}

impl SpannedToken {
    pub fn new(token: Token, offset: usize, length: usize) -> SpannedToken {
        SpannedToken {
            token,
            offset,
            length,
        }
    }
}
