//! Error types shared by parsing, type checking and evaluation.
//!
//! Every failure in the crate is reported through one uniform [`Error`]
//! carrying a category, an optional source span, a human-readable message
//! and an optional underlying cause. Parse-time and run-time code paths
//! use the same type so that the expansion engine can collect both kinds
//! into a single report.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::name::Name;

/// Result alias for parse-time operations.
pub type ParseResult<T> = Result<T, Error>;

/// Result alias for evaluation-time operations.
pub type EvalResult<T> = Result<T, Error>;

// =====================================================================
// Spans
// =====================================================================

/// A region of source text: byte offset, 1-based line and column, length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    pub offset: usize,
    pub line: u32,
    pub column: u32,
    pub length: usize,
}

impl Span {
    pub fn new(offset: usize, line: u32, column: u32, length: usize) -> Span {
        Span {
            offset,
            line,
            column,
            length,
        }
    }

    /// Span inside a standalone, single-line expression string.
    pub fn at_offset(offset: usize, length: usize) -> Span {
        Span {
            offset,
            line: 1,
            column: offset as u32 + 1,
            length,
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

// =====================================================================
// Error kinds
// =====================================================================

/// The category of a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Tokenizer or grammar-shape failure.
    Syntax,
    /// General parse-time failure, e.g. constant folding that trips a
    /// runtime fault inside an otherwise well-formed expression.
    Processing,
    /// Static type incoherence: mismatched operands, bad argument types,
    /// unknown fields.
    Type,
    /// Runtime fault: division by zero, out-of-range index, missing value.
    Calculation,
    /// Reference to a variable the scope does not know.
    UndefinedVariable(Name),
    /// Call of a function the scope does not know.
    UndefinedFunction(Name),
}

impl ErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Syntax => "syntax error",
            ErrorKind::Processing => "processing error",
            ErrorKind::Type => "type error",
            ErrorKind::Calculation => "calculation error",
            ErrorKind::UndefinedVariable(_) => "undefined variable",
            ErrorKind::UndefinedFunction(_) => "undefined function",
        }
    }
}

// =====================================================================
// Error
// =====================================================================

/// Uniform error for every phase of the engine.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    span: Option<Span>,
    message: String,
    cause: Option<Box<Error>>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Error {
        Error {
            kind,
            span: None,
            message: message.into(),
            cause: None,
        }
    }

    pub fn syntax(message: impl Into<String>) -> Error {
        Error::new(ErrorKind::Syntax, message)
    }

    pub fn processing(message: impl Into<String>) -> Error {
        Error::new(ErrorKind::Processing, message)
    }

    pub fn type_err(message: impl Into<String>) -> Error {
        Error::new(ErrorKind::Type, message)
    }

    pub fn calculation(message: impl Into<String>) -> Error {
        Error::new(ErrorKind::Calculation, message)
    }

    pub fn undefined_variable(name: Name) -> Error {
        let message = format!("variable `{}` is not defined", name);
        Error::new(ErrorKind::UndefinedVariable(name), message)
    }

    pub fn undefined_function(name: Name) -> Error {
        let message = format!("function `{}` is not defined", name);
        Error::new(ErrorKind::UndefinedFunction(name), message)
    }

    /// Attach a span, keeping an already-present one.
    pub fn with_span(mut self, span: Span) -> Error {
        if self.span.is_none() {
            self.span = Some(span);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_cause(mut self, cause: Error) -> Error {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Re-anchor the error at a document location, prefixing the message
    /// with context. Used by the expansion engine when collecting errors
    /// out of individual node properties.
    pub fn locate(mut self, span: Span, context: impl fmt::Display) -> Error {
        self.message = format!("{}: {}", context, self.message);
        self.span = Some(span);
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn span(&self) -> Option<Span> {
        self.span
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&Error> {
        self.cause.as_deref()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.label(), self.message)?;
        if let Some(span) = self.span {
            write!(f, " ({})", span)?;
        }
        if let Some(cause) = &self.cause {
            write!(f, "; caused by: {}", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_ref().map(|c| c.as_ref() as _)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_span() {
        let err = Error::syntax("unexpected `)`").with_span(Span::at_offset(4, 1));
        assert_eq!(
            err.to_string(),
            "syntax error: unexpected `)` (line 1, column 5)"
        );
    }

    #[test]
    fn test_undefined_variable_carries_name() {
        let err = Error::undefined_variable(Name::new("foo").unwrap());
        match err.kind() {
            ErrorKind::UndefinedVariable(name) => assert_eq!(name.as_str(), "foo"),
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_locate_prefixes_and_anchors() {
        let inner = Error::type_err("cannot add int and bool");
        let outer = inner.locate(Span::new(120, 7, 3, 10), "property `width`");
        assert_eq!(outer.span().map(|s| s.line), Some(7));
        assert!(outer.message().starts_with("property `width`:"));
    }

    #[test]
    fn test_cause_chain() {
        let err = Error::processing("constant folding failed")
            .with_cause(Error::calculation("division by zero"));
        assert!(err.to_string().contains("caused by"));
        assert!(err.cause().is_some());
    }
}
