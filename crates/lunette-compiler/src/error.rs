use crate::token::Span;
use thiserror::Error;

/// A lexing or parsing error with its source location.
///
/// `premature_end` is set when the input simply stopped too early (an
/// unterminated string, a block missing its `end`), which lets interactive
/// front-ends ask for more input instead of reporting the error.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("{chunk}:({},{}-{}): {message}", .span.line, .span.column, .span.end_column)]
pub struct SyntaxError {
    pub chunk: String,
    pub message: String,
    pub span: Span,
    pub premature_end: bool,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        SyntaxError {
            chunk: String::new(),
            message: message.into(),
            span,
            premature_end: false,
        }
    }

    pub fn premature(message: impl Into<String>, span: Span) -> Self {
        SyntaxError {
            premature_end: true,
            ..SyntaxError::new(message, span)
        }
    }

    pub fn with_chunk(mut self, chunk: &str) -> Self {
        self.chunk = chunk.to_string();
        self
    }
}

/// Everything that can go wrong while turning source text into a prototype.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum CompileError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    /// A compiler invariant broke. Never caused by user input alone.
    #[error("internal compiler error: {0}")]
    Internal(String),
}

impl CompileError {
    pub fn is_premature_end(&self) -> bool {
        matches!(self, CompileError::Syntax(e) if e.premature_end)
    }
}
