//! Error types shared by every compiler stage.
//!
//! Parsing is the only fallible stage: every rejection ES5.1 requires
//! (syntax errors, invalid assignment targets, strict-mode binding
//! restrictions) is detected while walking the token stream, so the
//! analyzer and IR builder that run afterward are infallible and never
//! construct a [`CompileError`] themselves. A violated compiler invariant
//! past that point is a bug in this compiler, not a malformed input
//! program, and is reported with `unreachable!`/`.expect` instead of a
//! recoverable error path. The driver is the only place that decides how
//! to print a [`CompileError`] and what exit code to use.

use std::borrow::Cow;
use std::fmt;

use crate::source_loc::SourceSpan;

#[derive(Debug, Clone)]
pub enum CompileError {
    /// Failed to read or write a file.
    Io { path: String, message: String },
    /// Malformed grammar; carries the offending location.
    Syntax { message: Cow<'static, str>, span: SourceSpan },
    /// "Invalid left-hand side in assignment" and similarly shaped
    /// reference errors the parser raises for non-assignable targets.
    Reference { message: Cow<'static, str>, span: SourceSpan },
}

impl CompileError {
    #[must_use]
    pub fn syntax(message: impl Into<Cow<'static, str>>, span: SourceSpan) -> Self {
        Self::Syntax { message: message.into(), span }
    }

    #[must_use]
    pub fn reference(message: impl Into<Cow<'static, str>>, span: SourceSpan) -> Self {
        Self::Reference { message: message.into(), span }
    }

    #[must_use]
    pub fn span(&self) -> Option<SourceSpan> {
        match self {
            Self::Syntax { span, .. } | Self::Reference { span, .. } => Some(*span),
            Self::Io { .. } => None,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, message } => write!(f, "{path}: {message}"),
            Self::Syntax { message, span } => write!(f, "SyntaxError: {message} (at {}..{})", span.begin, span.end),
            Self::Reference { message, span } => {
                write!(f, "ReferenceError: {message} (at {}..{})", span.begin, span.end)
            }
        }
    }
}

impl std::error::Error for CompileError {}

pub type CompileResult<T> = Result<T, CompileError>;
