//! Error types returned while constructing or driving a [`crate::parser::Parser`].
//!
//! Grammar construction (normalization, linting, PEG rendering) can fail with
//! [`KoineError::Configuration`] or [`KoineError::Compilation`]; these are raised
//! eagerly, before a [`crate::parser::Parser`] exists. Everything encountered while
//! actually parsing or transpiling text is instead folded into the `{status:
//! "error", message}` shape described by the external interface (see
//! [`crate::parser::ParseOutcome`]) rather than propagated as a Rust `Result`,
//! matching the "only the first error per input is reported" contract.

use thiserror::Error;

use crate::position::Position;

/// A malformed grammar: directive conflicts, unreachable or always-empty rules,
/// a missing start rule, or a subgrammar without a resolvable entry point.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ConfigurationError {
    pub message: String,
}

impl ConfigurationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The PEG matcher rejected the transpiled grammar: left recursion, an
/// undefined label, or any other structural rejection the matcher surfaces
/// only once it tries to compile the rendered source.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CompilationError {
    pub message: String,
    pub rule: Option<String>,
}

impl CompilationError {
    pub fn new(message: impl Into<String>, rule: Option<String>) -> Self {
        Self {
            message: message.into(),
            rule,
        }
    }
}

/// No token spec matched at the current lexer position.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unexpected character at L{line}:C{col}: '{ch}'")]
pub struct LexicalError {
    pub line: usize,
    pub col: usize,
    pub ch: char,
}

/// A `handle_indent` match produced an indentation width that does not equal
/// any level already on the indent stack after popping.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Indentation error at L{line}")]
pub struct IndentationError {
    pub line: usize,
}

/// The PEG matcher could not derive the input: either an explicit mismatch at
/// a known position, or (lexerless grammars) a leftover unconsumed suffix.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Syntax error at L{}:C{} near '{value}'. Unexpected token: {token_type}.", position.line, position.column)]
    UnexpectedToken {
        position: Position,
        value: String,
        token_type: String,
    },
    #[error("Syntax error at end of input.")]
    EndOfInput,
    #[error("Syntax error at L{}:C{}. Failed to consume entire input. Unconsumed input begins with: '{snippet}...'", position.line, position.column)]
    Incomplete { position: Position, snippet: String },
    #[error("Syntax error at L{}:C{} near '{snippet}...'. Expected one of: {expected}.", position.line, position.column)]
    Mismatch {
        position: Position,
        snippet: String,
        expected: String,
    },
}

/// A template lookup failed, or a node had neither a resolvable template nor a
/// fallback `value`/`text` to render.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TranspileError {
    pub message: String,
}

impl TranspileError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Umbrella error returned from grammar construction. Runtime parse/transpile
/// failures are instead folded into [`crate::parser::ParseOutcome`] /
/// [`crate::parser::TranspileOutcome`] — but the six kinds named by the
/// external interface (configuration, compilation, lexical, indentation,
/// parse, transpile) still share this one enum, since a lexer or matcher
/// failure discovered while *constructing* a `Parser` (e.g. `validate`) must
/// still be reportable as a `Result`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KoineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Compilation(#[from] CompilationError),
    #[error(transparent)]
    Lexical(#[from] LexicalError),
    #[error(transparent)]
    Indentation(#[from] IndentationError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Transpile(#[from] TranspileError),
    #[error("{0}")]
    Io(String),
}

impl From<ParseError> for String {
    fn from(err: ParseError) -> Self {
        err.to_string()
    }
}
