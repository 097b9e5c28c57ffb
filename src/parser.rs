//! The public orchestrator (§6): wires normalization → linting → PEG
//! rendering → lexing → matching → AST building → (optionally) string
//! transpilation into the two entry points callers actually use,
//! [`Parser`] and [`PlaceholderParser`].
//!
//! Grounded on the teacher's `DefaultParser`/`LexerlessParser` split: one
//! type compiles a grammar once and exposes cheap, repeatable operations
//! against it, never re-parsing the grammar itself on every call.

use std::collections::HashMap;
use std::path::Path;

use regex::Regex;

use crate::ast::{self, AstNode};
use crate::error::{ConfigurationError, KoineError};
use crate::grammar::Grammar;
use crate::lexer::{LexError, Lexer};
use crate::linter;
use crate::normalizer::{self, NormalizedGrammar, NormalizeMode};
use crate::peg::{self, Engine, Input};
use crate::position::PositionFinder;
use crate::transpiler;

/// A grammar that has been normalized, linted, and had its regex bodies
/// precompiled — everything a parse or transpile call needs, built exactly
/// once per [`Parser`]/[`PlaceholderParser`].
pub struct CompiledGrammar {
    normalized: NormalizedGrammar,
    lexer: Option<Lexer>,
    regexes: HashMap<String, Regex>,
    peg_text: String,
}

impl CompiledGrammar {
    fn build(grammar: &Grammar, base_dir: Option<&Path>, lint: bool) -> Result<Self, KoineError> {
        let mode = match base_dir {
            Some(dir) => NormalizeMode::Full { base_dir: dir },
            None => NormalizeMode::Placeholder,
        };
        let normalized = normalizer::normalize(grammar, mode)?;
        if lint {
            linter::lint(&normalized)?;
        }
        let lexer = match &normalized.lexer {
            Some(spec) => Some(
                Lexer::compile(spec)
                    .map_err(|e| KoineError::Configuration(ConfigurationError::new(e.0)))?,
            ),
            None => None,
        };
        let regexes = peg::compile_regexes(&normalized)?;
        let peg_text = peg::render(&normalized)?;
        Ok(Self {
            normalized,
            lexer,
            regexes,
            peg_text,
        })
    }

    /// The rendered PEG source text (§4.5) — exposed mainly for debugging and
    /// for tests that assert on the transpiled grammar shape.
    pub fn peg_source(&self) -> &str {
        &self.peg_text
    }
}

/// The result of [`Parser::parse`] / [`PlaceholderParser::parse`], mirroring
/// the `{status: "success"|"error", ...}` contract of the external interface
/// as a tagged enum instead of an untyped map.
pub enum ParseOutcome {
    Success { ast: AstNode },
    Error { message: String },
}

/// The result of [`Parser::transpile`].
pub enum TranspileOutcome {
    Success { output: String },
    Error { message: String },
}

fn run_parse(compiled: &CompiledGrammar, text: &str) -> Result<AstNode, String> {
    let position_finder = PositionFinder::new(text);

    let result = if let Some(lexer) = &compiled.lexer {
        let tokens = lexer.tokenize(text).map_err(|e| match e {
            LexError::Lexical(err) => err.to_string(),
            LexError::Indentation(err) => err.to_string(),
        })?;
        let engine = Engine::new(&compiled.normalized, &compiled.regexes, Input::Tokens(&tokens), None);
        engine.parse()
    } else {
        let engine = Engine::new(
            &compiled.normalized,
            &compiled.regexes,
            Input::Text(text),
            Some(&position_finder),
        );
        engine.parse()
    };

    let output = result.map_err(|e| e.to_string())?;
    let ast = output
        .ast
        .ok_or_else(|| "the start rule discards all content; nothing to parse into".to_string())?;
    Ok(ast::cleanup(ast))
}

/// Compiles a grammar document (optionally resolving `subgrammar` directives
/// against files on disk) and parses or transpiles text against it.
pub struct Parser {
    grammar: Grammar,
    compiled: CompiledGrammar,
}

impl Parser {
    /// Loads a grammar document from `path`, resolving any `subgrammar`
    /// directives relative to the file's own directory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, KoineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| KoineError::Io(e.to_string()))?;
        let grammar: Grammar = serde_yaml::from_str(&text).map_err(|e| {
            KoineError::Configuration(ConfigurationError::new(format!(
                "invalid grammar document {}: {e}",
                path.display()
            )))
        })?;
        let base_dir = path.parent().map(|p| p.to_path_buf()).unwrap_or_default();
        let compiled = CompiledGrammar::build(&grammar, Some(&base_dir), true)?;
        Ok(Self { grammar, compiled })
    }

    /// Builds a `Parser` from an already-parsed [`Grammar`] value. Subgrammar
    /// files, if any, are resolved relative to the current working directory.
    pub fn new(grammar: Grammar) -> Result<Self, KoineError> {
        let compiled = CompiledGrammar::build(&grammar, Some(Path::new(".")), true)?;
        Ok(Self { grammar, compiled })
    }

    /// Parses `text` purely to check whether it's accepted, discarding the
    /// resulting AST — `(true, "")` on success, `(false, message)` otherwise,
    /// matching the external interface's `(bool, message)` contract (§6).
    pub fn validate(&self, text: &str) -> (bool, String) {
        match run_parse(&self.compiled, text) {
            Ok(_) => (true, String::new()),
            Err(message) => (false, message),
        }
    }

    pub fn parse(&self, text: &str) -> ParseOutcome {
        match run_parse(&self.compiled, text) {
            Ok(ast) => ParseOutcome::Success { ast },
            Err(message) => ParseOutcome::Error { message },
        }
    }

    /// Parses `text` and renders the resulting AST through the grammar's
    /// `transpiler` configuration in one call.
    pub fn transpile(&self, text: &str) -> TranspileOutcome {
        match self.transpile_inner(text) {
            Ok(output) => TranspileOutcome::Success { output },
            Err(message) => TranspileOutcome::Error { message },
        }
    }

    fn transpile_inner(&self, text: &str) -> Result<String, String> {
        let ast = run_parse(&self.compiled, text)?;
        let spec = self
            .grammar
            .transpiler
            .as_ref()
            .ok_or_else(|| "grammar declares no transpiler configuration".to_string())?;
        transpiler::transpile(spec, &ast).map_err(|e| e.to_string())
    }

    pub fn compiled(&self) -> &CompiledGrammar {
        &self.compiled
    }
}

/// A `Parser` variant for incomplete grammars under active authoring: any
/// `subgrammar` directive is replaced by its inline `placeholder` body (or an
/// always-empty match if none is given) instead of being resolved against a
/// file on disk, so an author can exercise one file in a multi-file grammar
/// before the others exist (§6).
pub struct PlaceholderParser {
    compiled: CompiledGrammar,
}

impl PlaceholderParser {
    pub fn new(grammar: Grammar) -> Result<Self, KoineError> {
        let compiled = CompiledGrammar::build(&grammar, None, true)?;
        Ok(Self { compiled })
    }

    pub fn validate(&self, text: &str) -> (bool, String) {
        match run_parse(&self.compiled, text) {
            Ok(_) => (true, String::new()),
            Err(message) => (false, message),
        }
    }

    pub fn parse(&self, text: &str) -> ParseOutcome {
        match run_parse(&self.compiled, text) {
            Ok(ast) => ParseOutcome::Success { ast },
            Err(message) => ParseOutcome::Error { message },
        }
    }

    pub fn compiled(&self) -> &CompiledGrammar {
        &self.compiled
    }
}
