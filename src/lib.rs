//! koine is a data-driven parsing toolkit: a grammar is data (a YAML document
//! describing rules, an optional indentation-aware lexer, and an optional
//! string transpiler) rather than Rust code, so a language's grammar can
//! change without recompiling the crate that runs it.
//!
//! # Overview
//!
//! A grammar document describes a PEG-style rule tree (literals, regexes,
//! rule references, choices, sequences, quantifiers, lookaheads) annotated
//! with `ast` directives that control how a parse reduces to a semantic
//! [`ast::AstNode`] tree, and optionally a `transpiler` table that renders
//! that tree back out as text. [`parser::Parser`] compiles a grammar once —
//! normalizing anonymous sub-rules and subgrammar references, linting for
//! directive conflicts, unreachable rules, left recursion, and rules that can
//! never produce content — and then exposes cheap, repeatable `parse` and
//! `transpile` calls against it.
//!
//! # Example
//!
//! ```
//! use koine::grammar::{AstDirective, AstValueType, Grammar, RuleNode, RuleShape};
//! use koine::parser::{ParseOutcome, Parser};
//! use std::collections::BTreeMap;
//!
//! let mut rules = BTreeMap::new();
//! rules.insert(
//!     "main".to_string(),
//!     RuleNode::with_ast(
//!         RuleShape::Regex("[0-9]+".to_string()),
//!         AstDirective {
//!             leaf: true,
//!             value_type: Some(AstValueType::Number),
//!             ..Default::default()
//!         },
//!     ),
//! );
//! let grammar = Grammar {
//!     start_rule: "main".to_string(),
//!     rules,
//!     lexer: None,
//!     transpiler: None,
//! };
//!
//! let parser = Parser::new(grammar).unwrap();
//! match parser.parse("42") {
//!     ParseOutcome::Success { ast } => assert_eq!(ast.text, "42"),
//!     ParseOutcome::Error { message } => panic!("{message}"),
//! }
//! ```
//!
//! # Module map
//!
//! - [`position`] — byte-offset-to-line/column lookups (C1).
//! - [`lexer`] — the indentation-aware tokenizer (C2).
//! - [`normalizer`] — anonymous-rule hoisting and subgrammar resolution (C3).
//! - [`linter`] — static grammar checks (C4).
//! - [`peg`] — PEG text rendering and the packrat matcher (C5).
//! - [`ast`] — the semantic AST data model and directive application (C6).
//! - [`transpiler`] — the string-template renderer (C7).
//! - [`parser`] — the public orchestrator, `Parser` and `PlaceholderParser` (C8).

pub mod ast;
pub mod error;
pub mod grammar;
pub mod lexer;
pub mod linter;
pub mod normalizer;
pub mod parser;
pub mod peg;
pub mod position;
#[cfg(test)]
mod scenarios;
pub mod transpiler;

pub use ast::{AstNode, AstValue, Children};
pub use error::KoineError;
pub use grammar::Grammar;
pub use parser::{ParseOutcome, Parser, PlaceholderParser, TranspileOutcome};

/// Logging verbosity, directly adapted from the teacher's own `Log`/`logger`
/// module rather than pulling in an ambient logging crate: the teacher never
/// reaches for one at this layer, and koine's diagnostics are no richer than
/// "print this at a given verbosity while debugging a grammar."
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Log {
    None,
    Default,
    Success,
    Result,
    Verbose,
}

impl Log {
    /// Prints `message` when `self` is at least as verbose as `level`, and
    /// only in debug builds — release builds pay nothing for this path.
    #[cfg_attr(not(debug_assertions), allow(unused_variables))]
    pub fn print(self, level: Log, message: impl std::fmt::Display) {
        #[cfg(debug_assertions)]
        if self >= level {
            eprintln!("{message}");
        }
    }
}
