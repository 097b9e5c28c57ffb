//! The indentation-aware stateful lexer (§4.2). Converts source text into a
//! token stream, inserting synthetic `INDENT`/`DEDENT` markers where the
//! grammar declares a `handle_indent` token spec.
//!
//! Grounded on the teacher's `Tokenizer`/`ILexeme` split (one compiled matcher
//! per declared spec, tried in order, longest-match-wins), but collapsed into a
//! single struct since koine's specs are data, not trait objects chosen at
//! grammar-authoring time.

use regex::Regex;

use crate::error::{IndentationError, LexicalError};
use crate::grammar::{LexerSpec, TokenAction};
use crate::Log;

pub const INDENT: &str = "INDENT";
pub const DEDENT: &str = "DEDENT";

const DEFAULT_TAB_WIDTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub ty: String,
    pub value: String,
    pub line: usize,
    pub col: usize,
}

struct CompiledSpec {
    regex: Regex,
    token: Option<String>,
    action: Option<TokenAction>,
}

pub struct Lexer {
    specs: Vec<CompiledSpec>,
    tab_width: usize,
    indent_enabled: bool,
    log: Log,
}

impl Lexer {
    pub fn compile(spec: &LexerSpec) -> Result<Self, LexicalCompileError> {
        let mut specs = Vec::with_capacity(spec.tokens.len());
        let mut indent_enabled = false;
        for token_spec in &spec.tokens {
            let pattern = format!("^(?:{})", token_spec.regex);
            let regex = Regex::new(&pattern)
                .map_err(|e| LexicalCompileError(format!("invalid token regex /{}/: {e}", token_spec.regex)))?;
            if token_spec.action == Some(TokenAction::HandleIndent) {
                indent_enabled = true;
            }
            specs.push(CompiledSpec {
                regex,
                token: token_spec.token.clone(),
                action: token_spec.action,
            });
        }
        Ok(Self {
            specs,
            tab_width: spec.tab_width.unwrap_or(DEFAULT_TAB_WIDTH),
            indent_enabled,
            log: Log::None,
        })
    }

    /// Sets the verbosity this lexer prints token matches and failures at
    /// while tokenizing (debug builds only, see [`Log::print`]).
    pub fn with_log(mut self, log: Log) -> Self {
        self.log = log;
        self
    }

    /// Tokenizes `text` end to end. Returns the first lexical or indentation
    /// error encountered; no partial token stream is ever returned (§4.2).
    pub fn tokenize(&self, text: &str) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        let mut pos = 0usize;
        let mut line = 1usize;
        let mut col = 1usize;
        let mut indent_stack = vec![0usize];

        while pos < text.len() {
            let slice = &text[pos..];
            let best = self.longest_match(slice);
            let Some((spec_idx, matched)) = best else {
                let ch = slice.chars().next().unwrap();
                self.log.print(Log::Result, format!("[LexemeError]: at L{line}:C{col}"));
                return Err(LexError::Lexical(LexicalError { line, col, ch }));
            };
            let spec = &self.specs[spec_idx];
            let matched_len = matched.len();

            match spec.action {
                Some(TokenAction::Skip) => {
                    self.advance_position(matched, &mut line, &mut col);
                }
                Some(TokenAction::HandleIndent) => {
                    let width = self.indent_width(matched);
                    let newline_count = matched.bytes().filter(|b| *b == b'\n').count();
                    let top = *indent_stack.last().unwrap();
                    if width > top {
                        indent_stack.push(width);
                        tokens.push(Token {
                            ty: INDENT.to_string(),
                            value: String::new(),
                            line: line + newline_count,
                            col: 1,
                        });
                    } else {
                        while width < *indent_stack.last().unwrap() {
                            indent_stack.pop();
                            tokens.push(Token {
                                ty: DEDENT.to_string(),
                                value: String::new(),
                                line: line + newline_count,
                                col: 1,
                            });
                        }
                        if width != *indent_stack.last().unwrap() {
                            let bad_line = line + newline_count;
                            self.log.print(Log::Result, format!("[IndentationError]: at L{bad_line}"));
                            return Err(LexError::Indentation(IndentationError { line: bad_line }));
                        }
                    }
                    self.advance_position(matched, &mut line, &mut col);
                }
                None => {
                    let ty = spec.token.clone().unwrap_or_else(|| matched.to_string());
                    self.log
                        .print(Log::Verbose, format!("[LexemeSuccess]: token: {ty:?} at L{line}:C{col}"));
                    tokens.push(Token {
                        ty,
                        value: matched.to_string(),
                        line,
                        col,
                    });
                    self.advance_position(matched, &mut line, &mut col);
                }
            }

            pos += matched_len;
        }

        if self.indent_enabled {
            while indent_stack.len() > 1 {
                indent_stack.pop();
                tokens.push(Token {
                    ty: DEDENT.to_string(),
                    value: String::new(),
                    line,
                    col,
                });
            }
        }

        Ok(tokens)
    }

    /// Evaluates every spec's anchored regex against `slice` and returns the
    /// index and text of the longest match, earliest spec winning length ties.
    fn longest_match<'s>(&self, slice: &'s str) -> Option<(usize, &'s str)> {
        let mut best: Option<(usize, &'s str)> = None;
        for (idx, spec) in self.specs.iter().enumerate() {
            if let Some(m) = spec.regex.find(slice) {
                let text = m.as_str();
                let better = match best {
                    None => true,
                    Some((_, current)) => text.len() > current.len(),
                };
                if better {
                    best = Some((idx, text));
                }
            }
        }
        best
    }

    fn advance_position(&self, matched: &str, line: &mut usize, col: &mut usize) {
        let mut last_newline = None;
        for (i, ch) in matched.char_indices() {
            if ch == '\n' {
                *line += 1;
                last_newline = Some(i + ch.len_utf8());
            }
        }
        match last_newline {
            Some(offset) => {
                *col = matched[offset..].chars().count() + 1;
            }
            None => {
                *col += matched.chars().count();
            }
        }
    }

    /// Width of the whitespace following the newline in a `handle_indent`
    /// match, expanding tabs to `tab_width`.
    fn indent_width(&self, matched: &str) -> usize {
        let after_newline = match matched.rfind('\n') {
            Some(idx) => &matched[idx + 1..],
            None => matched,
        };
        let mut width = 0;
        for ch in after_newline.chars() {
            match ch {
                '\t' => width += self.tab_width - (width % self.tab_width),
                ' ' => width += 1,
                _ => {}
            }
        }
        width
    }
}

#[derive(Debug)]
pub struct LexicalCompileError(pub String);

impl std::fmt::Display for LexicalCompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for LexicalCompileError {}

#[derive(Debug)]
pub enum LexError {
    Lexical(LexicalError),
    Indentation(IndentationError),
}

#[cfg(test)]
mod __tests__ {
    use super::*;
    use crate::grammar::TokenSpec;

    fn spec(tokens: Vec<TokenSpec>) -> LexerSpec {
        LexerSpec {
            tab_width: None,
            tokens,
        }
    }

    fn tok(regex: &str, name: &str) -> TokenSpec {
        TokenSpec {
            regex: regex.to_string(),
            token: Some(name.to_string()),
            action: None,
            ast: None,
        }
    }

    fn skip(regex: &str) -> TokenSpec {
        TokenSpec {
            regex: regex.to_string(),
            token: None,
            action: Some(TokenAction::Skip),
            ast: None,
        }
    }

    #[test]
    fn longest_match_wins_ties_to_earliest() {
        let g = spec(vec![tok("a|ab", "AB_FIRST"), tok("ab", "AB_SECOND")]);
        let lexer = Lexer::compile(&g).unwrap();
        let tokens = lexer.tokenize("ab").unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].ty, "AB_FIRST");
        assert_eq!(tokens[0].value, "ab");
    }

    #[test]
    fn skip_action_drops_matched_text() {
        let g = spec(vec![skip(r"\s+"), tok("[a-z]+", "WORD")]);
        let lexer = Lexer::compile(&g).unwrap();
        let tokens = lexer.tokenize("a  b").unwrap();
        assert_eq!(tokens.iter().map(|t| t.value.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn unexpected_character_is_lexical_error() {
        let g = spec(vec![tok("[a-z]+", "WORD")]);
        let lexer = Lexer::compile(&g).unwrap();
        let err = lexer.tokenize("a!b").unwrap_err();
        assert!(matches!(err, LexError::Lexical(_)));
    }

    #[test]
    fn indentation_scenario_emits_indent_and_dedent() {
        // "a\n  b\n  c\n" -> [a, INDENT, b, c, DEDENT]
        let g = spec(vec![
            tok(r"[a-zA-Z]+", "WORD"),
            TokenSpec {
                regex: r"\n[ \t]*".to_string(),
                token: None,
                action: Some(TokenAction::HandleIndent),
                ast: None,
            },
        ]);
        let lexer = Lexer::compile(&g).unwrap();
        let tokens = lexer.tokenize("a\n  b\n  c\n").unwrap();
        let shape: Vec<&str> = tokens.iter().map(|t| t.ty.as_str()).collect();
        assert_eq!(shape, vec!["WORD", INDENT, "WORD", "WORD", DEDENT]);
    }

    #[test]
    fn with_log_does_not_change_tokenization_result() {
        // Logging is purely observational (and compiled out entirely in
        // release builds); attaching a verbose log must not alter the
        // token stream produced.
        let g = spec(vec![tok("[a-z]+", "WORD")]);
        let lexer = Lexer::compile(&g).unwrap().with_log(Log::Verbose);
        let tokens = lexer.tokenize("ab").unwrap();
        assert_eq!(tokens[0].value, "ab");
    }

    #[test]
    fn mismatched_dedent_is_an_indentation_error() {
        let g = spec(vec![
            tok(r"[a-zA-Z]+", "WORD"),
            TokenSpec {
                regex: r"\n[ \t]*".to_string(),
                token: None,
                action: Some(TokenAction::HandleIndent),
                ast: None,
            },
        ]);
        let lexer = Lexer::compile(&g).unwrap();
        // indent to 4, then dedent to 2 (no level 2 on the stack)
        let err = lexer.tokenize("a\n    b\n  c\n").unwrap_err();
        assert!(matches!(err, LexError::Indentation(_)));
    }
}
