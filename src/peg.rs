//! The PEG transpiler (§4.5) and the packrat matcher that actually drives
//! parsing (§5/§6). koine renders a normalized grammar down to PEG source
//! text exactly the way an external PEG engine would expect it — but rather
//! than shelling out to one, [`Engine`] interprets the same [`RuleNode`] tree
//! directly, applying the rendered grammar's semantics (including the
//! single-item-sequence-collapse guards) without a second parse of the
//! rendered text.
//!
//! Grounded on the teacher's `IProduction`/`SuccessData` split: a production
//! either derives input and returns a successful node, or fails cleanly with
//! no side effects to unwind, exactly as `Engine::match_node` does here.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use regex::Regex;

use crate::ast::{self, AstNode, Parsed};
use crate::error::{ConfigurationError, ParseError};
use crate::grammar::{RuleNode, RuleShape};
use crate::lexer::Token;
use crate::normalizer::NormalizedGrammar;
use crate::position::PositionFinder;

// ---------------------------------------------------------------------
// PEG text rendering (§4.5)
// ---------------------------------------------------------------------

/// Renders `grammar` to PEG source text. Every rule becomes one `name = ...`
/// line; token specs become a trivial `TOKEN = ~r"TOKEN\s*"` line so a
/// token-mode rule's `{token: X}` reference has something to resolve against.
pub fn render(grammar: &NormalizedGrammar) -> Result<String, ConfigurationError> {
    let mut out = String::new();
    for (name, rule) in &grammar.rules {
        out.push_str(name);
        out.push_str(" = ");
        out.push_str(&render_node(rule)?);
        out.push('\n');
    }
    if let Some(lexer) = &grammar.lexer {
        for token_spec in &lexer.tokens {
            let name = token_spec.token_name();
            out.push_str(&format!("{name} = ~r\"{name}\"\n"));
        }
        out.push_str(&format!("{} = ~r\"{}\"\n", crate::lexer::INDENT, crate::lexer::INDENT));
        out.push_str(&format!("{} = ~r\"{}\"\n", crate::lexer::DEDENT, crate::lexer::DEDENT));
    }
    Ok(out)
}

fn render_node(node: &RuleNode) -> Result<String, ConfigurationError> {
    match &node.shape {
        RuleShape::Literal(text) => Ok(format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))),
        RuleShape::Regex(pattern) => Ok(format!("~r\"{pattern}\"")),
        RuleShape::Token(name) => Ok(name.clone()),
        RuleShape::Rule(name) => {
            if node.ast_carries_more_than_name() {
                Ok(format!("({name} (\"\"))?"))
            } else {
                Ok(name.clone())
            }
        }
        RuleShape::Choice(items) => {
            if items.is_empty() {
                return Err(ConfigurationError::new("cannot render an empty choice to PEG"));
            }
            let parts = items.iter().map(render_node).collect::<Result<Vec<_>, _>>()?;
            Ok(format!("({})", parts.join(" / ")))
        }
        RuleShape::Sequence(items) => match items.len() {
            // Defeats a PEG engine's tendency to collapse a single-item
            // sequence back down to its bare child, which would silently
            // drop the rule boundary koine's AST builder relies on.
            0 => Ok("(\"\")?".to_string()),
            1 => Ok(format!("({} (\"\"))?", render_node(&items[0])?)),
            _ => {
                let parts = items.iter().map(render_node).collect::<Result<Vec<_>, _>>()?;
                Ok(format!("({})", parts.join(" ")))
            }
        },
        RuleShape::ZeroOrMore(inner) => Ok(format!("({})*", render_node(inner)?)),
        RuleShape::OneOrMore(inner) => Ok(format!("({})+", render_node(inner)?)),
        RuleShape::Optional(inner) => Ok(format!("({})?", render_node(inner)?)),
        RuleShape::PositiveLookahead(inner) => Ok(format!("&({})", render_node(inner)?)),
        RuleShape::NegativeLookahead(inner) => Ok(format!("!({})", render_node(inner)?)),
        // A subgrammar directive only ever survives normalization inside a
        // `PlaceholderParser` grammar that declared no placeholder; it
        // renders as the always-empty sequence guard.
        RuleShape::Subgrammar(_) => Ok("(\"\")?".to_string()),
    }
}

// ---------------------------------------------------------------------
// Regex compilation
// ---------------------------------------------------------------------

/// Precompiles every distinct `regex` rule body once, anchored at the match
/// start, so the matcher never recompiles a pattern per call site.
pub fn compile_regexes(grammar: &NormalizedGrammar) -> Result<HashMap<String, Regex>, ConfigurationError> {
    let mut map = HashMap::new();
    collect_patterns(&grammar.rules, &mut map)?;
    Ok(map)
}

fn collect_patterns(
    rules: &std::collections::BTreeMap<String, RuleNode>,
    map: &mut HashMap<String, Regex>,
) -> Result<(), ConfigurationError> {
    fn walk(node: &RuleNode, map: &mut HashMap<String, Regex>) -> Result<(), ConfigurationError> {
        if let RuleShape::Regex(pattern) = &node.shape {
            if !map.contains_key(pattern) {
                let anchored = format!("^(?:{pattern})");
                let compiled = Regex::new(&anchored)
                    .map_err(|e| ConfigurationError::new(format!("invalid regex rule /{pattern}/: {e}")))?;
                map.insert(pattern.clone(), compiled);
            }
        }
        for child in node.shape.children() {
            walk(child, map)?;
        }
        Ok(())
    }
    for rule in rules.values() {
        walk(rule, map)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------

pub enum Input<'a> {
    Text(&'a str),
    Tokens(&'a [Token]),
}

impl<'a> Input<'a> {
    fn is_token_mode(&self) -> bool {
        matches!(self, Input::Tokens(_))
    }

    fn len_units(&self) -> usize {
        match self {
            Input::Text(s) => s.len(),
            Input::Tokens(t) => t.len(),
        }
    }
}

pub struct ParseOutput {
    pub ast: Option<AstNode>,
    pub end: usize,
}

/// Drives a single parse attempt over `input` against `grammar`, memoizing
/// named-rule results by `(rule, position)` the way a packrat parser must to
/// stay linear on grammars with shared sub-rules.
pub struct Engine<'g> {
    grammar: &'g NormalizedGrammar,
    regexes: &'g HashMap<String, Regex>,
    input: Input<'g>,
    position_finder: Option<&'g PositionFinder<'g>>,
    cache: RefCell<HashMap<(String, usize), Option<(usize, Option<AstNode>)>>>,
    furthest_pos: Cell<usize>,
    furthest_expected: RefCell<Vec<String>>,
}

impl<'g> Engine<'g> {
    pub fn new(
        grammar: &'g NormalizedGrammar,
        regexes: &'g HashMap<String, Regex>,
        input: Input<'g>,
        position_finder: Option<&'g PositionFinder<'g>>,
    ) -> Self {
        Self {
            grammar,
            regexes,
            input,
            position_finder,
            cache: RefCell::new(HashMap::new()),
            furthest_pos: Cell::new(0),
            furthest_expected: RefCell::new(Vec::new()),
        }
    }

    pub fn parse(&self) -> Result<ParseOutput, ParseError> {
        let (end, ast) = self
            .call_rule(&self.grammar.start_rule, 0)
            .ok_or_else(|| self.build_error())?;
        if end < self.input.len_units() {
            let (position, snippet) = self.describe(end);
            return Err(ParseError::Incomplete { position, snippet });
        }
        Ok(ParseOutput { ast, end })
    }

    fn record_failure(&self, pos: usize, expectation: String) {
        match pos.cmp(&self.furthest_pos.get()) {
            std::cmp::Ordering::Greater => {
                self.furthest_pos.set(pos);
                *self.furthest_expected.borrow_mut() = vec![expectation];
            }
            std::cmp::Ordering::Equal => {
                let mut list = self.furthest_expected.borrow_mut();
                if !list.contains(&expectation) {
                    list.push(expectation);
                }
            }
            std::cmp::Ordering::Less => {}
        }
    }

    fn build_error(&self) -> ParseError {
        let furthest = self.furthest_pos.get();
        if furthest >= self.input.len_units() && self.input.is_token_mode() {
            // Only the token-mode contract documents a bare "end of input"
            // message; a lexerless grammar failing at end-of-text still gets
            // a `Mismatch` naming what was expected there.
            return ParseError::EndOfInput;
        }
        match &self.input {
            Input::Tokens(tokens) => {
                let tok = &tokens[furthest];
                ParseError::UnexpectedToken {
                    position: crate::position::Position {
                        line: tok.line,
                        column: tok.col,
                    },
                    value: tok.value.clone(),
                    token_type: tok.ty.clone(),
                }
            }
            Input::Text(_) => {
                let (position, snippet) = self.describe(furthest);
                let mut sorted = self.furthest_expected.borrow().clone();
                sorted.sort();
                let expected = sorted.join(", ");
                ParseError::Mismatch {
                    position,
                    snippet,
                    expected,
                }
            }
        }
    }

    fn describe(&self, pos: usize) -> (crate::position::Position, String) {
        match &self.input {
            Input::Text(text) => {
                let position = self
                    .position_finder
                    .map(|pf| pf.find(pos))
                    .unwrap_or(crate::position::Position { line: 1, column: 1 });
                let snippet: String = text[pos.min(text.len())..].chars().take(20).collect();
                (position, snippet)
            }
            Input::Tokens(tokens) => {
                if let Some(tok) = tokens.get(pos) {
                    (
                        crate::position::Position {
                            line: tok.line,
                            column: tok.col,
                        },
                        tok.value.clone(),
                    )
                } else {
                    (crate::position::Position { line: 1, column: 1 }, String::new())
                }
            }
        }
    }

    fn call_rule(&self, name: &str, pos: usize) -> Option<(usize, Option<AstNode>)> {
        let key = (name.to_string(), pos);
        if let Some(cached) = self.cache.borrow().get(&key) {
            return cached.clone();
        }
        let Some(rule) = self.grammar.rules.get(name) else {
            self.record_failure(pos, format!("rule '{name}'"));
            return None;
        };

        let result = if let RuleShape::Sequence(items) = &rule.shape {
            self.match_sequence_as_rule(name, rule, items, pos)
        } else {
            self.match_shape(&rule.shape, pos)
                .map(|(end, parsed)| (end, ast::build_rule(name, rule.ast.as_ref(), parsed, self.input.is_token_mode())))
        };

        self.cache.borrow_mut().insert(key, result.clone());
        result
    }

    fn match_sequence_as_rule(
        &self,
        name: &str,
        rule: &RuleNode,
        items: &[RuleNode],
        pos: usize,
    ) -> Option<(usize, Option<AstNode>)> {
        let mut cur = pos;
        let mut parts = Vec::with_capacity(items.len());
        for item in items {
            let (end, parsed) = self.match_node(item, cur)?;
            cur = end;
            parts.push((item.ast.clone(), parsed));
        }
        Some((cur, ast::build_sequence_rule(name, rule.ast.as_ref(), parts)))
    }

    /// Matches one rule-body node (an item inside a sequence, a choice
    /// alternative, or a quantifier's inner node). `Rule` references apply
    /// their own sidecar `ast` directive, if present, as an override layered
    /// on top of the callee's own result (the normalizer never hoists a rule
    /// reference away, so this is the only place that override can live).
    fn match_node(&self, node: &RuleNode, pos: usize) -> Option<(usize, Parsed)> {
        if let RuleShape::Rule(name) = &node.shape {
            let (end, inner) = self.call_rule(name, pos)?;
            let wrapped = match inner {
                Some(n) => Parsed::Node(n),
                None => Parsed::None,
            };
            let parsed = if node.ast.as_ref().is_some_and(|a| a.has_binding_keys()) {
                match ast::build_rule(name, node.ast.as_ref(), wrapped, self.input.is_token_mode()) {
                    Some(n) => Parsed::Node(n),
                    None => Parsed::None,
                }
            } else {
                wrapped
            };
            return Some((end, parsed));
        }
        self.match_shape(&node.shape, pos)
    }

    fn match_shape(&self, shape: &RuleShape, pos: usize) -> Option<(usize, Parsed)> {
        match shape {
            RuleShape::Literal(lit) => self.match_literal(pos, lit),
            RuleShape::Regex(pattern) => self.match_regex(pos, pattern),
            RuleShape::Token(ty) => self.match_token(pos, ty),
            RuleShape::Rule(name) => {
                let (end, inner) = self.call_rule(name, pos)?;
                Some((end, inner.map(Parsed::Node).unwrap_or(Parsed::None)))
            }
            RuleShape::Choice(items) => {
                for item in items {
                    if let Some(result) = self.match_node(item, pos) {
                        return Some(result);
                    }
                }
                None
            }
            RuleShape::Sequence(items) => {
                let mut cur = pos;
                let mut parts = Vec::with_capacity(items.len());
                for item in items {
                    let (end, parsed) = self.match_node(item, cur)?;
                    cur = end;
                    parts.push(parsed);
                }
                Some((cur, Parsed::List(parts)))
            }
            RuleShape::ZeroOrMore(inner) => {
                let mut cur = pos;
                let mut parts = Vec::new();
                while let Some((end, parsed)) = self.match_node(inner, cur) {
                    if end == cur {
                        break;
                    }
                    cur = end;
                    parts.push(parsed);
                }
                Some((cur, Parsed::List(parts)))
            }
            RuleShape::OneOrMore(inner) => {
                let (first_end, first) = self.match_node(inner, pos)?;
                let mut cur = first_end;
                let mut parts = vec![first];
                while let Some((end, parsed)) = self.match_node(inner, cur) {
                    if end == cur {
                        break;
                    }
                    cur = end;
                    parts.push(parsed);
                }
                Some((cur, Parsed::List(parts)))
            }
            RuleShape::Optional(inner) => match self.match_node(inner, pos) {
                Some((end, parsed)) => Some((end, Parsed::List(vec![parsed]))),
                None => Some((pos, Parsed::List(vec![]))),
            },
            RuleShape::PositiveLookahead(inner) => self.match_node(inner, pos).map(|_| (pos, Parsed::None)),
            RuleShape::NegativeLookahead(inner) => {
                if self.match_node(inner, pos).is_some() {
                    None
                } else {
                    Some((pos, Parsed::None))
                }
            }
            RuleShape::Subgrammar(_) => Some((pos, Parsed::List(Vec::new()))),
        }
    }

    fn match_literal(&self, pos: usize, lit: &str) -> Option<(usize, Parsed)> {
        match &self.input {
            Input::Text(text) => {
                if text[pos.min(text.len())..].starts_with(lit) {
                    let (line, col) = self.line_col(pos);
                    Some((
                        pos + lit.len(),
                        Parsed::Leaf {
                            text: lit.to_string(),
                            line,
                            col,
                            value: None,
                        },
                    ))
                } else {
                    self.record_failure(pos, format!("'{lit}'"));
                    None
                }
            }
            Input::Tokens(tokens) => {
                if let Some(tok) = tokens.get(pos) {
                    if tok.value == lit {
                        return Some((
                            pos + 1,
                            Parsed::Leaf {
                                text: tok.value.clone(),
                                line: tok.line,
                                col: tok.col,
                                value: None,
                            },
                        ));
                    }
                }
                self.record_failure(pos, format!("'{lit}'"));
                None
            }
        }
    }

    fn match_regex(&self, pos: usize, pattern: &str) -> Option<(usize, Parsed)> {
        let regex = self.regexes.get(pattern)?;
        match &self.input {
            Input::Text(text) => {
                let slice = &text[pos.min(text.len())..];
                match regex.find(slice) {
                    Some(m) if m.start() == 0 => {
                        let matched = m.as_str().to_string();
                        let (line, col) = self.line_col(pos);
                        let end = pos + matched.len();
                        Some((
                            end,
                            Parsed::Leaf {
                                text: matched,
                                line,
                                col,
                                value: None,
                            },
                        ))
                    }
                    _ => {
                        self.record_failure(pos, format!("/{pattern}/"));
                        None
                    }
                }
            }
            Input::Tokens(tokens) => {
                if let Some(tok) = tokens.get(pos) {
                    if let Some(m) = regex.find(&tok.value) {
                        if m.start() == 0 && m.end() == tok.value.len() {
                            return Some((
                                pos + 1,
                                Parsed::Leaf {
                                    text: tok.value.clone(),
                                    line: tok.line,
                                    col: tok.col,
                                    value: None,
                                },
                            ));
                        }
                    }
                }
                self.record_failure(pos, format!("/{pattern}/"));
                None
            }
        }
    }

    fn match_token(&self, pos: usize, ty: &str) -> Option<(usize, Parsed)> {
        let Input::Tokens(tokens) = &self.input else {
            self.record_failure(pos, format!("token '{ty}'"));
            return None;
        };
        let Some(tok) = tokens.get(pos) else {
            self.record_failure(pos, format!("token '{ty}'"));
            return None;
        };
        if tok.ty != ty {
            self.record_failure(pos, format!("token '{ty}'"));
            return None;
        }
        let token_ast = self
            .grammar
            .lexer
            .as_ref()
            .and_then(|l| l.tokens.iter().find(|t| t.token_name() == ty))
            .and_then(|t| t.ast.as_ref());
        if token_ast.is_some_and(|a| a.discard) {
            return Some((pos + 1, Parsed::None));
        }
        let value = token_ast
            .and_then(|a| a.value_type)
            .map(|vt| ast::parse_value(&tok.value, vt));
        Some((
            pos + 1,
            Parsed::Leaf {
                text: tok.value.clone(),
                line: tok.line,
                col: tok.col,
                value,
            },
        ))
    }

    fn line_col(&self, pos: usize) -> (usize, usize) {
        match self.position_finder {
            Some(pf) => {
                let position = pf.find(pos);
                (position.line, position.column)
            }
            None => (1, 1),
        }
    }
}
