//! The static linter (§4.4): directive conflicts, reachability, left
//! recursion, and always-empty rules. Runs after normalization, before PEG
//! rendering — `PlaceholderParser` skips this module entirely since its
//! grammar is intentionally incomplete (§6).

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::ConfigurationError;
use crate::grammar::{AstStructure, RuleNode, RuleShape};
use crate::normalizer::NormalizedGrammar;
use crate::Log;

pub fn lint(grammar: &NormalizedGrammar) -> Result<(), ConfigurationError> {
    lint_with_log(grammar, Log::None)
}

/// Same four checks as [`lint`], printing which one is running and whether it
/// passed at `log`'s verbosity (debug builds only, see [`Log::print`]).
pub fn lint_with_log(grammar: &NormalizedGrammar, log: Log) -> Result<(), ConfigurationError> {
    for (check_name, check) in [
        ("directive_conflicts", check_directive_conflicts as fn(&NormalizedGrammar) -> _),
        ("left_recursion", check_left_recursion),
        ("reachability", check_reachability),
        ("always_empty", check_always_empty),
    ] {
        log.print(Log::Verbose, format!("[Lint]: running {check_name}"));
        if let Err(e) = check(grammar) {
            log.print(Log::Result, format!("[Lint]: {check_name} failed: {e}"));
            return Err(e);
        }
    }
    log.print(Log::Success, "[Lint]: all checks passed");
    Ok(())
}

// ---------------------------------------------------------------------
// Directive conflicts
// ---------------------------------------------------------------------

fn check_directive_conflicts(grammar: &NormalizedGrammar) -> Result<(), ConfigurationError> {
    // The `leaf: true` + subgrammar conflict (§4.4) is checked in
    // `normalizer::check_leaf_subgrammar_conflict`, before subgrammar
    // directives are replaced — by the time this runs, every `Subgrammar`
    // shape has already been rewritten into a `Rule`/placeholder reference.
    for (name, rule) in &grammar.rules {
        if let Some(ast) = &rule.ast {
            if ast.promote && ast.structure.is_some() {
                return Err(ConfigurationError::new(format!(
                    "rule '{name}' combines promote and structure, which are mutually exclusive"
                )));
            }
            if ast.promote && ast.discard {
                return Err(ConfigurationError::new(format!(
                    "rule '{name}' combines promote and discard, which are contradictory"
                )));
            }
        }
        validate_no_empty_choice(name, rule)?;
    }
    Ok(())
}

fn validate_no_empty_choice(rule_name: &str, node: &RuleNode) -> Result<(), ConfigurationError> {
    if let RuleShape::Choice(items) = &node.shape {
        if items.is_empty() {
            return Err(ConfigurationError::new(format!(
                "rule '{rule_name}' contains an empty choice"
            )));
        }
    }
    for child in node.shape.children() {
        validate_no_empty_choice(rule_name, child)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Left recursion
// ---------------------------------------------------------------------

/// A rule is left-recursive if, following only the leftmost branch of
/// sequences/choices/quantifiers through `rule` references (never through a
/// lookahead, which does not advance input), it reaches itself.
fn check_left_recursion(grammar: &NormalizedGrammar) -> Result<(), ConfigurationError> {
    for name in grammar.rules.keys() {
        let mut visiting = HashSet::new();
        detect_left_recursion(grammar, name, name, &mut visiting)?;
    }
    Ok(())
}

fn detect_left_recursion<'g>(
    grammar: &'g NormalizedGrammar,
    origin: &str,
    current: &'g str,
    visiting: &mut HashSet<&'g str>,
) -> Result<(), ConfigurationError> {
    if !visiting.insert(current) {
        return Ok(());
    }
    if let Some(rule) = grammar.rules.get(current) {
        for leftmost in leftmost_rule_refs(&rule.shape) {
            if leftmost == origin {
                return Err(ConfigurationError::new(format!(
                    "left recursion detected in rule '{origin}'"
                )));
            }
            detect_left_recursion(grammar, origin, leftmost, visiting)?;
        }
    }
    Ok(())
}

/// Names reachable as the very first thing `shape` tries to match, without
/// first consuming input — the PEG left-recursion hazard set.
fn leftmost_rule_refs(shape: &RuleShape) -> Vec<&str> {
    match shape {
        RuleShape::Rule(name) => vec![name.as_str()],
        RuleShape::Choice(items) => items.iter().flat_map(|i| leftmost_rule_refs(&i.shape)).collect(),
        RuleShape::Sequence(items) => match items.first() {
            Some(first) => leftmost_rule_refs(&first.shape),
            None => Vec::new(),
        },
        RuleShape::ZeroOrMore(inner) | RuleShape::OneOrMore(inner) | RuleShape::Optional(inner) => {
            leftmost_rule_refs(&inner.shape)
        }
        RuleShape::PositiveLookahead(_) | RuleShape::NegativeLookahead(_) => Vec::new(),
        RuleShape::Literal(_) | RuleShape::Regex(_) | RuleShape::Token(_) | RuleShape::Subgrammar(_) => {
            Vec::new()
        }
    }
}

// ---------------------------------------------------------------------
// Reachability
// ---------------------------------------------------------------------

fn check_reachability(grammar: &NormalizedGrammar) -> Result<(), ConfigurationError> {
    let mut reachable: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = vec![grammar.start_rule.as_str()];
    for root in &grammar.external_roots {
        stack.push(root.as_str());
    }

    while let Some(name) = stack.pop() {
        if !reachable.insert(name) {
            continue;
        }
        if let Some(rule) = grammar.rules.get(name) {
            for referenced in collect_rule_refs(&rule.shape) {
                stack.push(referenced);
            }
        }
    }

    let unreachable: BTreeSet<&String> = grammar
        .rules
        .keys()
        .filter(|name| !name.contains("__") && !reachable.contains(name.as_str()))
        .collect();

    if !unreachable.is_empty() {
        let names: Vec<&str> = unreachable.iter().map(|s| s.as_str()).collect();
        return Err(ConfigurationError::new(format!(
            "unreachable rule(s): {}",
            names.join(", ")
        )));
    }
    Ok(())
}

fn collect_rule_refs(shape: &RuleShape) -> Vec<&str> {
    let mut out = Vec::new();
    fn walk<'a>(shape: &'a RuleShape, out: &mut Vec<&'a str>) {
        if let RuleShape::Rule(name) = shape {
            out.push(name.as_str());
        }
        match shape {
            RuleShape::Choice(items) | RuleShape::Sequence(items) => {
                for item in items {
                    walk(&item.shape, out);
                }
            }
            RuleShape::ZeroOrMore(inner)
            | RuleShape::OneOrMore(inner)
            | RuleShape::Optional(inner)
            | RuleShape::PositiveLookahead(inner)
            | RuleShape::NegativeLookahead(inner) => walk(&inner.shape, out),
            _ => {}
        }
    }
    walk(shape, &mut out);
    out
}

// ---------------------------------------------------------------------
// Always-empty
// ---------------------------------------------------------------------

fn check_always_empty(grammar: &NormalizedGrammar) -> Result<(), ConfigurationError> {
    let mut memo: HashMap<String, bool> = HashMap::new();
    let mut offenders = Vec::new();
    for name in grammar.rules.keys() {
        if is_rule_always_empty(grammar, name, &mut memo) {
            let discarded = grammar.rules[name].ast.as_ref().is_some_and(|a| a.discard);
            if !discarded {
                offenders.push(name.clone());
            }
        }
    }
    if !offenders.is_empty() {
        offenders.sort();
        return Err(ConfigurationError::new(format!(
            "rule(s) can never produce AST content and are not marked discard: {}",
            offenders.join(", ")
        )));
    }
    Ok(())
}

fn is_rule_always_empty(grammar: &NormalizedGrammar, name: &str, memo: &mut HashMap<String, bool>) -> bool {
    if let Some(cached) = memo.get(name) {
        return *cached;
    }
    // Seed non-empty before recursing to break cycles conservatively (§9).
    memo.insert(name.to_string(), false);
    let Some(rule) = grammar.rules.get(name) else {
        return false;
    };
    let result = is_node_always_empty(grammar, rule, memo);
    memo.insert(name.to_string(), result);
    result
}

fn is_node_always_empty(grammar: &NormalizedGrammar, node: &RuleNode, memo: &mut HashMap<String, bool>) -> bool {
    if let Some(ast) = &node.ast {
        if ast.discard {
            return true;
        }
        let has_named_children = matches!(
            &ast.structure,
            Some(AstStructure::MapChildren { .. }) | Some(AstStructure::Named(_))
        );
        if has_named_children || ast.leaf {
            return false;
        }
    }
    match &node.shape {
        RuleShape::Literal(_) | RuleShape::Regex(_) => false,
        RuleShape::Token(_) => false,
        RuleShape::PositiveLookahead(_) | RuleShape::NegativeLookahead(_) => false,
        RuleShape::Rule(name) => is_rule_always_empty(grammar, name, memo),
        RuleShape::Choice(items) => items.iter().all(|i| is_node_always_empty(grammar, i, memo)),
        RuleShape::Sequence(items) => {
            let any_named = items.iter().any(|i| i.ast.as_ref().is_some_and(|a| a.name.is_some()));
            if any_named {
                false
            } else {
                items.iter().all(|i| is_node_always_empty(grammar, i, memo))
            }
        }
        RuleShape::ZeroOrMore(inner) | RuleShape::OneOrMore(inner) | RuleShape::Optional(inner) => {
            is_node_always_empty(grammar, inner, memo)
        }
        RuleShape::Subgrammar(_) => true,
    }
}

#[cfg(test)]
mod __tests__ {
    use super::*;
    use crate::grammar::{AstDirective, Grammar, RuleNode};
    use crate::normalizer::{normalize, NormalizeMode};
    use std::collections::BTreeMap;

    fn build(start: &str, rules: Vec<(&str, RuleNode)>) -> NormalizedGrammar {
        let grammar = Grammar {
            start_rule: start.to_string(),
            rules: rules.into_iter().map(|(k, v)| (k.to_string(), v)).collect::<BTreeMap<_, _>>(),
            lexer: None,
            transpiler: None,
        };
        normalize(&grammar, NormalizeMode::Placeholder).unwrap()
    }

    #[test]
    fn unreachable_rule_is_rejected() {
        let g = build(
            "main",
            vec![
                ("main", RuleNode::new(RuleShape::Literal("a".into()))),
                ("foo", RuleNode::new(RuleShape::Literal("b".into()))),
            ],
        );
        let err = lint(&g).unwrap_err();
        assert!(err.message.contains("foo"));
    }

    #[test]
    fn empty_choice_is_rejected() {
        let g = build("main", vec![("main", RuleNode::new(RuleShape::Choice(vec![])))]);
        let err = lint(&g).unwrap_err();
        assert!(err.message.contains("empty choice"));
    }

    #[test]
    fn discard_rule_may_be_always_empty() {
        let g = build(
            "main",
            vec![(
                "main",
                RuleNode::with_ast(
                    RuleShape::Sequence(vec![]),
                    AstDirective {
                        discard: true,
                        ..Default::default()
                    },
                ),
            )],
        );
        assert!(lint(&g).is_ok());
    }

    #[test]
    fn non_discard_always_empty_rule_is_rejected() {
        let g = build("main", vec![("main", RuleNode::new(RuleShape::Sequence(vec![])))]);
        let err = lint(&g).unwrap_err();
        assert!(err.message.contains("main"));
    }

    #[test]
    fn lint_with_log_agrees_with_plain_lint() {
        let g = build("main", vec![("main", RuleNode::new(RuleShape::Literal("a".into())))]);
        assert!(lint_with_log(&g, Log::Verbose).is_ok());
        let bad = build("main", vec![("main", RuleNode::new(RuleShape::Choice(vec![])))]);
        assert!(lint_with_log(&bad, Log::Verbose).is_err());
    }

    #[test]
    fn direct_left_recursion_is_detected() {
        let g = build(
            "main",
            vec![(
                "main",
                RuleNode::new(RuleShape::Sequence(vec![
                    RuleNode::new(RuleShape::Rule("main".into())),
                    RuleNode::new(RuleShape::Literal("x".into())),
                ])),
            )],
        );
        let err = lint(&g).unwrap_err();
        assert!(err.message.contains("left recursion"));
    }
}
