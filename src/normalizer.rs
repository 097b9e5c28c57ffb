//! The grammar normalizer (§4.3): anonymous-rule hoisting and subgrammar
//! resolution. Both passes rebuild into a fresh rule set rather than mutating
//! the input grammar in place, resolving the Design Notes §9 open question
//! about idempotence under partial failure — a half-built fresh tree is simply
//! dropped on error instead of leaving the caller's grammar half-rewritten.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};

use crate::error::ConfigurationError;
use crate::grammar::{Grammar, RuleNode, RuleShape};

pub struct NormalizedGrammar {
    pub start_rule: String,
    pub rules: BTreeMap<String, RuleNode>,
    pub lexer: Option<crate::grammar::LexerSpec>,
    pub transpiler: Option<crate::grammar::TranspilerSpec>,
    /// Rule names reachable from outside `start_rule`'s own call graph: every
    /// subgrammar entry point, every subgrammar's own declared start rule, and
    /// every cross-namespace qualified reference. Fed into the linter's
    /// reachability analysis (§4.4).
    pub external_roots: BTreeSet<String>,
}

/// Whether normalization should chase `subgrammar` references onto disk
/// ([`NormalizeMode::Full`]) or inline each one as its `placeholder`
/// ([`NormalizeMode::Placeholder`], used by `PlaceholderParser`).
pub enum NormalizeMode<'p> {
    Full { base_dir: &'p Path },
    Placeholder,
}

pub fn normalize(grammar: &Grammar, mode: NormalizeMode) -> Result<NormalizedGrammar, ConfigurationError> {
    match mode {
        NormalizeMode::Full { base_dir } => normalize_full(grammar, base_dir),
        NormalizeMode::Placeholder => normalize_placeholder(grammar),
    }
}

// ---------------------------------------------------------------------
// Anonymous rule hoisting
// ---------------------------------------------------------------------

/// An inline node is hoisted when it (a) carries an `ast` directive with keys
/// beyond plain `name`, and (b) is not itself a `rule` reference — references
/// with extra `ast` keys are handled directly by the PEG renderer's `(X
/// (""))?` guard (§4.5) instead of needing a synthetic rule.
fn is_hoistable(node: &RuleNode) -> bool {
    node.ast_carries_more_than_name() && !matches!(node.shape, RuleShape::Rule(_) | RuleShape::Subgrammar(_))
}

/// Walks `node`'s direct and nested children, hoisting every qualifying
/// sub-node into a freshly synthesized top-level rule under `new_rules`, to
/// fixpoint (a hoisted rule's own body is hoisted again before being recorded).
fn hoist_children(
    owner: &str,
    node: &mut RuleNode,
    counters: &mut HashMap<String, usize>,
    new_rules: &mut BTreeMap<String, RuleNode>,
) {
    for child in node.shape.children_mut() {
        if is_hoistable(child) {
            let counter = counters.entry(owner.to_string()).or_insert(0);
            let synth_name = format!("{owner}__{counter}");
            *counter += 1;

            let ast = child.ast.take();
            let mut stripped = child.clone();
            stripped.ast = None;

            let mut new_rule = RuleNode {
                shape: RuleShape::Sequence(vec![stripped]),
                ast,
                transpile: None,
            };
            hoist_children(&synth_name, &mut new_rule, counters, new_rules);
            new_rules.insert(synth_name.clone(), new_rule);

            *child = RuleNode::new(RuleShape::Rule(synth_name));
        } else {
            hoist_children(owner, child, counters, new_rules);
        }
    }
}

fn hoist_anonymous(rules: &BTreeMap<String, RuleNode>) -> BTreeMap<String, RuleNode> {
    let mut result = rules.clone();
    let mut counters = HashMap::new();
    let mut new_rules = BTreeMap::new();
    for (name, rule) in result.iter_mut() {
        hoist_children(name, rule, &mut counters, &mut new_rules);
    }
    result.extend(new_rules);
    result
}

// ---------------------------------------------------------------------
// Placeholder mode (no subgrammar file I/O)
// ---------------------------------------------------------------------

fn replace_subgrammars_with_placeholder(node: &mut RuleNode) {
    if let RuleShape::Subgrammar(sub) = &node.shape {
        let replacement_shape = match &sub.placeholder {
            Some(placeholder) => placeholder.shape.clone(),
            None => RuleShape::Sequence(Vec::new()),
        };
        node.shape = replacement_shape;
    }
    for child in node.shape.children_mut() {
        replace_subgrammars_with_placeholder(child);
    }
}

fn normalize_placeholder(grammar: &Grammar) -> Result<NormalizedGrammar, ConfigurationError> {
    let mut rules = hoist_anonymous(&grammar.rules);
    check_leaf_subgrammar_conflict(&rules)?;
    for rule in rules.values_mut() {
        replace_subgrammars_with_placeholder(rule);
    }
    Ok(NormalizedGrammar {
        start_rule: grammar.start_rule.clone(),
        rules,
        lexer: grammar.lexer.clone(),
        transpiler: grammar.transpiler.clone(),
        external_roots: BTreeSet::new(),
    })
}

// ---------------------------------------------------------------------
// Full subgrammar resolution
// ---------------------------------------------------------------------

struct LoadedFile {
    namespace: Option<String>, // None for the root grammar
    dir: PathBuf,
    /// Canonicalized path to this file, `None` for the in-memory root grammar.
    path: Option<PathBuf>,
    grammar: Grammar,
}

fn namespace_for(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("sub");
    stem.split(|c| c == '_' || c == '-')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// `leaf: true` on a rule whose body still contains a `subgrammar` directive
/// is rejected here, before that directive is rewritten away — once
/// replacement has run (in the linter, post-normalization) the shape is
/// already a plain `rule`/placeholder reference and the conflict is no
/// longer visible (§4.4).
fn check_leaf_subgrammar_conflict(rules: &BTreeMap<String, RuleNode>) -> Result<(), ConfigurationError> {
    for (name, rule) in rules {
        if rule.ast.as_ref().is_some_and(|a| a.leaf) && contains_subgrammar(rule) {
            return Err(ConfigurationError::new(format!(
                "rule '{name}' combines leaf: true with a subgrammar directive"
            )));
        }
    }
    Ok(())
}

fn contains_subgrammar(node: &RuleNode) -> bool {
    if matches!(node.shape, RuleShape::Subgrammar(_)) {
        return true;
    }
    node.shape.children().iter().any(|c| contains_subgrammar(c))
}

fn collect_subgrammar_files(rules: &BTreeMap<String, RuleNode>, dir: &Path, out: &mut Vec<PathBuf>) {
    fn walk(node: &RuleNode, dir: &Path, out: &mut Vec<PathBuf>) {
        if let RuleShape::Subgrammar(sub) = &node.shape {
            out.push(dir.join(&sub.file));
        }
        for child in node.shape.children() {
            walk(child, dir, out);
        }
    }
    for rule in rules.values() {
        walk(rule, dir, out);
    }
}

fn normalize_full(root: &Grammar, base_dir: &Path) -> Result<NormalizedGrammar, ConfigurationError> {
    let mut loaded: Vec<LoadedFile> = vec![LoadedFile {
        namespace: None,
        dir: base_dir.to_path_buf(),
        path: None,
        grammar: {
            let mut g = root.clone();
            g.rules = hoist_anonymous(&g.rules);
            g
        },
    }];
    let mut seen_files: BTreeSet<PathBuf> = BTreeSet::new();
    let mut queue: VecDeque<usize> = VecDeque::new();
    queue.push_back(0);

    while let Some(idx) = queue.pop_front() {
        let (dir, rules) = {
            let file = &loaded[idx];
            (file.dir.clone(), file.grammar.rules.clone())
        };
        let mut refs = Vec::new();
        collect_subgrammar_files(&rules, &dir, &mut refs);
        for path in refs {
            let canonical = path.canonicalize().unwrap_or_else(|_| path.clone());
            if seen_files.contains(&canonical) {
                continue;
            }
            seen_files.insert(canonical.clone());
            let text = std::fs::read_to_string(&path).map_err(|e| {
                ConfigurationError::new(format!("failed to load subgrammar {}: {e}", path.display()))
            })?;
            let mut sub_grammar: Grammar = serde_yaml::from_str(&text).map_err(|e| {
                ConfigurationError::new(format!("invalid subgrammar {}: {e}", path.display()))
            })?;
            sub_grammar.rules = hoist_anonymous(&sub_grammar.rules);
            let sub_dir = path.parent().map(|p| p.to_path_buf()).unwrap_or_default();
            let namespace = namespace_for(&path);
            loaded.push(LoadedFile {
                namespace: Some(namespace),
                dir: sub_dir,
                path: Some(canonical),
                grammar: sub_grammar,
            });
            queue.push_back(loaded.len() - 1);
        }
    }

    for file in &loaded {
        check_leaf_subgrammar_conflict(&file.grammar.rules)?;
    }

    let mut external_roots: BTreeSet<String> = BTreeSet::new();
    for file in &loaded {
        if let Some(ns) = &file.namespace {
            external_roots.insert(format!("{ns}_{}", file.grammar.start_rule));
        }
    }

    // Build the merged, namespace-qualified rule set: internal `{rule: X}`
    // references are rewritten first, then `subgrammar` directives are
    // replaced with a reference into the resolved namespace.
    let mut fresh: BTreeMap<String, RuleNode> = BTreeMap::new();
    for idx in 0..loaded.len() {
        let namespace = loaded[idx].namespace.clone();
        let local_names: BTreeSet<String> = loaded[idx].grammar.rules.keys().cloned().collect();
        let rule_names: Vec<String> = loaded[idx].grammar.rules.keys().cloned().collect();
        for name in rule_names {
            let mut rewritten = loaded[idx].grammar.rules[&name].clone();
            if let Some(ns) = &namespace {
                qualify_rule_refs(&mut rewritten, ns, &local_names.iter().collect());
            }
            replace_subgrammar_refs(&mut rewritten, &loaded, idx, &mut external_roots)?;
            let final_name = match &namespace {
                Some(ns) => format!("{ns}_{name}"),
                None => name,
            };
            fresh.insert(final_name, rewritten);
        }
    }

    Ok(NormalizedGrammar {
        start_rule: root.start_rule.clone(),
        rules: fresh,
        lexer: root.lexer.clone(),
        transpiler: root.transpiler.clone(),
        external_roots,
    })
}

fn qualify_rule_refs(node: &mut RuleNode, namespace: &str, local_names: &BTreeSet<&String>) {
    if let RuleShape::Rule(name) = &node.shape {
        if local_names.iter().any(|n| n.as_str() == name.as_str()) {
            node.shape = RuleShape::Rule(format!("{namespace}_{name}"));
        }
    }
    for child in node.shape.children_mut() {
        qualify_rule_refs(child, namespace, local_names);
    }
}

fn replace_subgrammar_refs(
    node: &mut RuleNode,
    loaded: &[LoadedFile],
    owner_idx: usize,
    external_roots: &mut BTreeSet<String>,
) -> Result<(), ConfigurationError> {
    if let RuleShape::Subgrammar(sub) = &node.shape {
        let owner_dir = &loaded[owner_idx].dir;
        let target_path = owner_dir.join(&sub.file);
        let canonical = target_path.canonicalize().unwrap_or(target_path.clone());
        let target = loaded.iter().find(|f| f.path.as_deref() == Some(canonical.as_path()));
        let target = target.ok_or_else(|| {
            ConfigurationError::new(format!(
                "subgrammar file {} was not resolved during discovery",
                sub.file.display()
            ))
        })?;
        let namespace = target.namespace.as_ref().unwrap();
        let entry = match &sub.rule {
            Some(r) => r.clone(),
            None => target.grammar.start_rule.clone(),
        };
        let qualified = format!("{namespace}_{entry}");
        external_roots.insert(qualified.clone());
        node.shape = RuleShape::Rule(qualified);
        return Ok(());
    }
    for child in node.shape.children_mut() {
        replace_subgrammar_refs(child, loaded, owner_idx, external_roots)?;
    }
    Ok(())
}
