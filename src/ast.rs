//! The semantic AST data model and the AST Builder's directive-application
//! logic (§3, §4.6). The packrat matcher in [`crate::peg`] drives this module:
//! every time it finishes matching a named rule's body, it hands the raw
//! [`Parsed`] value here to have the rule's `ast` directive applied.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

use crate::grammar::{AstDirective, AstStructure, AstValueType, ChildRef, StructureKind};

/// The value produced while matching a node's body, before the enclosing
/// named rule's `ast` directive has been applied. Roughly: raw parse-tree
/// shape, not yet semantic tree shape.
#[derive(Debug, Clone)]
pub enum Parsed {
    /// Lookahead, discard, or empty-match result: no content.
    None,
    /// A literal/regex/token match.
    Leaf {
        text: String,
        line: usize,
        col: usize,
        value: Option<AstValue>,
    },
    /// The result of visiting a named rule reference.
    Node(AstNode),
    /// The result of a sequence, choice, or quantifier: each item already
    /// reduced to its own `Parsed`.
    List(Vec<Parsed>),
}

impl Parsed {
    fn is_none_ish(&self) -> bool {
        matches!(self, Parsed::None)
    }

    /// First position carried anywhere within this value, used for the
    /// "inherit from first child" positioning rule.
    fn first_position(&self) -> Option<(usize, usize)> {
        match self {
            Parsed::None => None,
            Parsed::Leaf { line, col, .. } => Some((*line, *col)),
            Parsed::Node(n) => Some((n.line, n.col)),
            Parsed::List(items) => items.iter().find_map(Parsed::first_position),
        }
    }

    fn text_of(&self) -> String {
        match self {
            Parsed::None => String::new(),
            Parsed::Leaf { text, .. } => text.clone(),
            Parsed::Node(n) => n.text.clone(),
            Parsed::List(items) => items
                .iter()
                .map(Parsed::text_of)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AstValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

/// `List` carries a rule's ordered children; `Named` carries the name→node
/// mapping a rule's `structure`/named-child assembly produces (§3). `Named`
/// keeps insertion order internally (fall-forward assignment order matters
/// for readers walking the tree) but serializes as a JSON/YAML object rather
/// than an array of pairs, matching the "mapping name→AST Node" the external
/// interface promises.
#[derive(Debug, Clone)]
pub enum Children {
    List(Vec<AstNode>),
    Named(Vec<(String, AstNode)>),
}

impl Serialize for Children {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Children::List(items) => items.serialize(serializer),
            Children::Named(items) => {
                let mut map = serializer.serialize_map(Some(items.len()))?;
                for (name, node) in items {
                    map.serialize_entry(name, node)?;
                }
                map.end()
            }
        }
    }
}

/// The operator slot on a `binary_op` node: the full matched operator, not
/// just its rule tag, so templates can tell spellings sharing one rule apart
/// (e.g. `add_op` covering both `+` and `-`) by `op.text`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpInfo {
    pub tag: String,
    pub text: String,
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AstNode {
    pub tag: String,
    pub text: String,
    pub line: usize,
    pub col: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<AstValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Children>,
    /// Only set on `binary_op` nodes produced by `structure: *_associative_op`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op: Option<OpInfo>,
}

impl AstNode {
    fn leaf(tag: String, text: String, line: usize, col: usize, value: Option<AstValue>) -> Self {
        Self {
            tag,
            text,
            line,
            col,
            value,
            children: None,
            op: None,
        }
    }

    fn plain(tag: String, text: String, line: usize, col: usize) -> Self {
        Self::leaf(tag, text, line, col, None)
    }
}

pub fn parse_value(text: &str, ty: AstValueType) -> AstValue {
    match ty {
        AstValueType::Bool => AstValue::Bool(text.trim() == "true"),
        AstValueType::Null => AstValue::Null,
        AstValueType::Number => {
            if let Ok(i) = text.trim().parse::<i64>() {
                AstValue::Int(i)
            } else {
                AstValue::Float(text.trim().parse::<f64>().unwrap_or(0.0))
            }
        }
    }
}

/// Applies a rule's `ast` directive (or the default-visit fallback, if none
/// is set) to the already-matched body value. `rule_name` supplies the
/// default tag. Returns `None` when the directive discards the node.
pub fn build_rule(rule_name: &str, ast: Option<&AstDirective>, body: Parsed, is_token_mode: bool) -> Option<AstNode> {
    let ast = ast.cloned().unwrap_or_default();

    if ast.discard {
        return None;
    }

    let tag = ast.tag.clone().unwrap_or_else(|| rule_name.to_string());

    if let Some(structure) = &ast.structure {
        return Some(build_structure(&tag, structure, body));
    }

    if ast.promote {
        return build_promote(&tag, &ast, body);
    }

    if ast.leaf || is_bare_leaf(&body, is_token_mode) {
        let (line, col) = body.first_position().unwrap_or((1, 1));
        let text = body.text_of();
        let value = ast.value_type.map(|ty| parse_value(&text, ty));
        return Some(AstNode::leaf(tag, text, line, col, value));
    }

    // Default: ordered children by deep flattening. Named-children assembly
    // only happens in `build_sequence_rule`, which alone has access to each
    // sequence part's own `ast.name`.
    let (line, col) = body.first_position().unwrap_or((1, 1));
    let text = body.text_of();
    let children = flatten_children(body);
    Some(AstNode {
        tag,
        text,
        line,
        col,
        value: None,
        children: if children.is_empty() { None } else { Some(Children::List(children)) },
        op: None,
    })
}

/// Entry point used when the rule's body is a `sequence` whose parts may
/// declare `ast.name` — called by the matcher with each part's own directive
/// alongside its `Parsed` value so named-children alignment (§4.6 fall-forward)
/// can see which parts are discarded vs. real.
pub fn build_sequence_rule(
    rule_name: &str,
    ast: Option<&AstDirective>,
    parts: Vec<(Option<AstDirective>, Parsed)>,
) -> Option<AstNode> {
    let ast = ast.cloned().unwrap_or_default();
    if ast.discard {
        return None;
    }
    let tag = ast.tag.clone().unwrap_or_else(|| rule_name.to_string());

    if let Some(structure) = &ast.structure {
        let combined = Parsed::List(parts.into_iter().map(|(_, p)| p).collect());
        return Some(build_structure(&tag, structure, combined));
    }

    if ast.promote {
        let combined = Parsed::List(parts.into_iter().map(|(_, p)| p).collect());
        return build_promote(&tag, &ast, combined);
    }

    let any_named = parts.iter().any(|(d, _)| d.as_ref().is_some_and(|d| d.name.is_some()));

    if ast.leaf {
        let combined = Parsed::List(parts.into_iter().map(|(_, p)| p).collect());
        let (line, col) = combined.first_position().unwrap_or((1, 1));
        let text = combined.text_of();
        let value = ast.value_type.map(|ty| parse_value(&text, ty));
        return Some(AstNode::leaf(tag, text, line, col, value));
    }

    let full_text: String = parts.iter().map(|(_, p)| p.text_of()).filter(|s| !s.is_empty()).collect();
    let line_col = parts.iter().find_map(|(_, p)| p.first_position()).unwrap_or((1, 1));

    if any_named {
        // Fall-forward: each named part takes the first non-empty child at
        // index >= its own position, so optional/discarded parts collapse
        // without shifting later names (§9).
        let mut named = Vec::new();
        for (i, (directive, _)) in parts.iter().enumerate() {
            let Some(name) = directive.as_ref().and_then(|d| d.name.clone()) else {
                continue;
            };
            let mut found = None;
            for (_, candidate) in parts.iter().skip(i) {
                match candidate {
                    Parsed::None => continue,
                    Parsed::Node(n) => {
                        // A promoted-list sentinel assigned to a named slot has
                        // nowhere to splice into, so it keeps the slot's own
                        // name instead of the internal marker tag.
                        found = Some(if n.tag == PROMOTED_LIST_TAG {
                            AstNode { tag: name.clone(), ..n.clone() }
                        } else {
                            n.clone()
                        });
                        break;
                    }
                    Parsed::Leaf { text, line, col, value } => {
                        found = Some(AstNode::leaf(name.clone(), text.clone(), *line, *col, value.clone()));
                        break;
                    }
                    Parsed::List(items) if !items.is_empty() => {
                        let flattened = flatten_children(candidate.clone());
                        if let Some(first) = flattened.into_iter().next() {
                            found = Some(first);
                            break;
                        }
                    }
                    Parsed::List(_) => continue,
                }
            }
            if let Some(node) = found {
                named.push((name, node));
            }
        }
        Some(AstNode {
            tag,
            text: full_text,
            line: line_col.0,
            col: line_col.1,
            value: None,
            children: Some(Children::Named(named)),
            op: None,
        })
    } else {
        let children = flatten_children(Parsed::List(parts.into_iter().map(|(_, p)| p).collect()));
        Some(AstNode {
            tag,
            text: full_text,
            line: line_col.0,
            col: line_col.1,
            value: None,
            children: if children.is_empty() { None } else { Some(Children::List(children)) },
            op: None,
        })
    }
}

/// A rule body that reduces to a single literal/regex/token match is treated
/// as a leaf automatically, without requiring `ast: {leaf: true}` — matching
/// a rule whose whole body is one terminal has nothing else to build a tree
/// from either way. `is_token_mode` is unused today but kept so callers don't
/// need to special-case lexerless vs. token-mode grammars if that changes.
fn is_bare_leaf(body: &Parsed, _is_token_mode: bool) -> bool {
    match body {
        Parsed::Leaf { .. } => true,
        Parsed::List(items) if items.len() == 1 => matches!(items[0], Parsed::Leaf { .. }),
        _ => false,
    }
}

/// Sentinel tag for a `promote: true` rule whose body reduced to multiple
/// children with no `ast.tag` override: the spec's "promote as a list" case
/// has no node of its own, so this marks content that must be spliced into
/// whatever is consuming it rather than kept as a wrapper node.
const PROMOTED_LIST_TAG: &str = "__promoted_list";

/// Splices a [`PROMOTED_LIST_TAG`] sentinel into its own children wherever a
/// single node was expected; any other node passes through unchanged.
fn explode_promoted_list(node: AstNode) -> Vec<AstNode> {
    if node.tag == PROMOTED_LIST_TAG {
        match node.children {
            Some(Children::List(items)) => items,
            _ => Vec::new(),
        }
    } else {
        vec![node]
    }
}

fn flatten_children(parsed: Parsed) -> Vec<AstNode> {
    let mut out = Vec::new();
    fn walk(p: Parsed, out: &mut Vec<AstNode>) {
        match p {
            Parsed::None => {}
            Parsed::Leaf { .. } => {}
            Parsed::Node(n) => out.extend(explode_promoted_list(n)),
            Parsed::List(items) => {
                for item in items {
                    walk(item, out);
                }
            }
        }
    }
    walk(parsed, &mut out);
    out
}

fn deep_flatten(parsed: Parsed) -> Vec<Parsed> {
    let mut out = Vec::new();
    fn walk(p: Parsed, out: &mut Vec<Parsed>) {
        match p {
            Parsed::List(items) => {
                for item in items {
                    walk(item, out);
                }
            }
            other => {
                if !other.is_none_ish() {
                    out.push(other);
                }
            }
        }
    }
    walk(parsed, &mut out);
    out
}

fn build_promote(tag: &str, ast: &AstDirective, body: Parsed) -> Option<AstNode> {
    // Parenthesized promotion: literal child literal -> middle child.
    if let Parsed::List(items) = &body {
        if items.len() == 3 {
            if let (Parsed::Leaf { .. }, middle, Parsed::Leaf { .. }) = (&items[0], &items[1], &items[2]) {
                return promote_single(tag, ast, middle.clone());
            }
        }
    }

    let flat = deep_flatten(body);
    match flat.len() {
        0 => None,
        1 => promote_single(tag, ast, flat.into_iter().next().unwrap()),
        _ => {
            if let Some(tag_override) = &ast.tag {
                let children = flat
                    .into_iter()
                    .flat_map(|p| match p {
                        Parsed::Node(n) => explode_promoted_list(n),
                        other => flatten_children(other),
                    })
                    .collect::<Vec<_>>();
                let (line, col) = children.first().map(|c| (c.line, c.col)).unwrap_or((1, 1));
                let text = children.iter().map(|c| c.text.clone()).collect::<Vec<_>>().join("");
                Some(AstNode {
                    tag: tag_override.clone(),
                    text,
                    line,
                    col,
                    value: None,
                    children: Some(Children::List(children)),
                    op: None,
                })
            } else {
                // Multiple children, no re-tag: represented as a bare list by
                // wrapping in a sentinel the caller splices back out (see
                // `explode_promoted_list`/`cleanup`).
                let children = flat
                    .into_iter()
                    .flat_map(|p| match p {
                        Parsed::Node(n) => explode_promoted_list(n),
                        other => flatten_children(other),
                    })
                    .collect::<Vec<_>>();
                let (line, col) = children.first().map(|c| (c.line, c.col)).unwrap_or((1, 1));
                let text = children.iter().map(|c| c.text.clone()).collect::<Vec<_>>().join("");
                Some(AstNode {
                    tag: PROMOTED_LIST_TAG.to_string(),
                    text,
                    line,
                    col,
                    value: None,
                    children: Some(Children::List(children)),
                    op: None,
                })
            }
        }
    }
}

fn promote_single(tag: &str, ast: &AstDirective, single: Parsed) -> Option<AstNode> {
    match single {
        Parsed::None => None,
        Parsed::Node(mut n) => {
            if let Some(tag_override) = &ast.tag {
                n.tag = tag_override.clone();
            }
            if ast.leaf {
                n.children = None;
            }
            if let Some(ty) = ast.value_type {
                n.value = Some(parse_value(&n.text, ty));
            }
            Some(n)
        }
        Parsed::Leaf { text, line, col, value } => {
            let final_tag = ast.tag.clone().unwrap_or_else(|| tag.to_string());
            let value = ast.value_type.map(|ty| parse_value(&text, ty)).or(value);
            Some(AstNode::leaf(final_tag, text, line, col, value))
        }
        Parsed::List(_) => {
            let children = flatten_children(single);
            let (line, col) = children.first().map(|c| (c.line, c.col)).unwrap_or((1, 1));
            let text = children.iter().map(|c| c.text.clone()).collect::<Vec<_>>().join("");
            Some(AstNode {
                tag: ast.tag.clone().unwrap_or_else(|| tag.to_string()),
                text,
                line,
                col,
                value: None,
                children: if children.is_empty() { None } else { Some(Children::List(children)) },
                op: None,
            })
        }
    }
}

fn build_structure(tag: &str, structure: &AstStructure, body: Parsed) -> AstNode {
    match structure {
        AstStructure::Named(StructureKind::LeftAssociativeOp) => build_left_associative(body),
        AstStructure::Named(StructureKind::RightAssociativeOp) => build_right_associative(body),
        AstStructure::MapChildren { tag: structure_tag, map_children } => {
            build_map_children(structure_tag.as_deref().unwrap_or(tag), map_children, body)
        }
    }
}

/// `children are [lhs, rest]` where `rest` is a list of `[op, rhs]` pairs;
/// fold left, each fold producing a `binary_op` node positioned at the
/// operator.
fn build_left_associative(body: Parsed) -> AstNode {
    let items = deep_flatten(body);
    let mut iter = items.into_iter();
    let lhs = iter.next().map(to_ast_node).unwrap_or_else(empty_node);
    let rest = iter.collect::<Vec<_>>();

    // `rest` is itself a flattened run of [op, rhs, op, rhs, ...] pairs once
    // the sequence/zero_or_more nesting is deep-flattened.
    let mut acc = lhs;
    let mut chunk = rest.chunks(2);
    while let Some(pair) = chunk.next() {
        if pair.len() < 2 {
            break;
        }
        let op_node = to_ast_node(pair[0].clone());
        let rhs_node = to_ast_node(pair[1].clone());
        acc = AstNode {
            tag: "binary_op".to_string(),
            text: format!("{}{}{}", acc.text, op_node.text, rhs_node.text),
            line: op_node.line,
            col: op_node.col,
            value: None,
            children: Some(Children::Named(vec![
                ("left".to_string(), acc),
                ("right".to_string(), rhs_node),
            ])),
            op: Some(OpInfo {
                tag: op_node.tag.clone(),
                text: op_node.text.clone(),
                line: op_node.line,
                col: op_node.col,
            }),
        };
    }
    acc
}

/// `children are [lhs, [op, rhs]]`; right side may itself already be a
/// `binary_op` if rhs was produced by recursive application in the grammar.
fn build_right_associative(body: Parsed) -> AstNode {
    let items = deep_flatten(body);
    if items.len() < 3 {
        if items.len() == 1 {
            return to_ast_node(items.into_iter().next().unwrap());
        }
        return empty_node();
    }
    let lhs = to_ast_node(items[0].clone());
    let op_node = to_ast_node(items[1].clone());
    let rhs_node = to_ast_node(items[2].clone());
    AstNode {
        tag: "binary_op".to_string(),
        text: format!("{}{}{}", lhs.text, op_node.text, rhs_node.text),
        line: op_node.line,
        col: op_node.col,
        value: None,
        children: Some(Children::Named(vec![
            ("left".to_string(), lhs),
            ("right".to_string(), rhs_node),
        ])),
        op: Some(OpInfo {
            tag: op_node.tag,
            text: op_node.text,
            line: op_node.line,
            col: op_node.col,
        }),
    }
}

fn build_map_children(tag: &str, map_children: &BTreeMap<String, ChildRef>, body: Parsed) -> AstNode {
    let items = deep_flatten(body);
    let text = items.iter().map(Parsed::text_of).filter(|s| !s.is_empty()).collect::<Vec<_>>().join("");
    let (line, col) = items.first().and_then(Parsed::first_position).unwrap_or((1, 1));

    let mut named = Vec::new();
    for (name, child_ref) in map_children {
        // Fall-forward from `from_child` onward, skipping empties (§9).
        let found = items
            .iter()
            .skip(child_ref.from_child)
            .find(|p| !matches!(p, Parsed::None) && !matches!(p, Parsed::List(l) if l.is_empty()));
        if let Some(found) = found {
            named.push((name.clone(), to_ast_node(found.clone())));
        }
    }

    AstNode {
        tag: tag.to_string(),
        text,
        line,
        col,
        value: None,
        children: Some(Children::Named(named)),
        op: None,
    }
}

fn to_ast_node(parsed: Parsed) -> AstNode {
    match parsed {
        Parsed::Node(n) => n,
        Parsed::Leaf { text, line, col, value } => AstNode::leaf("leaf".to_string(), text, line, col, value),
        Parsed::None => empty_node(),
        Parsed::List(items) => {
            let children = flatten_children(Parsed::List(items));
            match children.len() {
                1 => children.into_iter().next().unwrap(),
                _ => {
                    let text = children.iter().map(|c| c.text.clone()).collect::<Vec<_>>().join("");
                    let (line, col) = children.first().map(|c| (c.line, c.col)).unwrap_or((1, 1));
                    AstNode {
                        tag: PROMOTED_LIST_TAG.to_string(),
                        text,
                        line,
                        col,
                        value: None,
                        children: Some(Children::List(children)),
                        op: None,
                    }
                }
            }
        }
    }
}

fn empty_node() -> AstNode {
    AstNode::plain(String::new(), String::new(), 1, 1)
}


/// The cleanup pass (§4.6 closing paragraph): recursively strips any node
/// whose tag contains the internal `__` separator, and for named children
/// drops the entries whose value is such a node. A [`PROMOTED_LIST_TAG`]
/// sentinel is spliced into its parent's children instead of being dropped,
/// so a `promote: true` rule's "multiple children, no tag" list survives.
pub fn cleanup(mut node: AstNode) -> AstNode {
    if node.tag == PROMOTED_LIST_TAG {
        // Nothing to splice into if this sentinel made it all the way to the
        // root; keep its children but give it a harmless external tag.
        node.tag = "list".to_string();
    }
    match node.children.take() {
        Some(Children::List(items)) => {
            let cleaned = items
                .into_iter()
                .flat_map(|c| {
                    if c.tag == PROMOTED_LIST_TAG {
                        explode_promoted_list(c).into_iter().map(cleanup).collect::<Vec<_>>()
                    } else if c.tag.contains("__") {
                        Vec::new()
                    } else {
                        vec![cleanup(c)]
                    }
                })
                .collect::<Vec<_>>();
            if !cleaned.is_empty() {
                node.children = Some(Children::List(cleaned));
            }
        }
        Some(Children::Named(items)) => {
            let cleaned = items
                .into_iter()
                .filter(|(_, c)| !c.tag.contains("__"))
                .map(|(k, v)| (k, cleanup(v)))
                .collect::<Vec<_>>();
            if !cleaned.is_empty() {
                node.children = Some(Children::Named(cleaned));
            }
        }
        None => {}
    }
    node
}
