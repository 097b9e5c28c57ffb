//! The string transpiler (§4.7): renders an [`AstNode`] tree to text using
//! the grammar's `transpiler.rules` template table, one entry per tag.
//!
//! Grounded on the teacher's `Log`/state-threading conventions: rendering is
//! a single recursive walk carrying one mutable [`TranspileState`], exactly
//! the way the teacher threads a shared `Cache` through a parse.

use std::cell::RefCell;
use std::collections::BTreeMap;

use crate::ast::{AstNode, AstValue, Children};
use crate::error::TranspileError;
use crate::grammar::{Condition, TemplateCase, TranspileRule, TranspilerSpec};

/// Holds `state_set` writes across the whole render. Nested dotted paths
/// (`"loop.depth"`) are stored under their full path string rather than as a
/// real nested map — every reader addresses state the same way a writer set
/// it, so this is observationally a tree without needing one.
pub struct TranspileState {
    values: RefCell<BTreeMap<String, String>>,
}

impl TranspileState {
    pub fn new() -> Self {
        Self {
            values: RefCell::new(BTreeMap::new()),
        }
    }

    fn get(&self, path: &str) -> Option<String> {
        self.values.borrow().get(path).cloned()
    }

    fn set(&self, path: &str, value: String) {
        self.values.borrow_mut().insert(path.to_string(), value);
    }
}

pub fn transpile(spec: &TranspilerSpec, root: &AstNode) -> Result<String, TranspileError> {
    let state = TranspileState::new();
    render_node(spec, root, &state, 0)
}

fn render_node(spec: &TranspilerSpec, node: &AstNode, state: &TranspileState, depth: usize) -> Result<String, TranspileError> {
    let rule = spec.rules.get(&node.tag);

    if let Some(rule) = rule {
        if let Some(cases) = &rule.cases {
            for case in cases {
                if condition_holds(case.if_cond.as_ref(), node, state) {
                    let template = case.then.as_deref().or(case.default.as_deref());
                    if let Some(template) = template {
                        let rendered = render_template(spec, template, node, state, depth, rule)?;
                        apply_state_set(spec, rule, node, state, depth)?;
                        return Ok(rendered);
                    }
                }
            }
        }
        if let Some(template) = &rule.template {
            let rendered = render_template(spec, template, node, state, depth, rule)?;
            apply_state_set(spec, rule, node, state, depth)?;
            return Ok(rendered);
        }
        if let Some(selector) = &rule.use_field {
            apply_state_set(spec, rule, node, state, depth)?;
            return match selector.as_str() {
                "value" => Ok(node.value.as_ref().map(render_ast_value).unwrap_or_default()),
                "text" => Ok(node.text.clone()),
                other => Err(TranspileError::new(format!(
                    "template `use` must be \"value\" or \"text\", got '{other}' on tag '{}'",
                    node.tag
                ))),
            };
        }
        if let Some(value) = &rule.value {
            apply_state_set(spec, rule, node, state, depth)?;
            return Ok(render_yaml_value(value));
        }
    }

    // Fallback: a literal leaf value, else raw matched text.
    if let Some(value) = &node.value {
        return Ok(render_ast_value(value));
    }
    Ok(node.text.clone())
}

fn condition_holds(cond: Option<&Condition>, node: &AstNode, state: &TranspileState) -> bool {
    let Some(cond) = cond else {
        return true;
    };
    let actual = resolve_path(&cond.path, node, state);
    let truthy = match &cond.equals {
        Some(expected) => actual.as_deref() == Some(expected.as_str()),
        None => actual.is_some_and(|v| !v.is_empty() && v != "false"),
    };
    if cond.negate.unwrap_or(false) {
        !truthy
    } else {
        truthy
    }
}

fn resolve_path(path: &str, node: &AstNode, state: &TranspileState) -> Option<String> {
    if let Some(key) = path.strip_prefix("state.") {
        return state.get(key);
    }
    if let Some(field) = path.strip_prefix("op.") {
        return resolve_op_field(node.op.as_ref(), field);
    }
    match path {
        "tag" => Some(node.tag.clone()),
        "text" => Some(node.text.clone()),
        "op" => node.op.as_ref().map(|op| op.tag.clone()),
        _ => find_named_child(node, path).map(|c| c.text.clone()),
    }
}

/// Reads one field off a `binary_op` node's operator slot (`op.tag`,
/// `op.text`, `op.line`, `op.col`).
fn resolve_op_field(op: Option<&crate::ast::OpInfo>, field: &str) -> Option<String> {
    let op = op?;
    match field {
        "tag" => Some(op.tag.clone()),
        "text" => Some(op.text.clone()),
        "line" => Some(op.line.to_string()),
        "col" => Some(op.col.to_string()),
        _ => None,
    }
}

fn find_named_child<'a>(node: &'a AstNode, name: &str) -> Option<&'a AstNode> {
    match &node.children {
        Some(Children::Named(items)) => items.iter().find(|(n, _)| n == name).map(|(_, c)| c),
        _ => None,
    }
}

fn render_template(
    spec: &TranspilerSpec,
    template: &str,
    node: &AstNode,
    state: &TranspileState,
    depth: usize,
    rule: &TranspileRule,
) -> Result<String, TranspileError> {
    let mut out = String::new();
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < template.len() {
        if bytes[i] == b'{' {
            if let Some(end) = template[i..].find('}') {
                let key = &template[i + 1..i + end];
                out.push_str(&resolve_placeholder(spec, key, node, state, depth, rule)?);
                i += end + 1;
                continue;
            }
        }
        let ch = template[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    Ok(out)
}

fn resolve_placeholder(
    spec: &TranspilerSpec,
    key: &str,
    node: &AstNode,
    state: &TranspileState,
    depth: usize,
    rule: &TranspileRule,
) -> Result<String, TranspileError> {
    match key {
        "tag" => Ok(node.tag.clone()),
        "text" => Ok(node.text.clone()),
        "op" => Ok(node.op.as_ref().map(|op| op.tag.clone()).unwrap_or_default()),
        "children" => render_children(spec, node, state, depth, rule),
        other => {
            if let Some(field) = other.strip_prefix("op.") {
                return Ok(resolve_op_field(node.op.as_ref(), field).unwrap_or_default());
            }
            if let Some(stripped) = other.strip_prefix("state.") {
                return Ok(state.get(stripped).unwrap_or_default());
            }
            match &node.children {
                Some(Children::Named(items)) => {
                    if let Some((_, child)) = items.iter().find(|(n, _)| n == other) {
                        return render_node(spec, child, state, depth + 1);
                    }
                    Err(TranspileError::new(format!(
                        "template references unknown field '{other}' on tag '{}'",
                        node.tag
                    )))
                }
                _ => Err(TranspileError::new(format!(
                    "template references unknown field '{other}' on tag '{}'",
                    node.tag
                ))),
            }
        }
    }
}

fn render_children(
    spec: &TranspilerSpec,
    node: &AstNode,
    state: &TranspileState,
    depth: usize,
    rule: &TranspileRule,
) -> Result<String, TranspileError> {
    let joiner = rule.join_children_with.as_deref().unwrap_or(" ");
    let rendered: Vec<String> = match &node.children {
        Some(Children::List(items)) => items
            .iter()
            .map(|c| render_node(spec, c, state, depth + 1))
            .collect::<Result<_, _>>()?,
        Some(Children::Named(items)) => items
            .iter()
            .map(|(_, c)| render_node(spec, c, state, depth + 1))
            .collect::<Result<_, _>>()?,
        None => Vec::new(),
    };
    let joined = rendered.join(joiner);
    if rule.indent.unwrap_or(false) {
        let indent_unit = spec.indent.as_deref().unwrap_or("    ");
        let indented = joined
            .lines()
            .map(|line| format!("{indent_unit}{line}"))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(indented)
    } else {
        Ok(joined)
    }
}

fn apply_state_set(
    spec: &TranspilerSpec,
    rule: &TranspileRule,
    node: &AstNode,
    state: &TranspileState,
    depth: usize,
) -> Result<(), TranspileError> {
    let Some(state_set) = &rule.state_set else {
        return Ok(());
    };
    for (path, value_template) in state_set {
        let rendered = render_template(spec, value_template, node, state, depth, rule)?;
        state.set(path, rendered);
    }
    Ok(())
}

fn render_ast_value(value: &AstValue) -> String {
    match value {
        AstValue::Int(i) => i.to_string(),
        AstValue::Float(f) => f.to_string(),
        AstValue::Bool(b) => b.to_string(),
        AstValue::Null => "null".to_string(),
    }
}

fn render_yaml_value(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Null => "null".to_string(),
        other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
    }
}
