//! The typed grammar data model (§3 of the design): a [`Grammar`] is a tree of
//! [`RuleNode`]s plus optional [`LexerSpec`] and [`TranspilerSpec`] side-configuration.
//! Everything here is `serde`-derived so a grammar document loads straight out of
//! YAML, the way the teacher's own configuration surfaces do.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One node of a rule body. Exactly one shape variant is present per node, with
/// an optional `ast` directive and `transpile` entry riding along as a sidecar
/// (flattened into the same YAML map rather than nested under a `shape` key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleNode {
    #[serde(flatten)]
    pub shape: RuleShape,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ast: Option<AstDirective>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transpile: Option<TranspileRule>,
}

impl RuleNode {
    pub fn new(shape: RuleShape) -> Self {
        Self {
            shape,
            ast: None,
            transpile: None,
        }
    }

    pub fn with_ast(shape: RuleShape, ast: AstDirective) -> Self {
        Self {
            shape,
            ast: Some(ast),
            transpile: None,
        }
    }

    /// True if this node's own `ast` block has keys besides (or instead of) `name`
    /// — the normalizer's anonymous-hoisting trigger (§4.3).
    pub fn ast_carries_more_than_name(&self) -> bool {
        match &self.ast {
            None => false,
            Some(ast) => ast.has_binding_keys(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleShape {
    Literal(String),
    Regex(String),
    Rule(String),
    Token(String),
    Choice(Vec<RuleNode>),
    Sequence(Vec<RuleNode>),
    ZeroOrMore(Box<RuleNode>),
    OneOrMore(Box<RuleNode>),
    Optional(Box<RuleNode>),
    PositiveLookahead(Box<RuleNode>),
    NegativeLookahead(Box<RuleNode>),
    Subgrammar(SubgrammarRef),
}

impl RuleShape {
    pub fn name(&self) -> &'static str {
        match self {
            RuleShape::Literal(_) => "literal",
            RuleShape::Regex(_) => "regex",
            RuleShape::Rule(_) => "rule",
            RuleShape::Token(_) => "token",
            RuleShape::Choice(_) => "choice",
            RuleShape::Sequence(_) => "sequence",
            RuleShape::ZeroOrMore(_) => "zero_or_more",
            RuleShape::OneOrMore(_) => "one_or_more",
            RuleShape::Optional(_) => "optional",
            RuleShape::PositiveLookahead(_) => "positive_lookahead",
            RuleShape::NegativeLookahead(_) => "negative_lookahead",
            RuleShape::Subgrammar(_) => "subgrammar",
        }
    }

    pub fn children(&self) -> Vec<&RuleNode> {
        match self {
            RuleShape::Choice(items) | RuleShape::Sequence(items) => items.iter().collect(),
            RuleShape::ZeroOrMore(inner)
            | RuleShape::OneOrMore(inner)
            | RuleShape::Optional(inner)
            | RuleShape::PositiveLookahead(inner)
            | RuleShape::NegativeLookahead(inner) => vec![inner.as_ref()],
            RuleShape::Subgrammar(sub) => sub.placeholder.iter().map(|b| b.as_ref()).collect(),
            RuleShape::Literal(_) | RuleShape::Regex(_) | RuleShape::Rule(_) | RuleShape::Token(_) => {
                Vec::new()
            }
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut RuleNode> {
        match self {
            RuleShape::Choice(items) | RuleShape::Sequence(items) => items.iter_mut().collect(),
            RuleShape::ZeroOrMore(inner)
            | RuleShape::OneOrMore(inner)
            | RuleShape::Optional(inner)
            | RuleShape::PositiveLookahead(inner)
            | RuleShape::NegativeLookahead(inner) => vec![inner.as_mut()],
            RuleShape::Subgrammar(sub) => sub.placeholder.iter_mut().map(|b| b.as_mut()).collect(),
            RuleShape::Literal(_) | RuleShape::Regex(_) | RuleShape::Rule(_) | RuleShape::Token(_) => {
                Vec::new()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubgrammarRef {
    pub file: PathBuf,
    #[serde(default)]
    pub rule: Option<String>,
    #[serde(default)]
    pub placeholder: Option<Box<RuleNode>>,
}

/// The `ast` directive sidecar (§4.6). Every field is optional; most rules set
/// only one or two.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AstDirective {
    #[serde(default)]
    pub discard: bool,
    #[serde(default)]
    pub promote: bool,
    #[serde(default)]
    pub leaf: bool,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default, rename = "type")]
    pub value_type: Option<AstValueType>,
    #[serde(default)]
    pub structure: Option<AstStructure>,
}

impl AstDirective {
    /// Whether this directive binds anything beyond a plain `name` — the
    /// normalizer hoists any inline node whose `ast` trips this.
    pub fn has_binding_keys(&self) -> bool {
        self.discard
            || self.promote
            || self.leaf
            || self.tag.is_some()
            || self.value_type.is_some()
            || self.structure.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AstValueType {
    Number,
    Bool,
    Null,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AstStructure {
    Named(StructureKind),
    MapChildren {
        #[serde(default)]
        tag: Option<String>,
        map_children: BTreeMap<String, ChildRef>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureKind {
    LeftAssociativeOp,
    RightAssociativeOp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildRef {
    pub from_child: usize,
}

/// A full grammar document: the root rule set plus optional lexer and
/// transpiler configuration (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grammar {
    pub start_rule: String,
    pub rules: BTreeMap<String, RuleNode>,
    #[serde(default)]
    pub lexer: Option<LexerSpec>,
    #[serde(default)]
    pub transpiler: Option<TranspilerSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexerSpec {
    #[serde(default)]
    pub tab_width: Option<usize>,
    pub tokens: Vec<TokenSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSpec {
    pub regex: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub action: Option<TokenAction>,
    #[serde(default)]
    pub ast: Option<AstDirective>,
}

impl TokenSpec {
    /// The emitted token type name: `token` if set, else the regex source
    /// itself (grammars that only ever `skip` a spec rarely name it).
    pub fn token_name(&self) -> &str {
        self.token.as_deref().unwrap_or(&self.regex)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenAction {
    Skip,
    HandleIndent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranspilerSpec {
    #[serde(default)]
    pub indent: Option<String>,
    #[serde(default)]
    pub rules: BTreeMap<String, TranspileRule>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranspileRule {
    #[serde(default)]
    pub cases: Option<Vec<TemplateCase>>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default, rename = "use")]
    pub use_field: Option<String>,
    #[serde(default)]
    pub value: Option<serde_yaml::Value>,
    #[serde(default)]
    pub join_children_with: Option<String>,
    #[serde(default)]
    pub indent: Option<bool>,
    #[serde(default)]
    pub state_set: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateCase {
    #[serde(default, rename = "if")]
    pub if_cond: Option<Condition>,
    #[serde(default)]
    pub then: Option<String>,
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub path: String,
    #[serde(default)]
    pub equals: Option<String>,
    #[serde(default)]
    pub negate: Option<bool>,
}
