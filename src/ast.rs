//! Arena AST produced by the parser.
//!
//! Nodes live in a flat `Vec` and refer to their children by [`NodeId`]. The
//! tree is immutable once [`Ast`] is built; evaluators, the dry run and the
//! explain dump all walk the same arena.

use serde::{Deserialize, Serialize};

use crate::expression::Expression;
use crate::tokenizer::attribute::Attributes;
use crate::tokenizer::token::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum NodeKind {
    Root {
        children: Vec<NodeId>,
    },
    Text(String),
    Var {
        path: String,
        default: Option<String>,
    },
    Env {
        name: String,
        default: Option<String>,
    },
    /// `if` with its `elseif` chain folded into `branches`.
    If {
        branches: Vec<Branch>,
        else_body: Option<Vec<NodeId>>,
    },
    For {
        item: String,
        index: Option<String>,
        source: String,
        limit: Option<usize>,
        body: Vec<NodeId>,
    },
    Switch {
        eval: String,
        expression: Expression,
        cases: Vec<Case>,
        default_body: Option<Vec<NodeId>>,
    },
    Include {
        template: String,
        params: Attributes,
        isolate: bool,
        with: Option<String>,
    },
    Raw(String),
    Comment(String),
    Message {
        role: Role,
        cache: bool,
        body: Vec<NodeId>,
    },
    /// Any tag outside the built-in set, dispatched to a registered handler.
    Resolver {
        name: String,
        attributes: Attributes,
        body: Option<Vec<NodeId>>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Branch {
    /// The `eval` attribute as written.
    pub eval: String,
    pub condition: Expression,
    pub span: Span,
    pub body: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Case {
    pub value: String,
    pub span: Span,
    pub body: Vec<NodeId>,
}

/// Chat role of a `prompty.message` block.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::EnumString,
    strum::Display,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ast {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Ast {
    pub(crate) fn from_parts(nodes: Vec<Node>, root: NodeId) -> Self {
        Self { nodes, root }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub fn span(&self, id: NodeId) -> &Span {
        &self.nodes[id.0].span
    }

    /// Top level nodes in document order.
    pub fn children(&self) -> &[NodeId] {
        match &self.node(self.root).kind {
            NodeKind::Root { children } => children,
            _ => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children().is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_role_names() {
        assert_eq!(Role::from_str("assistant").unwrap(), Role::Assistant);
        assert_eq!(Role::Tool.to_string(), "tool");
        assert!(Role::from_str("narrator").is_err());
    }

    #[test]
    fn test_arena_access() {
        let span = Span::default();
        let nodes = vec![
            Node {
                kind: NodeKind::Text("hi".to_string()),
                span: span.clone(),
            },
            Node {
                kind: NodeKind::Root {
                    children: vec![NodeId(0)],
                },
                span,
            },
        ];
        let ast = Ast::from_parts(nodes, NodeId(1));
        assert_eq!(ast.children(), &[NodeId(0)]);
        assert_eq!(ast.kind(NodeId(0)), &NodeKind::Text("hi".to_string()));
        assert_eq!(ast.len(), 2);
        assert!(!ast.is_empty());
    }
}
