//! Builds the arena [`Ast`] from tokenizer output.
//!
//! Block tags are tracked on an explicit stack of [`Frame`]s. A node is
//! written to the arena only once its block is complete, so a failed parse
//! never leaves a partial tree behind.

use std::mem;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::ast::{Ast, Branch, Case, Node, NodeId, NodeKind, Role};
use crate::expression::{parse_expression, Expression};
use crate::tokenizer::attribute::Attributes;
use crate::tokenizer::keyword::TagKind;
use crate::tokenizer::token::{Span, Token, TokenSpan, Tokenizer, TokenizerError};

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Nesting limit used when no engine configuration is involved.
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 128;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{message} at line {line}, column {column}")]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }

    fn at(message: impl Into<String>, span: &Span) -> Self {
        Self::new(message, span.line, span.column)
    }
}

impl From<TokenizerError> for ParseError {
    fn from(error: TokenizerError) -> Self {
        match error {
            TokenizerError::ParseError {
                message,
                found,
                span,
            } => {
                let message = if found.is_empty() {
                    message
                } else {
                    format!("{} near '{}'", message, found)
                };
                ParseError::at(message, &span)
            }
        }
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Tokenizes and parses `source` in one step.
pub fn parse_template(source: &str, max_nesting_depth: usize) -> ParseResult<Ast> {
    let tokens = Tokenizer::new().tokenize(source)?;
    Parser::new(max_nesting_depth).parse(tokens)
}

struct Frame {
    name: String,
    span: Span,
    kind: FrameKind,
    children: Vec<NodeId>,
}

enum FrameKind {
    Root,
    /// `pending` holds the condition of the branch being collected; `None`
    /// once `else` has been seen.
    If {
        branches: Vec<Branch>,
        pending: Option<(String, Expression, Span)>,
    },
    For {
        item: String,
        index: Option<String>,
        source: String,
        limit: Option<usize>,
    },
    Switch {
        eval: String,
        expression: Expression,
        cases: Vec<Case>,
        default_body: Option<Vec<NodeId>>,
    },
    Case {
        value: String,
    },
    CaseDefault,
    Message {
        role: Role,
        cache: bool,
    },
    Resolver {
        attributes: Attributes,
    },
}

pub struct Parser {
    max_nesting_depth: usize,
    nodes: Vec<Node>,
    stack: Vec<Frame>,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_NESTING_DEPTH)
    }
}

impl Parser {
    pub fn new(max_nesting_depth: usize) -> Self {
        Self {
            max_nesting_depth,
            nodes: Vec::new(),
            stack: Vec::new(),
        }
    }

    #[instrument(level = "debug", skip(self, tokens))]
    pub fn parse(mut self, tokens: Vec<TokenSpan>) -> ParseResult<Ast> {
        self.stack.push(Frame {
            name: String::new(),
            span: Span::default(),
            kind: FrameKind::Root,
            children: Vec::new(),
        });

        let mut tokens = tokens.into_iter();
        while let Some(TokenSpan { token, span }) = tokens.next() {
            match token {
                Token::Text(text) => self.text(text, span)?,
                Token::Open {
                    name,
                    attributes,
                    self_closing,
                } => match TagKind::try_from(name.as_str()) {
                    Ok(kind) if kind.is_literal() => {
                        if self_closing {
                            return Err(ParseError::at(
                                format!("{} must be written as a block", name),
                                &span,
                            ));
                        }
                        self.check_switch_child(&name, &span, kind)?;
                        let content = match tokens.next() {
                            Some(TokenSpan {
                                token: Token::Literal(content),
                                ..
                            }) => content,
                            _ => return Err(ParseError::at(format!("unclosed tag {}", name), &span)),
                        };
                        let end = match tokens.next() {
                            Some(TokenSpan {
                                token: Token::Close { .. },
                                span: close,
                            }) => close.end,
                            _ => return Err(ParseError::at(format!("unclosed tag {}", name), &span)),
                        };
                        let node = match kind {
                            TagKind::Raw => NodeKind::Raw(content),
                            _ => NodeKind::Comment(content),
                        };
                        self.emit(node, Span { end, ..span });
                    }
                    Ok(kind) => self.builtin(kind, name, attributes, self_closing, span)?,
                    Err(_) => self.resolver(name, attributes, self_closing, span)?,
                },
                Token::Close { name } => self.close(&name, span)?,
                Token::Literal(_) => {
                    return Err(ParseError::at("unexpected literal block", &span));
                }
            }
        }

        if self.stack.len() > 1 {
            let frame = &self.stack[self.stack.len() - 1];
            return Err(ParseError::at(
                format!("unclosed tag {}", frame.name),
                &frame.span,
            ));
        }

        let Some(root) = self.stack.pop() else {
            return Err(ParseError::new("parser stack is empty", 1, 1));
        };
        let root_id = self.push_node(
            NodeKind::Root {
                children: root.children,
            },
            Span::default(),
        );
        debug!("parsed {} nodes", self.nodes.len());
        Ok(Ast::from_parts(self.nodes, root_id))
    }

    fn text(&mut self, text: String, span: Span) -> ParseResult<()> {
        if matches!(self.top().kind, FrameKind::Switch { .. }) {
            if text.trim().is_empty() {
                return Ok(());
            }
            return Err(ParseError::at(
                format!("unexpected text inside {}", TagKind::Switch),
                &span,
            ));
        }
        self.emit(NodeKind::Text(text), span);
        Ok(())
    }

    fn builtin(
        &mut self,
        kind: TagKind,
        name: String,
        attributes: Attributes,
        self_closing: bool,
        span: Span,
    ) -> ParseResult<()> {
        if kind.requires_body() && self_closing {
            return Err(ParseError::at(
                format!("{} must be written as a block", name),
                &span,
            ));
        }
        if !kind.requires_body() && !kind.is_divider() && !self_closing {
            return Err(ParseError::at(
                format!("{} must be self-closing", name),
                &span,
            ));
        }
        self.check_switch_child(&name, &span, kind)?;

        match kind {
            TagKind::Var => {
                let path = required(&attributes, "name", kind, &span)?;
                let node = NodeKind::Var {
                    path: path.to_string(),
                    default: attributes.get("default").map(str::to_string),
                };
                self.emit(node, span);
            }
            TagKind::Env => {
                let env = required(&attributes, "name", kind, &span)?;
                let node = NodeKind::Env {
                    name: env.to_string(),
                    default: attributes.get("default").map(str::to_string),
                };
                self.emit(node, span);
            }
            TagKind::Include => {
                let template = required(&attributes, "template", kind, &span)?;
                let node = NodeKind::Include {
                    template: template.to_string(),
                    params: attributes.without(&["template", "isolate", "with"]),
                    isolate: bool_attr(&attributes, "isolate", kind, &span)?,
                    with: attributes.get("with").map(str::to_string),
                };
                self.emit(node, span);
            }
            TagKind::If => {
                let (eval, condition) = eval_attr(&attributes, kind, &span)?;
                self.open(
                    name,
                    span.clone(),
                    FrameKind::If {
                        branches: Vec::new(),
                        pending: Some((eval, condition, span)),
                    },
                )?;
            }
            TagKind::ElseIf => {
                let (eval, condition) = eval_attr(&attributes, kind, &span)?;
                self.divider(kind, &span, Some((eval, condition, span.clone())))?;
            }
            TagKind::Else => self.divider(kind, &span, None)?,
            TagKind::For => {
                let item = identifier_attr(&attributes, "item", kind, &span)?
                    .ok_or_else(|| missing("item", kind, &span))?;
                let index = identifier_attr(&attributes, "index", kind, &span)?;
                let source = required(&attributes, "in", kind, &span)?.to_string();
                let limit = match attributes.get("limit") {
                    Some(raw) => match raw.trim().parse::<usize>() {
                        Ok(limit) if limit > 0 => Some(limit),
                        _ => {
                            return Err(ParseError::at(
                                format!(
                                    "invalid limit '{}' on {}: expected a positive integer",
                                    raw, kind
                                ),
                                &span,
                            ))
                        }
                    },
                    None => None,
                };
                self.open(
                    name,
                    span,
                    FrameKind::For {
                        item,
                        index,
                        source,
                        limit,
                    },
                )?;
            }
            TagKind::Switch => {
                let (eval, expression) = eval_attr(&attributes, kind, &span)?;
                self.open(
                    name,
                    span,
                    FrameKind::Switch {
                        eval,
                        expression,
                        cases: Vec::new(),
                        default_body: None,
                    },
                )?;
            }
            TagKind::Case => {
                let value = required_present(&attributes, "value", kind, &span)?.to_string();
                self.open(name, span, FrameKind::Case { value })?;
            }
            TagKind::CaseDefault => {
                if let FrameKind::Switch {
                    default_body: Some(_),
                    ..
                } = &self.top().kind
                {
                    return Err(ParseError::at(
                        format!("duplicate {} in {}", kind, TagKind::Switch),
                        &span,
                    ));
                }
                self.open(name, span, FrameKind::CaseDefault)?;
            }
            TagKind::Message => {
                if self
                    .stack
                    .iter()
                    .any(|frame| matches!(frame.kind, FrameKind::Message { .. }))
                {
                    return Err(ParseError::at(
                        format!("{} cannot be nested inside another message", kind),
                        &span,
                    ));
                }
                let raw_role = required(&attributes, "role", kind, &span)?;
                let role = raw_role.parse::<Role>().map_err(|_| {
                    ParseError::at(
                        format!(
                            "invalid role '{}' on {}: expected system, user, assistant or tool",
                            raw_role, kind
                        ),
                        &span,
                    )
                })?;
                let cache = bool_attr(&attributes, "cache", kind, &span)?;
                self.open(name, span, FrameKind::Message { role, cache })?;
            }
            TagKind::Raw | TagKind::Comment => {
                return Err(ParseError::at(format!("unexpected {}", kind), &span));
            }
        }
        Ok(())
    }

    fn resolver(
        &mut self,
        name: String,
        attributes: Attributes,
        self_closing: bool,
        span: Span,
    ) -> ParseResult<()> {
        if matches!(self.top().kind, FrameKind::Switch { .. }) {
            return Err(ParseError::at(
                format!("{} is not allowed directly inside {}", name, TagKind::Switch),
                &span,
            ));
        }
        if self_closing {
            self.emit(
                NodeKind::Resolver {
                    name,
                    attributes,
                    body: None,
                },
                span,
            );
            return Ok(());
        }
        self.open(name, span, FrameKind::Resolver { attributes })
    }

    /// `case`/`casedefault` only directly inside a switch, and a switch holds
    /// nothing else but comments.
    fn check_switch_child(&self, name: &str, span: &Span, kind: TagKind) -> ParseResult<()> {
        let in_switch = matches!(self.top().kind, FrameKind::Switch { .. });
        match kind {
            TagKind::Case | TagKind::CaseDefault if !in_switch => Err(ParseError::at(
                format!("{} outside of {}", name, TagKind::Switch),
                span,
            )),
            TagKind::Case | TagKind::CaseDefault | TagKind::Comment => Ok(()),
            _ if in_switch => Err(ParseError::at(
                format!("{} is not allowed directly inside {}", name, TagKind::Switch),
                span,
            )),
            _ => Ok(()),
        }
    }

    fn divider(
        &mut self,
        kind: TagKind,
        span: &Span,
        next: Option<(String, Expression, Span)>,
    ) -> ParseResult<()> {
        let frame = self.top_mut();
        let FrameKind::If { branches, pending } = &mut frame.kind else {
            return Err(ParseError::at(
                format!("{} outside of {}", kind, TagKind::If),
                span,
            ));
        };
        let Some((eval, condition, branch_span)) = pending.take() else {
            let message = match kind {
                TagKind::Else => format!("duplicate {}", kind),
                _ => format!("{} after {}", kind, TagKind::Else),
            };
            return Err(ParseError::at(message, span));
        };
        branches.push(Branch {
            eval,
            condition,
            span: branch_span,
            body: mem::take(&mut frame.children),
        });
        *pending = next;
        Ok(())
    }

    fn open(&mut self, name: String, span: Span, kind: FrameKind) -> ParseResult<()> {
        if self.stack.len() > self.max_nesting_depth {
            return Err(ParseError::at(
                format!(
                    "nesting depth exceeds the maximum of {}",
                    self.max_nesting_depth
                ),
                &span,
            ));
        }
        self.stack.push(Frame {
            name,
            span,
            kind,
            children: Vec::new(),
        });
        Ok(())
    }

    fn close(&mut self, name: &str, span: Span) -> ParseResult<()> {
        if self.stack.len() <= 1 {
            return Err(ParseError::at(
                format!("unexpected closing tag {} with no open block", name),
                &span,
            ));
        }
        if self.top().name != name {
            return Err(ParseError::at(
                format!(
                    "mismatched closing tag: expected {}, found {}",
                    self.top().name,
                    name
                ),
                &span,
            ));
        }
        let Some(frame) = self.stack.pop() else {
            return Err(ParseError::at("parser stack is empty", &span));
        };
        let node_span = Span {
            end: span.end,
            ..frame.span
        };
        let body = frame.children;

        let kind = match frame.kind {
            FrameKind::Root => {
                return Err(ParseError::at("cannot close the root block", &span));
            }
            FrameKind::If {
                mut branches,
                pending,
            } => {
                let else_body = match pending {
                    Some((eval, condition, branch_span)) => {
                        branches.push(Branch {
                            eval,
                            condition,
                            span: branch_span,
                            body,
                        });
                        None
                    }
                    None => Some(body),
                };
                NodeKind::If {
                    branches,
                    else_body,
                }
            }
            FrameKind::For {
                item,
                index,
                source,
                limit,
            } => NodeKind::For {
                item,
                index,
                source,
                limit,
                body,
            },
            FrameKind::Switch {
                eval,
                expression,
                cases,
                default_body,
            } => NodeKind::Switch {
                eval,
                expression,
                cases,
                default_body,
            },
            FrameKind::Case { value } => {
                if let FrameKind::Switch { cases, .. } = &mut self.top_mut().kind {
                    cases.push(Case {
                        value,
                        span: node_span,
                        body,
                    });
                }
                return Ok(());
            }
            FrameKind::CaseDefault => {
                if let FrameKind::Switch { default_body, .. } = &mut self.top_mut().kind {
                    *default_body = Some(body);
                }
                return Ok(());
            }
            FrameKind::Message { role, cache } => NodeKind::Message { role, cache, body },
            FrameKind::Resolver { attributes } => NodeKind::Resolver {
                name: frame.name,
                attributes,
                body: Some(body),
            },
        };
        self.emit(kind, node_span);
        Ok(())
    }

    fn emit(&mut self, kind: NodeKind, span: Span) {
        let id = self.push_node(kind, span);
        self.top_mut().children.push(id);
    }

    fn push_node(&mut self, kind: NodeKind, span: Span) -> NodeId {
        self.nodes.push(Node { kind, span });
        NodeId(self.nodes.len() - 1)
    }

    fn top(&self) -> &Frame {
        &self.stack[self.stack.len() - 1]
    }

    fn top_mut(&mut self) -> &mut Frame {
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }
}

fn missing(key: &str, kind: TagKind, span: &Span) -> ParseError {
    ParseError::at(
        format!("missing required attribute '{}' on {}", key, kind),
        span,
    )
}

fn required<'a>(
    attributes: &'a Attributes,
    key: &str,
    kind: TagKind,
    span: &Span,
) -> ParseResult<&'a str> {
    match attributes.get(key) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(missing(key, kind, span)),
    }
}

/// Like [`required`] but accepts an empty value (`case value=""`).
fn required_present<'a>(
    attributes: &'a Attributes,
    key: &str,
    kind: TagKind,
    span: &Span,
) -> ParseResult<&'a str> {
    attributes.get(key).ok_or_else(|| missing(key, kind, span))
}

fn bool_attr(attributes: &Attributes, key: &str, kind: TagKind, span: &Span) -> ParseResult<bool> {
    match attributes.get(key) {
        None => Ok(false),
        Some("true") => Ok(true),
        Some("false") => Ok(false),
        Some(other) => Err(ParseError::at(
            format!(
                "invalid value '{}' for '{}' on {}: expected true or false",
                other, key, kind
            ),
            span,
        )),
    }
}

fn identifier_attr(
    attributes: &Attributes,
    key: &str,
    kind: TagKind,
    span: &Span,
) -> ParseResult<Option<String>> {
    match attributes.get(key) {
        None => Ok(None),
        Some(value) if IDENTIFIER.is_match(value) => Ok(Some(value.to_string())),
        Some(value) => Err(ParseError::at(
            format!(
                "invalid identifier '{}' for '{}' on {}",
                value, key, kind
            ),
            span,
        )),
    }
}

fn eval_attr(
    attributes: &Attributes,
    kind: TagKind,
    span: &Span,
) -> ParseResult<(String, Expression)> {
    let eval = required(attributes, "eval", kind, span)?;
    let expression = parse_expression(eval)
        .map_err(|e| ParseError::at(format!("{} on {}", e, kind), span))?;
    Ok((eval.to_string(), expression))
}
