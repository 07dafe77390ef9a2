//! Instrumented execution: the real evaluator runs with an observer that
//! records every variable resolution, next to an indented dump of the AST and
//! timing information.

use std::fmt::Write as _;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::ast::{Ast, NodeId, NodeKind};
use crate::engine::EngineState;
use crate::error::Error;
use crate::eval::{EvalMode, Evaluator, RenderContext, RenderObserver, Scope};
use crate::value::{Data, Value};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AccessKind {
    Var,
    Env,
    Condition,
    Loop,
    Switch,
}

/// One variable resolution made during rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableAccess {
    pub path: String,
    pub value: Option<Value>,
    pub found: bool,
    pub default: Option<String>,
    pub line: usize,
    pub column: usize,
    pub kind: AccessKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExplainResult {
    /// Rendered output; `None` when execution failed.
    pub output: Option<String>,
    /// Execution error; `None` when execution succeeded.
    pub error: Option<Error>,
    pub accesses: Vec<VariableAccess>,
    pub ast_dump: String,
    pub started_at: DateTime<Utc>,
    pub total_duration: Duration,
    pub execution_duration: Duration,
}

impl ExplainResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Accesses that did not resolve.
    pub fn unresolved(&self) -> impl Iterator<Item = &VariableAccess> {
        self.accesses.iter().filter(|access| !access.found)
    }
}

#[derive(Default)]
struct AccessRecorder {
    accesses: Vec<VariableAccess>,
}

impl RenderObserver for AccessRecorder {
    fn on_access(&mut self, access: VariableAccess) {
        self.accesses.push(access);
    }
}

pub(crate) fn explain(
    state: &EngineState,
    ast: &Ast,
    name: Option<&str>,
    ctx: &RenderContext,
    data: &Data,
) -> ExplainResult {
    let started_at = Utc::now();
    let start = Instant::now();
    let ast_dump = dump_ast(ast);

    let mut recorder = AccessRecorder::default();
    let exec_start = Instant::now();
    let result = Evaluator::new(state, ctx, EvalMode::Execute)
        .with_observer(&mut recorder)
        .render(ast, name, &Scope::root(data));
    let execution_duration = exec_start.elapsed();

    let (output, error) = match result {
        Ok(output) => (Some(output), None),
        Err(e) => (None, Some(Error::from(e))),
    };
    debug!(
        "explain recorded {} accesses in {:?}",
        recorder.accesses.len(),
        execution_duration
    );

    ExplainResult {
        output,
        error,
        accesses: recorder.accesses,
        ast_dump,
        started_at,
        total_duration: start.elapsed(),
        execution_duration,
    }
}

/// Indented, human readable view of the tree.
pub fn dump_ast(ast: &Ast) -> String {
    let mut out = String::from("Root\n");
    for id in ast.children() {
        dump_node(ast, *id, 1, &mut out);
    }
    out
}

fn dump_nodes(ast: &Ast, ids: &[NodeId], depth: usize, out: &mut String) {
    for id in ids {
        dump_node(ast, *id, depth, out);
    }
}

fn line(out: &mut String, depth: usize, text: std::fmt::Arguments) {
    let _ = writeln!(out, "{}{}", "  ".repeat(depth), text);
}

fn dump_node(ast: &Ast, id: NodeId, depth: usize, out: &mut String) {
    match ast.kind(id) {
        NodeKind::Root { children } => dump_nodes(ast, children, depth, out),
        NodeKind::Text(text) => line(out, depth, format_args!("Text: {:?}", text)),
        NodeKind::Var { path, default } => match default {
            Some(default) => line(
                out,
                depth,
                format_args!("Tag: prompty.var name={:?} default={:?}", path, default),
            ),
            None => line(out, depth, format_args!("Tag: prompty.var name={:?}", path)),
        },
        NodeKind::Env { name, default } => match default {
            Some(default) => line(
                out,
                depth,
                format_args!("Tag: prompty.env name={:?} default={:?}", name, default),
            ),
            None => line(out, depth, format_args!("Tag: prompty.env name={:?}", name)),
        },
        NodeKind::If {
            branches,
            else_body,
        } => {
            line(out, depth, format_args!("Conditional"));
            for branch in branches {
                line(out, depth + 1, format_args!("Then: {}", branch.eval));
                dump_nodes(ast, &branch.body, depth + 2, out);
            }
            if let Some(body) = else_body {
                line(out, depth + 1, format_args!("Else:"));
                dump_nodes(ast, body, depth + 2, out);
            }
        }
        NodeKind::For {
            item,
            index,
            source,
            limit,
            body,
        } => {
            let mut header = format!("For: {} in {}", item, source);
            if let Some(index) = index {
                let _ = write!(header, " (index: {})", index);
            }
            if let Some(limit) = limit {
                let _ = write!(header, " (limit: {})", limit);
            }
            line(out, depth, format_args!("{}", header));
            dump_nodes(ast, body, depth + 1, out);
        }
        NodeKind::Switch {
            eval,
            cases,
            default_body,
            ..
        } => {
            line(out, depth, format_args!("Switch: {}", eval));
            for case in cases {
                line(out, depth + 1, format_args!("Case: {}", case.value));
                dump_nodes(ast, &case.body, depth + 2, out);
            }
            if let Some(body) = default_body {
                line(out, depth + 1, format_args!("Default:"));
                dump_nodes(ast, body, depth + 2, out);
            }
        }
        NodeKind::Include {
            template,
            params,
            isolate,
            with,
        } => {
            let mut header = format!("Tag: prompty.include template={:?}", template);
            if *isolate {
                header.push_str(" isolate");
            }
            if let Some(with) = with {
                let _ = write!(header, " with={:?}", with);
            }
            if !params.is_empty() {
                let _ = write!(header, " {}", params);
            }
            line(out, depth, format_args!("{}", header));
        }
        NodeKind::Raw(text) => line(out, depth, format_args!("Raw: {:?}", text)),
        NodeKind::Comment(text) => line(out, depth, format_args!("Comment: {:?}", text)),
        NodeKind::Message { role, cache, body } => {
            line(
                out,
                depth,
                format_args!("Message: {} (cache: {})", role, cache),
            );
            dump_nodes(ast, body, depth + 1, out);
        }
        NodeKind::Resolver {
            name,
            attributes,
            body,
        } => {
            if attributes.is_empty() {
                line(out, depth, format_args!("Tag: {}", name));
            } else {
                line(out, depth, format_args!("Tag: {} {}", name, attributes));
            }
            if let Some(body) = body {
                dump_nodes(ast, body, depth + 1, out);
            }
        }
    }
}
