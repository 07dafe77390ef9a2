use std::time::Instant;

use tracing::{debug, instrument, warn};

use crate::ast::{Ast, NodeId, NodeKind};
use crate::config::{ErrorStrategy, MissingIncludePolicy};
use crate::engine::EngineState;
use crate::explain::{AccessKind, VariableAccess};
use crate::expression::Expression;
use crate::message::encode_message;
use crate::registry::{handler_failure, TagInvocation};
use crate::resolver::suggest_similar;
use crate::tokenizer::attribute::Attributes;
use crate::tokenizer::keyword::handler_key;
use crate::tokenizer::token::Span;
use crate::value::{Data, Value};

use super::context::{RenderContext, Scope};
use super::expression::{case_matches, evaluate};
use super::{RenderError, RenderResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum EvalMode {
    /// Real rendering with the configured error strategy.
    Execute,
    /// Placeholder rendering for the dry run: unresolved references become
    /// `{{...}}` markers, missing includes are skipped and tag handlers are
    /// never called.
    DryRun,
}

/// Receives every variable resolution made while rendering.
pub trait RenderObserver {
    fn on_access(&mut self, access: VariableAccess);
}

pub(crate) struct Evaluator<'e> {
    state: &'e EngineState,
    ctx: &'e RenderContext,
    deadline: Option<Instant>,
    mode: EvalMode,
    iterations: usize,
    include_stack: Vec<String>,
    in_message: bool,
    observer: Option<&'e mut dyn RenderObserver>,
}

impl<'e> Evaluator<'e> {
    pub(crate) fn new(state: &'e EngineState, ctx: &'e RenderContext, mode: EvalMode) -> Self {
        let configured = state
            .config
            .render_timeout
            .map(|timeout| Instant::now() + timeout);
        let deadline = match (ctx.deadline(), configured) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            state,
            ctx,
            deadline,
            mode,
            iterations: 0,
            include_stack: Vec::new(),
            in_message: false,
            observer: None,
        }
    }

    pub(crate) fn with_observer(mut self, observer: &'e mut dyn RenderObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Renders a whole template. `name` seeds cycle detection for registered
    /// templates.
    #[instrument(level = "debug", skip(self, ast, scope))]
    pub(crate) fn render(
        &mut self,
        ast: &Ast,
        name: Option<&str>,
        scope: &Scope,
    ) -> RenderResult<String> {
        self.check()?;
        if let Some(name) = name {
            self.include_stack.push(name.to_string());
        }
        let mut out = String::new();
        let result = self.render_nodes(ast, ast.children(), scope, &mut out);
        if name.is_some() {
            self.include_stack.pop();
        }
        result?;
        debug!("rendered {} bytes", out.len());
        Ok(out)
    }

    fn check(&self) -> RenderResult<()> {
        self.ctx.check()?;
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(RenderError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    fn strategy(&self) -> ErrorStrategy {
        match self.mode {
            EvalMode::Execute => self.state.config.error_strategy,
            EvalMode::DryRun => ErrorStrategy::Placeholder,
        }
    }

    fn render_nodes(
        &mut self,
        ast: &Ast,
        ids: &[NodeId],
        scope: &Scope,
        out: &mut String,
    ) -> RenderResult<()> {
        for id in ids {
            self.render_node(ast, *id, scope, out)?;
        }
        Ok(())
    }

    fn render_node(
        &mut self,
        ast: &Ast,
        id: NodeId,
        scope: &Scope,
        out: &mut String,
    ) -> RenderResult<()> {
        let span = ast.span(id);
        match ast.kind(id) {
            NodeKind::Root { children } => self.render_nodes(ast, children, scope, out),
            NodeKind::Text(text) | NodeKind::Raw(text) => {
                out.push_str(text);
                Ok(())
            }
            NodeKind::Comment(_) => Ok(()),
            NodeKind::Var { path, default } => {
                let value = scope.get(path);
                self.observe(AccessKind::Var, path, value.cloned(), default, span);
                match (value, default) {
                    (Some(value), _) => out.push_str(&value.render()),
                    (None, Some(default)) => out.push_str(default),
                    (None, None) => self.unresolved(path, scope, span, out)?,
                }
                Ok(())
            }
            NodeKind::Env { name, default } => {
                let value = lookup_env(self.state, name);
                self.observe(
                    AccessKind::Env,
                    name,
                    value.clone().map(Value::String),
                    default,
                    span,
                );
                match (value, default) {
                    (Some(value), _) => out.push_str(&value),
                    (None, Some(default)) => out.push_str(default),
                    (None, None) => self.unresolved(name, scope, span, out)?,
                }
                Ok(())
            }
            NodeKind::If {
                branches,
                else_body,
            } => {
                for branch in branches {
                    self.observe_expression(AccessKind::Condition, &branch.condition, scope, &branch.span);
                    if evaluate(&branch.condition, scope).is_truthy() {
                        return self.render_nodes(ast, &branch.body, scope, out);
                    }
                }
                match else_body {
                    Some(body) => self.render_nodes(ast, body, scope, out),
                    None => Ok(()),
                }
            }
            NodeKind::For {
                item,
                index,
                source,
                limit,
                body,
            } => {
                let value = scope.get(source);
                self.observe(AccessKind::Loop, source, value.cloned(), &None, span);
                let Some(items) = value.and_then(Value::as_sequence) else {
                    debug!("loop source '{}' is not a sequence, skipping", source);
                    return Ok(());
                };
                let count = limit.map_or(items.len(), |limit| limit.min(items.len()));
                for (i, element) in items.iter().take(count).enumerate() {
                    self.check()?;
                    self.iterations += 1;
                    let max = self.state.config.max_loop_iterations;
                    if self.iterations > max {
                        return Err(RenderError::IterationLimitExceeded { limit: max });
                    }
                    let mut bindings = Data::new();
                    bindings.insert(item.clone(), element.clone());
                    if let Some(index) = index {
                        bindings.insert(index.clone(), Value::Integer(i as i64));
                    }
                    let child = scope.child(bindings);
                    self.render_nodes(ast, body, &child, out)?;
                }
                Ok(())
            }
            NodeKind::Switch {
                eval,
                expression,
                cases,
                default_body,
            } => {
                self.observe_expression(AccessKind::Switch, expression, scope, span);
                let unresolved = expression.as_path().is_some_and(|path| !scope.contains(path));
                if unresolved && self.mode == EvalMode::DryRun {
                    out.push_str(&format!("{{{{switch:{}}}}}", eval));
                    return Ok(());
                }
                let value = evaluate(expression, scope);
                if let Some(case) = cases.iter().find(|case| case_matches(&value, &case.value)) {
                    return self.render_nodes(ast, &case.body, scope, out);
                }
                match default_body {
                    Some(body) => self.render_nodes(ast, body, scope, out),
                    None => Ok(()),
                }
            }
            NodeKind::Include {
                template,
                params,
                isolate,
                with,
            } => self.include(template, params, *isolate, with.as_deref(), scope, span, out),
            NodeKind::Message { role, cache, body } => {
                self.check()?;
                if self.in_message {
                    return Err(RenderError::NestedMessage { line: span.line });
                }
                self.in_message = true;
                let mut content = String::new();
                let result = self.render_nodes(ast, body, scope, &mut content);
                self.in_message = false;
                result?;
                out.push_str(&encode_message(*role, *cache, &content));
                Ok(())
            }
            NodeKind::Resolver {
                name,
                attributes,
                body,
            } => self.resolver(ast, name, attributes, body.as_deref(), scope, out),
        }
    }

    /// A var or env reference with no value and no default.
    fn unresolved(
        &self,
        path: &str,
        scope: &Scope,
        span: &Span,
        out: &mut String,
    ) -> RenderResult<()> {
        match self.strategy() {
            ErrorStrategy::Throw => Err(RenderError::UndefinedVariable {
                name: path.to_string(),
                line: span.line,
                column: span.column,
                suggestions: suggest_similar(
                    path,
                    &scope.all_keys(),
                    &self.state.config.suggestions,
                ),
            }),
            ErrorStrategy::Placeholder => {
                out.push_str(&format!("{{{{{}}}}}", path));
                Ok(())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn include(
        &mut self,
        template: &str,
        params: &Attributes,
        isolate: bool,
        with: Option<&str>,
        scope: &Scope,
        span: &Span,
        out: &mut String,
    ) -> RenderResult<()> {
        self.check()?;
        let Some(target) = self.state.templates.get(template) else {
            if self.mode == EvalMode::DryRun {
                return Ok(());
            }
            return match self.state.config.missing_include {
                MissingIncludePolicy::Error => Err(RenderError::TemplateNotFound {
                    name: template.to_string(),
                    line: span.line,
                }),
                MissingIncludePolicy::Skip => {
                    warn!("included template '{}' is not registered, skipping", template);
                    Ok(())
                }
            };
        };

        if self.include_stack.iter().any(|name| name == template) {
            let mut chain = self.include_stack.clone();
            chain.push(template.to_string());
            return Err(RenderError::IncludeCycle { chain });
        }
        let max_depth = self.state.config.max_include_depth;
        if self.include_stack.len() >= max_depth {
            return Err(RenderError::IncludeDepthExceeded { depth: max_depth });
        }

        let bindings = include_bindings(params, with, scope);
        let child = if isolate {
            Scope::isolated(bindings)
        } else {
            scope.child(bindings)
        };

        debug!("including template '{}' (isolate: {})", template, isolate);
        self.include_stack.push(template.to_string());
        let result = self.render_nodes(&target, target.children(), &child, out);
        self.include_stack.pop();
        result
    }

    fn resolver(
        &mut self,
        ast: &Ast,
        name: &str,
        attributes: &Attributes,
        body: Option<&[NodeId]>,
        scope: &Scope,
        out: &mut String,
    ) -> RenderResult<()> {
        if self.mode == EvalMode::DryRun {
            out.push_str(&format!("{{{{tag:{}}}}}", name));
            return Ok(());
        }
        let key = handler_key(name);
        let Some(handler) = self.state.handlers.get(key) else {
            warn!("no handler registered for tag '{}', rendering empty", name);
            return Ok(());
        };

        let rendered = {
            let mut render_body = || -> RenderResult<String> {
                let mut content = String::new();
                if let Some(body) = body {
                    self.render_nodes(ast, body, scope, &mut content)?;
                }
                Ok(content)
            };
            let mut invocation = TagInvocation::new(name, attributes, scope, &mut render_body);
            handler.render(&mut invocation)
        };
        let rendered = rendered.map_err(|e| handler_failure(key, e))?;
        out.push_str(&rendered);
        Ok(())
    }

    fn observe(
        &mut self,
        kind: AccessKind,
        path: &str,
        value: Option<Value>,
        default: &Option<String>,
        span: &Span,
    ) {
        if let Some(observer) = self.observer.as_deref_mut() {
            observer.on_access(VariableAccess {
                path: path.to_string(),
                found: value.is_some(),
                value,
                default: default.clone(),
                line: span.line,
                column: span.column,
                kind,
            });
        }
    }

    fn observe_expression(
        &mut self,
        kind: AccessKind,
        expression: &Expression,
        scope: &Scope,
        span: &Span,
    ) {
        if self.observer.is_none() {
            return;
        }
        for path in expression.paths() {
            let value = scope.get(path).cloned();
            self.observe(kind, path, value, &None, span);
        }
    }
}

/// Environment variable value, honoring `allowed_env_vars`.
pub(crate) fn lookup_env(state: &EngineState, name: &str) -> Option<String> {
    if !state.config.env_allowed(name) {
        debug!("environment variable '{}' is not allowed", name);
        return None;
    }
    std::env::var(name).ok()
}

/// Parameters passed to an included template: the `with` mapping first, then
/// explicit attributes on top.
pub(crate) fn include_bindings(params: &Attributes, with: Option<&str>, scope: &Scope) -> Data {
    let mut bindings = with
        .and_then(|path| scope.get(path))
        .and_then(Value::as_mapping)
        .cloned()
        .unwrap_or_default();
    for (key, value) in params.iter() {
        bindings.insert(key.to_string(), Value::from(value));
    }
    bindings
}
