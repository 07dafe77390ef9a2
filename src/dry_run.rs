//! Static-ish analysis of a template against partial data.
//!
//! The analyzer visits every node, including branches that would not run and
//! the bodies of included templates, and records what the template refers to.
//! It then renders the template in dry-run mode to produce placeholder
//! output. Missing data never causes a failure here.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use tracing::{debug, instrument};

use crate::ast::{Ast, NodeId, NodeKind, Role};
use crate::engine::EngineState;
use crate::eval::evaluator::{include_bindings, lookup_env};
use crate::eval::{EvalMode, Evaluator, RenderContext, RenderError, Scope};
use crate::expression::Expression;
use crate::resolver::{mark_key_used, split_head, suggest_similar};
use crate::tokenizer::attribute::Attributes;
use crate::tokenizer::keyword::handler_key;
use crate::tokenizer::token::Span;
use crate::value::{Data, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReferenceSource {
    Data,
    Env,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableReference {
    pub name: String,
    pub default: Option<String>,
    pub line: usize,
    pub column: usize,
    pub found: bool,
    /// Bound by an enclosing loop or include parameter rather than the data.
    pub local: bool,
    pub source: ReferenceSource,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionalReference {
    pub expression: String,
    pub line: usize,
    pub has_else_if: bool,
    pub has_else: bool,
    pub branch_count: usize,
    pub variables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopReference {
    pub item: String,
    pub index: Option<String>,
    pub source: String,
    pub limit: Option<usize>,
    pub source_found: bool,
    pub source_len: Option<usize>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwitchReference {
    pub expression: String,
    pub cases: Vec<String>,
    pub has_default: bool,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncludeReference {
    pub template: String,
    pub exists: bool,
    pub isolated: bool,
    pub params: BTreeMap<String, String>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolverReference {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    pub registered: bool,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageReference {
    pub role: Role,
    pub cache: bool,
    pub line: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DryRunResult {
    pub valid: bool,
    pub output: String,
    pub variables: Vec<VariableReference>,
    pub conditionals: Vec<ConditionalReference>,
    pub loops: Vec<LoopReference>,
    pub switches: Vec<SwitchReference>,
    pub includes: Vec<IncludeReference>,
    pub resolvers: Vec<ResolverReference>,
    pub messages: Vec<MessageReference>,
    pub missing_variables: Vec<String>,
    pub unused_variables: Vec<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl DryRunResult {
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// References to a given data path, in encounter order.
    pub fn references_to<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a VariableReference> {
        self.variables.iter().filter(move |v| v.name == name)
    }
}

/// Names bound by enclosing loops and include parameters. Inside an isolated
/// include nothing reads the caller's data.
#[derive(Debug, Clone, Default)]
struct Locals {
    names: HashSet<String>,
    isolated: bool,
}

impl Locals {
    fn isolated<I: IntoIterator<Item = String>>(names: I) -> Locals {
        Locals {
            names: names.into_iter().collect(),
            isolated: true,
        }
    }

    fn with<I: IntoIterator<Item = String>>(&self, names: I) -> Locals {
        let mut locals = self.clone();
        locals.names.extend(names);
        locals
    }

    fn binds(&self, path: &str) -> bool {
        self.names.contains(split_head(path).0)
    }

    /// Whether `path` resolves against the top-level data.
    fn reads_data(&self, path: &str) -> bool {
        !self.isolated && !self.binds(path)
    }
}

struct Analyzer<'a> {
    state: &'a EngineState,
    used: HashSet<String>,
    include_stack: Vec<String>,
    result: DryRunResult,
}

#[instrument(level = "debug", skip(state, ast, ctx, data))]
pub(crate) fn dry_run(
    state: &EngineState,
    ast: &Ast,
    name: Option<&str>,
    ctx: &RenderContext,
    data: &Data,
) -> DryRunResult {
    let mut analyzer = Analyzer {
        state,
        used: HashSet::new(),
        include_stack: name.map(str::to_string).into_iter().collect(),
        result: DryRunResult::default(),
    };
    let scope = Scope::root(data);
    analyzer.visit_nodes(ast, ast.children(), &scope, &Locals::default());

    let mut result = analyzer.result;
    result.unused_variables = data
        .keys()
        .filter(|key| !analyzer.used.contains(*key))
        .cloned()
        .collect();

    match Evaluator::new(state, ctx, EvalMode::DryRun).render(ast, name, &scope) {
        Ok(output) => result.output = output,
        // Limits hit by the sample data say nothing about the template itself.
        Err(e @ RenderError::IterationLimitExceeded { .. }) => {
            debug!("dry run render stopped: {}", e);
            result.warnings.push(e.to_string());
        }
        Err(e) => {
            let message = e.to_string();
            if !result.errors.contains(&message) {
                result.errors.push(message);
            }
        }
    }

    result.valid = result.errors.is_empty();
    debug!(
        "dry run: {} variables, {} missing, {} warnings, {} errors",
        result.variables.len(),
        result.missing_variables.len(),
        result.warnings.len(),
        result.errors.len()
    );
    result
}

impl Analyzer<'_> {
    fn visit_nodes(&mut self, ast: &Ast, ids: &[NodeId], scope: &Scope, locals: &Locals) {
        for id in ids {
            self.visit(ast, *id, scope, locals);
        }
    }

    fn visit(&mut self, ast: &Ast, id: NodeId, scope: &Scope, locals: &Locals) {
        let span = ast.span(id);
        match ast.kind(id) {
            NodeKind::Root { children } => self.visit_nodes(ast, children, scope, locals),
            NodeKind::Text(_) | NodeKind::Raw(_) | NodeKind::Comment(_) => {}
            NodeKind::Var { path, default } => self.variable(path, default, span, scope, locals),
            NodeKind::Env { name, default } => {
                let found = lookup_env(self.state, name).is_some();
                if !found && default.is_none() {
                    self.warn(format!(
                        "environment variable '{}' is not set (line {})",
                        name, span.line
                    ));
                }
                self.result.variables.push(VariableReference {
                    name: name.clone(),
                    default: default.clone(),
                    line: span.line,
                    column: span.column,
                    found,
                    local: false,
                    source: ReferenceSource::Env,
                    suggestions: Vec::new(),
                });
            }
            NodeKind::If {
                branches,
                else_body,
            } => {
                let mut variables = Vec::new();
                for branch in branches {
                    self.expression_paths(&branch.condition, locals, &mut variables);
                }
                self.result.conditionals.push(ConditionalReference {
                    expression: branches
                        .first()
                        .map(|branch| branch.eval.clone())
                        .unwrap_or_default(),
                    line: span.line,
                    has_else_if: branches.len() > 1,
                    has_else: else_body.is_some(),
                    branch_count: branches.len() + usize::from(else_body.is_some()),
                    variables,
                });
                for branch in branches {
                    self.visit_nodes(ast, &branch.body, scope, locals);
                }
                if let Some(body) = else_body {
                    self.visit_nodes(ast, body, scope, locals);
                }
            }
            NodeKind::For {
                item,
                index,
                source,
                limit,
                body,
            } => {
                let local_source = locals.binds(source);
                if locals.reads_data(source) {
                    mark_key_used(&mut self.used, source);
                }
                let value = scope.get(source);
                let items = value.and_then(Value::as_sequence);
                match (value, items) {
                    (None, _) if !local_source => self.warn(format!(
                        "loop source '{}' not found (line {})",
                        source, span.line
                    )),
                    (Some(value), None) => self.warn(format!(
                        "loop source '{}' is a {}, not a sequence (line {})",
                        source,
                        value.type_name(),
                        span.line
                    )),
                    _ => {}
                }
                self.result.loops.push(LoopReference {
                    item: item.clone(),
                    index: index.clone(),
                    source: source.clone(),
                    limit: *limit,
                    source_found: value.is_some(),
                    source_len: items.map(<[Value]>::len),
                    line: span.line,
                });

                // The first element stands in for every iteration.
                let mut bindings = Data::new();
                if let Some(first) = items.and_then(<[Value]>::first) {
                    bindings.insert(item.clone(), first.clone());
                    if let Some(index) = index {
                        bindings.insert(index.clone(), Value::Integer(0));
                    }
                }
                let child = scope.child(bindings);
                let names = std::iter::once(item.clone()).chain(index.clone());
                self.visit_nodes(ast, body, &child, &locals.with(names));
            }
            NodeKind::Switch {
                eval,
                expression,
                cases,
                default_body,
            } => {
                let mut variables = Vec::new();
                self.expression_paths(expression, locals, &mut variables);
                self.result.switches.push(SwitchReference {
                    expression: eval.clone(),
                    cases: cases.iter().map(|case| case.value.clone()).collect(),
                    has_default: default_body.is_some(),
                    line: span.line,
                });
                for case in cases {
                    self.visit_nodes(ast, &case.body, scope, locals);
                }
                if let Some(body) = default_body {
                    self.visit_nodes(ast, body, scope, locals);
                }
            }
            NodeKind::Include {
                template,
                params,
                isolate,
                with,
            } => self.include(template, params, *isolate, with.as_deref(), span, scope, locals),
            NodeKind::Message { role, cache, body } => {
                self.result.messages.push(MessageReference {
                    role: *role,
                    cache: *cache,
                    line: span.line,
                });
                self.visit_nodes(ast, body, scope, locals);
            }
            NodeKind::Resolver {
                name,
                attributes,
                body,
            } => {
                let registered = self.state.handlers.contains(handler_key(name));
                if !registered {
                    self.warn(format!(
                        "no handler registered for tag '{}' (line {})",
                        name, span.line
                    ));
                }
                self.result.resolvers.push(ResolverReference {
                    name: name.clone(),
                    attributes: to_map(attributes),
                    registered,
                    line: span.line,
                });
                if let Some(body) = body {
                    self.visit_nodes(ast, body, scope, locals);
                }
            }
        }
    }

    fn variable(
        &mut self,
        path: &str,
        default: &Option<String>,
        span: &Span,
        scope: &Scope,
        locals: &Locals,
    ) {
        let local = locals.binds(path);
        let found = scope.contains(path);
        if locals.reads_data(path) {
            mark_key_used(&mut self.used, path);
        }

        let missing = !found && !local && default.is_none();
        let suggestions = if missing {
            suggest_similar(path, &scope.all_keys(), &self.state.config.suggestions)
        } else {
            Vec::new()
        };
        if missing && !self.result.missing_variables.iter().any(|m| m == path) {
            self.result.missing_variables.push(path.to_string());
        }

        self.result.variables.push(VariableReference {
            name: path.to_string(),
            default: default.clone(),
            line: span.line,
            column: span.column,
            found,
            local,
            source: ReferenceSource::Data,
            suggestions,
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn include(
        &mut self,
        template: &str,
        params: &Attributes,
        isolate: bool,
        with: Option<&str>,
        span: &Span,
        scope: &Scope,
        locals: &Locals,
    ) {
        if let Some(with) = with {
            if locals.reads_data(with) {
                mark_key_used(&mut self.used, with);
            }
        }
        let target = self.state.templates.get(template);
        self.result.includes.push(IncludeReference {
            template: template.to_string(),
            exists: target.is_some(),
            isolated: isolate,
            params: to_map(params),
            line: span.line,
        });

        let Some(target) = target else {
            self.warn(format!(
                "included template '{}' is not registered (line {})",
                template, span.line
            ));
            return;
        };

        if self.include_stack.iter().any(|name| name == template) {
            let mut chain = self.include_stack.clone();
            chain.push(template.to_string());
            self.error(RenderError::IncludeCycle { chain }.to_string());
            return;
        }
        let max_depth = self.state.config.max_include_depth;
        if self.include_stack.len() >= max_depth {
            self.error(RenderError::IncludeDepthExceeded { depth: max_depth }.to_string());
            return;
        }

        let bindings = include_bindings(params, with, scope);
        let names: Vec<String> = bindings.keys().cloned().collect();
        let (child, child_locals) = if isolate {
            (Scope::isolated(bindings), Locals::isolated(names))
        } else {
            (scope.child(bindings), locals.with(names))
        };

        self.include_stack.push(template.to_string());
        self.visit_nodes(&target, target.children(), &child, &child_locals);
        self.include_stack.pop();
    }

    /// Records condition/switch paths and marks the data ones used.
    fn expression_paths(&mut self, expression: &Expression, locals: &Locals, out: &mut Vec<String>) {
        for path in expression.paths() {
            if locals.reads_data(path) {
                mark_key_used(&mut self.used, path);
            }
            if !out.iter().any(|p| p == path) {
                out.push(path.to_string());
            }
        }
    }

    fn warn(&mut self, message: String) {
        debug!("dry run warning: {}", message);
        self.result.warnings.push(message);
    }

    fn error(&mut self, message: String) {
        if !self.result.errors.contains(&message) {
            self.result.errors.push(message);
        }
    }
}

fn to_map(attributes: &Attributes) -> BTreeMap<String, String> {
    attributes
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::parser::{parse_template, DEFAULT_MAX_NESTING_DEPTH};
    use crate::value::to_data;
    use serde_json::json;
    use std::sync::Arc;

    fn analyze(state: &EngineState, source: &str, data: serde_json::Value) -> DryRunResult {
        let ast = parse_template(source, DEFAULT_MAX_NESTING_DEPTH).unwrap();
        dry_run(state, &ast, None, &RenderContext::new(), &to_data(data))
    }

    fn register(state: &EngineState, name: &str, source: &str) {
        let ast = parse_template(source, DEFAULT_MAX_NESTING_DEPTH).unwrap();
        state.templates.register(name, Arc::new(ast));
    }

    #[test]
    fn test_missing_and_placeholder_output() {
        let state = EngineState::new(EngineConfig::default());
        let result = analyze(&state, r#"Hello {~prompty.var name="user" /~}!"#, json!({}));
        assert!(result.valid);
        assert_eq!(result.output, "Hello {{user}}!");
        assert_eq!(result.missing_variables, vec!["user"]);
        assert_eq!(result.variables[0].column, 7);
    }

    #[test]
    fn test_default_is_never_missing() {
        let state = EngineState::new(EngineConfig::default());
        let result = analyze(
            &state,
            r#"{~prompty.var name="user" default="Guest" /~}"#,
            json!({}),
        );
        assert!(result.missing_variables.is_empty());
        assert_eq!(result.output, "Guest");
    }

    #[test]
    fn test_suggestions_and_unused() {
        let state = EngineState::new(EngineConfig::default());
        let result = analyze(
            &state,
            r#"{~prompty.var name="usre" /~}{~prompty.var name="zzzzzzzzz" /~}"#,
            json!({"user": "Alice", "extra": 1}),
        );
        assert_eq!(result.variables[0].suggestions, vec!["user"]);
        assert!(result.variables[1].suggestions.is_empty());
        assert_eq!(result.missing_variables, vec!["usre", "zzzzzzzzz"]);
        assert_eq!(result.unused_variables, vec!["extra", "user"]);
    }

    #[test]
    fn test_loop_locals_are_not_missing() {
        let state = EngineState::new(EngineConfig::default());
        let result = analyze(
            &state,
            r#"{~prompty.for item="x" index="i" in="items"~}{~prompty.var name="x.title" /~}{~prompty.var name="i" /~}{~/prompty.for~}"#,
            json!({"items": [{"title": "a"}]}),
        );
        assert!(result.missing_variables.is_empty());
        assert!(result.variables.iter().all(|v| v.local && v.found));
        assert_eq!(result.loops[0].source_len, Some(1));
        assert!(result.unused_variables.is_empty());
    }

    #[test]
    fn test_loop_source_warnings() {
        let state = EngineState::new(EngineConfig::default());
        let result = analyze(
            &state,
            r#"{~prompty.for item="x" in="missing"~}{~/prompty.for~}{~prompty.for item="y" in="name"~}{~/prompty.for~}"#,
            json!({"name": "Bo"}),
        );
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 2);
        assert!(!result.loops[0].source_found);
        assert!(result.loops[1].source_found);
        assert_eq!(result.loops[1].source_len, None);
    }

    #[test]
    fn test_conditional_structure_flags() {
        let state = EngineState::new(EngineConfig::default());
        let result = analyze(
            &state,
            r#"{~prompty.if eval="a && b"~}1{~prompty.elseif eval="c"~}2{~prompty.else~}3{~/prompty.if~}"#,
            json!({"a": false}),
        );
        let conditional = &result.conditionals[0];
        assert!(conditional.has_else_if);
        assert!(conditional.has_else);
        assert_eq!(conditional.branch_count, 3);
        assert_eq!(conditional.variables, vec!["a", "b", "c"]);
        assert_eq!(result.output, "3");
    }

    #[test]
    fn test_switch_placeholder() {
        let state = EngineState::new(EngineConfig::default());
        let result = analyze(
            &state,
            r#"{~prompty.switch eval="status"~}{~prompty.case value="a"~}A{~/prompty.case~}{~/prompty.switch~}"#,
            json!({}),
        );
        assert_eq!(result.output, "{{switch:status}}");
        assert_eq!(result.switches[0].cases, vec!["a"]);
        assert!(!result.switches[0].has_default);
    }

    #[test]
    fn test_includes() {
        let state = EngineState::new(EngineConfig::default());
        register(&state, "header", "Header Content");
        let result = analyze(
            &state,
            r#"{~prompty.include template="header" isolate="true" /~}{~prompty.include template="absent" /~}"#,
            json!({}),
        );
        assert!(result.includes[0].exists);
        assert!(result.includes[0].isolated);
        assert!(!result.includes[1].exists);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.valid);
        assert_eq!(result.output, "Header Content");
    }

    #[test]
    fn test_include_params_are_local() {
        let state = EngineState::new(EngineConfig::default());
        register(&state, "card", r#"{~prompty.var name="title" /~}"#);
        let result = analyze(
            &state,
            r#"{~prompty.include template="card" title="Hi" isolate="true" /~}"#,
            json!({}),
        );
        assert!(result.missing_variables.is_empty());
        assert!(result.variables[0].local);
    }

    #[test]
    fn test_isolated_include_does_not_use_caller_keys() {
        let state = EngineState::new(EngineConfig::default());
        register(&state, "card", r#"{~prompty.var name="title" default="x" /~}"#);
        let isolated = analyze(
            &state,
            r#"{~prompty.include template="card" isolate="true" /~}"#,
            json!({"title": "T"}),
        );
        assert_eq!(isolated.unused_variables, vec!["title"]);
        assert_eq!(isolated.output, "x");

        let shared = analyze(
            &state,
            r#"{~prompty.include template="card" /~}"#,
            json!({"title": "T"}),
        );
        assert!(shared.unused_variables.is_empty());
    }

    #[test]
    fn test_loop_cap_is_warning() {
        let state = EngineState::new(EngineConfig {
            max_loop_iterations: 2,
            ..Default::default()
        });
        let result = analyze(
            &state,
            r#"{~prompty.for item="x" in="items"~}{~prompty.var name="x" /~}{~/prompty.for~}"#,
            json!({"items": [1, 2, 3]}),
        );
        assert!(result.valid);
        assert!(result.errors.is_empty());
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("loop iterations exceed the maximum of 2")));
    }

    #[test]
    fn test_include_cycle_is_error() {
        let state = EngineState::new(EngineConfig::default());
        register(&state, "a", r#"{~prompty.include template="b" /~}"#);
        register(&state, "b", r#"{~prompty.include template="a" /~}"#);
        let result = analyze(&state, r#"{~prompty.include template="a" /~}"#, json!({}));
        assert!(!result.valid);
        assert_eq!(result.errors, vec!["include cycle detected: a -> b -> a"]);
    }

    #[test]
    fn test_resolvers_and_messages() {
        let state = EngineState::new(EngineConfig::default());
        let result = analyze(
            &state,
            r#"{~prompty.message role="system" cache="true"~}{~prompty.skills_catalog format="list" /~}{~/prompty.message~}"#,
            json!({}),
        );
        assert_eq!(result.resolvers[0].name, "prompty.skills_catalog");
        assert!(!result.resolvers[0].registered);
        assert_eq!(result.resolvers[0].attributes["format"], "list");
        assert_eq!(result.messages[0].role, Role::System);
        assert!(result.messages[0].cache);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_cancelled_dry_run_reports_error() {
        let state = EngineState::new(EngineConfig::default());
        let ast = parse_template("text", DEFAULT_MAX_NESTING_DEPTH).unwrap();
        let ctx = RenderContext::new();
        ctx.cancel();
        let result = dry_run(&state, &ast, None, &ctx, &Data::new());
        assert!(!result.valid);
        assert_eq!(result.errors, vec!["render cancelled"]);
    }
}
