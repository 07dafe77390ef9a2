//! Shared registries: named templates for `prompty.include` and handlers for
//! resolver tags.
//!
//! Both are `DashMap`s, so renders on many threads can read while templates or
//! handlers are being registered.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use crate::ast::Ast;
use crate::eval::{RenderError, RenderResult, Scope};
use crate::tokenizer::attribute::Attributes;
use crate::value::Value;

#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: Arc<DashMap<String, Arc<Ast>>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a template.
    pub fn register(&self, name: &str, ast: Arc<Ast>) -> Option<Arc<Ast>> {
        self.templates.insert(name.to_string(), ast)
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<Ast>> {
        self.templates.remove(name).map(|(_, ast)| ast)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Ast>> {
        self.templates.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .templates
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Everything a resolver tag handler may look at.
pub struct TagInvocation<'a> {
    /// Tag name as written in the template.
    pub name: &'a str,
    pub attributes: &'a Attributes,
    pub scope: &'a Scope<'a>,
    body: &'a mut dyn FnMut() -> RenderResult<String>,
}

impl<'a> TagInvocation<'a> {
    pub(crate) fn new(
        name: &'a str,
        attributes: &'a Attributes,
        scope: &'a Scope<'a>,
        body: &'a mut dyn FnMut() -> RenderResult<String>,
    ) -> Self {
        Self {
            name,
            attributes,
            scope,
            body,
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key)
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        self.scope.get(path)
    }

    /// Renders the tag body with the current scope. Self-closing tags render
    /// an empty string.
    pub fn render_body(&mut self) -> Result<String, HandlerError> {
        (self.body)().map_err(|e| Box::new(e) as HandlerError)
    }
}

impl fmt::Debug for TagInvocation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TagInvocation")
            .field("name", &self.name)
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}

/// Renders a custom tag such as `{~prompty.skills_catalog /~}`.
pub trait TagHandler: Send + Sync {
    fn render(&self, invocation: &mut TagInvocation<'_>) -> Result<String, HandlerError>;
}

/// Adapts a closure into a [`TagHandler`].
pub struct FnHandler<F>(F);

impl<F> FnHandler<F>
where
    F: Fn(&mut TagInvocation<'_>) -> Result<String, HandlerError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> TagHandler for FnHandler<F>
where
    F: Fn(&mut TagInvocation<'_>) -> Result<String, HandlerError> + Send + Sync,
{
    fn render(&self, invocation: &mut TagInvocation<'_>) -> Result<String, HandlerError> {
        (self.0)(invocation)
    }
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<DashMap<String, Arc<dyn TagHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, handler: Arc<dyn TagHandler>) {
        self.handlers.insert(name.to_string(), handler);
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TagHandler>> {
        self.handlers.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

/// Maps a handler failure to a render error, keeping render errors raised by
/// the body callback intact.
pub(crate) fn handler_failure(name: &str, error: HandlerError) -> RenderError {
    match error.downcast::<RenderError>() {
        Ok(render) => *render,
        Err(other) => RenderError::Handler {
            name: name.to_string(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_template, DEFAULT_MAX_NESTING_DEPTH};
    use crate::value::Data;

    fn ast(source: &str) -> Arc<Ast> {
        Arc::new(parse_template(source, DEFAULT_MAX_NESTING_DEPTH).unwrap())
    }

    #[test]
    fn test_template_registry() {
        let registry = TemplateRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.register("header", ast("Header")).is_none());
        assert!(registry.register("footer", ast("Footer")).is_none());
        assert!(registry.register("header", ast("Header v2")).is_some());
        assert!(registry.contains("header"));
        assert_eq!(registry.names(), vec!["footer", "header"]);
        assert!(registry.unregister("footer").is_some());
        assert!(registry.get("footer").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_clones_share_storage() {
        let registry = TemplateRegistry::new();
        let clone = registry.clone();
        clone.register("shared", ast("x"));
        assert!(registry.contains("shared"));
    }

    #[test]
    fn test_fn_handler() {
        let handlers = HandlerRegistry::new();
        handlers.register(
            "shout",
            Arc::new(FnHandler::new(|inv| {
                let body = inv.render_body()?;
                Ok(body.to_uppercase())
            })),
        );
        let handler = handlers.get("shout").unwrap();

        let data = Data::new();
        let scope = Scope::root(&data);
        let attributes = Attributes::new();
        let mut body = || -> RenderResult<String> { Ok("hello".to_string()) };
        let mut invocation = TagInvocation::new("shout", &attributes, &scope, &mut body);
        assert_eq!(handler.render(&mut invocation).unwrap(), "HELLO");
        assert_eq!(handlers.names(), vec!["shout"]);
    }

    #[test]
    fn test_handler_failure_keeps_render_errors() {
        let error: HandlerError = Box::new(RenderError::Cancelled);
        assert_eq!(handler_failure("x", error), RenderError::Cancelled);
        let error: HandlerError = "catalog offline".into();
        assert_eq!(
            handler_failure("skills", error),
            RenderError::Handler {
                name: "skills".to_string(),
                message: "catalog offline".to_string()
            }
        );
    }
}
