use std::sync::Arc;

use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{Error, PromptyResult};
use crate::parser::{parse_template, ParseError};
use crate::registry::{FnHandler, HandlerError, HandlerRegistry, TagHandler, TagInvocation, TemplateRegistry};
use crate::template::Template;
use crate::tokenizer::keyword::handler_key;

/// State shared by an engine and every template it parsed.
#[derive(Debug)]
pub(crate) struct EngineState {
    pub(crate) config: EngineConfig,
    pub(crate) templates: TemplateRegistry,
    pub(crate) handlers: HandlerRegistry,
}

impl EngineState {
    pub(crate) fn new(config: EngineConfig) -> Self {
        Self {
            config,
            templates: TemplateRegistry::new(),
            handlers: HandlerRegistry::new(),
        }
    }
}

/// Entry point: parses templates and owns the registries they render against.
///
/// Cloning is cheap; clones share registries.
#[derive(Debug, Clone)]
pub struct Engine {
    state: Arc<EngineState>,
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            state: Arc::new(EngineState::new(EngineConfig::default())),
        }
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> PromptyResult<Self> {
        config.validate()?;
        info!(
            "engine created (strategy: {}, missing include: {})",
            config.error_strategy, config.missing_include
        );
        Ok(Self {
            state: Arc::new(EngineState::new(config)),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.state.config
    }

    pub fn parse(&self, source: &str) -> Result<Template, ParseError> {
        self.compile(None, source)
    }

    /// Parses a template that knows its own name, so including itself is
    /// reported as a cycle.
    pub fn parse_named(&self, name: &str, source: &str) -> Result<Template, ParseError> {
        self.compile(Some(name), source)
    }

    fn compile(&self, name: Option<&str>, source: &str) -> Result<Template, ParseError> {
        let ast = parse_template(source, self.state.config.max_nesting_depth)?;
        debug!("compiled template {:?} ({} nodes)", name, ast.len());
        Ok(Template::new(
            Arc::new(ast),
            source,
            name.map(str::to_string),
            self.state.clone(),
        ))
    }

    /// Parses `source` and makes it available to `prompty.include` under
    /// `name`, replacing any previous template of that name.
    pub fn register_template(&self, name: &str, source: &str) -> PromptyResult<()> {
        if name.trim().is_empty() {
            return Err(Error::InvalidTemplateName(name.to_string()));
        }
        let ast = parse_template(source, self.state.config.max_nesting_depth)?;
        if self.state.templates.register(name, Arc::new(ast)).is_some() {
            debug!("replaced template '{}'", name);
        } else {
            debug!("registered template '{}'", name);
        }
        Ok(())
    }

    pub fn unregister_template(&self, name: &str) -> bool {
        self.state.templates.unregister(name).is_some()
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.state.templates.contains(name)
    }

    pub fn template_names(&self) -> Vec<String> {
        self.state.templates.names()
    }

    /// Registers a handler for a resolver tag. `skills_catalog` and
    /// `prompty.skills_catalog` name the same handler.
    pub fn register_tag_handler<H>(&self, name: &str, handler: H)
    where
        H: TagHandler + 'static,
    {
        self.state
            .handlers
            .register(handler_key(name), Arc::new(handler));
    }

    pub fn register_tag_fn<F>(&self, name: &str, f: F)
    where
        F: Fn(&mut TagInvocation<'_>) -> Result<String, HandlerError> + Send + Sync + 'static,
    {
        self.register_tag_handler(name, FnHandler::new(f));
    }

    pub fn unregister_tag_handler(&self, name: &str) -> bool {
        self.state.handlers.unregister(handler_key(name))
    }

    pub fn has_tag_handler(&self, name: &str) -> bool {
        self.state.handlers.contains(handler_key(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ErrorStrategy;

    #[test]
    fn test_new_validates_config() {
        let config = EngineConfig {
            max_include_depth: 0,
            ..Default::default()
        };
        assert!(matches!(Engine::new(config), Err(Error::Config(_))));
        let engine = Engine::new(EngineConfig::default().with_error_strategy(ErrorStrategy::Placeholder)).unwrap();
        assert_eq!(engine.config().error_strategy, ErrorStrategy::Placeholder);
    }

    #[test]
    fn test_register_templates() {
        let engine = Engine::default();
        engine.register_template("header", "Header Content").unwrap();
        assert!(engine.has_template("header"));
        assert_eq!(engine.template_names(), vec!["header"]);
        assert!(matches!(
            engine.register_template("broken", "{~prompty.if eval=\"x\"~}"),
            Err(Error::Parse(_))
        ));
        assert!(!engine.has_template("broken"));
        assert!(matches!(
            engine.register_template(" ", "x"),
            Err(Error::InvalidTemplateName(_))
        ));
        assert!(engine.unregister_template("header"));
        assert!(!engine.unregister_template("header"));
    }

    #[test]
    fn test_clones_share_registries() {
        let engine = Engine::default();
        let clone = engine.clone();
        clone.register_template("shared", "x").unwrap();
        clone.register_tag_fn("prompty.tools_catalog", |_| Ok(String::new()));
        assert!(engine.has_template("shared"));
        assert!(engine.has_tag_handler("tools_catalog"));
        assert!(engine.unregister_tag_handler("prompty.tools_catalog"));
    }

    #[test]
    fn test_engine_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
        assert_send_sync::<Template>();
    }
}
