use std::sync::Arc;

use tracing::instrument;

use crate::ast::Ast;
use crate::dry_run::{dry_run, DryRunResult};
use crate::engine::EngineState;
use crate::error::PromptyResult;
use crate::eval::{EvalMode, Evaluator, RenderContext, Scope};
use crate::explain::{explain, ExplainResult};
use crate::message::{extract_messages_from_output, has_messages, Message};
use crate::value::Data;

/// A parsed template. Immutable and cheap to clone; render calls keep all of
/// their state private, so one template can be rendered from many threads.
#[derive(Debug, Clone)]
pub struct Template {
    ast: Arc<Ast>,
    source: Arc<str>,
    name: Option<String>,
    state: Arc<EngineState>,
}

impl Template {
    pub(crate) fn new(
        ast: Arc<Ast>,
        source: &str,
        name: Option<String>,
        state: Arc<EngineState>,
    ) -> Self {
        Self {
            ast,
            source: Arc::from(source),
            name,
            state,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &Ast {
        &self.ast
    }

    /// Renders the template. On error no partial output is returned.
    #[instrument(level = "debug", skip(self, ctx, data), fields(name = ?self.name))]
    pub fn execute(&self, ctx: &RenderContext, data: &Data) -> PromptyResult<String> {
        let output = Evaluator::new(&self.state, ctx, EvalMode::Execute).render(
            &self.ast,
            self.name(),
            &Scope::root(data),
        )?;
        Ok(output)
    }

    /// Renders the template and returns its `prompty.message` blocks.
    pub fn execute_messages(&self, ctx: &RenderContext, data: &Data) -> PromptyResult<Vec<Message>> {
        let output = self.execute(ctx, data)?;
        if !has_messages(&output) {
            return Ok(Vec::new());
        }
        Ok(extract_messages_from_output(&output))
    }

    #[instrument(level = "debug", skip(self, ctx, data), fields(name = ?self.name))]
    pub fn dry_run(&self, ctx: &RenderContext, data: &Data) -> DryRunResult {
        dry_run(&self.state, &self.ast, self.name(), ctx, data)
    }

    #[instrument(level = "debug", skip(self, ctx, data), fields(name = ?self.name))]
    pub fn explain(&self, ctx: &RenderContext, data: &Data) -> ExplainResult {
        explain(&self.state, &self.ast, self.name(), ctx, data)
    }
}
