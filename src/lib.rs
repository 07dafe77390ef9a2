//! # prompty
//!
//! A tag-based templating engine for building LLM prompts. Templates mix plain
//! text with `{~prompty.tag ...~}` markup for variables, conditionals, loops,
//! switches, includes and chat message blocks.
//!
//! ```rust
//! use prompty::{Engine, RenderContext};
//! use prompty::value::to_data;
//! use serde_json::json;
//!
//! let engine = Engine::default();
//! let template = engine
//!     .parse(r#"Hello {~prompty.var name="user" default="there" /~}!"#)
//!     .unwrap();
//!
//! let data = to_data(json!({"user": "Alice"}));
//! let output = template.execute(&RenderContext::new(), &data).unwrap();
//! assert_eq!(output, "Hello Alice!");
//! ```
//!
//! Besides plain execution a template offers two diagnostic modes:
//! [`Template::dry_run`] validates structure and data without failing on
//! missing values, and [`Template::explain`] runs the real render while
//! recording every variable resolution.

pub mod ast;
pub mod config;
pub mod dry_run;
pub mod engine;
pub mod error;
pub mod eval;
pub mod explain;
pub mod expression;
pub mod message;
pub mod parser;
pub mod registry;
pub mod resolver;
pub mod template;
pub mod tokenizer;
pub mod value;

// Re-exports
pub use ast::{Ast, NodeId, Role};
pub use config::{EngineConfig, ErrorStrategy, MissingIncludePolicy, SuggestionConfig};
pub use dry_run::DryRunResult;
pub use engine::Engine;
pub use error::{ConfigError, Error, PromptyResult};
pub use eval::{RenderContext, RenderError};
pub use explain::{AccessKind, ExplainResult, VariableAccess};
pub use message::{extract_messages_from_output, Message};
pub use parser::ParseError;
pub use registry::{FnHandler, HandlerError, TagHandler, TagInvocation};
pub use template::Template;
pub use value::{Data, Value};

/// Parses `source` with a default engine.
pub fn parse(source: &str) -> Result<Template, ParseError> {
    Engine::default().parse(source)
}

#[cfg(test)]
#[ctor::ctor]
fn init_tests() {
    // テストの前に一度だけ実行したい処理
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
