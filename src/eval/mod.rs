//! Template evaluation.
//!
//! # Core Components
//!
//! ## Evaluator
//! Walks an [`Ast`](crate::ast::Ast) against a [`Scope`] and writes the
//! rendered text. It runs in one of two modes: real execution, and the
//! placeholder-producing dry-run mode used by [`crate::dry_run`].
//!
//! ## Expression Evaluator
//! Evaluates `eval` conditions and switch values against a scope.
//!
//! ## Render Context
//! [`Scope`] holds variable bindings; [`RenderContext`] carries cancellation
//! and the deadline polled at loop iterations, includes and messages.

pub mod context;
pub mod evaluator;
pub mod expression;

use serde::Serialize;
use thiserror::Error;

pub use context::{RenderContext, Scope};
pub(crate) use evaluator::Evaluator;
pub use evaluator::{EvalMode, RenderObserver};

#[derive(Error, Debug, Clone, PartialEq, Serialize)]
pub enum RenderError {
    #[error(
        "undefined variable '{name}' at line {line}, column {column}{}",
        suggestion_hint(.suggestions)
    )]
    UndefinedVariable {
        name: String,
        line: usize,
        column: usize,
        suggestions: Vec<String>,
    },
    #[error("template '{name}' not found (included at line {line})")]
    TemplateNotFound { name: String, line: usize },
    #[error("include cycle detected: {}", .chain.join(" -> "))]
    IncludeCycle { chain: Vec<String> },
    #[error("include depth exceeds the maximum of {depth}")]
    IncludeDepthExceeded { depth: usize },
    #[error("loop iterations exceed the maximum of {limit}")]
    IterationLimitExceeded { limit: usize },
    #[error("message rendered inside another message at line {line}")]
    NestedMessage { line: usize },
    #[error("tag handler '{name}' failed: {message}")]
    Handler { name: String, message: String },
    #[error("render cancelled")]
    Cancelled,
    #[error("render deadline exceeded")]
    DeadlineExceeded,
}

pub type RenderResult<T> = Result<T, RenderError>;

fn suggestion_hint(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (did you mean: {}?)", suggestions.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undefined_variable_message() {
        let error = RenderError::UndefinedVariable {
            name: "usre".to_string(),
            line: 1,
            column: 7,
            suggestions: vec!["user".to_string()],
        };
        assert_eq!(
            error.to_string(),
            "undefined variable 'usre' at line 1, column 7 (did you mean: user?)"
        );
    }

    #[test]
    fn test_cycle_message() {
        let error = RenderError::IncludeCycle {
            chain: vec!["a".to_string(), "b".to_string(), "a".to_string()],
        };
        assert_eq!(error.to_string(), "include cycle detected: a -> b -> a");
    }
}
