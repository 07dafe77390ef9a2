use std::borrow::Cow;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::resolver::{collect_all_keys_in, get_path, split_head};
use crate::value::{Data, Value};

use super::RenderError;

/// Variable bindings visible to a render.
///
/// A child scope shadows its parent; bindings are never written back.
#[derive(Debug, Clone)]
pub struct Scope<'a> {
    values: Cow<'a, Data>,
    parent: Option<&'a Scope<'a>>,
}

impl<'a> Scope<'a> {
    pub fn root(data: &'a Data) -> Self {
        Self {
            values: Cow::Borrowed(data),
            parent: None,
        }
    }

    /// A scope that sees nothing but `values`.
    pub fn isolated(values: Data) -> Scope<'static> {
        Scope {
            values: Cow::Owned(values),
            parent: None,
        }
    }

    pub fn child(&self, values: Data) -> Scope<'_> {
        Scope {
            values: Cow::Owned(values),
            parent: Some(self),
        }
    }

    /// Resolves a dot-path, innermost binding first.
    pub fn get(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return None;
        }
        let (head, tail) = split_head(path);
        let root = self.lookup(head)?;
        match tail {
            Some(tail) => get_path(root, tail),
            None => Some(root),
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    fn lookup(&self, key: &str) -> Option<&Value> {
        match self.values.get(key) {
            Some(value) => Some(value),
            None => self.parent.and_then(|parent| parent.lookup(key)),
        }
    }

    /// Bindings of this level only.
    pub fn values(&self) -> &Data {
        &self.values
    }

    /// Every dot-path visible from this scope, sorted.
    pub fn all_keys(&self) -> Vec<String> {
        let mut keys = BTreeSet::new();
        let mut level = Some(self);
        while let Some(scope) = level {
            keys.extend(collect_all_keys_in(&scope.values));
            level = scope.parent;
        }
        keys.into_iter().collect()
    }
}

/// Cooperative cancellation for a render call.
///
/// Clones share the same cancel flag, so a clone handed to another thread can
/// stop a render in progress.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Context carrying the configured `render_timeout`, if any.
    pub fn from_config(config: &EngineConfig) -> Self {
        match config.render_timeout {
            Some(timeout) => Self::new().with_timeout(timeout),
            None => Self::new(),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn check(&self) -> Result<(), RenderError> {
        if self.is_cancelled() {
            return Err(RenderError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(RenderError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::to_data;
    use serde_json::json;

    #[test]
    fn test_scope_shadowing() {
        let data = to_data(json!({"user": {"name": "Alice"}, "title": "root"}));
        let root = Scope::root(&data);

        let mut bindings = Data::new();
        bindings.insert("title".to_string(), Value::from("child"));
        let child = root.child(bindings);

        assert_eq!(child.get("title"), Some(&Value::from("child")));
        assert_eq!(root.get("title"), Some(&Value::from("root")));
        assert_eq!(child.get("user.name"), Some(&Value::from("Alice")));
        assert_eq!(child.get(""), None);
    }

    #[test]
    fn test_isolated_scope() {
        let mut params = Data::new();
        params.insert("title".to_string(), Value::from("Hi"));
        let scope = Scope::isolated(params);
        assert!(scope.contains("title"));
        assert!(!scope.contains("user"));
    }

    #[test]
    fn test_all_keys_dedup() {
        let data = to_data(json!({"user": {"name": "Alice"}}));
        let root = Scope::root(&data);
        let mut bindings = Data::new();
        bindings.insert("user".to_string(), Value::from("shadow"));
        let child = root.child(bindings);
        assert_eq!(child.all_keys(), vec!["user", "user.name"]);
    }

    #[test]
    fn test_all_keys_across_levels() {
        let data = to_data(json!({"b": 1, "a": {"x": 1, "y": 2}}));
        let root = Scope::root(&data);
        let mut first = Data::new();
        first.insert("a".to_string(), Value::from("0"));
        first.insert("c".to_string(), Value::from("0"));
        let middle = root.child(first);
        let mut second = Data::new();
        second.insert("c".to_string(), Value::from("1"));
        second.insert("b".to_string(), Value::from("1"));
        let inner = middle.child(second);
        assert_eq!(inner.all_keys(), vec!["a", "a.x", "a.y", "b", "c"]);
        assert_eq!(Scope::isolated(Data::new()).all_keys(), Vec::<String>::new());
    }

    #[test]
    fn test_cancel_shared_between_clones() {
        let ctx = RenderContext::new();
        let handle = ctx.clone();
        assert!(ctx.check().is_ok());
        handle.cancel();
        assert_eq!(ctx.check(), Err(RenderError::Cancelled));
    }

    #[test]
    fn test_deadline() {
        let ctx = RenderContext::new().with_deadline(Instant::now());
        assert_eq!(ctx.check(), Err(RenderError::DeadlineExceeded));
        let ctx = RenderContext::new().with_timeout(Duration::from_secs(60));
        assert!(ctx.check().is_ok());
    }

    #[test]
    fn test_from_config() {
        let config = EngineConfig {
            render_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        assert!(RenderContext::from_config(&config).deadline().is_some());
        assert!(RenderContext::from_config(&EngineConfig::default())
            .deadline()
            .is_none());
    }
}
