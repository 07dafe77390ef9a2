//! Dot-path access into nested data.
//!
//! Paths are `.`-separated keys (`user.profile.name`). Numeric segments index
//! into sequences (`items.0.title`).

use std::collections::HashSet;

use strsim::levenshtein;

use crate::config::SuggestionConfig;
use crate::value::{Data, Value};

/// Resolves `path` against a value. `None` for an empty path or when any
/// segment is missing.
pub fn get_path<'v>(data: &'v Value, path: &str) -> Option<&'v Value> {
    if path.is_empty() {
        return None;
    }
    path.split('.').try_fold(data, descend)
}

/// Resolves `path` against a top level data mapping.
pub fn get_path_in<'v>(data: &'v Data, path: &str) -> Option<&'v Value> {
    if path.is_empty() {
        return None;
    }
    let (head, tail) = split_head(path);
    let root = data.get(head)?;
    match tail {
        Some(tail) => get_path(root, tail),
        None => Some(root),
    }
}

pub fn has_path(data: &Value, path: &str) -> bool {
    get_path(data, path).is_some()
}

pub fn has_path_in(data: &Data, path: &str) -> bool {
    get_path_in(data, path).is_some()
}

pub(crate) fn descend<'v>(value: &'v Value, segment: &str) -> Option<&'v Value> {
    match value {
        Value::Mapping(map) => map.get(segment),
        Value::Sequence(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

/// Splits `a.b.c` into `("a", Some("b.c"))`.
pub fn split_head(path: &str) -> (&str, Option<&str>) {
    match path.split_once('.') {
        Some((head, tail)) => (head, Some(tail)),
        None => (path, None),
    }
}

/// Every dot-path reachable through nested mappings, parents before children.
pub fn collect_all_keys(data: &Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    collect_into(data, prefix, &mut keys);
    keys
}

/// [`collect_all_keys`] over a top level data mapping.
pub fn collect_all_keys_in(data: &Data) -> Vec<String> {
    let mut keys = Vec::new();
    for (key, value) in data {
        keys.push(key.clone());
        collect_into(value, key, &mut keys);
    }
    keys
}

fn collect_into(value: &Value, prefix: &str, keys: &mut Vec<String>) {
    if let Value::Mapping(map) = value {
        for (key, child) in map {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", prefix, key)
            };
            keys.push(path.clone());
            collect_into(child, &path, keys);
        }
    }
}

/// Marks `path` and every ancestor prefix as used.
pub fn mark_key_used(used: &mut HashSet<String>, path: &str) {
    if path.is_empty() {
        return;
    }
    for (idx, _) in path.match_indices('.') {
        used.insert(path[..idx].to_string());
    }
    used.insert(path.to_string());
}

/// Closest known keys to an unresolved path by Levenshtein distance.
pub fn suggest_similar(target: &str, keys: &[String], config: &SuggestionConfig) -> Vec<String> {
    if target.is_empty() || config.max_suggestions == 0 {
        return Vec::new();
    }
    let mut scored: Vec<_> = keys
        .iter()
        .filter(|key| key.as_str() != target)
        .map(|key| (levenshtein(target, key), key))
        .filter(|(distance, _)| *distance <= config.max_distance)
        .collect();

    scored.sort_by(|(da, ka), (db, kb)| da.cmp(db).then_with(|| ka.cmp(kb)));
    scored.dedup_by(|(_, a), (_, b)| a == b);

    scored
        .into_iter()
        .take(config.max_suggestions)
        .map(|(_, key)| key.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::to_data;
    use serde_json::json;

    fn sample() -> Data {
        to_data(json!({
            "user": {"profile": {"name": "Alice"}, "age": 30},
            "items": [{"title": "first"}, {"title": "second"}],
            "flag": false
        }))
    }

    #[test]
    fn test_get_path() {
        let data = sample();
        assert_eq!(
            get_path_in(&data, "user.profile.name"),
            Some(&Value::String("Alice".to_string()))
        );
        assert_eq!(get_path_in(&data, "flag"), Some(&Value::Bool(false)));
        assert_eq!(
            get_path_in(&data, "items.1.title"),
            Some(&Value::String("second".to_string()))
        );
        assert_eq!(get_path_in(&data, "items.5.title"), None);
        assert_eq!(get_path_in(&data, "user.missing"), None);
        assert_eq!(get_path_in(&data, "user.age.deeper"), None);
        assert_eq!(get_path_in(&data, ""), None);
    }

    #[test]
    fn test_get_path_on_null() {
        assert_eq!(get_path(&Value::Null, "a"), None);
        assert_eq!(get_path(&Value::Null, ""), None);
    }

    #[test]
    fn test_has_path() {
        let data = sample();
        assert!(has_path_in(&data, "user.profile"));
        assert!(!has_path_in(&data, "user.profile.email"));
        let root = Value::Mapping(data);
        assert!(has_path(&root, "flag"));
    }

    #[test]
    fn test_collect_all_keys() {
        let keys = collect_all_keys_in(&sample());
        assert_eq!(
            keys,
            vec![
                "flag",
                "items",
                "user",
                "user.age",
                "user.profile",
                "user.profile.name"
            ]
        );
        let nested = collect_all_keys(&Value::Mapping(sample()), "root");
        assert!(nested.contains(&"root.user.profile.name".to_string()));
    }

    #[test]
    fn test_mark_key_used() {
        let mut used = HashSet::new();
        mark_key_used(&mut used, "user.profile.name");
        assert!(used.contains("user"));
        assert!(used.contains("user.profile"));
        assert!(used.contains("user.profile.name"));
        assert_eq!(used.len(), 3);
    }

    #[test]
    fn test_suggestions() {
        let config = SuggestionConfig::default();
        let keys = vec!["user".to_string()];
        assert_eq!(suggest_similar("usre", &keys, &config), vec!["user"]);
        assert!(suggest_similar("zzzzzzzzz", &keys, &config).is_empty());
    }

    #[test]
    fn test_suggestions_ordering_and_cap() {
        let config = SuggestionConfig {
            max_distance: 3,
            max_suggestions: 2,
        };
        let keys: Vec<String> = ["name", "names", "game", "nam", "other"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(suggest_similar("nme", &keys, &config), vec!["name", "game"]);
    }
}
