use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag, take_while1},
    character::complete::{char, multispace0, multispace1},
    combinator::{cut, map, opt, value},
    error::context,
    sequence::{delimited, preceded, separated_pair, tuple},
};
use serde::Serialize;

use super::token::ParserResult;

/// Ordered `key="value"` pairs of a tag, in the order they were written.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Attributes(Vec<(String, String)>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Inserts a pair; returns `false` when the key already exists.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        if self.contains(&key) {
            return false;
        }
        self.0.push((key, value.into()));
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy without the given keys.
    pub fn without(&self, keys: &[&str]) -> Attributes {
        Attributes(
            self.0
                .iter()
                .filter(|(k, _)| !keys.contains(&k.as_str()))
                .cloned()
                .collect(),
        )
    }
}

impl std::fmt::Display for Attributes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}=\"{}\"", key, value.escape_default())?;
        }
        Ok(())
    }
}

#[tracing::instrument(level = "debug", skip(input))]
fn parse_attribute_key(input: &str) -> ParserResult<&str> {
    context(
        "attribute key",
        take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '-'),
    )(input)
}

#[tracing::instrument(level = "debug", skip(input))]
pub fn parse_attribute_value(input: &str) -> ParserResult<String> {
    context(
        "attribute value",
        delimited(
            char('"'),
            map(
                opt(escaped_transform(
                    is_not("\\\""),
                    '\\',
                    alt((
                        value("\\", tag("\\")),
                        value("\"", tag("\"")),
                        value("\n", tag("n")),
                        value("\t", tag("t")),
                    )),
                )),
                Option::unwrap_or_default,
            ),
            char('"'),
        ),
    )(input)
}

/// Parses one ` key="value"` pair including its leading whitespace.
#[tracing::instrument(level = "debug", skip(input))]
pub fn parse_attribute(input: &str) -> ParserResult<(String, String)> {
    context(
        "attribute",
        map(
            preceded(
                multispace1,
                separated_pair(
                    parse_attribute_key,
                    tuple((multispace0, char('='), multispace0)),
                    cut(parse_attribute_value),
                ),
            ),
            |(key, value)| (key.to_string(), value),
        ),
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_value() {
        let (rest, value) = parse_attribute_value("\"hello world\" rest").unwrap();
        assert_eq!(value, "hello world");
        assert_eq!(rest, " rest");
    }

    #[test]
    fn test_empty_value() {
        let (rest, value) = parse_attribute_value("\"\"").unwrap();
        assert_eq!(value, "");
        assert_eq!(rest, "");
    }

    #[test]
    fn test_escaped_value() {
        let (_, value) = parse_attribute_value(r#""say \"hi\"\n""#).unwrap();
        assert_eq!(value, "say \"hi\"\n");
    }

    #[test]
    fn test_unterminated_value() {
        assert!(parse_attribute_value("\"open").is_err());
    }

    #[test]
    fn test_attribute_pair() {
        let (rest, (key, value)) = parse_attribute(r#" name = "user" /~}"#).unwrap();
        assert_eq!(key, "name");
        assert_eq!(value, "user");
        assert_eq!(rest, " /~}");
    }

    #[test]
    fn test_attribute_requires_leading_space() {
        assert!(parse_attribute(r#"name="user""#).is_err());
    }

    #[test]
    fn test_attributes_container() {
        let mut attrs = Attributes::new();
        assert!(attrs.insert("template", "header"));
        assert!(attrs.insert("user", "Bob"));
        assert!(!attrs.insert("user", "Eve"));
        assert_eq!(attrs.get("user"), Some("Bob"));
        assert_eq!(attrs.len(), 2);
        let params = attrs.without(&["template"]);
        assert_eq!(params.iter().collect::<Vec<_>>(), vec![("user", "Bob")]);
        assert_eq!(attrs.to_string(), r#"template="header" user="Bob""#);
    }
}
