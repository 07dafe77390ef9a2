use serde::Serialize;

/// Namespace shared by every built-in tag.
pub const BUILTIN_NAMESPACE: &str = "prompty.";

/// Built-in tag names. Anything that does not convert into a `TagKind` is
/// handled as a resolver tag.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    strum::EnumString,
    strum::Display,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
pub enum TagKind {
    #[strum(serialize = "prompty.var")]
    Var,
    #[strum(serialize = "prompty.env")]
    Env,
    #[strum(serialize = "prompty.if")]
    If,
    #[strum(serialize = "prompty.elseif")]
    ElseIf,
    #[strum(serialize = "prompty.else")]
    Else,
    #[strum(serialize = "prompty.for")]
    For,
    #[strum(serialize = "prompty.switch")]
    Switch,
    #[strum(serialize = "prompty.case")]
    Case,
    #[strum(serialize = "prompty.casedefault")]
    CaseDefault,
    #[strum(serialize = "prompty.include")]
    Include,
    #[strum(serialize = "prompty.raw")]
    Raw,
    #[strum(serialize = "prompty.comment")]
    Comment,
    #[strum(serialize = "prompty.message")]
    Message,
}

impl TagKind {
    /// Tags whose body is scanned literally, without looking for nested tags.
    pub fn is_literal(&self) -> bool {
        matches!(self, TagKind::Raw | TagKind::Comment)
    }

    /// Tags that must be written as `{~tag ...~} body {~/tag~}`.
    pub fn requires_body(&self) -> bool {
        matches!(
            self,
            TagKind::If
                | TagKind::For
                | TagKind::Switch
                | TagKind::Case
                | TagKind::CaseDefault
                | TagKind::Raw
                | TagKind::Comment
                | TagKind::Message
        )
    }

    /// Branch separators inside an `if` block, valid in either form.
    pub fn is_divider(&self) -> bool {
        matches!(self, TagKind::ElseIf | TagKind::Else)
    }

    /// Name without the `prompty.` namespace.
    pub fn short_name(&self) -> &'static str {
        let name: &'static str = (*self).into();
        name.strip_prefix(BUILTIN_NAMESPACE).unwrap_or(name)
    }
}

/// Key a resolver tag is dispatched under: the tag name without the built-in
/// namespace.
pub fn handler_key(name: &str) -> &str {
    name.strip_prefix(BUILTIN_NAMESPACE).unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_tag_kind_from_name() {
        assert_eq!(TagKind::try_from("prompty.var"), Ok(TagKind::Var));
        assert_eq!(
            TagKind::try_from("prompty.casedefault"),
            Ok(TagKind::CaseDefault)
        );
        assert!(TagKind::try_from("var").is_err());
        assert!(TagKind::try_from("prompty.skills_catalog").is_err());
    }

    #[test]
    fn test_round_trip_names() {
        for kind in TagKind::iter() {
            let name = kind.to_string();
            assert!(name.starts_with(BUILTIN_NAMESPACE));
            assert_eq!(TagKind::try_from(name.as_str()), Ok(kind));
        }
    }

    #[test]
    fn test_short_name_and_handler_key() {
        assert_eq!(TagKind::Message.short_name(), "message");
        for kind in TagKind::iter() {
            assert_eq!(format!("prompty.{}", kind.short_name()), kind.to_string());
        }
        assert_eq!(handler_key("prompty.skills_catalog"), "skills_catalog");
        assert_eq!(handler_key("tools_catalog"), "tools_catalog");
    }
}
