use serde::Serialize;
use thiserror::Error;

use crate::eval::RenderError;
use crate::parser::ParseError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Render error: {0}")]
    Render(#[from] RenderError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Invalid template name: '{0}'")]
    InvalidTemplateName(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type PromptyResult<T> = Result<T, Error>;

// エラー作成用のヘルパー関数
impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }

    /// The render error, when this is one.
    pub fn as_render(&self) -> Option<&RenderError> {
        match self {
            Error::Render(e) => Some(e),
            _ => None,
        }
    }
}

impl Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("failed to read config {path}: {message}")]
    Read { path: String, message: String },
    #[error("failed to parse config: {message}")]
    Parse { message: String },
    #[error("invalid value for {field}: {message}")]
    Invalid { field: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_parse_error() {
        let error: Error = ParseError::new("unclosed tag prompty.if", 3, 7).into();
        assert!(matches!(error, Error::Parse(_)));
        assert_eq!(
            error.to_string(),
            "Parse error: unclosed tag prompty.if at line 3, column 7"
        );
    }

    #[test]
    fn test_serializes_as_display_string() {
        let error: Error = RenderError::Cancelled.into();
        let json = serde_json::to_string(&error).unwrap();
        assert_eq!(json, "\"Render error: render cancelled\"");
        assert_eq!(error.as_render(), Some(&RenderError::Cancelled));
    }
}
