use nom::{
    error::{convert_error, VerboseError},
    IResult,
};
use serde::Serialize;
use thiserror::Error;

use super::{
    attribute::Attributes,
    keyword::TagKind,
    tag::{next_tag_boundary, parse_tag, RawTag, ESCAPED_TAG_OPEN, TAG_CLOSE, TAG_OPEN},
};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Plain text between tags, escapes already resolved.
    Text(String),
    Open {
        name: String,
        attributes: Attributes,
        self_closing: bool,
    },
    Close {
        name: String,
    },
    /// Unparsed body of a `raw` or `comment` block.
    Literal(String),
}

#[derive(Debug, Clone)]
pub struct Tokenizer {
    current_position: usize,
    current_line: usize,
    current_column: usize,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer {
    pub fn new() -> Self {
        Self {
            current_position: 0,
            current_line: 1,   // 1-based
            current_column: 1, // 1-based
        }
    }

    #[tracing::instrument(level = "debug", skip(input))]
    pub fn tokenize(&mut self, input: &str) -> TokenizerResult<Vec<TokenSpan>> {
        let mut tokens: Vec<TokenSpan> = Vec::new();
        let mut remaining = input;

        while !remaining.is_empty() {
            let start = self.span_here();

            if remaining.starts_with(ESCAPED_TAG_OPEN) {
                self.update_position(ESCAPED_TAG_OPEN);
                remaining = &remaining[ESCAPED_TAG_OPEN.len()..];
                Self::push_text(&mut tokens, TAG_OPEN, self.finish(start));
                continue;
            }

            if !remaining.starts_with(TAG_OPEN) {
                let end = match next_tag_boundary(remaining) {
                    Some(0) | None => remaining.len(),
                    Some(idx) => idx,
                };
                let text = &remaining[..end];
                self.update_position(text);
                remaining = &remaining[end..];
                Self::push_text(&mut tokens, text, self.finish(start));
                continue;
            }

            let (rest, raw) = match parse_tag(remaining) {
                Ok(parsed) => parsed,
                Err(e) => {
                    let error = self.convert(remaining, e);
                    tracing::error!("{}", error);
                    return Err(error);
                }
            };
            self.update_position(&remaining[..remaining.len() - rest.len()]);
            remaining = rest;

            let token = match raw {
                RawTag::Close { name } => Token::Close {
                    name: name.to_string(),
                },
                RawTag::Open {
                    name,
                    attributes,
                    self_closing,
                } => {
                    let mut attrs = Attributes::new();
                    for (key, value) in attributes {
                        if !attrs.insert(key.clone(), value) {
                            return Err(TokenizerError::ParseError {
                                message: format!("duplicate attribute '{}' on tag {}", key, name),
                                found: name.to_string(),
                                span: start,
                            });
                        }
                    }
                    Token::Open {
                        name: name.to_string(),
                        attributes: attrs,
                        self_closing,
                    }
                }
            };

            let literal_name = match &token {
                Token::Open {
                    name,
                    self_closing: false,
                    ..
                } if TagKind::try_from(name.as_str()).is_ok_and(|kind| kind.is_literal()) => {
                    Some(name.clone())
                }
                _ => None,
            };
            tokens.push(TokenSpan {
                token,
                span: self.finish(start.clone()),
            });

            if let Some(name) = literal_name {
                remaining = self.scan_literal(remaining, &name, start, &mut tokens)?;
            }
        }

        Ok(tokens)
    }

    /// Consumes everything up to the exact closing tag of a literal block and
    /// emits it as a `Literal` followed by the `Close` token.
    fn scan_literal<'a>(
        &mut self,
        input: &'a str,
        name: &str,
        open: Span,
        tokens: &mut Vec<TokenSpan>,
    ) -> TokenizerResult<&'a str> {
        let closing = format!("{}/{}{}", TAG_OPEN, name, TAG_CLOSE);
        let Some(end) = input.find(&closing) else {
            return Err(TokenizerError::ParseError {
                message: format!("unclosed {} block, expected {}", name, closing),
                found: name.to_string(),
                span: open,
            });
        };

        let start = self.span_here();
        let content = &input[..end];
        self.update_position(content);
        tokens.push(TokenSpan {
            token: Token::Literal(content.to_string()),
            span: self.finish(start),
        });

        let start = self.span_here();
        self.update_position(&closing);
        tokens.push(TokenSpan {
            token: Token::Close {
                name: name.to_string(),
            },
            span: self.finish(start),
        });

        Ok(&input[end + closing.len()..])
    }

    fn push_text(tokens: &mut Vec<TokenSpan>, text: &str, span: Span) {
        if let Some(TokenSpan {
            token: Token::Text(existing),
            span: existing_span,
        }) = tokens.last_mut()
        {
            existing.push_str(text);
            existing_span.end = span.end;
            return;
        }
        tokens.push(TokenSpan {
            token: Token::Text(text.to_string()),
            span,
        });
    }

    fn span_here(&self) -> Span {
        Span {
            start: self.current_position,
            end: self.current_position,
            line: self.current_line,
            column: self.current_column,
        }
    }

    fn finish(&self, mut span: Span) -> Span {
        span.end = self.current_position;
        span
    }

    fn convert(&self, remaining: &str, e: nom::Err<VerboseError<&str>>) -> TokenizerError {
        let found = remaining.chars().take(20).collect::<String>();
        let span = Span {
            start: self.current_position,
            end: self.current_position + 1,
            line: self.current_line,
            column: self.current_column,
        };
        let message = match e {
            nom::Err::Incomplete(e) => format!("incomplete tag, {:?}", e),
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                let expected = e
                    .errors
                    .iter()
                    .find_map(|(_, kind)| match kind {
                        nom::error::VerboseErrorKind::Context(ctx) => Some(*ctx),
                        _ => None,
                    })
                    .unwrap_or("tag");
                tracing::debug!("tag error trace: {}", convert_error(remaining, e.clone()));
                format!("malformed {}", expected)
            }
        };
        TokenizerError::ParseError {
            message,
            found,
            span,
        }
    }

    fn update_position(&mut self, text: &str) {
        for c in text.chars() {
            self.current_position += c.len_utf8();
            if c == '\n' {
                self.current_line += 1;
                self.current_column = 1;
            } else {
                self.current_column += 1;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct TokenSpan {
    pub token: Token,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "line: {}, column: {}, start: {}, end: {}",
            self.line, self.column, self.start, self.end
        )
    }
}

pub type ParserResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

pub type TokenizerResult<T> = Result<T, TokenizerError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TokenizerError {
    #[error("Parse error: {message} at position {span}")]
    ParseError {
        message: String,
        found: String,
        span: Span,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &str) -> Vec<Token> {
        Tokenizer::new()
            .tokenize(input)
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn test_plain_text() {
        assert_eq!(
            tokens("Hello, world!\nBye."),
            vec![Token::Text("Hello, world!\nBye.".to_string())]
        );
    }

    #[test]
    fn test_empty_input() {
        assert!(tokens("").is_empty());
    }

    #[test]
    fn test_text_and_tag() {
        let result = tokens(r#"Hello {~prompty.var name="user" /~}!"#);
        assert_eq!(result.len(), 3);
        assert_eq!(result[0], Token::Text("Hello ".to_string()));
        assert!(matches!(
            &result[1],
            Token::Open { name, self_closing: true, attributes }
                if name == "prompty.var" && attributes.get("name") == Some("user")
        ));
        assert_eq!(result[2], Token::Text("!".to_string()));
    }

    #[test]
    fn test_escaped_open_is_text() {
        assert_eq!(
            tokens(r"Use \{~prompty.var~} to print"),
            vec![Token::Text("Use {~prompty.var~} to print".to_string())]
        );
    }

    #[test]
    fn test_raw_block_is_literal() {
        let result = tokens(r#"{~prompty.raw~}{~prompty.var name="x" /~}{~/prompty.if~}{~/prompty.raw~}after"#);
        assert_eq!(result.len(), 4);
        assert_eq!(
            result[1],
            Token::Literal(r#"{~prompty.var name="x" /~}{~/prompty.if~}"#.to_string())
        );
        assert_eq!(
            result[2],
            Token::Close {
                name: "prompty.raw".to_string()
            }
        );
        assert_eq!(result[3], Token::Text("after".to_string()));
    }

    #[test]
    fn test_unclosed_raw_block() {
        let err = Tokenizer::new()
            .tokenize("text\n  {~prompty.comment~} never closed")
            .unwrap_err();
        let TokenizerError::ParseError { span, message, .. } = err;
        assert_eq!(span.line, 2);
        assert_eq!(span.column, 3);
        assert!(message.contains("unclosed"));
    }

    #[test]
    fn test_positions() {
        let spans = Tokenizer::new()
            .tokenize("line one\nline {~prompty.var name=\"a\" /~}\n")
            .unwrap();
        assert_eq!(spans[1].span.line, 2);
        assert_eq!(spans[1].span.column, 6);
        assert_eq!(spans[2].span.line, 2);
    }

    #[test]
    fn test_malformed_tag_position() {
        let err = Tokenizer::new()
            .tokenize("ok\nab {~prompty.var name=oops /~}")
            .unwrap_err();
        let TokenizerError::ParseError { span, .. } = err;
        assert_eq!((span.line, span.column), (2, 4));
    }

    #[test]
    fn test_duplicate_attribute() {
        let err = Tokenizer::new()
            .tokenize(r#"{~prompty.var name="a" name="b" /~}"#)
            .unwrap_err();
        assert!(err.to_string().contains("duplicate attribute"));
    }

    #[test]
    fn test_unicode_columns() {
        let spans = Tokenizer::new()
            .tokenize("héllo {~prompty.var name=\"a\" /~}")
            .unwrap();
        assert_eq!(spans[1].span.column, 7);
        assert_eq!(spans[1].span.start, "héllo ".len());
    }
}
