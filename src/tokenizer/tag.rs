use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, multispace0},
    combinator::{recognize, value},
    error::context,
    multi::{many0, many0_count},
    sequence::pair,
};

use super::{attribute::parse_attribute, token::ParserResult};

pub const TAG_OPEN: &str = "{~";
pub const TAG_CLOSE: &str = "~}";
pub const TAG_SELF_CLOSE: &str = "/~}";
pub const ESCAPED_TAG_OPEN: &str = "\\{~";

/// A tag head as written in the source, before any structural checks.
#[derive(Debug, Clone, PartialEq)]
pub enum RawTag<'a> {
    Open {
        name: &'a str,
        attributes: Vec<(String, String)>,
        self_closing: bool,
    },
    Close {
        name: &'a str,
    },
}

fn name_segment(input: &str) -> ParserResult<&str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_' || c == '-'),
    ))(input)
}

/// `prompty.var`, `skills_catalog`, `custom.tools.list`
#[tracing::instrument(level = "debug", skip(input))]
pub fn parse_tag_name(input: &str) -> ParserResult<&str> {
    context(
        "tag name",
        recognize(pair(
            name_segment,
            many0_count(pair(char('.'), name_segment)),
        )),
    )(input)
}

#[tracing::instrument(level = "debug", skip(input))]
fn parse_closing_tag(input: &str) -> ParserResult<RawTag<'_>> {
    let (input, _) = char('/')(input)?;
    let (input, _) = multispace0(input)?;
    let (input, name) = parse_tag_name(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = context("closing tag terminator", tag(TAG_CLOSE))(input)?;
    Ok((input, RawTag::Close { name }))
}

#[tracing::instrument(level = "debug", skip(input))]
fn parse_opening_tag(input: &str) -> ParserResult<RawTag<'_>> {
    let (input, name) = parse_tag_name(input)?;
    let (input, attributes) = many0(parse_attribute)(input)?;
    let (input, _) = multispace0(input)?;
    let (input, self_closing) = context(
        "tag terminator",
        alt((
            value(true, tag(TAG_SELF_CLOSE)),
            value(false, tag(TAG_CLOSE)),
        )),
    )(input)?;
    Ok((
        input,
        RawTag::Open {
            name,
            attributes,
            self_closing,
        },
    ))
}

/// Parses a complete tag starting at `{~`.
#[tracing::instrument(level = "debug", skip(input))]
pub fn parse_tag(input: &str) -> ParserResult<RawTag<'_>> {
    let (input, _) = tag(TAG_OPEN)(input)?;
    let (input, _) = multispace0(input)?;
    context("tag", alt((parse_closing_tag, parse_opening_tag)))(input)
}

/// Byte offset of the next tag opener or escaped opener, if any.
pub fn next_tag_boundary(text: &str) -> Option<usize> {
    text.find(TAG_OPEN).map(|idx| {
        if idx > 0 && text.as_bytes()[idx - 1] == b'\\' {
            idx - 1
        } else {
            idx
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_closing_tag() {
        let (rest, tag) = parse_tag(r#"{~prompty.var name="user" default="Guest" /~} tail"#).unwrap();
        assert_eq!(rest, " tail");
        assert_eq!(
            tag,
            RawTag::Open {
                name: "prompty.var",
                attributes: vec![
                    ("name".to_string(), "user".to_string()),
                    ("default".to_string(), "Guest".to_string()),
                ],
                self_closing: true,
            }
        );
    }

    #[test]
    fn test_block_open_tag() {
        let (_, tag) = parse_tag(r#"{~prompty.if eval="user.admin"~}"#).unwrap();
        assert!(matches!(
            tag,
            RawTag::Open { name: "prompty.if", self_closing: false, ref attributes }
                if attributes.len() == 1
        ));
    }

    #[test]
    fn test_closing_tag() {
        let (rest, tag) = parse_tag("{~/prompty.for~}x").unwrap();
        assert_eq!(tag, RawTag::Close { name: "prompty.for" });
        assert_eq!(rest, "x");
    }

    #[test]
    fn test_tag_with_whitespace_and_newlines() {
        let (_, tag) = parse_tag("{~ prompty.for\n  item=\"x\"\n  in=\"items\"\n~}").unwrap();
        assert!(matches!(tag, RawTag::Open { name: "prompty.for", .. }));
    }

    #[test]
    fn test_malformed_tags() {
        assert!(parse_tag("{~~}").is_err());
        assert!(parse_tag(r#"{~prompty.var name="x""#).is_err());
        assert!(parse_tag(r#"{~prompty.var name=x /~}"#).is_err());
        assert!(parse_tag("{~/prompty.if").is_err());
    }

    #[test]
    fn test_next_tag_boundary() {
        assert_eq!(next_tag_boundary("plain text"), None);
        assert_eq!(next_tag_boundary("ab{~x~}"), Some(2));
        assert_eq!(next_tag_boundary("ab\\{~x"), Some(2));
    }
}
