//! Condition expressions used by `eval` attributes.
//!
//! ```text
//! user.isAdmin && len(items) > 0
//! status == 'active' || !exists(user.suspended)
//! ```

use core::fmt;

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, multispace0, satisfy},
    combinator::{all_consuming, map, map_res, not, opt, peek, recognize, value},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use crate::value::Value;

/// Deepest nesting of parentheses and `!` prefixes accepted in one expression.
pub const MAX_EXPRESSION_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expression {
    Literal(Value),
    Path(String),
    Not(Box<Expression>),
    BinaryOp {
        op: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    FunctionCall {
        function: Function,
        arguments: Vec<Expression>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum BinaryOperator {
    #[strum(serialize = "==")]
    Equal,
    #[strum(serialize = "!=")]
    NotEqual,
    #[strum(serialize = "<")]
    LessThan,
    #[strum(serialize = "<=")]
    LessThanEqual,
    #[strum(serialize = ">")]
    GreaterThan,
    #[strum(serialize = ">=")]
    GreaterThanEqual,
    #[strum(serialize = "&&")]
    And,
    #[strum(serialize = "||")]
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::EnumString, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Function {
    Len,
    Exists,
    Contains,
}

impl Function {
    fn arity(&self) -> usize {
        match self {
            Function::Len | Function::Exists => 1,
            Function::Contains => 2,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid expression '{input}': {message}")]
pub struct ExpressionError {
    pub input: String,
    pub message: String,
}

impl Expression {
    /// Every data path the expression reads, in source order.
    pub fn paths(&self) -> Vec<&str> {
        let mut paths = Vec::new();
        self.collect_paths(&mut paths);
        paths
    }

    fn collect_paths<'a>(&'a self, paths: &mut Vec<&'a str>) {
        match self {
            Expression::Literal(_) => {}
            Expression::Path(path) => paths.push(path),
            Expression::Not(inner) => inner.collect_paths(paths),
            Expression::BinaryOp { left, right, .. } => {
                left.collect_paths(paths);
                right.collect_paths(paths);
            }
            Expression::FunctionCall { arguments, .. } => {
                for argument in arguments {
                    argument.collect_paths(paths);
                }
            }
        }
    }

    /// The bare path when the expression is nothing but a path.
    pub fn as_path(&self) -> Option<&str> {
        match self {
            Expression::Path(path) => Some(path),
            _ => None,
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(Value::String(s)) => write!(f, "'{}'", s),
            Expression::Literal(Value::Null) => write!(f, "null"),
            Expression::Literal(v) => write!(f, "{}", v),
            Expression::Path(path) => write!(f, "{}", path),
            Expression::Not(inner) => write!(f, "!{}", inner),
            Expression::BinaryOp { op, left, right } => write!(f, "({} {} {})", left, op, right),
            Expression::FunctionCall {
                function,
                arguments,
            } => {
                write!(f, "{}(", function)?;
                for (i, argument) in arguments.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", argument)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Parses a complete `eval` attribute value.
#[instrument(level = "debug")]
pub fn parse_expression(input: &str) -> Result<Expression, ExpressionError> {
    if input.trim().is_empty() {
        return Err(ExpressionError {
            input: input.to_string(),
            message: "empty expression".to_string(),
        });
    }
    let depth = nesting_depth(input);
    if depth > MAX_EXPRESSION_DEPTH {
        return Err(ExpressionError {
            input: input.to_string(),
            message: format!(
                "expression nested too deeply ({} levels, maximum {})",
                depth, MAX_EXPRESSION_DEPTH
            ),
        });
    }
    match all_consuming(ws(parse_logical_or))(input) {
        Ok((_, expression)) => Ok(expression),
        Err(e) => Err(ExpressionError {
            input: input.to_string(),
            message: match e {
                nom::Err::Error(e) | nom::Err::Failure(e) => {
                    format!("unexpected input at '{}'", e.input)
                }
                nom::Err::Incomplete(_) => "incomplete expression".to_string(),
            },
        }),
    }
}

// 論理OR (||)
#[instrument(level = "debug", skip(input))]
fn parse_logical_or(input: &str) -> IResult<&str, Expression> {
    let (input, first) = parse_logical_and(input)?;
    let (input, rest) = many0(preceded(ws(tag("||")), parse_logical_and))(input)?;

    let result = rest
        .into_iter()
        .fold(first, |left, right| Expression::BinaryOp {
            op: BinaryOperator::Or,
            left: Box::new(left),
            right: Box::new(right),
        });

    Ok((input, result))
}

// 論理AND (&&)
#[instrument(level = "debug", skip(input))]
fn parse_logical_and(input: &str) -> IResult<&str, Expression> {
    let (input, first) = parse_comparison(input)?;
    let (input, rest) = many0(preceded(ws(tag("&&")), parse_comparison))(input)?;

    let result = rest
        .into_iter()
        .fold(first, |left, right| Expression::BinaryOp {
            op: BinaryOperator::And,
            left: Box::new(left),
            right: Box::new(right),
        });

    Ok((input, result))
}

// 比較演算子 (==, !=, <, >, <=, >=)
#[instrument(level = "debug", skip(input))]
fn parse_comparison(input: &str) -> IResult<&str, Expression> {
    let (input, first) = parse_unary(input)?;
    let (input, rest) = opt(tuple((
        ws(alt((
            tag("=="),
            tag("!="),
            tag("<="),
            tag(">="),
            tag("<"),
            tag(">"),
        ))),
        parse_unary,
    )))(input)?;

    match rest {
        Some((op, right)) => {
            let op = match op {
                "==" => BinaryOperator::Equal,
                "!=" => BinaryOperator::NotEqual,
                "<" => BinaryOperator::LessThan,
                ">" => BinaryOperator::GreaterThan,
                "<=" => BinaryOperator::LessThanEqual,
                ">=" => BinaryOperator::GreaterThanEqual,
                _ => unreachable!(),
            };
            Ok((
                input,
                Expression::BinaryOp {
                    op,
                    left: Box::new(first),
                    right: Box::new(right),
                },
            ))
        }
        None => Ok((input, first)),
    }
}

#[instrument(level = "debug", skip(input))]
fn parse_unary(input: &str) -> IResult<&str, Expression> {
    alt((
        map(
            preceded(ws(terminated(char('!'), not(peek(char('='))))), parse_unary),
            |inner| Expression::Not(Box::new(inner)),
        ),
        parse_primary,
    ))(input)
}

// 基本式
#[instrument(level = "debug", skip(input))]
fn parse_primary(input: &str) -> IResult<&str, Expression> {
    ws(alt((
        map(parse_literal, Expression::Literal),
        parse_function_call,
        delimited(ws(char('(')), parse_logical_or, ws(char(')'))),
        parse_path,
    )))(input)
}

#[instrument(level = "debug", skip(input))]
fn parse_function_call(input: &str) -> IResult<&str, Expression> {
    let (rest, (function, arguments)) = tuple((
        map_res(identifier, Function::try_from),
        delimited(
            ws(char('(')),
            separated_list0(ws(char(',')), parse_logical_or),
            ws(char(')')),
        ),
    ))(input)?;

    if arguments.len() != function.arity() {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        )));
    }

    Ok((
        rest,
        Expression::FunctionCall {
            function,
            arguments,
        },
    ))
}

#[instrument(level = "debug", skip(input))]
fn parse_path(input: &str) -> IResult<&str, Expression> {
    map(
        recognize(pair(
            identifier,
            many0(preceded(char('.'), alt((identifier, digit1)))),
        )),
        |path: &str| Expression::Path(path.to_string()),
    )(input)
}

#[instrument(level = "debug", skip(input))]
fn parse_literal(input: &str) -> IResult<&str, Value> {
    alt((
        map(parse_f64_strict, Value::Float),
        map(parse_i64, Value::Integer),
        map(
            delimited(char('\''), take_while(|c| c != '\''), char('\'')),
            |s: &str| Value::String(s.to_string()),
        ),
        map(
            delimited(char('"'), take_while(|c| c != '"'), char('"')),
            |s: &str| Value::String(s.to_string()),
        ),
        value(Value::Bool(true), keyword("true")),
        value(Value::Bool(false), keyword("false")),
        value(Value::Null, keyword("null")),
    ))(input)
}

fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(
        tag(word),
        not(peek(satisfy(|c: char| c.is_alphanumeric() || c == '_'))),
    )
}

#[instrument(level = "debug", skip(input))]
fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_'),
    ))(input)
}

#[instrument(level = "debug", skip(input))]
fn parse_f64_strict(input: &str) -> IResult<&str, f64> {
    map_res(
        recognize(tuple((
            opt(char('-')),
            take_while1(|c: char| c.is_ascii_digit()),
            tuple((char('.'), take_while1(|c: char| c.is_ascii_digit()))),
        ))),
        |s: &str| s.parse::<f64>(),
    )(input)
}

#[instrument(level = "debug", skip(input))]
fn parse_i64(input: &str) -> IResult<&str, i64> {
    map_res(recognize(pair(opt(char('-')), digit1)), |s: &str| {
        s.parse::<i64>()
    })(input)
}

/// Deepest combined nesting of parentheses and pending `!` prefixes, checked
/// before parsing since the parser recurses once per level.
fn nesting_depth(input: &str) -> usize {
    // pending `!` count for each open parenthesis level
    let mut levels: Vec<usize> = vec![0];
    let mut depth = 0;
    let mut max = 0;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                for next in chars.by_ref() {
                    if next == c {
                        break;
                    }
                }
                settle(&mut levels, &mut depth);
            }
            '!' if chars.peek() != Some(&'=') => {
                if let Some(pending) = levels.last_mut() {
                    *pending += 1;
                }
                depth += 1;
            }
            '(' => {
                levels.push(0);
                depth += 1;
            }
            ')' => {
                if levels.len() > 1 {
                    if let Some(pending) = levels.pop() {
                        depth -= pending + 1;
                    }
                }
                settle(&mut levels, &mut depth);
            }
            c if c.is_whitespace() => {}
            _ => settle(&mut levels, &mut depth),
        }
        max = max.max(depth);
    }
    max
}

/// An operand closes the `!` chain open at the current level.
fn settle(levels: &mut [usize], depth: &mut usize) {
    if let Some(pending) = levels.last_mut() {
        *depth -= *pending;
        *pending = 0;
    }
}

/// 空白文字のスキップ
fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}
