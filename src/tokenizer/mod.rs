//! # Tokenizer Component
//!
//! The tokenizer performs lexical analysis of template source, splitting it into
//! text runs, tag tokens and literal bodies for the parser.
//!
//! ## Design Principles
//!
//! * **Position Information**: every token carries a [`Span`](token::Span) with
//!   byte offsets and 1-based line/column numbers for error reporting.
//! * **Literal Blocks**: after an opening `prompty.raw` or `prompty.comment` tag the
//!   tokenizer scans for the exact matching closing tag; nothing in between is
//!   tag-parsed.
//! * **Escapes**: `\{~` in text produces a literal `{~`.
//!
//! ## Component Structure
//!
//! * [`token`]: token types and the [`Tokenizer`](token::Tokenizer) driver
//! * [`tag`]: nom parsers for tag heads (`{~name attr="v" /~}`, `{~/name~}`)
//! * [`attribute`]: attribute pairs and the [`Attributes`](attribute::Attributes) container
//! * [`keyword`]: built-in tag names
//!
//! ## Usage Example
//!
//! ```rust
//! use prompty::tokenizer::token::{Token, Tokenizer};
//!
//! let mut tokenizer = Tokenizer::new();
//! let tokens = tokenizer
//!     .tokenize(r#"Hello {~prompty.var name="user" /~}!"#)
//!     .unwrap();
//! assert_eq!(tokens.len(), 3);
//! assert_eq!(tokens[0].token, Token::Text("Hello ".to_string()));
//! ```

pub mod attribute;
pub mod keyword;
pub mod tag;
pub mod token;
