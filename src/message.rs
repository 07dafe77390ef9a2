//! In-band chat message markers.
//!
//! A `prompty.message` block renders as
//! `MESSAGE_START role:cache:content MESSAGE_END` inside the ordinary text
//! output. [`extract_messages_from_output`] recovers the structured list.
//! The markers use private-use code points and are not expected in real
//! content; a body that contains them will not round-trip.

use serde::{Deserialize, Serialize};

use crate::ast::Role;

pub const MESSAGE_START: &str = "\u{E000}PROMPTY_MSG_START\u{E001}";
pub const MESSAGE_END: &str = "\u{E000}PROMPTY_MSG_END\u{E001}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub cache: bool,
}

/// Wraps rendered message content in markers.
pub fn encode_message(role: Role, cache: bool, content: &str) -> String {
    format!("{}{}:{}:{}{}", MESSAGE_START, role, cache, content, MESSAGE_END)
}

/// Messages in document order; empty when the output carries no markers.
/// Text outside message blocks is dropped and content is trimmed.
pub fn extract_messages_from_output(output: &str) -> Vec<Message> {
    let mut messages = Vec::new();
    let mut rest = output;

    while let Some(start) = rest.find(MESSAGE_START) {
        let after_start = &rest[start + MESSAGE_START.len()..];
        let Some(end) = after_start.find(MESSAGE_END) else {
            tracing::warn!("unterminated message marker in output");
            break;
        };
        let body = &after_start[..end];
        rest = &after_start[end + MESSAGE_END.len()..];

        match decode(body) {
            Some(message) => messages.push(message),
            None => tracing::warn!("skipping malformed message marker"),
        }
    }

    messages
}

fn decode(body: &str) -> Option<Message> {
    let mut parts = body.splitn(3, ':');
    let role = parts.next()?.parse::<Role>().ok()?;
    let cache = parts.next()?.parse::<bool>().ok()?;
    let content = parts.next()?;
    Some(Message {
        role,
        content: content.trim().to_string(),
        cache,
    })
}

/// Whether `output` contains at least one message marker.
pub fn has_messages(output: &str) -> bool {
    output.contains(MESSAGE_START)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_in_order() {
        let output = format!(
            "preamble\n{}\n{}\ntrailer",
            encode_message(Role::System, true, "\n  You are helpful.\n"),
            encode_message(Role::User, false, "Hi: there"),
        );
        let messages = extract_messages_from_output(&output);
        assert_eq!(
            messages,
            vec![
                Message {
                    role: Role::System,
                    content: "You are helpful.".to_string(),
                    cache: true,
                },
                Message {
                    role: Role::User,
                    content: "Hi: there".to_string(),
                    cache: false,
                },
            ]
        );
    }

    #[test]
    fn test_no_markers() {
        assert!(extract_messages_from_output("just text").is_empty());
        assert!(!has_messages("just text"));
    }

    #[test]
    fn test_unterminated_and_malformed() {
        let output = format!(
            "{}bogus{}{}user:false:x",
            MESSAGE_START, MESSAGE_END, MESSAGE_START
        );
        assert!(extract_messages_from_output(&output).is_empty());
    }
}
