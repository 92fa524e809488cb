//! Separation of an agent reply into structured data and spoken text.
//!
//! Agents sometimes open their answer with a JSON array (route steps, place
//! cards) before the sentence meant for the listener. [`split`] peels that
//! block off. It is a heuristic, not a parser: it never fails, and anything it
//! does not recognize is treated as spoken text.

use regex::Regex;
use serde::de::IgnoredAny;
use std::sync::LazyLock;
use waypoint_types::SplitReply;

/// Leading bracketed block, then the rest of the text.
static LEADING_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*(\[.*?\])\s*(.*)$").expect("leading block pattern is valid")
});

/// Splits `text` into an optional structured prefix and the spoken remainder.
///
/// The spoken part is always trimmed. The prefix is kept verbatim.
pub fn split(text: &str) -> SplitReply {
    if let Some((prefix, rest)) = leading_json_array(text) {
        return SplitReply {
            structured_prefix: Some(prefix.to_string()),
            spoken: rest.trim().to_string(),
        };
    }

    match LEADING_BLOCK.captures(text) {
        Some(caps) => SplitReply {
            structured_prefix: caps.get(1).map(|m| m.as_str().to_string()),
            spoken: caps
                .get(2)
                .map_or("", |m| m.as_str())
                .trim()
                .to_string(),
        },
        None => SplitReply {
            structured_prefix: None,
            spoken: text.trim().to_string(),
        },
    }
}

/// Reads one complete JSON array at the start of `text`.
///
/// Nested brackets inside the array stay part of the prefix, which the lazy
/// pattern alone would cut short.
fn leading_json_array(text: &str) -> Option<(&str, &str)> {
    let body = text.trim_start();
    if !body.starts_with('[') {
        return None;
    }

    let mut values = serde_json::Deserializer::from_str(body).into_iter::<IgnoredAny>();
    match values.next() {
        Some(Ok(_)) => {
            let end = values.byte_offset();
            Some(body.split_at(end))
        }
        _ => None,
    }
}
