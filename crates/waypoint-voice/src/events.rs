//! Parsing of the agent's newline-delimited event stream.
//!
//! Every line is classified on its own. Only lines carrying a decodable
//! payload with a content delta produce a [`StreamFragment`]; everything else
//! (blank separators, keep-alive comments, the end marker, garbage) is
//! dropped without interrupting the stream.

use serde::Deserialize;
use waypoint_types::StreamFragment;

/// Prefix of a data-bearing event line.
pub const EVENT_PREFIX: &str = "data: ";

/// Payload some agents send as the final data line.
const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// What a single raw line turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventLine {
    /// A content delta to append.
    Fragment(StreamFragment),
    /// An empty line (event separator).
    Blank,
    /// An SSE comment such as `: ping`.
    KeepAlive,
    /// The `data: [DONE]` terminator.
    Done,
    /// A non-empty line without the data prefix (`event:`, `id:`, ...).
    Unprefixed,
    /// A decodable payload that carries no content delta.
    NoContent,
    /// A data line whose payload could not be decoded.
    Malformed(String),
}

impl EventLine {
    pub fn into_fragment(self) -> Option<StreamFragment> {
        match self {
            Self::Fragment(fragment) => Some(fragment),
            _ => None,
        }
    }
}

/// Classifies one line of the event stream.
///
/// A single trailing `\r` is ignored so CRLF streams behave like LF streams.
pub fn classify_line(raw: &str) -> EventLine {
    let line = raw.strip_suffix('\r').unwrap_or(raw);

    if line.trim().is_empty() {
        return EventLine::Blank;
    }
    if line.starts_with(':') {
        return EventLine::KeepAlive;
    }
    let Some(payload) = line.strip_prefix(EVENT_PREFIX) else {
        return EventLine::Unprefixed;
    };
    if payload.trim() == DONE_MARKER {
        return EventLine::Done;
    }

    match serde_json::from_str::<ChunkPayload>(payload) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta)
            .and_then(|delta| delta.content)
            .map(|content| EventLine::Fragment(StreamFragment { content }))
            .unwrap_or(EventLine::NoContent),
        Err(e) => EventLine::Malformed(e.to_string()),
    }
}

/// Extracts the content delta of one line, if it has one.
pub fn parse_line(raw: &str) -> Option<StreamFragment> {
    classify_line(raw).into_fragment()
}

/// Longest line kept by [`LineBuffer::new`] (1 MiB).
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Reassembles lines from arbitrarily split byte chunks.
///
/// Splitting happens on raw bytes, so a multi-byte UTF-8 character cut in
/// half by the transport is rejoined before decoding. Lines longer than the
/// limit are dropped whole and counted; see [`LineBuffer::take_overflowed`].
#[derive(Debug)]
pub struct LineBuffer {
    pending: Vec<u8>,
    max_line: usize,
    /// Skipping the rest of an oversized line until its `\n`.
    discarding: bool,
    overflowed: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line,
            discarding: false,
            overflowed: 0,
        }
    }

    /// Appends a chunk and returns every line it completed, without the
    /// trailing `\n`.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut chunk = chunk;

        if self.discarding {
            match chunk.iter().position(|&b| b == b'\n') {
                Some(end) => {
                    self.discarding = false;
                    chunk = &chunk[end + 1..];
                }
                None => return lines,
            }
        }
        self.pending.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            if end - start > self.max_line {
                self.overflowed += 1;
            } else {
                lines.push(String::from_utf8_lossy(&self.pending[start..end]).into_owned());
            }
            start = end + 1;
        }
        self.pending.drain(..start);

        if self.pending.len() > self.max_line {
            self.pending.clear();
            self.discarding = true;
            self.overflowed += 1;
        }
        lines
    }

    /// Returns how many oversized lines were dropped since the last call.
    pub fn take_overflowed(&mut self) -> usize {
        std::mem::take(&mut self.overflowed)
    }

    /// Returns the unterminated remainder once the stream has ended.
    pub fn finish(self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.pending).into_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_line(content: &str) -> String {
        format!(
            "data: {}",
            serde_json::json!({ "choices": [{ "delta": { "content": content } }] })
        )
    }

    #[test]
    fn extracts_content_delta() {
        let fragment = parse_line(&data_line(" Hello there")).unwrap();
        assert_eq!(fragment.content, " Hello there");
    }

    #[test]
    fn empty_delta_is_a_fragment() {
        let fragment = parse_line(&data_line("")).unwrap();
        assert_eq!(fragment.content, "");
    }

    #[test]
    fn missing_or_null_content_is_not_a_fragment() {
        assert_eq!(
            classify_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            EventLine::NoContent
        );
        assert_eq!(
            classify_line(r#"data: {"choices":[{"delta":{"content":null}}]}"#),
            EventLine::NoContent
        );
        assert_eq!(classify_line(r#"data: {"choices":[]}"#), EventLine::NoContent);
        assert_eq!(classify_line(r#"data: {}"#), EventLine::NoContent);
    }

    #[test]
    fn only_the_first_choice_counts() {
        let line = r#"data: {"choices":[{"delta":{"content":"a"}},{"delta":{"content":"b"}}]}"#;
        assert_eq!(parse_line(line).unwrap().content, "a");
    }

    #[test]
    fn non_data_lines_are_skipped() {
        assert_eq!(classify_line(""), EventLine::Blank);
        assert_eq!(classify_line("\r"), EventLine::Blank);
        assert_eq!(classify_line(": keep-alive"), EventLine::KeepAlive);
        assert_eq!(classify_line("event: message"), EventLine::Unprefixed);
        assert_eq!(classify_line("data: [DONE]"), EventLine::Done);
        assert_eq!(parse_line("id: 7"), None);
    }

    #[test]
    fn prefix_must_include_the_space() {
        let line = r#"data:{"choices":[{"delta":{"content":"x"}}]}"#;
        assert_eq!(classify_line(line), EventLine::Unprefixed);
    }

    #[test]
    fn undecodable_payload_is_malformed() {
        assert!(matches!(classify_line("data: {not json"), EventLine::Malformed(_)));
        assert!(matches!(classify_line("data: 42"), EventLine::Malformed(_)));
        assert!(matches!(
            classify_line(r#"data: {"choices":[{"delta":{"content":7}}]}"#),
            EventLine::Malformed(_)
        ));
        assert_eq!(parse_line("data: {not json"), None);
    }

    #[test]
    fn crlf_line_endings_are_accepted() {
        let line = format!("{}\r", data_line("x"));
        assert_eq!(parse_line(&line).unwrap().content, "x");
    }

    #[test]
    fn malformed_lines_do_not_disturb_accumulation() {
        let lines = [
            data_line(r#"[{"type":"demo"}]"#),
            "data: {\"choices\": [".to_string(),
            data_line(" Hello there"),
        ];
        let text: String = lines
            .iter()
            .filter_map(|line| parse_line(line))
            .map(|fragment| fragment.content)
            .collect();
        assert_eq!(text, r#"[{"type":"demo"}] Hello there"#);
    }

    #[test]
    fn line_buffer_joins_split_chunks() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"data: {\"a\"").is_empty());
        assert_eq!(buffer.push(b":1}\n\ndata: x"), vec!["data: {\"a\":1}", ""]);
        assert_eq!(buffer.push(b"y\n"), vec!["data: xy"]);
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn line_buffer_rejoins_split_utf8() {
        let text = "data: café\n".as_bytes();
        let cut = text.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(&text[..cut]).is_empty());
        assert_eq!(buffer.push(&text[cut..]), vec!["data: café"]);
    }

    #[test]
    fn line_buffer_returns_unterminated_tail() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"data: tail").is_empty());
        assert_eq!(buffer.finish().as_deref(), Some("data: tail"));
    }

    #[test]
    fn oversized_line_is_dropped_and_counted() {
        let mut buffer = LineBuffer::with_max_line(8);

        assert!(buffer.push(b"data: 0123").is_empty());
        // Still inside the dropped line; nothing accumulates.
        assert!(buffer.push(b"456789").is_empty());
        assert!(buffer.pending.is_empty());

        let lines = buffer.push(b"abc\nshort\n");
        assert_eq!(lines, vec!["short".to_string()]);
        assert_eq!(buffer.take_overflowed(), 1);
        assert_eq!(buffer.take_overflowed(), 0);
    }

    #[test]
    fn oversized_complete_line_in_one_chunk_is_dropped() {
        let mut buffer = LineBuffer::with_max_line(8);
        let lines = buffer.push(b"ok\nway too long for the limit\nfine\n");
        assert_eq!(lines, vec!["ok".to_string(), "fine".to_string()]);
        assert_eq!(buffer.take_overflowed(), 1);
        assert_eq!(buffer.finish(), None);
    }
}
