//! Wire protocol for the event stream.
//!
//! Frames follow the `text/event-stream` format: `event: <name>` and
//! `data: <json>` lines terminated by a blank line. Comment lines start
//! with `:` and carry no payload; the server sends `:ok` right after a
//! subscription opens so the client's open signal fires promptly.

use bytes::Bytes;
use serde::Serialize;

/// Encode a named event with a JSON payload as a single frame.
pub fn event_frame<T: Serialize>(event: &str, payload: &T) -> Result<Bytes, serde_json::Error> {
    let data = serde_json::to_string(payload)?;
    Ok(Bytes::from(format!("event: {event}\ndata: {data}\n\n")))
}

/// Encode a comment frame (ignored by event listeners, keeps the pipe warm).
pub fn comment_frame(text: &str) -> Bytes {
    Bytes::from(format!(":{text}\n\n"))
}

/// One parsed event from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental parser for the client side of the stream.
///
/// Accepts arbitrary byte chunks (frames may be split anywhere, including
/// mid-line) and yields complete events at each blank-line boundary.
/// Comment lines and unknown fields are skipped; a frame without an
/// `event:` field defaults to the name `message`.
#[derive(Debug, Default)]
pub struct FrameParser {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\r', '\n']);

            if line.is_empty() {
                // blank line terminates the pending frame; frames with no
                // data lines carry nothing to dispatch
                if !self.data.is_empty() {
                    out.push(SseEvent {
                        event: self
                            .event
                            .take()
                            .unwrap_or_else(|| "message".to_string()),
                        data: self.data.join("\n"),
                    });
                }
                self.event = None;
                self.data.clear();
                continue;
            }

            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };

            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                // id/retry and anything else are not part of this protocol
                _ => {}
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_frame_layout() {
        let frame = event_frame("notification", &serde_json::json!({"id": "1"})).unwrap();
        assert_eq!(&frame[..], b"event: notification\ndata: {\"id\":\"1\"}\n\n");
    }

    #[test]
    fn test_comment_frame_layout() {
        assert_eq!(&comment_frame("ok")[..], b":ok\n\n");
    }

    #[test]
    fn test_parse_single_frame() {
        let mut parser = FrameParser::new();
        let events = parser.push(b"event: notification\ndata: {\"id\":\"1\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "notification");
        assert_eq!(events[0].data, "{\"id\":\"1\"}");
    }

    #[test]
    fn test_parse_across_chunk_boundary() {
        let mut parser = FrameParser::new();
        assert!(parser.push(b"event: notif").is_empty());
        assert!(parser.push(b"ication\ndata: {\"id\"").is_empty());
        let events = parser.push(b":\"1\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "notification");
        assert_eq!(events[0].data, "{\"id\":\"1\"}");
    }

    #[test]
    fn test_parse_multiple_frames_in_one_chunk() {
        let mut parser = FrameParser::new();
        let events = parser.push(b"data: 1\n\ndata: 2\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "1");
        assert_eq!(events[1].data, "2");
    }

    #[test]
    fn test_comments_ignored() {
        let mut parser = FrameParser::new();
        assert!(parser.push(b":ok\n\n").is_empty());
        let events = parser.push(b":ping\nevent: x\ndata: {}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "x");
    }

    #[test]
    fn test_crlf_line_endings() {
        let mut parser = FrameParser::new();
        let events = parser.push(b"event: x\r\ndata: {}\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "x");
        assert_eq!(events[0].data, "{}");
    }

    #[test]
    fn test_multiline_data_joined() {
        let mut parser = FrameParser::new();
        let events = parser.push(b"data: a\ndata: b\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "a\nb");
    }

    #[test]
    fn test_unknown_fields_skipped() {
        let mut parser = FrameParser::new();
        let events = parser.push(b"id: 7\nretry: 500\ndata: x\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }
}
