//! Incremental Server-Sent-Events parser.
//!
//! [`SseParser`] is fed raw response bytes as they arrive and returns every
//! frame completed by that chunk. Chunks may split anywhere, including
//! between the `\r` and `\n` of a CRLF terminator. The parser keeps only the
//! current unterminated line and the frame under construction.

use std::borrow::Cow;

// ── SseFrame ─────────────────────────────────────────────────────────

/// One dispatched SSE event. Absent fields are `None`, distinct from an
/// empty value (`Some("")`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: Option<String>,
    /// Reconnection time in milliseconds.
    pub retry: Option<u64>,
}

impl SseFrame {
    fn is_empty(&self) -> bool {
        self.id.is_none() && self.event.is_none() && self.data.is_none() && self.retry.is_none()
    }
}

// ── SseParser ────────────────────────────────────────────────────────

/// Line/field state machine for the `text/event-stream` grammar.
#[derive(Debug, Default)]
pub struct SseParser {
    line: Vec<u8>,
    pending: SseFrame,
    last_was_cr: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk of bytes and return the frames it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        for &byte in chunk {
            match byte {
                // Second half of a CRLF pair.
                b'\n' if self.last_was_cr => self.last_was_cr = false,
                b'\n' | b'\r' => {
                    self.last_was_cr = byte == b'\r';
                    if let Some(frame) = self.end_line() {
                        frames.push(frame);
                    }
                }
                _ => {
                    self.last_was_cr = false;
                    self.line.push(byte);
                }
            }
        }
        frames
    }

    /// Drop any partial line or frame, e.g. after a connection reset.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn end_line(&mut self) -> Option<SseFrame> {
        if self.line.is_empty() {
            return self.dispatch();
        }

        let bytes = std::mem::take(&mut self.line);
        let line: Cow<'_, str> = String::from_utf8_lossy(&bytes);
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line.as_ref(), ""),
        };

        match field {
            "id" => self.pending.id = Some(value.to_owned()),
            "event" => self.pending.event = Some(value.to_owned()),
            "data" => match &mut self.pending.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.pending.data = Some(value.to_owned()),
            },
            "retry" => {
                if let Ok(millis) = value.parse() {
                    self.pending.retry = Some(millis);
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let frame = std::mem::take(&mut self.pending);
        (!frame.is_empty()).then_some(frame)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const STATUS: &[u8] = b"id: 1\nevent: STATUS\ndata: {}\n\n";

    fn status_frame() -> SseFrame {
        SseFrame {
            id: Some("1".into()),
            event: Some("STATUS".into()),
            data: Some("{}".into()),
            retry: None,
        }
    }

    #[test]
    fn single_chunk_yields_one_frame() {
        let mut parser = SseParser::new();
        assert_eq!(parser.feed(STATUS), vec![status_frame()]);
    }

    #[test]
    fn chunk_boundaries_do_not_matter() {
        for size in 1..STATUS.len() {
            let mut parser = SseParser::new();
            let frames: Vec<_> = STATUS
                .chunks(size)
                .flat_map(|chunk| parser.feed(chunk))
                .collect();
            assert_eq!(frames, vec![status_frame()], "chunk size {size}");
        }
    }

    #[test]
    fn crlf_counts_as_one_terminator_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"event: KEEP-ALIVE\r").is_empty());
        // A lone \n after \r must not end the frame.
        assert!(parser.feed(b"\n").is_empty());
        let frames = parser.feed(b"\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("KEEP-ALIVE"));
        assert_eq!(frames[0].id, None);
    }

    #[test]
    fn lone_cr_terminates_lines() {
        let mut parser = SseParser::new();
        let frames = parser.feed(b"id: 7\revent: NOTIFY\r\r");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id.as_deref(), Some("7"));
        assert_eq!(frames[0].event.as_deref(), Some("NOTIFY"));
    }

    #[test]
    fn data_lines_are_joined_with_newline() {
        let mut parser = SseParser::new();
        let frames = parser.feed(b"data: first\ndata:second\ndata\n\n");
        assert_eq!(frames[0].data.as_deref(), Some("first\nsecond\n"));
    }

    #[test]
    fn comments_and_unknown_fields_are_ignored() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b": ping\nfoo: bar\n\n").is_empty());
        let frames = parser.feed(b":comment\nid: 2\n\n");
        assert_eq!(frames[0].id.as_deref(), Some("2"));
        assert_eq!(frames[0].data, None);
    }

    #[test]
    fn empty_value_is_present() {
        let mut parser = SseParser::new();
        let frames = parser.feed(b"id:\nevent: PAIRED\n\n");
        assert_eq!(frames[0].id.as_deref(), Some(""));
    }

    #[test]
    fn only_one_leading_space_is_stripped() {
        let mut parser = SseParser::new();
        let frames = parser.feed(b"data:  padded\n\n");
        assert_eq!(frames[0].data.as_deref(), Some(" padded"));
    }

    #[test]
    fn retry_must_be_numeric() {
        let mut parser = SseParser::new();
        let frames = parser.feed(b"retry: 1500\n\nretry: soon\nid: 3\n\n");
        assert_eq!(frames[0].retry, Some(1500));
        assert_eq!(frames[1].retry, None);
        assert_eq!(frames[1].id.as_deref(), Some("3"));
    }

    #[test]
    fn reset_discards_partial_frame() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"id: 9\nevent: STA").is_empty());
        parser.reset();
        assert_eq!(parser.feed(STATUS), vec![status_frame()]);
    }

    #[test]
    fn consecutive_blank_lines_yield_nothing() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"\n\n\r\n\r\r").is_empty());
    }
}
