//! Incremental Server-Sent Events parser.
//!
//! Consumes arbitrary byte chunks — a chunk boundary may fall anywhere, including mid-line
//! or mid-UTF-8-sequence-adjacent — and emits complete events as they become available. The
//! parser never assumes a chunk aligns with an event or even a line; all state needed to
//! resume across chunk boundaries lives in `buffer`/`cursor`.

use mcp_protocol::{Error, Result};

/// Once the read cursor passes this many bytes, the consumed prefix is dropped from the
/// buffer so it doesn't grow unboundedly across many small chunks.
const COMPACTION_THRESHOLD: usize = 4096;

/// Bounds on the parser's internal buffering.
#[derive(Debug, Clone, Copy)]
pub struct SseParserConfig {
    /// Hard cap on the unconsumed-input buffer. A `feed` that would exceed this fails and
    /// leaves the buffer untouched.
    pub max_buffer_size: usize,
    /// A single event's assembled `data` field is dropped (not emitted) if it would exceed
    /// this size; parsing continues with the next event.
    pub max_event_size: usize,
}

impl Default for SseParserConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: 1024 * 1024,
            max_event_size: 256 * 1024,
        }
    }
}

/// One complete Server-Sent Event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    pub id: Option<String>,
    pub event: String,
    pub data: String,
    pub retry: Option<u64>,
}

/// A single-owner, incremental SSE parser. Feed it bytes as they arrive from any source
/// (an HTTP body stream, a test harness splitting a fixture arbitrarily); it returns
/// whatever complete events the new bytes made available.
#[derive(Debug)]
pub struct SseParser {
    config: SseParserConfig,
    buffer: Vec<u8>,
    cursor: usize,
    current_id: Option<String>,
    current_event: Option<String>,
    current_data: Vec<String>,
    current_retry: Option<u64>,
}

impl SseParser {
    #[must_use]
    pub fn new(config: SseParserConfig) -> Self {
        Self {
            config,
            buffer: Vec::new(),
            cursor: 0,
            current_id: None,
            current_event: None,
            current_data: Vec::new(),
            current_retry: None,
        }
    }

    /// Discard all buffered input and in-progress event state. Does not affect config.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
        self.reset_event_state();
    }

    fn reset_event_state(&mut self) {
        self.current_id = None;
        self.current_event = None;
        self.current_data.clear();
        self.current_retry = None;
    }

    /// Feed more bytes, returning every event completed by them (zero, one, or several).
    ///
    /// # Errors
    /// Returns a protocol error, leaving the buffer unmodified, if appending `bytes` would
    /// exceed `max_buffer_size`.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<SseEvent>> {
        if self.buffer.len() + bytes.len() > self.config.max_buffer_size {
            return Err(Error::protocol(format!(
                "sse buffer overflow: {} + {} > {}",
                self.buffer.len(),
                bytes.len(),
                self.config.max_buffer_size
            )));
        }
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        loop {
            let Some(newline_offset) = self.buffer[self.cursor..].iter().position(|&b| b == b'\n')
            else {
                break;
            };
            let line_end = self.cursor + newline_offset;
            let mut line = &self.buffer[self.cursor..line_end];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            let line = String::from_utf8_lossy(line).into_owned();
            self.cursor = line_end + 1;

            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }

            if self.cursor >= COMPACTION_THRESHOLD {
                self.buffer.drain(0..self.cursor);
                self.cursor = 0;
            }
        }
        Ok(events)
    }

    /// Process one already-unterminated line. Returns `Some(event)` when the line was a
    /// blank dispatch line and an event had data recorded.
    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.find(':') {
            Some(idx) => {
                let value = &line[idx + 1..];
                let value = value.strip_prefix(' ').unwrap_or(value);
                (&line[..idx], value)
            }
            None => (line, ""),
        };
        match field {
            "event" => self.current_event = Some(value.to_string()),
            "id" => self.current_id = Some(value.to_string()),
            "data" => self.current_data.push(value.to_string()),
            "retry" => {
                if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
                    if let Ok(ms) = value.parse() {
                        self.current_retry = Some(ms);
                    }
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.current_data.is_empty() {
            self.reset_event_state();
            return None;
        }
        let data = self.current_data.join("\n");
        if data.len() > self.config.max_event_size {
            self.reset_event_state();
            return None;
        }
        let event = SseEvent {
            id: self.current_id.clone(),
            event: self
                .current_event
                .clone()
                .unwrap_or_else(|| "message".to_string()),
            data,
            retry: self.current_retry,
        };
        self.reset_event_state();
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn single_feed_basic_event() {
        let mut parser = SseParser::new(SseParserConfig::default());
        let events = parser.feed(b"data: hello world\n\n").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hello world");
        assert_eq!(events[0].event, "message");
    }

    #[test]
    fn chunking_independence() {
        for chunks in [
            vec!["data: hel", "lo wor", "ld\n\n"],
            vec!["data: hello world\n", "\n"],
            vec!["d", "a", "t", "a", ":", " ", "hello world\n\n"],
        ] {
            let mut parser = SseParser::new(SseParserConfig::default());
            let mut all = Vec::new();
            for chunk in chunks {
                all.extend(parser.feed(chunk.as_bytes()).unwrap());
            }
            assert_eq!(all.len(), 1, "chunking produced {all:?}");
            assert_eq!(all[0].data, "hello world");
        }
    }

    #[test]
    fn multi_line_data_is_newline_joined() {
        let mut parser = SseParser::new(SseParserConfig::default());
        let events = parser.feed(b"data: line one\ndata: line two\n\n").unwrap();
        assert_eq!(events[0].data, "line one\nline two");
    }

    #[test]
    fn comment_lines_are_ignored() {
        let mut parser = SseParser::new(SseParserConfig::default());
        let events = parser
            .feed(b": this is a comment\ndata: hi\n\n")
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hi");
    }

    #[test]
    fn id_and_event_and_retry_fields() {
        let mut parser = SseParser::new(SseParserConfig::default());
        let events = parser
            .feed(b"id: 42\nevent: update\nretry: 5000\ndata: payload\n\n")
            .unwrap();
        assert_eq!(events[0].id, Some("42".to_string()));
        assert_eq!(events[0].event, "update");
        assert_eq!(events[0].retry, Some(5000));
    }

    #[test]
    fn invalid_retry_is_discarded() {
        let mut parser = SseParser::new(SseParserConfig::default());
        let events = parser.feed(b"retry: not-a-number\ndata: hi\n\n").unwrap();
        assert_eq!(events[0].retry, None);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let mut parser = SseParser::new(SseParserConfig::default());
        let events = parser.feed(b"foo: bar\ndata: hi\n\n").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hi");
    }

    #[test]
    fn blank_line_with_no_data_emits_nothing() {
        let mut parser = SseParser::new(SseParserConfig::default());
        let events = parser.feed(b"id: 1\n\ndata: hi\n\n").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, None, "id must not leak across dispatches");
    }

    #[test]
    fn oversized_event_is_dropped_not_erred() {
        let config = SseParserConfig {
            max_buffer_size: 1024 * 1024,
            max_event_size: 8,
        };
        let mut parser = SseParser::new(config);
        let events = parser
            .feed(b"data: way too long for the limit\n\ndata: ok\n\n")
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "ok");
    }

    #[test]
    fn buffer_overflow_leaves_buffer_untouched() {
        let config = SseParserConfig {
            max_buffer_size: 4,
            max_event_size: 1024,
        };
        let mut parser = SseParser::new(config);
        let err = parser.feed(b"too many bytes").unwrap_err();
        assert!(matches!(err, Error::TransportProtocol(_)));
        assert!(parser.buffer.is_empty());
    }

    #[test]
    fn cr_lf_line_endings_are_normalized() {
        let mut parser = SseParser::new(SseParserConfig::default());
        let events = parser.feed(b"data: hi\r\n\r\n").unwrap();
        assert_eq!(events[0].data, "hi");
    }

    #[test]
    fn compaction_resets_cursor_without_losing_in_flight_data() {
        let mut parser = SseParser::new(SseParserConfig::default());
        let padding = "x".repeat(5000);
        let mut events = parser
            .feed(format!(": {padding}\ndata: first\n\n").as_bytes())
            .unwrap();
        assert_eq!(parser.cursor, 0, "compaction should have reset the cursor");
        events.extend(parser.feed(b"data: second\n\n").unwrap());
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "first");
        assert_eq!(events[1].data, "second");
    }
}
