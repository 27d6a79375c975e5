//! Streaming response support
//!
//! Server-Sent Events (SSE) parsing for streaming chat completions.

use serde::Deserialize;

/// A delta update in a streaming response
#[derive(Debug, Clone, Deserialize)]
pub struct StreamDelta {
    /// Content fragment
    pub content: Option<String>,
}

/// A streaming choice (partial response)
#[derive(Debug, Clone, Deserialize)]
pub struct StreamChoice {
    /// Incremental content update
    pub delta: StreamDelta,
    /// Reason for finishing (only in the final chunk)
    pub finish_reason: Option<String>,
}

/// A chunk from a streaming response
#[derive(Debug, Clone, Deserialize)]
pub struct StreamChunk {
    /// List of streaming choices
    pub choices: Vec<StreamChoice>,
}

impl StreamChunk {
    /// Get the content fragment from this chunk (if any)
    pub fn content(&self) -> Option<&str> {
        self.choices.first()?.delta.content.as_deref()
    }

    /// Check if this is the final chunk
    pub fn is_done(&self) -> bool {
        self.choices
            .first()
            .and_then(|c| c.finish_reason.as_ref())
            .is_some()
    }
}

/// Event from streaming response parsing
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A content chunk was received
    Chunk(StreamChunk),
    /// Stream completed
    Done,
}

/// Accumulates raw response bytes and yields complete SSE lines
///
/// Chunk boundaries do not align with line boundaries, so partial lines stay
/// buffered until their newline arrives. `flush` hands back whatever remains
/// when the byte stream ends without a trailing newline.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: String,
}

impl LineBuffer {
    /// Append bytes, returning every line completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut lines = Vec::new();
        while let Some(newline_pos) = self.buffer.find('\n') {
            let line = self.buffer[..newline_pos].to_string();
            self.buffer.drain(..=newline_pos);
            lines.push(line);
        }
        lines
    }

    /// Take the residual partial line, if any
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }
}

/// Parse a Server-Sent Events line into a StreamEvent
///
/// Empty lines, comments, and unparseable payloads are skipped; a skipped
/// payload is logged but never terminates the stream.
pub fn parse_sse_line(line: &str) -> Option<StreamEvent> {
    let line = line.trim();

    // Skip empty lines and comments
    if line.is_empty() || line.starts_with(':') {
        return None;
    }

    // Handle "data: [DONE]" marker
    if line == "data: [DONE]" {
        return Some(StreamEvent::Done);
    }

    // Parse "data: {json}" lines
    if let Some(data) = line.strip_prefix("data: ") {
        match serde_json::from_str::<StreamChunk>(data) {
            Ok(chunk) => Some(StreamEvent::Chunk(chunk)),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unparseable stream chunk");
                None
            }
        }
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sse_content_chunk() {
        let line = r#"data: {"id":"gen-123","object":"chat.completion.chunk","created":1234567890,"model":"o4-mini","choices":[{"index":0,"delta":{"content":"Hello"},"finish_reason":null}]}"#;

        let event = parse_sse_line(line).unwrap();
        match event {
            StreamEvent::Chunk(chunk) => {
                assert_eq!(chunk.content(), Some("Hello"));
                assert!(!chunk.is_done());
            }
            _ => panic!("Expected Chunk event"),
        }
    }

    #[test]
    fn test_parse_sse_done() {
        let event = parse_sse_line("data: [DONE]").unwrap();
        assert!(matches!(event, StreamEvent::Done));
    }

    #[test]
    fn test_parse_sse_empty_line_and_comment() {
        assert!(parse_sse_line("").is_none());
        assert!(parse_sse_line("   ").is_none());
        assert!(parse_sse_line(": keep-alive").is_none());
    }

    #[test]
    fn test_parse_sse_final_chunk() {
        let line = r#"data: {"choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#;

        let event = parse_sse_line(line).unwrap();
        match event {
            StreamEvent::Chunk(chunk) => {
                assert!(chunk.is_done());
                assert_eq!(chunk.content(), None);
            }
            _ => panic!("Expected Chunk event"),
        }
    }

    #[test]
    fn test_parse_sse_garbage_is_skipped() {
        assert!(parse_sse_line("data: {not json").is_none());
        assert!(parse_sse_line("event: ping").is_none());
    }

    #[test]
    fn test_line_buffer_splits_lines_across_pushes() {
        let mut buffer = LineBuffer::default();

        assert!(buffer.push(b"data: {\"cho").is_empty());
        let lines = buffer.push(b"ices\":[]}\ndata: second\n");
        assert_eq!(lines, vec!["data: {\"choices\":[]}", "data: second"]);
        assert!(buffer.flush().is_none());
    }

    #[test]
    fn test_line_buffer_flushes_line_without_trailing_newline() {
        let mut buffer = LineBuffer::default();

        let line = r#"data: {"choices":[{"index":0,"delta":{"content":"final"},"finish_reason":null}]}"#;
        assert!(buffer.push(line.as_bytes()).is_empty());

        // The byte stream ended; the last data line must still be parseable
        let residual = buffer.flush().unwrap();
        match parse_sse_line(&residual).unwrap() {
            StreamEvent::Chunk(chunk) => assert_eq!(chunk.content(), Some("final")),
            _ => panic!("Expected Chunk event"),
        }
        assert!(buffer.flush().is_none());
    }

    #[test]
    fn test_line_buffer_flush_ignores_whitespace() {
        let mut buffer = LineBuffer::default();
        buffer.push(b"data: [DONE]\n  ");
        assert!(buffer.flush().is_none());
    }
}
