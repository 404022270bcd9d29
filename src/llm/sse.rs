// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Minimal server-sent-events parser for provider streams.
//!
//! All three provider APIs stream `data: <json>` lines. This parser handles
//! chunk boundaries landing mid-line and multi-line flushes; event names and
//! comments are ignored because the payloads are self-describing JSON.

/// Incremental SSE `data:` payload extractor.
#[derive(Default)]
pub(crate) struct SseParser {
    buffer: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds raw bytes and returns every complete `data:` payload found.
    ///
    /// The `[DONE]` sentinel used by OpenAI-style streams is swallowed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim_start();
                if !data.is_empty() && data != "[DONE]" {
                    payloads.push(data.to_string());
                }
            }
        }
        payloads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_event() {
        let mut parser = SseParser::new();
        let out = parser.feed(b"data: {\"a\":1}\n\n");
        assert_eq!(out, vec!["{\"a\":1}"]);
    }

    #[test]
    fn test_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"data: {\"a\"").is_empty());
        let out = parser.feed(b":1}\ndata: {\"b\":2}\n");
        assert_eq!(out, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[test]
    fn test_done_sentinel_swallowed() {
        let mut parser = SseParser::new();
        let out = parser.feed(b"data: {\"a\":1}\n\ndata: [DONE]\n\n");
        assert_eq!(out, vec!["{\"a\":1}"]);
    }

    #[test]
    fn test_event_lines_ignored() {
        let mut parser = SseParser::new();
        let out = parser.feed(b"event: message_start\ndata: {\"x\":true}\n\n: keepalive\n");
        assert_eq!(out, vec!["{\"x\":true}"]);
    }

    #[test]
    fn test_crlf_lines() {
        let mut parser = SseParser::new();
        let out = parser.feed(b"data: {\"a\":1}\r\n\r\n");
        assert_eq!(out, vec!["{\"a\":1}"]);
    }
}
