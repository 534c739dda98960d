//! Incremental SSE line decoder for chat-completion streams.
//!
//! Only `data:` frames matter for this protocol; `event:`, `id:`, `retry:` and
//! comment lines are dropped. The decoder is line-oriented rather than
//! event-block-oriented: every complete `data:` line is one frame.

/// Literal payload that ends the stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One meaningful line of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// Payload of a `data:` line, prefix stripped and trimmed.
    Data(String),
    /// The `[DONE]` sentinel. Nothing after it is decoded.
    Done,
}

/// Buffers bytes across chunk boundaries and yields complete frames.
///
/// Network reads may split lines (and multi-byte characters) anywhere, so the
/// trailing partial line stays buffered and an incomplete UTF-8 sequence at the
/// end of a chunk is carried over undecoded.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    pending: Vec<u8>,
    buffer: String,
    finished: bool,
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once `[DONE]` was seen or `finish` was called.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feeds raw bytes from the response body. Returns the frames completed by
    /// this chunk; `SseFrame::Done` is always the last one returned.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        if self.finished {
            return Vec::new();
        }
        self.decode(chunk);

        let mut frames = Vec::new();
        while let Some(idx) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=idx).collect();
            if let Some(frame) = parse_line(&line) {
                let done = frame == SseFrame::Done;
                frames.push(frame);
                if done {
                    self.finish_early();
                    break;
                }
            }
        }
        frames
    }

    /// Flushes the final line when the body ended without a newline.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        if self.finished {
            return Vec::new();
        }
        if !self.pending.is_empty() {
            self.buffer
                .push_str(&String::from_utf8_lossy(&std::mem::take(&mut self.pending)));
        }
        let tail = std::mem::take(&mut self.buffer);
        self.finished = true;
        parse_line(&tail).into_iter().collect()
    }

    fn finish_early(&mut self) {
        self.finished = true;
        self.buffer.clear();
        self.pending.clear();
    }

    fn decode(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    self.pending.clear();
                    return;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    self.buffer
                        .push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Incomplete sequence at the end: wait for the next chunk.
                        None => {
                            self.pending.drain(..valid);
                            return;
                        }
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }
}

/// Classifies one raw line. `None` for blank lines and non-`data:` fields.
fn parse_line(raw: &str) -> Option<SseFrame> {
    let line = raw.trim();
    if line.is_empty() {
        return None;
    }
    let payload = line.strip_prefix("data:")?.trim();
    if payload == DONE_SENTINEL {
        return Some(SseFrame::Done);
    }
    Some(SseFrame::Data(payload.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(s: &str) -> SseFrame {
        SseFrame::Data(s.to_string())
    }

    #[test]
    fn test_basic_data_lines() {
        let mut decoder = SseLineDecoder::new();
        let frames = decoder.feed(b"data: hello\ndata:world\n");
        assert_eq!(frames, vec![data("hello"), data("world")]);
    }

    #[test]
    fn test_other_fields_and_blank_lines_are_ignored() {
        let mut decoder = SseLineDecoder::new();
        let frames = decoder.feed(b": keepalive\n\nevent: message\nid: 7\ndata: {}\r\n\r\n");
        assert_eq!(frames, vec![data("{}")]);
    }

    #[test]
    fn test_split_across_chunks() {
        let mut decoder = SseLineDecoder::new();
        assert!(decoder.feed(b"data: hel").is_empty());
        assert_eq!(decoder.feed(b"lo\n"), vec![data("hello")]);
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let line = "data: 产品经理\n".as_bytes();
        let mut decoder = SseLineDecoder::new();
        let mut frames = Vec::new();
        for byte in line {
            frames.extend(decoder.feed(std::slice::from_ref(byte)));
        }
        assert_eq!(frames, vec![data("产品经理")]);
    }

    #[test]
    fn test_done_stops_decoding() {
        let mut decoder = SseLineDecoder::new();
        let frames = decoder.feed(b"data: a\ndata: [DONE]\ndata: b\n");
        assert_eq!(frames, vec![data("a"), SseFrame::Done]);
        assert!(decoder.is_finished());
        assert!(decoder.feed(b"data: c\n").is_empty());
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut decoder = SseLineDecoder::new();
        assert!(decoder.feed(b"data: tail").is_empty());
        assert_eq!(decoder.finish(), vec![data("tail")]);
    }

    #[test]
    fn test_invalid_utf8_becomes_replacement_character() {
        let mut decoder = SseLineDecoder::new();
        let frames = decoder.feed(b"data: a\xffb\n");
        assert_eq!(frames, vec![data("a\u{FFFD}b")]);
    }
}
