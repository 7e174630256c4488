//! Incremental decoder for `text/event-stream` bodies.
//!
//! The body arrives in arbitrary byte chunks. [`FrameDecoder`] buffers
//! partial lines across chunk boundaries and yields one [`RawFrame`] per
//! blank-line-terminated block. Lines are split on `\n` bytes, which never
//! occur inside a multi-byte UTF-8 sequence, so a chunk boundary falling in
//! the middle of a character is harmless.
//!
//! A block may buffer at most [`MAX_FRAME_BYTES`]. A server that never
//! sends a line break cannot grow the buffer past that.

use crate::error::Error;

/// Upper bound on bytes buffered for one unfinished block.
pub const MAX_FRAME_BYTES: usize = 1 << 20;

/// One `event:` / `data:` block, undecoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFrame {
    /// Value of the `event:` line. `Some("")` when the line is present but
    /// empty.
    pub event: Option<String>,
    /// Value of the `data:` line(s), joined with `\n` when repeated.
    pub data: Option<String>,
    /// Value of the `id:` line, if the server sent one.
    pub id: Option<String>,
}

impl RawFrame {
    /// Frames with neither an event name nor data carry nothing to decode.
    pub fn is_empty(&self) -> bool {
        self.event.is_none() && self.data.is_none()
    }

    /// Event name with empty strings normalized to `None`.
    pub fn event_name(&self) -> Option<&str> {
        self.event.as_deref().filter(|e| !e.trim().is_empty())
    }
}

/// Stateful, chunk-at-a-time SSE block decoder.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Vec<u8>,
    current: RawFrame,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every block it completed.
    ///
    /// Fails with [`Error::FrameTooLarge`] once the unfinished block
    /// exceeds [`MAX_FRAME_BYTES`]; the decoder is reset and everything
    /// from that chunk is discarded.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<RawFrame>, Error> {
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = self.pending[consumed..].iter().position(|b| *b == b'\n') {
            let end = consumed + offset;
            let line = String::from_utf8_lossy(&self.pending[consumed..end]).into_owned();
            consumed = end + 1;
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        self.pending.drain(..consumed);

        let buffered = self.pending.len() + self.current.data.as_ref().map_or(0, String::len);
        if buffered > MAX_FRAME_BYTES {
            self.pending.clear();
            self.current = RawFrame::default();
            return Err(Error::FrameTooLarge {
                limit: MAX_FRAME_BYTES,
            });
        }
        Ok(frames)
    }

    /// Flush at end of body. A trailing block without its blank-line
    /// terminator is still returned if it carried data.
    pub fn finish(&mut self) -> Option<RawFrame> {
        if !self.pending.is_empty() {
            let line = String::from_utf8_lossy(&self.pending).into_owned();
            self.pending.clear();
            if let Some(frame) = self.process_line(&line) {
                return Some(frame);
            }
        }
        let frame = std::mem::take(&mut self.current);
        (!frame.is_empty()).then_some(frame)
    }

    fn process_line(&mut self, raw: &str) -> Option<RawFrame> {
        let line = raw.strip_suffix('\r').unwrap_or(raw);

        if line.is_empty() {
            let frame = std::mem::take(&mut self.current);
            return (!frame.is_empty()).then_some(frame);
        }

        // Comment line, used by servers as a keep-alive.
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.current.event = Some(value.to_owned()),
            "data" => match self.current.data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => self.current.data = Some(value.to_owned()),
            },
            "id" => self.current.id = Some(value.to_owned()),
            other => tracing::trace!(field = other, "ignoring stream field"),
        }
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn decodes_single_block() {
        let mut dec = FrameDecoder::new();
        let frames = dec.push(b"event: alarm\ndata: {\"a\":1}\n\n").unwrap();
        assert_eq!(
            frames,
            vec![RawFrame {
                event: Some("alarm".into()),
                data: Some("{\"a\":1}".into()),
                id: None,
            }]
        );
    }

    #[test]
    fn buffers_across_chunk_boundaries() {
        let mut dec = FrameDecoder::new();
        assert!(dec.push(b"event: zo").unwrap().is_empty());
        assert!(dec.push(b"ne\ndata: {\"x\"").unwrap().is_empty());
        let frames = dec.push(b":2}\n\nevent: ping\n\n").unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event.as_deref(), Some("zone"));
        assert_eq!(frames[0].data.as_deref(), Some("{\"x\":2}"));
        assert_eq!(frames[1].event.as_deref(), Some("ping"));
        assert!(frames[1].data.is_none());
    }

    #[test]
    fn split_multibyte_character_survives() {
        let text = "data: {\"name\":\"Café\"}\n\n".as_bytes();
        let split = text.iter().position(|b| *b == 0xC3).map_or(0, |p| p + 1);
        let mut dec = FrameDecoder::new();
        assert!(dec.push(&text[..split]).unwrap().is_empty());
        let frames = dec.push(&text[split..]).unwrap();
        assert_eq!(frames[0].data.as_deref(), Some("{\"name\":\"Café\"}"));
    }

    #[test]
    fn handles_crlf_comments_and_ids() {
        let mut dec = FrameDecoder::new();
        let frames = dec.push(b": keep-alive\r\nid: 42\r\nevent:\r\ndata: {}\r\n\r\n").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id.as_deref(), Some("42"));
        assert_eq!(frames[0].event.as_deref(), Some(""));
        assert_eq!(frames[0].event_name(), None);
    }

    #[test]
    fn joins_repeated_data_lines() {
        let mut dec = FrameDecoder::new();
        let frames = dec.push(b"data: line one\ndata: line two\n\n").unwrap();
        assert_eq!(frames[0].data.as_deref(), Some("line one\nline two"));
    }

    #[test]
    fn blank_lines_alone_produce_nothing() {
        let mut dec = FrameDecoder::new();
        assert!(dec.push(b"\n\n\n").unwrap().is_empty());
        assert!(dec.finish().is_none());
    }

    #[test]
    fn finish_flushes_unterminated_block() {
        let mut dec = FrameDecoder::new();
        assert!(dec.push(b"data: {\"late\":true}").unwrap().is_empty());
        let frame = dec.finish().expect("trailing frame");
        assert_eq!(frame.data.as_deref(), Some("{\"late\":true}"));
    }

    #[test]
    fn unterminated_line_past_limit_is_rejected() {
        let mut dec = FrameDecoder::new();
        let chunk = vec![b'x'; 64 * 1024];
        let mut result = Ok(Vec::new());
        for _ in 0..=(MAX_FRAME_BYTES / chunk.len()) {
            result = dec.push(&chunk);
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(Error::FrameTooLarge { limit: MAX_FRAME_BYTES })));

        // The decoder starts over cleanly.
        let frames = dec.push(b"
data: ok

").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data.as_deref(), Some("ok"));
    }
}
