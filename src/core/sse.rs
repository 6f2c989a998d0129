use memchr::memchr;
use tracing::{debug, warn};

/// Reassembles newline-delimited lines from arbitrarily split byte chunks.
///
/// Bytes are buffered before UTF-8 decoding so a character split across two
/// chunks is decoded intact. Blank lines are dropped; a trailing `\r` is
/// stripped from each line.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = memchr(b'\n', &self.buffer[start..]) {
            let newline = start + offset;
            let mut end = newline;
            if end > start && self.buffer[end - 1] == b'\r' {
                end -= 1;
            }

            match std::str::from_utf8(&self.buffer[start..end]) {
                Ok(line) if !line.is_empty() => lines.push(line.to_string()),
                Ok(_) => {}
                Err(err) => warn!(error = %err, "Skipping event-stream line with invalid UTF-8"),
            }
            start = newline + 1;
        }

        if start > 0 {
            self.buffer.drain(..start);
        }
        lines
    }

    /// Ends the stream. Frames always end in `\n`, so whatever is still
    /// buffered is an incomplete line and is discarded. Returns the number of
    /// bytes dropped.
    pub fn finish(&mut self) -> usize {
        let dropped = self.buffer.len();
        if dropped > 0 {
            debug!(bytes = dropped, "Discarding incomplete trailing event-stream line");
        }
        self.buffer.clear();
        dropped
    }

    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}
