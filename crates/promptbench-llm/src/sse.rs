//! Incremental `data:` line framing over raw response-body chunks.

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// Payload carried by a single SSE line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    Data(String),
    Done,
}

/// Buffers bytes until a full line is available.
///
/// A line split across two network reads is kept and completed by the next chunk.
/// Bytes are buffered rather than text so a multi-byte character split by the
/// network is decoded only once whole.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseLine> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = self.pending[consumed..].iter().position(|byte| *byte == b'\n') {
            let end = consumed + offset;
            if let Some(line) = parse_line(&self.pending[consumed..end]) {
                lines.push(line);
            }
            consumed = end + 1;
        }
        self.pending.drain(..consumed);
        lines
    }

    /// Flushes an unterminated final line at end of stream.
    pub fn finish(&mut self) -> Vec<SseLine> {
        let rest = std::mem::take(&mut self.pending);
        parse_line(&rest).into_iter().collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

fn parse_line(raw: &[u8]) -> Option<SseLine> {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim_end_matches('\r');
    let data = line.strip_prefix(DATA_PREFIX)?.trim_start();
    if data.is_empty() {
        return None;
    }
    if data == DONE_SENTINEL {
        return Some(SseLine::Done);
    }
    Some(SseLine::Data(data.to_string()))
}
