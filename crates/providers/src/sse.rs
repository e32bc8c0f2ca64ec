//! Incremental server-sent events tokenizer.
//!
//! Chunks arrive at arbitrary boundaries (mid-field, mid-JSON, between the
//! `\r` and `\n` of a terminator). Anything after the last complete line is
//! buffered until the next `feed`, so the records produced depend only on the
//! concatenated text, never on how it was split.

use streamloop_core::SseEvent;

/// Line-oriented SSE record assembler.
///
/// One instance per response stream; it holds no state worth keeping across
/// turns.
#[derive(Debug, Default)]
pub struct SseTokenizer {
    /// Text not yet terminated by `\n`.
    buffer: String,
    /// `event:` field of the record being assembled.
    event: Option<String>,
    /// `data:` lines of the record being assembled.
    data: Vec<String>,
}

impl SseTokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk and return every record completed by it.
    ///
    /// A record is only returned once its terminating blank line is seen.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);

        let mut records = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = self.buffer[consumed..].find('\n') {
            let end = consumed + offset;
            let line = self.buffer[consumed..end].trim_end_matches('\r').to_string();
            consumed = end + 1;

            if let Some(record) = self.process_line(&line) {
                records.push(record);
            }
        }
        self.buffer.drain(..consumed);

        records
    }

    /// Whether a partial record or line is still buffered.
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty() || self.event.is_some() || !self.data.is_empty()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }

        // Comment / keep-alive
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // id / retry carry nothing the loop uses
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() && event.is_none() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent { event, data })
    }
}
