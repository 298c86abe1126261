//! Server-sent event decoding
//!
//! Line buffering works on bytes rather than text so a multi-byte UTF-8
//! character split across two network chunks is reassembled before decoding.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};

use crate::backend::{BackendError, ByteStream};
use crate::registry::ProviderAdapter;

/// Provider convention marking the normal end of a stream
pub const DONE_SENTINEL: &str = "[DONE]";

const DATA_PREFIX: &[u8] = b"data:";

/// Lazy, finite sequence of text deltas
pub type DeltaStream = BoxStream<'static, Result<String, BackendError>>;

/// One `data:` record
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SseRecord {
    /// Record payload, trimmed
    Data(String),
    /// The done sentinel; nothing after it belongs to the response
    Done,
}

/// Incremental `data:` record extractor
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Bytes after the last complete line
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every completed data record
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseRecord> {
        self.buffer.extend_from_slice(chunk);

        let mut records = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(record) = data_record(&line[..pos]) {
                records.push(record);
            }
        }
        records
    }

    /// Flush a final line that was not newline-terminated
    pub fn finish(&mut self) -> Option<SseRecord> {
        let line = std::mem::take(&mut self.buffer);
        data_record(&line)
    }

    /// Number of buffered bytes awaiting a newline
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }
}

/// Record of a data line, or `None` for non-data lines and empty records
fn data_record(line: &[u8]) -> Option<SseRecord> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let payload = line.strip_prefix(DATA_PREFIX)?;
    let payload = String::from_utf8_lossy(payload);
    let payload = payload.trim();

    if payload.is_empty() {
        return None;
    }
    if payload == DONE_SENTINEL {
        return Some(SseRecord::Done);
    }
    Some(SseRecord::Data(payload.to_string()))
}

struct DecodeState {
    bytes: ByteStream,
    decoder: SseDecoder,
    adapter: Arc<dyn ProviderAdapter>,
    pending: VecDeque<String>,
    finished: bool,
    skipped: usize,
}

impl DecodeState {
    /// Turn data records into queued deltas, stopping at a finish signal or
    /// the done sentinel
    fn absorb(&mut self, records: Vec<SseRecord>) {
        for record in records {
            if self.finished {
                return;
            }
            let record = match record {
                SseRecord::Data(record) => record,
                SseRecord::Done => {
                    self.finished = true;
                    return;
                }
            };
            match self.adapter.extract_delta(&record) {
                Ok(delta) => {
                    if let Some(text) = delta.text {
                        self.pending.push_back(text);
                    }
                    self.finished = delta.finished;
                }
                Err(e) => {
                    self.skipped += 1;
                    tracing::trace!(error = %e, record = %record, "Skipping malformed stream record");
                }
            }
        }
    }
}

/// Decode a response body into text deltas with the given provider adapter
///
/// The returned stream yields deltas in arrival order, yields a single
/// `Err` and ends if the body fails mid-stream, and ends after a record
/// carrying a finish reason without reading further bytes.
pub fn decode_deltas(bytes: ByteStream, adapter: Arc<dyn ProviderAdapter>) -> DeltaStream {
    let state = DecodeState {
        bytes,
        decoder: SseDecoder::new(),
        adapter,
        pending: VecDeque::new(),
        finished: false,
        skipped: 0,
    };

    stream::unfold(Some(state), |state| async move {
        let mut state = state?;
        loop {
            if let Some(text) = state.pending.pop_front() {
                return Some((Ok(text), Some(state)));
            }
            if state.finished {
                if state.skipped > 0 {
                    tracing::debug!(skipped = state.skipped, "Stream ended with skipped records");
                }
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let records = state.decoder.push(&chunk);
                    state.absorb(records);
                }
                Some(Err(e)) => return Some((Err(e), None)),
                None => {
                    let tail = state.decoder.finish();
                    state.absorb(tail.into_iter().collect());
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}
