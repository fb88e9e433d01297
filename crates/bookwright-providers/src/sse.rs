//! Server-Sent Events decoding shared by the streaming adapters.
//!
//! Bytes are buffered until a full line is available, so both lines and
//! multi-byte UTF-8 sequences may be split across network reads.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;

use bookwright_core::ProviderError;
use futures::{stream, Stream, StreamExt};

use crate::traits::{ChunkStream, ProviderResult, StreamChunk};

/// A complete SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Value of the `event:` field, if any
    pub event: Option<String>,
    /// `data:` lines joined with `\n`
    pub data: String,
}

impl SseEvent {
    /// OpenAI-style end-of-stream sentinel.
    pub fn is_done(&self) -> bool {
        self.data == "[DONE]"
    }
}

/// Incremental SSE decoder.
#[derive(Default)]
pub struct SseParser {
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and collect every event they complete.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            if let Some(event) = self.accept_line(line.trim_end_matches('\r')) {
                events.push(event);
            }
        }
        events
    }

    /// Flush an event left open when the byte stream ended without a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&rest).into_owned();
            if let Some(event) = self.accept_line(line.trim_end_matches('\r')) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn accept_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
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
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        Some(SseEvent {
            event,
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

impl fmt::Debug for SseParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseParser")
            .field("pending_bytes", &self.pending.len())
            .field("data_lines", &self.data.len())
            .finish()
    }
}

struct Decoder<S, F> {
    bytes: Pin<Box<S>>,
    parser: SseParser,
    queued: VecDeque<ProviderResult<StreamChunk>>,
    parse: F,
    provider: String,
    closed: bool,
}

impl<S, F> Decoder<S, F>
where
    F: FnMut(&SseEvent) -> ProviderResult<Option<StreamChunk>>,
{
    fn accept(&mut self, events: Vec<SseEvent>) {
        for event in events {
            if self.closed {
                return;
            }
            if event.is_done() {
                self.queued.push_back(Ok(StreamChunk::finished()));
                self.closed = true;
                continue;
            }
            match (self.parse)(&event) {
                Ok(Some(chunk)) => {
                    self.closed = chunk.is_final;
                    self.queued.push_back(Ok(chunk));
                }
                Ok(None) => {}
                Err(e) => {
                    self.queued.push_back(Err(e));
                    self.closed = true;
                }
            }
        }
    }
}

/// Turn an HTTP byte stream into a [`ChunkStream`].
///
/// `parse` maps one provider event to at most one chunk. The stream ends
/// after the first final chunk, the `[DONE]` sentinel, or the first error.
pub fn chunk_stream<S, B, E, F>(provider: &str, bytes: S, parse: F) -> ChunkStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: fmt::Display + Send,
    F: FnMut(&SseEvent) -> ProviderResult<Option<StreamChunk>> + Send + 'static,
{
    let decoder = Decoder {
        bytes: Box::pin(bytes),
        parser: SseParser::new(),
        queued: VecDeque::new(),
        parse,
        provider: provider.to_string(),
        closed: false,
    };

    Box::pin(stream::unfold(decoder, |mut decoder| async move {
        loop {
            if let Some(item) = decoder.queued.pop_front() {
                return Some((item, decoder));
            }
            if decoder.closed {
                return None;
            }
            match decoder.bytes.next().await {
                Some(Ok(bytes)) => {
                    let events = decoder.parser.feed(bytes.as_ref());
                    decoder.accept(events);
                }
                Some(Err(e)) => {
                    let err = ProviderError::StreamError {
                        provider: decoder.provider.clone(),
                        message: e.to_string(),
                    };
                    decoder.queued.push_back(Err(err));
                    decoder.closed = true;
                }
                None => {
                    let tail = decoder.parser.finish();
                    decoder.accept(tail.into_iter().collect());
                    decoder.closed = true;
                }
            }
        }
    }))
}
