//! Re-frames the upstream's line-delimited `data:` stream into OpenAI chunks.
//!
//! Upstream bytes arrive in arbitrary slices. [`Utf8Decoder`] carries any
//! split multi-byte sequence across reads, [`Reframer`] carries any partial
//! line, and [`pump`] drives both from a live body into a bounded channel that
//! backs the HTTP response.

use crate::openai::{ChatCompletionChunk, ChunkFactory, DONE_FRAME};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;

const SUCCESS_CODE: i64 = 200;
const DATA_PREFIX: &str = "data:";

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("upstream read failed: {0}")]
    Read(String),
    #[error("upstream read timed out after {}ms", .0.as_millis())]
    ReadTimeout(Duration),
}

/// Incremental UTF-8 decoder.
///
/// An incomplete sequence at the end of one read is held back and completed
/// by the next. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode_into(&mut self, input: &[u8], out: &mut String) {
        self.pending.extend_from_slice(input);
        let mut consumed = 0;
        loop {
            let rest = &self.pending[consumed..];
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    consumed = self.pending.len();
                    break;
                }
                Err(err) => {
                    let valid_len = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&rest[..valid_len]));
                    match err.error_len() {
                        Some(bad_len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            consumed += valid_len + bad_len;
                        }
                        None => {
                            consumed += valid_len;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..consumed);
    }

    pub fn decode(&mut self, input: &[u8]) -> String {
        let mut out = String::new();
        self.decode_into(input, &mut out);
        out
    }

    /// Bytes of an unfinished sequence still waiting for their continuation.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[derive(Debug, Deserialize)]
struct UpstreamEvent {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    data: Option<UpstreamEventData>,
}

#[derive(Debug, Deserialize)]
struct UpstreamEventData {
    #[serde(default)]
    content: Option<String>,
}

/// Text fragment carried by one upstream event line, if any.
pub fn parse_event_line(line: &str) -> Option<String> {
    let payload = line.strip_prefix(DATA_PREFIX)?.trim();
    if payload.is_empty() {
        return None;
    }
    let event: UpstreamEvent = serde_json::from_str(payload).ok()?;
    if event.code != Some(SUCCESS_CODE) {
        return None;
    }
    event.data?.content.filter(|c| !c.is_empty())
}

/// Per-request reframing state. Never shared between requests.
#[derive(Debug)]
pub struct Reframer {
    decoder: Utf8Decoder,
    buffer: String,
    chunks: ChunkFactory,
}

impl Reframer {
    pub fn new(chunks: ChunkFactory) -> Self {
        Self {
            decoder: Utf8Decoder::new(),
            buffer: String::new(),
            chunks,
        }
    }

    pub fn chunks(&self) -> &ChunkFactory {
        &self.chunks
    }

    /// Consumes one read and returns the content chunks for every line it
    /// completed, in upstream order.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<ChatCompletionChunk> {
        self.decoder.decode_into(bytes, &mut self.buffer);
        let Some(last_newline) = self.buffer.rfind('\n') else {
            return Vec::new();
        };
        let complete: String = self.buffer.drain(..=last_newline).collect();
        complete
            .split('\n')
            .filter_map(parse_event_line)
            .map(|content| self.chunks.content(&content))
            .collect()
    }

    /// Ends the stream: the partial line and any undecoded bytes are dropped.
    pub fn finish(&mut self) -> ChatCompletionChunk {
        if !self.buffer.is_empty() || self.decoder.pending_len() > 0 {
            tracing::debug!(
                request_id = %self.chunks.request_id(),
                dropped_chars = self.buffer.len(),
                "discarding unterminated upstream line"
            );
        }
        self.buffer.clear();
        self.decoder = Utf8Decoder::new();
        self.chunks.stop()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    /// Stop chunk and `[DONE]` were delivered.
    Completed,
    /// An error chunk was delivered in place of the stop chunk.
    Failed,
    /// The downstream receiver went away.
    Cancelled,
}

impl PumpOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            PumpOutcome::Completed => "completed",
            PumpOutcome::Failed => "failed",
            PumpOutcome::Cancelled => "cancelled",
        }
    }
}

/// Producer side of a streaming response.
///
/// Reads `upstream` until it ends, fails, stalls past `read_timeout`, or the
/// receiver of `tx` is dropped, writing SSE frames as they become available.
pub async fn pump<S, E>(
    upstream: S,
    reframer: Reframer,
    tx: mpsc::Sender<Bytes>,
    read_timeout: Duration,
) -> PumpOutcome
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let request_id = reframer.chunks().request_id().to_string();
    let outcome = pump_frames(upstream, reframer, &tx, read_timeout).await;
    metrics::counter!("chat4o_streams_total", "outcome" => outcome.as_str()).increment(1);
    if outcome == PumpOutcome::Cancelled {
        tracing::debug!(request_id = %request_id, "client went away, upstream read stopped");
    } else {
        tracing::info!(request_id = %request_id, outcome = outcome.as_str(), "stream closed");
    }
    outcome
}

async fn pump_frames<S, E>(
    upstream: S,
    mut reframer: Reframer,
    tx: &mpsc::Sender<Bytes>,
    read_timeout: Duration,
) -> PumpOutcome
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let mut upstream = std::pin::pin!(upstream);
    let failure = loop {
        let next = tokio::select! {
            biased;
            _ = tx.closed() => return PumpOutcome::Cancelled,
            next = tokio::time::timeout(read_timeout, upstream.next()) => next,
        };
        let bytes = match next {
            Ok(Some(Ok(bytes))) => bytes,
            Ok(Some(Err(err))) => break StreamError::Read(err.to_string()),
            Ok(None) => {
                let stop = reframer.finish().to_sse_frame();
                if tx.send(stop).await.is_err()
                    || tx.send(Bytes::from_static(DONE_FRAME)).await.is_err()
                {
                    return PumpOutcome::Cancelled;
                }
                return PumpOutcome::Completed;
            }
            Err(_) => break StreamError::ReadTimeout(read_timeout),
        };
        for chunk in reframer.feed(&bytes) {
            if tx.send(chunk.to_sse_frame()).await.is_err() {
                return PumpOutcome::Cancelled;
            }
            metrics::counter!("chat4o_chunks_emitted_total").increment(1);
        }
    };

    tracing::warn!(
        request_id = %reframer.chunks().request_id(),
        error = %failure,
        "upstream stream failed"
    );
    let frame = reframer.chunks().error(&failure.to_string()).to_sse_frame();
    if tx.send(frame).await.is_err() {
        return PumpOutcome::Cancelled;
    }
    PumpOutcome::Failed
}

/// Runs `upstream` to completion and returns the concatenated deltas.
pub async fn collect_content<S, E>(
    upstream: S,
    mut reframer: Reframer,
    read_timeout: Duration,
) -> Result<String, StreamError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let mut upstream = std::pin::pin!(upstream);
    let mut content = String::new();
    loop {
        match tokio::time::timeout(read_timeout, upstream.next()).await {
            Ok(Some(Ok(bytes))) => {
                for chunk in reframer.feed(&bytes) {
                    content.push_str(chunk.content().unwrap_or_default());
                }
            }
            Ok(Some(Err(err))) => return Err(StreamError::Read(err.to_string())),
            Ok(None) => {
                reframer.finish();
                return Ok(content);
            }
            Err(_) => return Err(StreamError::ReadTimeout(read_timeout)),
        }
    }
}
