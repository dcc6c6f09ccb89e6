//! Reassembly of the streamed chat response body.
//!
//! Contract:
//! - Consumers receive 0..n `Partial` events, each carrying the full text to display so far.
//! - The stream **must** terminate with exactly one terminal event: `Final` or `Failure`.
//! - After a terminal event, no further events are emitted and the body is dropped.
//!
//! Wire shape: every flush from the backend may carry a `data:` framing prefix, and the
//! prose is followed by a completion marker (`FINAL_ANSWER`) and a JSON object holding
//! `final_response` and an optional `session_id`. Framing is stripped per decoded chunk;
//! the marker is searched for in the whole accumulated buffer so it may straddle chunks.

use std::fmt::Display;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::stream::{Stream, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::{MissingMarkerPolicy, StreamCfg};
use crate::error::{CoreResult, DataChatError};
use crate::model::FinalPayload;

/// What the caller receives incrementally.
#[non_exhaustive]
#[derive(Debug)]
pub enum UpdateEvent {
    /// Accumulated display text (not a delta).
    Partial(String),
    /// Parsed payload after the completion marker; stream ends after this.
    Final(FinalPayload),
    /// Transport, decode or payload error; stream ends after this.
    Failure(DataChatError),
}

impl UpdateEvent {
    /// Returns true if this event terminates the stream (`Final` or `Failure`).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Final(_) | Self::Failure(_))
    }

    /// Convenience accessor for `Partial` contents.
    pub fn as_partial(&self) -> Option<&str> {
        match self {
            Self::Partial(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Boxed stream of update events, as handed out by chat backends.
pub type UpdateStream = futures::stream::BoxStream<'static, UpdateEvent>;

static DEFAULT_FRAMING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"data:\s*").expect("static framing pattern"));

/// Strips the framing token (plus trailing whitespace) from decoded text.
#[derive(Debug, Clone)]
pub struct Framing {
    token: Regex,
    collapse_newlines: bool,
}

impl Default for Framing {
    fn default() -> Self {
        Self {
            token: Regex::clone(&DEFAULT_FRAMING),
            collapse_newlines: false,
        }
    }
}

impl Framing {
    pub fn new(token: &str, collapse_newlines: bool) -> CoreResult<Self> {
        if token.is_empty() {
            return Err(DataChatError::Validation("framing token must not be empty".into()));
        }
        let token = Regex::new(&format!(r"{}\s*", regex::escape(token)))
            .map_err(|e| DataChatError::Validation(format!("framing token: {e}")))?;
        Ok(Self {
            token,
            collapse_newlines,
        })
    }

    /// Remove every framing occurrence. Repeats until none is left, so applying
    /// it to its own output changes nothing.
    pub fn strip(&self, text: &str) -> String {
        let mut out = self.token.replace_all(text, "").into_owned();
        while self.token.is_match(&out) {
            out = self.token.replace_all(&out, "").into_owned();
        }
        out
    }

    fn apply(&self, text: &str) -> String {
        let stripped = self.strip(text);
        if self.collapse_newlines {
            stripped.replace("\r\n", " ").replace('\n', " ")
        } else {
            stripped
        }
    }
}

/// Strip the default `data:` framing token.
pub fn strip_framing(text: &str) -> String {
    Framing::default().strip(text)
}

/// The part of a partial text that later chunks cannot take back.
///
/// A trailing run that could still grow into `marker` is held back, so printing
/// successive settled texts only ever appends.
pub fn settled_text<'a>(text: &'a str, marker: &str) -> &'a str {
    let longest = marker.len().min(text.len());
    for n in (1..=longest).rev() {
        let cut = text.len() - n;
        if text.is_char_boundary(cut) && marker.starts_with(&text[cut..]) {
            return &text[..cut];
        }
    }
    text
}

/// Incremental UTF-8 decoder; holds back an incomplete trailing sequence.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, chunk: &[u8]) -> CoreResult<String> {
        self.pending.extend_from_slice(chunk);
        let (valid, invalid) = match std::str::from_utf8(&self.pending) {
            Ok(_) => (self.pending.len(), false),
            Err(e) => (e.valid_up_to(), e.error_len().is_some()),
        };
        if invalid {
            self.pending.clear();
            return Err(DataChatError::Decode(format!(
                "invalid byte sequence after {valid} bytes"
            )));
        }
        let tail = self.pending.split_off(valid);
        let head = std::mem::replace(&mut self.pending, tail);
        String::from_utf8(head).map_err(|e| DataChatError::Decode(e.to_string()))
    }

    fn finish(&mut self) -> CoreResult<()> {
        if self.pending.is_empty() {
            Ok(())
        } else {
            let n = self.pending.len();
            self.pending.clear();
            Err(DataChatError::Decode(format!(
                "stream ended inside a multi-byte sequence ({n} bytes pending)"
            )))
        }
    }
}

/// Transport-independent state machine behind [`ReassemblyStream`].
///
/// One instance serves exactly one response body.
#[derive(Debug)]
pub struct Reassembler {
    framing: Framing,
    marker: String,
    on_missing_marker: MissingMarkerPolicy,
    decoder: Utf8Decoder,
    buf: String,
    marker_seen: bool,
    last_parse_error: Option<String>,
    done: bool,
}

impl Reassembler {
    pub fn new(cfg: &StreamCfg) -> CoreResult<Self> {
        if cfg.marker.is_empty() {
            return Err(DataChatError::Validation("completion marker must not be empty".into()));
        }
        Ok(Self {
            framing: Framing::new(&cfg.framing_token, cfg.collapse_newlines)?,
            marker: cfg.marker.clone(),
            on_missing_marker: cfg.on_missing_marker,
            decoder: Utf8Decoder::default(),
            buf: String::new(),
            marker_seen: false,
            last_parse_error: None,
            done: false,
        })
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed the next body chunk. Returns `None` when the chunk produced no new text
    /// or a terminal event was already emitted.
    pub fn push(&mut self, chunk: &[u8]) -> Option<UpdateEvent> {
        if self.done || chunk.is_empty() {
            return None;
        }
        let text = match self.decoder.decode(chunk) {
            Ok(t) => t,
            Err(e) => return self.abort(e),
        };
        let cleaned = self.framing.apply(&text);
        if cleaned.is_empty() {
            return None;
        }
        self.buf.push_str(&cleaned);
        Some(self.inspect())
    }

    fn inspect(&mut self) -> UpdateEvent {
        let Some(idx) = self.buf.find(&self.marker) else {
            return UpdateEvent::Partial(self.buf.clone());
        };
        if !self.marker_seen {
            self.marker_seen = true;
            tracing::debug!(offset = idx, "completion marker found");
        }
        let (before, rest) = self.buf.split_at(idx);
        let after = &rest[self.marker.len()..];
        match serde_json::from_str::<FinalPayload>(after.trim()) {
            Ok(payload) => {
                self.done = true;
                UpdateEvent::Final(payload)
            }
            Err(e) => {
                self.last_parse_error = Some(e.to_string());
                UpdateEvent::Partial(before.to_string())
            }
        }
    }

    /// Signal end of body. Always yields the terminal event unless one was already emitted.
    pub fn finish(&mut self) -> Option<UpdateEvent> {
        if self.done {
            return None;
        }
        if let Err(e) = self.decoder.finish() {
            return self.abort(e);
        }
        self.done = true;
        if self.marker_seen {
            let reason = self
                .last_parse_error
                .take()
                .unwrap_or_else(|| "empty payload".to_string());
            return Some(UpdateEvent::Failure(DataChatError::MarkerJson(reason)));
        }
        match self.on_missing_marker {
            MissingMarkerPolicy::Fail => Some(UpdateEvent::Failure(DataChatError::MissingMarker)),
            MissingMarkerPolicy::Fallback => {
                tracing::debug!("no completion marker, using accumulated text as the answer");
                Some(UpdateEvent::Final(FinalPayload {
                    final_response: std::mem::take(&mut self.buf),
                    session_id: None,
                }))
            }
        }
    }

    /// Terminate with a failure. Ignored after a terminal event.
    pub fn abort(&mut self, err: DataChatError) -> Option<UpdateEvent> {
        if self.done {
            return None;
        }
        self.done = true;
        Some(UpdateEvent::Failure(err))
    }
}

/// Drives a [`Reassembler`] from a body stream of byte chunks.
pub struct ReassemblyStream<S> {
    inner: Option<S>,
    state: Reassembler,
    chunks: usize,
}

impl<S> ReassemblyStream<S> {
    pub fn new(body: S, cfg: &StreamCfg) -> CoreResult<Self> {
        Ok(Self {
            inner: Some(body),
            state: Reassembler::new(cfg)?,
            chunks: 0,
        })
    }
}

/// Wrap a body stream so it yields [`UpdateEvent`]s.
pub fn consume<S>(body: S, cfg: &StreamCfg) -> CoreResult<ReassemblyStream<S>> {
    ReassemblyStream::new(body, cfg)
}

impl<S, B, E> Stream for ReassemblyStream<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    type Item = UpdateEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            let Some(inner) = this.inner.as_mut() else {
                return Poll::Ready(None);
            };
            match inner.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    let bytes = chunk.as_ref();
                    this.chunks += 1;
                    tracing::debug!(chunk = this.chunks, len = bytes.len(), "response chunk");
                    if let Some(ev) = this.state.push(bytes) {
                        if ev.is_terminal() {
                            this.inner = None;
                        }
                        return Poll::Ready(Some(ev));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    this.inner = None;
                    tracing::warn!(error = %e, "response body failed mid-stream");
                    return Poll::Ready(this.state.abort(DataChatError::Transport(e.to_string())));
                }
                Poll::Ready(None) => {
                    this.inner = None;
                    return Poll::Ready(this.state.finish());
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
