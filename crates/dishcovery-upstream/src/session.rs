//! The upstream session contract shared by every adapter.
//!
//! An adapter's `open` returns an [`UpstreamSession`], which the relay splits
//! by direction: the [`AudioSink`] is written only by the inbound pump, the
//! [`EventStream`] is read only by the outbound pump, and the cloneable
//! [`UpstreamHandle`] releases the session from the relay's control path.

use crate::error::UpstreamError;
use crate::persona::SYSTEM_PROMPT;
use async_trait::async_trait;
use dishcovery_types::{AudioChunk, GeoPoint};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Queue depth for audio travelling from the relay to an adapter.
pub const AUDIO_QUEUE_DEPTH: usize = 64;

/// Queue depth for events travelling from an adapter to the relay.
pub const EVENT_QUEUE_DEPTH: usize = 64;

/// Grounding tools enabled for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroundingTools {
    pub place_search: bool,
    pub web_search: bool,
}

impl Default for GroundingTools {
    fn default() -> Self {
        Self {
            place_search: true,
            web_search: true,
        }
    }
}

/// Configuration snapshot taken when a session is opened.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub persona: String,
    pub tools: GroundingTools,
    /// Bias applied to place results.
    pub location: GeoPoint,
}

impl SessionConfig {
    /// The standard assistant persona with both grounding tools enabled.
    pub fn for_location(location: GeoPoint) -> Self {
        Self {
            persona: SYSTEM_PROMPT.to_string(),
            tools: GroundingTools::default(),
            location,
        }
    }
}

/// One item of an adapter's event sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// Assistant speech, 16-bit 24 kHz mono PCM.
    AudioOut(AudioChunk),
    Transcript(String),
    WidgetToken(String),
    Error(String),
    Closed,
}

impl UpstreamEvent {
    /// Whether this event ends the sequence.
    pub fn is_terminal(&self) -> bool {
        matches!(self, UpstreamEvent::Error(_) | UpstreamEvent::Closed)
    }
}

/// Bridge to a remote conversational speech service.
#[async_trait]
pub trait UpstreamAdapter: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &'static str;

    /// Opens one call-scoped session.
    ///
    /// # Errors
    ///
    /// `UpstreamUnavailable` when credentials are absent or the endpoint is
    /// unreachable, `UpstreamRejected` when the service declines `config`.
    async fn open(&self, config: SessionConfig) -> Result<UpstreamSession, UpstreamError>;
}

/// A live session as produced by an adapter.
///
/// Adapters build one from the relay-facing ends of two channels and keep
/// the opposite ends (plus [`UpstreamHandle::shutdown_signal`]) in their
/// driver task.
pub struct UpstreamSession {
    audio: mpsc::Sender<AudioChunk>,
    events: mpsc::Receiver<UpstreamEvent>,
    handle: UpstreamHandle,
}

impl UpstreamSession {
    pub fn new(audio: mpsc::Sender<AudioChunk>, events: mpsc::Receiver<UpstreamEvent>) -> Self {
        Self {
            audio,
            events,
            handle: UpstreamHandle::new(),
        }
    }

    pub fn handle(&self) -> &UpstreamHandle {
        &self.handle
    }

    /// Splits the session into its write side, read side, and release handle.
    pub fn split(self) -> (AudioSink, EventStream, UpstreamHandle) {
        let sink = AudioSink {
            tx: self.audio,
            handle: self.handle.clone(),
        };
        let stream = EventStream {
            rx: self.events,
            finished: false,
        };
        (sink, stream, self.handle)
    }
}

impl fmt::Debug for UpstreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamSession")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Write side of a session.
#[derive(Debug)]
pub struct AudioSink {
    tx: mpsc::Sender<AudioChunk>,
    handle: UpstreamHandle,
}

impl AudioSink {
    /// Forwards one chunk, waiting only for queue space.
    ///
    /// # Errors
    ///
    /// `UpstreamClosed` if the session was released or its driver has exited.
    pub async fn send_audio(&self, chunk: AudioChunk) -> Result<(), UpstreamError> {
        if self.handle.is_closed() {
            return Err(UpstreamError::UpstreamClosed);
        }
        self.tx
            .send(chunk)
            .await
            .map_err(|_| UpstreamError::UpstreamClosed)
    }
}

/// Read side of a session.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<UpstreamEvent>,
    finished: bool,
}

impl EventStream {
    /// Returns the next event, or `None` once a terminal event has been
    /// yielded.
    ///
    /// An adapter that goes away without reporting a terminal event is seen
    /// as a single `Closed`.
    pub async fn next(&mut self) -> Option<UpstreamEvent> {
        if self.finished {
            return None;
        }
        let event = match self.rx.recv().await {
            Some(event) => event,
            None => UpstreamEvent::Closed,
        };
        if event.is_terminal() {
            self.finished = true;
            self.rx.close();
        }
        Some(event)
    }
}

#[derive(Debug, Default)]
struct HandleInner {
    released: AtomicBool,
    close_calls: AtomicUsize,
    shutdown: CancellationToken,
}

/// One-shot release handle for a session.
#[derive(Debug, Clone, Default)]
pub struct UpstreamHandle {
    inner: Arc<HandleInner>,
}

impl UpstreamHandle {
    fn new() -> Self {
        Self::default()
    }

    /// Releases the session. Safe to call any number of times from any task.
    ///
    /// Returns `true` only for the call that performed the release.
    pub fn close(&self) -> bool {
        self.inner.close_calls.fetch_add(1, Ordering::Relaxed);
        if self.inner.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.shutdown.cancel();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    /// Number of times `close` has been called.
    pub fn close_calls(&self) -> usize {
        self.inner.close_calls.load(Ordering::Relaxed)
    }

    /// Token cancelled on release; adapter drivers stop when it fires.
    pub fn shutdown_signal(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }
}
