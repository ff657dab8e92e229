//! Voice relay session: one client connection paired with one upstream
//! session for the lifetime of a call.
//!
//! The session opens the upstream leg, then runs two pumps as separate
//! tasks. The inbound pump forwards client audio upstream and enforces the
//! idle timeout; the outbound pump forwards upstream events to the client.
//! Pumps only report why they stopped. The session's control path alone
//! decides when to close, moves through [`SessionState`], releases the
//! upstream session once, and closes the client.

use crate::frame::{ClientFrame, OutboundFrame};
use axum::extract::ws::{close_code, CloseFrame, Message};
use dishcovery_types::{ControlMessage, GeoPoint};
use dishcovery_upstream::{AudioSink, EventStream, SessionConfig, UpstreamAdapter, UpstreamEvent};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Default time a call may go without client input.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default bound on each teardown step.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySettings {
    /// Maximum wait for the next client frame before the call is abandoned.
    pub idle_timeout: Duration,
    /// Maximum wait for a pump to stop, and for the client close handshake.
    pub shutdown_grace: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

/// Lifecycle of a relay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Connecting,
    Streaming,
    Closing,
    Closed,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Streaming) | (Connecting, Closing) | (Streaming, Closing) | (Closing, Closed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Streaming => "streaming",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        }
    }
}

/// Why a session ended. Every cause is handled inside the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloseReason {
    #[error("client disconnected")]
    ClientDisconnected,

    #[error("no client input for {}s", .0.as_secs())]
    IdleTimeout(Duration),

    #[error("upstream closed the session")]
    UpstreamClosed,

    #[error("upstream error: {0}")]
    UpstreamFailed(String),

    #[error("upstream session could not be opened: {0}")]
    OpenFailed(String),

    #[error("relay task failed: {0}")]
    TaskFailed(String),
}

impl CloseReason {
    fn close_code(&self) -> u16 {
        match self {
            CloseReason::ClientDisconnected
            | CloseReason::IdleTimeout(_)
            | CloseReason::UpstreamClosed => close_code::NORMAL,
            CloseReason::UpstreamFailed(_)
            | CloseReason::OpenFailed(_)
            | CloseReason::TaskFailed(_) => close_code::ERROR,
        }
    }

    /// Short reason for the close frame (which is limited to 123 bytes).
    fn label(&self) -> &'static str {
        match self {
            CloseReason::ClientDisconnected => "client disconnected",
            CloseReason::IdleTimeout(_) => "idle timeout",
            CloseReason::UpstreamClosed => "upstream closed",
            CloseReason::UpstreamFailed(_) => "upstream error",
            CloseReason::OpenFailed(_) => "upstream unavailable",
            CloseReason::TaskFailed(_) => "relay failure",
        }
    }
}

/// Outcome of a finished session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub reason: CloseReason,
    /// Every state the session entered, in order.
    pub states: Vec<SessionState>,
    /// Audio chunks accepted by the upstream session.
    pub chunks_forwarded: u64,
    /// Frames written to the client, excluding the close frame.
    pub frames_delivered: u64,
}

impl SessionReport {
    pub fn reached(&self, state: SessionState) -> bool {
        self.states.contains(&state)
    }
}

#[derive(Debug, Default)]
struct RelayCounters {
    chunks_forwarded: AtomicU64,
    frames_delivered: AtomicU64,
}

enum Pump {
    Inbound,
    Outbound,
}

pub struct VoiceRelaySession {
    id: Uuid,
    location: GeoPoint,
    adapter: Arc<dyn UpstreamAdapter>,
    settings: RelaySettings,
    state: SessionState,
    history: Vec<SessionState>,
}

impl VoiceRelaySession {
    pub fn new(
        adapter: Arc<dyn UpstreamAdapter>,
        location: GeoPoint,
        settings: RelaySettings,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            location,
            adapter,
            settings,
            state: SessionState::Connecting,
            history: vec![SessionState::Connecting],
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs the call to completion over a client transport split into its
    /// read and write halves.
    ///
    /// Never fails: every error is logged and turned into a [`CloseReason`].
    pub async fn run<R, E, W>(self, reader: R, writer: W) -> SessionReport
    where
        R: Stream<Item = Result<Message, E>> + Send + Unpin + 'static,
        E: Display + Send + 'static,
        W: Sink<Message> + Send + Unpin + 'static,
        W::Error: Display + Send,
    {
        let span = tracing::info_span!(
            "voice_session",
            session_id = %self.id,
            adapter = self.adapter.name()
        );
        self.run_inner(reader, writer).instrument(span).await
    }

    async fn run_inner<R, E, W>(mut self, reader: R, mut writer: W) -> SessionReport
    where
        R: Stream<Item = Result<Message, E>> + Send + Unpin + 'static,
        E: Display + Send + 'static,
        W: Sink<Message> + Send + Unpin + 'static,
        W::Error: Display + Send,
    {
        let grace = self.settings.shutdown_grace;
        info!(
            lat = self.location.latitude,
            lng = self.location.longitude,
            "voice session connecting"
        );

        let config = SessionConfig::for_location(self.location);
        let upstream = match self.adapter.open(config).await {
            Ok(session) => session,
            Err(e) => {
                warn!("upstream session could not be opened: {}", e);
                self.transition(SessionState::Closing);
                let reason = CloseReason::OpenFailed(e.to_string());
                let notice = OutboundFrame::Control(ControlMessage::Error(format!(
                    "Voice service unavailable: {}",
                    e
                )));
                match tokio::time::timeout(grace, writer.send(notice.into_message())).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!("could not notify client: {}", e),
                    Err(_) => debug!("timed out notifying client"),
                }
                close_client(&mut writer, &reason, grace).await;
                self.transition(SessionState::Closed);
                return self.finish(reason, &RelayCounters::default());
            }
        };
        self.transition(SessionState::Streaming);

        let (sink, events, handle) = upstream.split();
        let cancel = CancellationToken::new();
        let counters = Arc::new(RelayCounters::default());

        let mut inbound = tokio::spawn(
            inbound_pump(
                reader,
                sink,
                self.settings.idle_timeout,
                cancel.clone(),
                counters.clone(),
            )
            .in_current_span(),
        );
        let mut outbound = tokio::spawn(
            outbound_pump(events, writer, cancel.clone(), counters.clone()).in_current_span(),
        );

        let mut writer = None;
        let (trigger, first) = tokio::select! {
            res = &mut inbound => (joined(res), Pump::Inbound),
            res = &mut outbound => {
                let (exit, returned) = joined_with_writer(res);
                writer = returned;
                (exit, Pump::Outbound)
            }
        };
        let reason = trigger
            .unwrap_or_else(|| CloseReason::TaskFailed("pump stopped without a cause".to_string()));

        info!(reason = %reason, "voice session closing");
        self.transition(SessionState::Closing);
        cancel.cancel();
        if handle.close() {
            debug!("upstream session released");
        }

        match first {
            Pump::Inbound => match tokio::time::timeout(grace, &mut outbound).await {
                Ok(res) => writer = joined_with_writer(res).1,
                Err(_) => {
                    warn!("outbound pump did not stop in time, aborting");
                    outbound.abort();
                }
            },
            Pump::Outbound => {
                if tokio::time::timeout(grace, &mut inbound).await.is_err() {
                    warn!("inbound pump did not stop in time, aborting");
                    inbound.abort();
                }
            }
        }

        if let Some(mut writer) = writer {
            close_client(&mut writer, &reason, grace).await;
        }
        self.transition(SessionState::Closed);
        self.finish(reason, &counters)
    }

    fn transition(&mut self, next: SessionState) {
        if !self.state.can_transition_to(next) {
            warn!(
                from = self.state.as_str(),
                to = next.as_str(),
                "ignoring invalid session state change"
            );
            return;
        }
        debug!(
            from = self.state.as_str(),
            to = next.as_str(),
            "session state change"
        );
        self.state = next;
        self.history.push(next);
    }

    fn finish(self, reason: CloseReason, counters: &RelayCounters) -> SessionReport {
        let report = SessionReport {
            session_id: self.id,
            reason,
            states: self.history,
            chunks_forwarded: counters.chunks_forwarded.load(Ordering::Relaxed),
            frames_delivered: counters.frames_delivered.load(Ordering::Relaxed),
        };
        info!(
            reason = %report.reason,
            chunks_forwarded = report.chunks_forwarded,
            frames_delivered = report.frames_delivered,
            "voice session closed"
        );
        report
    }
}

fn joined(res: Result<Option<CloseReason>, JoinError>) -> Option<CloseReason> {
    res.unwrap_or_else(|e| Some(CloseReason::TaskFailed(e.to_string())))
}

fn joined_with_writer<W>(
    res: Result<(Option<CloseReason>, W), JoinError>,
) -> (Option<CloseReason>, Option<W>) {
    match res {
        Ok((exit, writer)) => (exit, Some(writer)),
        Err(e) => (Some(CloseReason::TaskFailed(e.to_string())), None),
    }
}

/// Client -> upstream. Returns `None` when stopped by cancellation.
async fn inbound_pump<R, E>(
    mut reader: R,
    sink: AudioSink,
    idle_timeout: Duration,
    cancel: CancellationToken,
    counters: Arc<RelayCounters>,
) -> Option<CloseReason>
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return None,
            next = tokio::time::timeout(idle_timeout, reader.next()) => next,
        };
        let message = match next {
            Err(_) => return Some(CloseReason::IdleTimeout(idle_timeout)),
            Ok(None) => return Some(CloseReason::ClientDisconnected),
            Ok(Some(Err(e))) => {
                debug!("client read failed: {}", e);
                return Some(CloseReason::ClientDisconnected);
            }
            Ok(Some(Ok(message))) => message,
        };

        let chunk = match ClientFrame::decode(message) {
            ClientFrame::Audio(chunk) => chunk,
            ClientFrame::Disconnect => return Some(CloseReason::ClientDisconnected),
            ClientFrame::Ignored => continue,
        };

        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => return None,
            sent = sink.send_audio(chunk) => sent,
        };
        if let Err(e) = sent {
            debug!("upstream refused audio: {}", e);
            return Some(CloseReason::UpstreamClosed);
        }
        counters.chunks_forwarded.fetch_add(1, Ordering::Relaxed);
    }
}

/// Upstream -> client. Hands the writer back so the session can close it.
async fn outbound_pump<W>(
    mut events: EventStream,
    mut writer: W,
    cancel: CancellationToken,
    counters: Arc<RelayCounters>,
) -> (Option<CloseReason>, W)
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let exit = loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break None,
            event = events.next() => event,
        };
        let frame = match event {
            None | Some(UpstreamEvent::Closed) => break Some(CloseReason::UpstreamClosed),
            Some(UpstreamEvent::Error(description)) => {
                warn!("upstream reported an error: {}", description);
                let notice =
                    OutboundFrame::Control(ControlMessage::Error(description.clone())).into_message();
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {}
                    res = writer.send(notice) => {
                        if let Err(e) = res {
                            debug!("could not notify client of upstream error: {}", e);
                        }
                    }
                }
                break Some(CloseReason::UpstreamFailed(description));
            }
            Some(UpstreamEvent::AudioOut(chunk)) => OutboundFrame::Audio(chunk),
            Some(UpstreamEvent::Transcript(text)) => {
                OutboundFrame::Control(ControlMessage::Transcript(text))
            }
            Some(UpstreamEvent::WidgetToken(token)) => {
                OutboundFrame::Control(ControlMessage::WidgetToken(token))
            }
        };

        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => break None,
            sent = writer.send(frame.into_message()) => sent,
        };
        if let Err(e) = sent {
            debug!("client write failed: {}", e);
            break Some(CloseReason::ClientDisconnected);
        }
        counters.frames_delivered.fetch_add(1, Ordering::Relaxed);
    };
    (exit, writer)
}

/// Best-effort close handshake; a peer that is already gone is not an error.
async fn close_client<W>(writer: &mut W, reason: &CloseReason, grace: Duration)
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let frame = Message::Close(Some(CloseFrame {
        code: reason.close_code(),
        reason: reason.label().into(),
    }));
    let handshake = async {
        writer.send(frame).await?;
        writer.close().await
    };
    match tokio::time::timeout(grace, handshake).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("client close did not complete: {}", e),
        Err(_) => debug!("client close timed out"),
    }
}
