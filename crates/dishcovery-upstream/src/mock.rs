//! Deterministic stand-in for the live speech service.
//!
//! On open it immediately reports that it is listening, then counts inbound
//! audio chunks. Every `trigger` chunks it answers with a transcript, a
//! widget token, and 100 ms of silence at the client output rate.

use crate::error::UpstreamError;
use crate::session::{
    SessionConfig, UpstreamAdapter, UpstreamEvent, UpstreamHandle, UpstreamSession,
    AUDIO_QUEUE_DEPTH, EVENT_QUEUE_DEPTH,
};
use async_trait::async_trait;
use dishcovery_types::{AudioChunk, AudioFormat};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Chunks counted before each scripted reply.
pub const DEFAULT_TRIGGER_CHUNKS: usize = 10;

pub const LISTENING_TRANSCRIPT: &str = "(listening...)";

pub const MOCK_REPLY_TRANSCRIPT: &str =
    "Try Tacos Apson on South 12th Avenue, the carne asada is unreal. Want something sit-down instead?";

pub const MOCK_WIDGET_TOKEN: &str = "mock-maps-widget-context-token";

const MOCK_REPLY_AUDIO: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct ProbeState {
    opens: AtomicUsize,
    /// When false only `opens` is tracked.
    recording: bool,
    /// Locks are never held across an `.await`.
    received: Mutex<Vec<AudioChunk>>,
    configs: Mutex<Vec<SessionConfig>>,
    handles: Mutex<Vec<UpstreamHandle>>,
}

/// Observation point shared between a [`MockAdapter`] and a test.
///
/// Chunks, configs, and handles are only kept by a recording adapter
/// (see [`MockAdapter::recording`]); otherwise the probe just counts opens.
#[derive(Debug, Clone, Default)]
pub struct MockProbe {
    state: Arc<ProbeState>,
}

impl MockProbe {
    fn new(recording: bool) -> Self {
        Self {
            state: Arc::new(ProbeState {
                recording,
                ..ProbeState::default()
            }),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.state.recording
    }

    pub fn open_count(&self) -> usize {
        self.state.opens.load(Ordering::Acquire)
    }

    /// Every chunk handed to any mock session, in arrival order.
    pub fn received(&self) -> Vec<AudioChunk> {
        match self.state.received.lock() {
            Ok(chunks) => chunks.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn last_config(&self) -> Option<SessionConfig> {
        match self.state.configs.lock() {
            Ok(configs) => configs.last().cloned(),
            Err(poisoned) => poisoned.into_inner().last().cloned(),
        }
    }

    /// Release handles of every session opened so far.
    pub fn handles(&self) -> Vec<UpstreamHandle> {
        match self.state.handles.lock() {
            Ok(handles) => handles.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record_open(&self, config: SessionConfig, handle: UpstreamHandle) {
        self.state.opens.fetch_add(1, Ordering::AcqRel);
        if !self.state.recording {
            return;
        }
        if let Ok(mut configs) = self.state.configs.lock() {
            configs.push(config);
        }
        if let Ok(mut handles) = self.state.handles.lock() {
            handles.push(handle);
        }
    }

    fn record_chunk(&self, chunk: AudioChunk) {
        if !self.state.recording {
            return;
        }
        if let Ok(mut received) = self.state.received.lock() {
            received.push(chunk);
        }
    }
}

#[derive(Debug, Clone)]
pub struct MockAdapter {
    trigger: usize,
    probe: MockProbe,
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::with_trigger(DEFAULT_TRIGGER_CHUNKS)
    }

    /// Replies after every `trigger` chunks (minimum 1).
    pub fn with_trigger(trigger: usize) -> Self {
        Self {
            trigger: trigger.max(1),
            probe: MockProbe::new(false),
        }
    }

    /// Keeps every chunk, config, and handle in the probe for inspection.
    /// Memory grows with every call, so this is for tests only.
    pub fn recording(self) -> Self {
        Self {
            probe: MockProbe::new(true),
            ..self
        }
    }

    pub fn probe(&self) -> MockProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl UpstreamAdapter for MockAdapter {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn open(&self, config: SessionConfig) -> Result<UpstreamSession, UpstreamError> {
        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_QUEUE_DEPTH);
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

        event_tx
            .try_send(UpstreamEvent::Transcript(LISTENING_TRANSCRIPT.to_string()))
            .map_err(|_| UpstreamError::UpstreamClosed)?;

        let session = UpstreamSession::new(audio_tx, event_rx);
        let shutdown = session.handle().shutdown_signal();
        self.probe.record_open(config, session.handle().clone());

        tokio::spawn(run_script(
            audio_rx,
            event_tx,
            shutdown,
            self.trigger,
            self.probe.clone(),
        ));

        Ok(session)
    }
}

async fn run_script(
    mut audio_rx: mpsc::Receiver<AudioChunk>,
    events: mpsc::Sender<UpstreamEvent>,
    shutdown: CancellationToken,
    trigger: usize,
    probe: MockProbe,
) {
    let mut count = 0usize;
    loop {
        let chunk = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            chunk = audio_rx.recv() => chunk,
        };
        let Some(chunk) = chunk else { break };

        probe.record_chunk(chunk);
        count += 1;
        if count % trigger != 0 {
            continue;
        }

        debug!(chunks = count, "mock session replying");
        let reply = [
            UpstreamEvent::Transcript(MOCK_REPLY_TRANSCRIPT.to_string()),
            UpstreamEvent::WidgetToken(MOCK_WIDGET_TOKEN.to_string()),
            UpstreamEvent::AudioOut(AudioChunk::silence(
                MOCK_REPLY_AUDIO,
                AudioFormat::CLIENT_OUTPUT,
            )),
        ];
        for event in reply {
            let sent = tokio::select! {
                biased;
                () = shutdown.cancelled() => false,
                res = events.send(event) => res.is_ok(),
            };
            if !sent {
                break;
            }
        }
    }

    // Chunks accepted before the release still count as delivered.
    audio_rx.close();
    while let Ok(chunk) = audio_rx.try_recv() {
        probe.record_chunk(chunk);
        count += 1;
    }
    debug!(chunks = count, "mock session finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use dishcovery_types::GeoPoint;

    #[tokio::test]
    async fn announces_listening_on_open() {
        let adapter = MockAdapter::new().recording();
        let session = adapter
            .open(SessionConfig::for_location(GeoPoint::CAMPUS))
            .await
            .unwrap();
        let (_sink, mut events, _handle) = session.split();

        assert_eq!(
            events.next().await,
            Some(UpstreamEvent::Transcript(LISTENING_TRANSCRIPT.into()))
        );
        assert_eq!(adapter.probe().open_count(), 1);
    }

    #[tokio::test]
    async fn replies_after_trigger_count() {
        let adapter = MockAdapter::with_trigger(3).recording();
        let session = adapter
            .open(SessionConfig::for_location(GeoPoint::new(1.0, 2.0)))
            .await
            .unwrap();
        let (sink, mut events, handle) = session.split();
        events.next().await;

        for i in 0..3u8 {
            sink.send_audio(AudioChunk::from(vec![i; 4])).await.unwrap();
        }

        assert_eq!(
            events.next().await,
            Some(UpstreamEvent::Transcript(MOCK_REPLY_TRANSCRIPT.into()))
        );
        assert_eq!(
            events.next().await,
            Some(UpstreamEvent::WidgetToken(MOCK_WIDGET_TOKEN.into()))
        );
        match events.next().await {
            Some(UpstreamEvent::AudioOut(chunk)) => {
                assert_eq!(chunk.len(), 4800);
                assert!(chunk.as_bytes().iter().all(|b| *b == 0));
            }
            other => panic!("expected audio, got {:?}", other),
        }

        assert!(handle.close());
        assert_eq!(events.next().await, Some(UpstreamEvent::Closed));
        assert_eq!(adapter.probe().received().len(), 3);
        assert_eq!(
            adapter.probe().last_config().unwrap().location,
            GeoPoint::new(1.0, 2.0)
        );
    }

    #[tokio::test]
    async fn default_adapter_keeps_no_call_data() {
        let adapter = MockAdapter::new();
        let probe = adapter.probe();
        assert!(!probe.is_recording());

        for _ in 0..3 {
            let session = adapter
                .open(SessionConfig::for_location(GeoPoint::CAMPUS))
                .await
                .unwrap();
            let (sink, mut events, handle) = session.split();
            for _ in 0..50 {
                sink.send_audio(AudioChunk::from(vec![7u8; 640])).await.unwrap();
            }
            handle.close();
            while events.next().await.is_some() {}
        }

        assert_eq!(probe.open_count(), 3);
        assert!(probe.received().is_empty());
        assert!(probe.handles().is_empty());
        assert!(probe.last_config().is_none());
    }
}
