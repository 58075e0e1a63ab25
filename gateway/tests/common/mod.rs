//! Shared test doubles: a scripted transport that records every input event.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use sonic_gateway::core::sonic::{
    ChannelSink, ChannelStream, EventSink, EventStream, ReconnectionConfig, SessionStatus,
    SonicConfig, SonicError, SonicResult, StreamManager, TextOutput, TransportConnector,
};

/// Transport double. Each `connect` opens a fresh pair of channels; input
/// events are recorded in order and the test drives the output side.
#[derive(Default)]
pub struct StubConnector {
    events: Arc<Mutex<Vec<Value>>>,
    output: Mutex<Option<mpsc::Sender<SonicResult<Bytes>>>>,
    connects: AtomicUsize,
    refuse: AtomicBool,
    /// Event kind whose next send fails with a transport error
    fail_next: Arc<Mutex<Option<String>>>,
}

impl StubConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every input event sent so far, across all connections.
    pub fn events(&self) -> Vec<Value> {
        self.events.lock().clone()
    }

    /// Event kinds (`sessionStart`, `contentStart`, ...) in send order.
    pub fn kinds(&self) -> Vec<String> {
        self.events().iter().map(event_kind).collect()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Make further connection attempts fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Fail the next send of an event of `kind` (e.g. `contentEnd`).
    pub fn fail_next_send(&self, kind: &str) {
        *self.fail_next.lock() = Some(kind.to_string());
    }

    /// Deliver one output frame on the current connection.
    pub async fn push(&self, frame: Value) {
        let tx = self.output.lock().clone();
        if let Some(tx) = tx {
            let _ = tx.send(Ok(Bytes::from(frame.to_string()))).await;
        }
    }

    pub async fn push_raw(&self, frame: &'static [u8]) {
        let tx = self.output.lock().clone();
        if let Some(tx) = tx {
            let _ = tx.send(Ok(Bytes::from_static(frame))).await;
        }
    }

    /// End the current output stream as if the remote side hung up.
    pub fn end_stream(&self) {
        self.output.lock().take();
    }

    /// Wait until `predicate` holds for the recorded events.
    pub async fn wait_for(&self, predicate: impl Fn(&[Value]) -> bool) {
        wait_until(|| predicate(&self.events())).await;
    }
}

#[async_trait]
impl TransportConnector for StubConnector {
    async fn connect(
        &self,
        _config: &SonicConfig,
    ) -> SonicResult<(Box<dyn EventSink>, Box<dyn EventStream>)> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(SonicError::ConnectionFailed("refused by stub".to_string()));
        }

        let (in_tx, mut in_rx) = mpsc::channel::<Bytes>(256);
        let (out_tx, out_rx) = mpsc::channel(256);
        *self.output.lock() = Some(out_tx);

        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(payload) = in_rx.recv().await {
                if let Ok(value) = serde_json::from_slice::<Value>(&payload) {
                    events.lock().push(value);
                }
            }
        });

        let sink = FailingSink {
            inner: ChannelSink::new(in_tx),
            fail_next: self.fail_next.clone(),
        };
        Ok((Box::new(sink), Box::new(ChannelStream::new(out_rx))))
    }
}

/// Sink that rejects one chosen event kind once, then forwards normally.
struct FailingSink {
    inner: ChannelSink,
    fail_next: Arc<Mutex<Option<String>>>,
}

#[async_trait]
impl EventSink for FailingSink {
    async fn send(&mut self, payload: Bytes) -> SonicResult<()> {
        let kind = serde_json::from_slice::<Value>(&payload)
            .map(|event| event_kind(&event))
            .unwrap_or_default();
        let fail = {
            let mut fail_next = self.fail_next.lock();
            if fail_next.as_deref() == Some(kind.as_str()) {
                fail_next.take();
                true
            } else {
                false
            }
        };
        if fail {
            return Err(SonicError::Transport(format!("injected {kind} failure")));
        }
        self.inner.send(payload).await
    }

    async fn close(&mut self) -> SonicResult<()> {
        self.inner.close().await
    }
}

/// Name of the single key inside `event`.
pub fn event_kind(event: &Value) -> String {
    event["event"]
        .as_object()
        .and_then(|e| e.keys().next().cloned())
        .unwrap_or_default()
}

/// Body of the event, e.g. `event["event"]["contentStart"]`.
pub fn event_body<'a>(event: &'a Value) -> &'a Value {
    let kind = event_kind(event);
    &event["event"][kind.as_str()]
}

/// Session settings for fast tests: no pacing, quick reconnects.
pub fn test_config() -> SonicConfig {
    SonicConfig {
        reconnection: ReconnectionConfig {
            max_attempts: 2,
            initial_delay_ms: 10,
            max_delay_ms: 20,
            jitter: false,
            ..Default::default()
        },
        ..SonicConfig::default()
    }
    .without_pacing()
}

/// Everything a session reported through its callbacks.
#[derive(Default)]
pub struct Recorded {
    pub texts: Mutex<Vec<TextOutput>>,
    pub audio: Mutex<Vec<Bytes>>,
    pub statuses: Mutex<Vec<SessionStatus>>,
    pub errors: Mutex<Vec<String>>,
    pub latencies: Mutex<Vec<Duration>>,
}

impl Recorded {
    pub fn status_codes(&self) -> Vec<&'static str> {
        self.statuses.lock().iter().map(|s| s.code()).collect()
    }

    pub async fn wait_for_status(&self, code: &str) {
        wait_until(|| self.status_codes().contains(&code)).await;
    }
}

/// Register recording callbacks on `manager`.
pub fn record(manager: &StreamManager) -> Arc<Recorded> {
    let recorded = Arc::new(Recorded::default());

    let r = recorded.clone();
    manager.on_text(Arc::new(move |text| {
        let r = r.clone();
        Box::pin(async move {
            r.texts.lock().push(text);
        })
    }));

    let r = recorded.clone();
    manager.on_audio(Arc::new(move |chunk| {
        let r = r.clone();
        Box::pin(async move {
            r.audio.lock().push(chunk.data);
        })
    }));

    let r = recorded.clone();
    manager.on_status(Arc::new(move |status| {
        let r = r.clone();
        Box::pin(async move {
            r.statuses.lock().push(status);
        })
    }));

    let r = recorded.clone();
    manager.on_error(Arc::new(move |error| {
        let r = r.clone();
        Box::pin(async move {
            r.errors.lock().push(error.to_string());
        })
    }));

    let r = recorded.clone();
    manager.on_latency(Arc::new(move |latency| {
        let r = r.clone();
        Box::pin(async move {
            r.latencies.lock().push(latency);
        })
    }));

    recorded
}

/// Poll `condition` for up to five seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn text_frame(role: &str, content: &str) -> Value {
    json!({"event": {"textOutput": {"role": role, "content": content}}})
}

pub fn content_start_frame(role: &str, content_type: &str, stage: Option<&str>) -> Value {
    let mut body = json!({"role": role, "type": content_type});
    if let Some(stage) = stage {
        body["additionalModelFields"] = json!(format!("{{\"generationStage\":\"{stage}\"}}"));
    }
    json!({"event": {"contentStart": body}})
}
