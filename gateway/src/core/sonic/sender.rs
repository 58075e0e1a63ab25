//! Outbound event sender.

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use super::base::{SonicError, SonicResult};
use super::events::{ContentType, InputEvent};
use super::lifecycle::ContentTracker;
use super::transport::EventSink;

struct SenderInner {
    sink: Option<Box<dyn EventSink>>,
    tracker: ContentTracker,
}

/// Serializes input events onto the current transport sink.
///
/// Lifecycle violations are rejected before the sink is touched. Sends on an
/// inactive session fail with [`SonicError::NotActive`].
pub struct EventSender {
    inner: Mutex<SenderInner>,
    active: AtomicBool,
}

impl Default for EventSender {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSender {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SenderInner {
                sink: None,
                tracker: ContentTracker::new(),
            }),
            active: AtomicBool::new(false),
        }
    }

    /// Validate, serialize and transmit one event.
    pub async fn send(&self, event: &InputEvent) -> SonicResult<()> {
        let mut inner = self.inner.lock().await;
        inner.tracker.validate(event)?;

        if !self.is_active() {
            return Err(SonicError::NotActive);
        }
        let sink = inner.sink.as_mut().ok_or(SonicError::NotActive)?;

        let payload = Bytes::from(event.to_json()?);
        sink.send(payload).await?;

        if matches!(event, InputEvent::AudioInput(_)) {
            trace!(kind = event.kind(), "Sent event");
        } else {
            debug!(
                kind = event.kind(),
                content_name = event.content_name().unwrap_or(""),
                "Sent event"
            );
        }

        inner.tracker.record(event);
        Ok(())
    }

    /// Install a freshly connected sink and mark the session active.
    pub async fn install(&self, sink: Box<dyn EventSink>) {
        let mut inner = self.inner.lock().await;
        inner.tracker.reset();
        inner.sink = Some(sink);
        self.active.store(true, Ordering::SeqCst);
    }

    /// Mark the session inactive and close the sink.
    pub async fn shutdown(&self) {
        self.active.store(false, Ordering::SeqCst);
        let sink = self.inner.lock().await.sink.take();
        if let Some(mut sink) = sink {
            if let Err(e) = sink.close().await {
                warn!("Failed to close input stream: {}", e);
            }
        }
    }

    /// Stop accepting sends without closing the sink.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Names of all open content blocks, in start order.
    pub async fn open_contents(&self) -> Vec<String> {
        self.inner.lock().await.tracker.open_contents()
    }

    /// Name of the open block of the given type, if any.
    pub async fn open_content(&self, content_type: ContentType) -> Option<String> {
        self.inner
            .lock()
            .await
            .tracker
            .open_name(content_type)
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sonic::transport::ChannelSink;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_send_requires_active_session() {
        let sender = EventSender::new();
        let result = sender.send(&InputEvent::session_end()).await;
        assert!(matches!(result, Err(SonicError::NotActive)));
    }

    #[tokio::test]
    async fn test_lifecycle_checked_before_transport() {
        let (tx, mut rx) = mpsc::channel(8);
        let sender = EventSender::new();
        sender.install(Box::new(ChannelSink::new(tx))).await;

        let result = sender
            .send(&InputEvent::audio_input("p", "a", &[0, 0]).unwrap())
            .await;
        assert!(matches!(result, Err(SonicError::Lifecycle(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_writes_wire_json() {
        let (tx, mut rx) = mpsc::channel(8);
        let sender = EventSender::new();
        sender.install(Box::new(ChannelSink::new(tx))).await;

        sender
            .send(&InputEvent::audio_content_start("p", "a").unwrap())
            .await
            .unwrap();
        let frame = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(value["event"]["contentStart"]["contentName"], "a");
        assert_eq!(
            sender.open_content(ContentType::Audio).await.as_deref(),
            Some("a")
        );
    }

    #[tokio::test]
    async fn test_sink_failure_is_reported_and_not_recorded() {
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let sender = EventSender::new();
        sender.install(Box::new(ChannelSink::new(tx))).await;

        let result = sender
            .send(&InputEvent::audio_content_start("p", "a").unwrap())
            .await;
        assert!(matches!(result, Err(SonicError::Transport(_))));
        assert!(sender.open_contents().await.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_deactivates() {
        let (tx, mut rx) = mpsc::channel(8);
        let sender = EventSender::new();
        sender.install(Box::new(ChannelSink::new(tx))).await;
        assert!(sender.is_active());

        sender.shutdown().await;
        assert!(!sender.is_active());
        assert!(rx.recv().await.is_none());
        assert!(matches!(
            sender.send(&InputEvent::session_end()).await,
            Err(SonicError::NotActive)
        ));
    }
}
