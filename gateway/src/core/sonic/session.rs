//! State shared by a [`StreamManager`](super::StreamManager) and its tasks.
//!
//! Opening the stream, the initialization sequence and the close handshake
//! live here because both the manager and the response processor (on
//! reconnect) drive them.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::audio_buffer::BargeInSignal;
use super::base::{SessionStatus, SharedCallbacks, SonicError, SonicResult, SpeakerRole, emit_status};
use super::config::SonicConfig;
use super::events::{ContentType, InputEvent};
use super::latency::LatencyTracker;
use super::sender::EventSender;
use super::transport::{EventStream, TransportConnector};
use crate::core::tools::ToolRegistry;

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

pub(crate) struct SessionContext {
    pub(crate) config: RwLock<SonicConfig>,
    pub(crate) connector: Arc<dyn TransportConnector>,
    pub(crate) tools: Arc<ToolRegistry>,
    pub(crate) sender: EventSender,
    pub(crate) callbacks: SharedCallbacks,
    pub(crate) barge_in: Arc<BargeInSignal>,
    pub(crate) latency: Mutex<LatencyTracker>,
    prompt_name: RwLock<String>,
    /// Audio input should be (re)opened whenever the stream is (re)opened
    audio_requested: AtomicBool,
    /// Set while a local close is in progress
    closing: AtomicBool,
}

impl SessionContext {
    pub(crate) fn new(
        config: SonicConfig,
        connector: Arc<dyn TransportConnector>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        let latency = LatencyTracker::new(config.silence_threshold(), config.silence_peak);
        Self {
            config: RwLock::new(config),
            connector,
            tools,
            sender: EventSender::new(),
            callbacks: Arc::new(RwLock::new(Default::default())),
            barge_in: Arc::new(BargeInSignal::new()),
            latency: Mutex::new(latency),
            prompt_name: RwLock::new(String::new()),
            audio_requested: AtomicBool::new(false),
            closing: AtomicBool::new(false),
        }
    }

    pub(crate) fn prompt_name(&self) -> String {
        self.prompt_name.read().clone()
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub(crate) fn set_closing(&self, closing: bool) {
        self.closing.store(closing, Ordering::SeqCst);
    }

    pub(crate) fn set_audio_requested(&self, requested: bool) {
        self.audio_requested.store(requested, Ordering::SeqCst);
    }

    /// Connect, install the sink and send the initialization sequence.
    ///
    /// Audio input is reopened if it was requested before.
    pub(crate) async fn open_stream(&self) -> SonicResult<Box<dyn EventStream>> {
        let config = self.config.read().clone();
        config.validate()?;

        let (sink, stream) = self.connector.connect(&config).await?;
        self.sender.install(sink).await;
        if self.is_closing() {
            // a close began while connecting and has already shut the sender down
            debug!("Session closing, discarding freshly opened stream");
            self.sender.shutdown().await;
            return Err(SonicError::NotActive);
        }

        let prompt_name = Uuid::new_v4().to_string();
        *self.prompt_name.write() = prompt_name.clone();

        if let Err(e) = self.send_init_sequence(&config, &prompt_name).await {
            self.sender.shutdown().await;
            return Err(e);
        }

        if self.audio_requested.load(Ordering::SeqCst) {
            if let Err(e) = self.open_audio_content().await {
                self.sender.shutdown().await;
                return Err(e);
            }
        }

        info!(
            prompt_name = %prompt_name,
            voice = %config.voice,
            tools = self.tools.len(),
            "Session initialized"
        );
        Ok(stream)
    }

    async fn send_init_sequence(&self, config: &SonicConfig, prompt_name: &str) -> SonicResult<()> {
        let delay = config.init_event_delay();
        let system_content = Uuid::new_v4().to_string();

        let events = [
            InputEvent::session_start(&config.inference)?,
            InputEvent::prompt_start(prompt_name, config.voice, &self.tools.specs())?,
            InputEvent::text_content_start(prompt_name, &system_content, SpeakerRole::System)?,
            InputEvent::text_input(prompt_name, &system_content, config.effective_system_prompt())?,
            InputEvent::content_end(prompt_name, &system_content)?,
        ];

        for event in &events {
            self.sender.send(event).await?;
            pause(delay).await;
        }
        Ok(())
    }

    /// Send the AUDIO contentStart unless one is already open.
    pub(crate) async fn open_audio_content(&self) -> SonicResult<()> {
        if self.sender.open_content(ContentType::Audio).await.is_some() {
            return Ok(());
        }
        let content_name = Uuid::new_v4().to_string();
        self.sender
            .send(&InputEvent::audio_content_start(
                &self.prompt_name(),
                &content_name,
            )?)
            .await?;
        debug!(content_name = %content_name, "Audio input started");
        Ok(())
    }

    /// Send one chunk of 16kHz PCM on the open audio content.
    pub(crate) async fn send_audio(&self, pcm: &[u8]) -> SonicResult<()> {
        self.latency.lock().observe_input(pcm);

        let Some(content_name) = self.sender.open_content(ContentType::Audio).await else {
            return Err(SonicError::Lifecycle(
                "audioInput before audio contentStart".to_string(),
            ));
        };
        self.sender
            .send(&InputEvent::audio_input(
                &self.prompt_name(),
                &content_name,
                pcm,
            )?)
            .await
    }

    /// Send a complete USER text content.
    pub(crate) async fn send_text(&self, text: &str) -> SonicResult<()> {
        if text.trim().is_empty() {
            return Err(SonicError::InvalidEvent("text must not be empty".to_string()));
        }
        let prompt_name = self.prompt_name();
        let content_name = Uuid::new_v4().to_string();
        self.sender
            .send(&InputEvent::text_content_start(
                &prompt_name,
                &content_name,
                SpeakerRole::User,
            )?)
            .await?;
        self.sender
            .send(&InputEvent::text_input(&prompt_name, &content_name, text)?)
            .await?;
        self.sender
            .send(&InputEvent::content_end(&prompt_name, &content_name)?)
            .await
    }

    /// Drop buffered assistant audio and report the interruption.
    pub(crate) async fn trigger_barge_in(&self) {
        let epoch = self.barge_in.trigger();
        self.latency.lock().reset();
        debug!(epoch, "Barge-in triggered");
        emit_status(&self.callbacks, SessionStatus::BargeIn).await;
    }

    /// Orderly teardown: contentEnd for open contents, promptEnd, sessionEnd.
    ///
    /// Failures are logged and the remaining steps still run.
    pub(crate) async fn close_handshake(&self) {
        let [after_contents, after_prompt, after_session] =
            self.config.read().close_event_delays_ms.map(Duration::from_millis);
        let prompt_name = self.prompt_name();

        for content_name in self.sender.open_contents().await {
            self.send_logged(InputEvent::content_end(&prompt_name, &content_name))
                .await;
        }
        pause(after_contents).await;

        self.send_logged(InputEvent::prompt_end(&prompt_name)).await;
        pause(after_prompt).await;

        self.send_logged(Ok(InputEvent::session_end())).await;
        pause(after_session).await;
    }

    async fn send_logged(&self, event: SonicResult<InputEvent>) {
        let result = match event {
            Ok(event) => self.sender.send(&event).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(prompt_name = %self.prompt_name(), "Close handshake step failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sonic::transport::{ChannelSink, ChannelStream, EventSink};
    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::sync::{Notify, mpsc};

    /// Connector that blocks in `connect` until released.
    #[derive(Default)]
    struct GatedConnector {
        entered: Notify,
        gate: Notify,
        input: Mutex<Option<mpsc::Receiver<Bytes>>>,
    }

    #[async_trait]
    impl TransportConnector for GatedConnector {
        async fn connect(
            &self,
            _config: &SonicConfig,
        ) -> SonicResult<(Box<dyn EventSink>, Box<dyn EventStream>)> {
            self.entered.notify_one();
            self.gate.notified().await;

            let (in_tx, in_rx) = mpsc::channel(16);
            let (_out_tx, out_rx) = mpsc::channel(16);
            *self.input.lock() = Some(in_rx);
            Ok((
                Box::new(ChannelSink::new(in_tx)),
                Box::new(ChannelStream::new(out_rx)),
            ))
        }
    }

    fn context(connector: Arc<GatedConnector>) -> Arc<SessionContext> {
        Arc::new(SessionContext::new(
            SonicConfig::default().without_pacing(),
            connector,
            Arc::new(ToolRegistry::empty()),
        ))
    }

    #[tokio::test]
    async fn test_stream_opened_during_close_is_discarded() {
        let connector = Arc::new(GatedConnector::default());
        let ctx = context(connector.clone());

        let opening = tokio::spawn({
            let ctx = ctx.clone();
            async move { ctx.open_stream().await.map(|_| ()) }
        });
        connector.entered.notified().await;

        // close starts while the connect is still pending
        ctx.set_closing(true);
        ctx.sender.shutdown().await;
        connector.gate.notify_one();

        let result = opening.await.unwrap();
        assert!(matches!(result, Err(SonicError::NotActive)));
        assert!(!ctx.sender.is_active());

        // the new stream got no init events and its input side was closed
        let mut input = connector.input.lock().take().unwrap();
        assert!(input.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_open_stream_sends_init_sequence() {
        let connector = Arc::new(GatedConnector::default());
        let ctx = context(connector.clone());
        connector.gate.notify_one();

        ctx.open_stream().await.unwrap();
        assert!(ctx.sender.is_active());
        assert!(!ctx.prompt_name().is_empty());

        let mut input = connector.input.lock().take().unwrap();
        let first = input.recv().await.unwrap();
        assert!(std::str::from_utf8(&first).unwrap().contains("sessionStart"));
    }
}
