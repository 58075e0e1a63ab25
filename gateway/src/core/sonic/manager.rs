//! Session-level orchestration.
//!
//! [`StreamManager`] owns one Nova Sonic session: it opens the duplex stream
//! and sends the initialization sequence, spawns the response processor and
//! the audio flush task, forwards microphone audio and text, and runs the
//! close handshake exactly once.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sonic_gateway::core::sonic::{BedrockConnector, SonicConfig, StreamManager};
//! use sonic_gateway::core::tools::ToolRegistry;
//!
//! let manager = StreamManager::new(
//!     SonicConfig::default(),
//!     Arc::new(BedrockConnector::new(None)),
//!     Arc::new(ToolRegistry::empty()),
//! );
//! manager.on_text(Arc::new(|t| Box::pin(async move {
//!     println!("{}: {}", t.role, t.text);
//! })));
//! manager.initialize().await?;
//! manager.start_audio_input().await?;
//! manager.send_audio_chunk(pcm).await?;
//! manager.close().await;
//! ```

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::audio_buffer::{AudioQueueSender, spawn_flush_task};
use super::base::{
    AudioCallback, LatencyCallback, SessionStatus, SonicError, SonicErrorCallback, SonicResult,
    StatusCallback, TextCallback, emit_status,
};
use super::config::{SonicConfig, SonicVoice};
use super::processor::ResponseProcessor;
use super::session::SessionContext;
use super::transport::TransportConnector;
use crate::core::tools::ToolRegistry;

/// Background tasks of an open session.
struct SessionTasks {
    processor_cancel: CancellationToken,
    flush_cancel: CancellationToken,
    processor: JoinHandle<()>,
    flush: JoinHandle<()>,
    /// Held so the flush task only stops on cancellation
    _audio_tx: AudioQueueSender,
}

/// Manages one bidirectional Nova Sonic session.
///
/// Callbacks run on the session's tasks. They must not await
/// [`close`](Self::close) or [`change_voice`](Self::change_voice) on the same
/// manager; hand work off to another task instead.
pub struct StreamManager {
    ctx: Arc<SessionContext>,
    tasks: Mutex<Option<SessionTasks>>,
}

impl StreamManager {
    pub fn new(
        config: SonicConfig,
        connector: Arc<dyn TransportConnector>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            ctx: Arc::new(SessionContext::new(config, connector, tools)),
            tasks: Mutex::new(None),
        }
    }

    // =========================================================================
    // Callbacks
    // =========================================================================

    pub fn on_text(&self, callback: TextCallback) {
        self.ctx.callbacks.write().text = Some(callback);
    }

    pub fn on_audio(&self, callback: AudioCallback) {
        self.ctx.callbacks.write().audio = Some(callback);
    }

    pub fn on_status(&self, callback: StatusCallback) {
        self.ctx.callbacks.write().status = Some(callback);
    }

    pub fn on_latency(&self, callback: LatencyCallback) {
        self.ctx.callbacks.write().latency = Some(callback);
    }

    pub fn on_error(&self, callback: SonicErrorCallback) {
        self.ctx.callbacks.write().error = Some(callback);
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Open the stream, send the initialization sequence and start the
    /// session tasks.
    pub async fn initialize(&self) -> SonicResult<()> {
        self.start().await?;
        emit_status(&self.ctx.callbacks, SessionStatus::Connected).await;
        Ok(())
    }

    async fn start(&self) -> SonicResult<()> {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_some() {
            return Err(SonicError::Lifecycle(
                "session is already initialized".to_string(),
            ));
        }

        self.ctx.set_closing(false);
        let stream = self.ctx.open_stream().await?;

        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        let flush_cancel = CancellationToken::new();
        let processor_cancel = CancellationToken::new();

        let (threshold, poll_interval) = {
            let config = self.ctx.config.read();
            (config.audio_buffer_threshold, config.audio_poll_interval())
        };
        let flush = spawn_flush_task(
            audio_rx,
            self.ctx.barge_in.clone(),
            self.ctx.callbacks.clone(),
            threshold,
            poll_interval,
            flush_cancel.clone(),
        );

        let processor = ResponseProcessor::new(
            self.ctx.clone(),
            stream,
            audio_tx.clone(),
            processor_cancel.clone(),
        );
        let processor = tokio::spawn(processor.run());

        *tasks = Some(SessionTasks {
            processor_cancel,
            flush_cancel,
            processor,
            flush,
            _audio_tx: audio_tx,
        });
        Ok(())
    }

    /// Close the session. Runs the handshake once; later calls are no-ops.
    pub async fn close(&self) {
        if self.stop().await {
            emit_status(&self.ctx.callbacks, SessionStatus::Closed).await;
        }
    }

    async fn stop(&self) -> bool {
        let Some(tasks) = self.tasks.lock().await.take() else {
            return false;
        };

        self.ctx.set_closing(true);
        self.ctx.close_handshake().await;
        self.ctx.sender.shutdown().await;

        tasks.processor_cancel.cancel();
        if let Err(e) = tasks.processor.await {
            debug!("Response processor ended abnormally: {}", e);
        }
        tasks.flush_cancel.cancel();
        if let Err(e) = tasks.flush.await {
            debug!("Audio flush task ended abnormally: {}", e);
        }

        info!(prompt_name = %self.ctx.prompt_name(), "Session closed");
        true
    }

    // =========================================================================
    // Input
    // =========================================================================

    /// Open the user AUDIO content. Idempotent.
    pub async fn start_audio_input(&self) -> SonicResult<()> {
        self.ctx.set_audio_requested(true);
        self.ctx.open_audio_content().await
    }

    /// Send one chunk of 16kHz mono PCM.
    pub async fn send_audio_chunk(&self, pcm: Bytes) -> SonicResult<()> {
        self.ctx.send_audio(&pcm).await
    }

    /// Send a typed user turn.
    pub async fn send_text(&self, text: &str) -> SonicResult<()> {
        self.ctx.send_text(text).await
    }

    /// Discard buffered assistant audio, e.g. when the host detects the user
    /// talking over playback.
    pub async fn barge_in(&self) {
        self.ctx.trigger_barge_in().await;
    }

    /// Switch the output voice by restarting the session with the voice's
    /// persona prompt. Audio input is reopened if it was open.
    pub async fn change_voice(&self, voice: SonicVoice) -> SonicResult<()> {
        if voice == self.voice() {
            return Ok(());
        }

        info!(voice = %voice, "Changing voice");
        emit_status(
            &self.ctx.callbacks,
            SessionStatus::ChangingVoice {
                voice: voice.to_string(),
            },
        )
        .await;

        self.stop().await;
        {
            let mut config = self.ctx.config.write();
            config.voice = voice;
            config.system_prompt = Some(voice.persona_prompt().to_string());
        }
        self.start().await?;

        emit_status(
            &self.ctx.callbacks,
            SessionStatus::VoiceChanged {
                voice: voice.to_string(),
            },
        )
        .await;
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn is_active(&self) -> bool {
        self.ctx.sender.is_active()
    }

    pub fn voice(&self) -> SonicVoice {
        self.ctx.config.read().voice
    }

    /// Prompt name of the current stream.
    pub fn prompt_name(&self) -> String {
        self.ctx.prompt_name()
    }

    pub fn config(&self) -> SonicConfig {
        self.ctx.config.read().clone()
    }
}

impl Drop for StreamManager {
    fn drop(&mut self) {
        // stop background tasks of a session that was never closed
        if let Some(tasks) = self.tasks.get_mut().take() {
            tasks.processor_cancel.cancel();
            tasks.flush_cancel.cancel();
            self.ctx.sender.deactivate();
            // closing the sink needs the runtime; without one the sink is dropped
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let ctx = self.ctx.clone();
                handle.spawn(async move { ctx.sender.shutdown().await });
            }
        }
    }
}
