//! Inbound response processing.
//!
//! One [`ResponseProcessor`] task per session reads output frames, routes
//! text, audio and tool use to the host, answers tool calls and recovers
//! from transport failures by reconnecting with backoff.

use bytes::Bytes;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::audio_buffer::AudioQueueSender;
use super::base::{
    SessionStatus, SonicError, SonicResult, SpeakerRole, TextOutput, emit_error, emit_status,
};
use super::dedup::TextDeduplicator;
use super::events::{InputEvent, OutputEvent, TextOutputEvent};
use super::session::SessionContext;
use super::transport::EventStream;

/// Tool-use progress for the current turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolState {
    Idle,
    /// A `toolUse` arrived; the result is sent on the TOOL `contentEnd`
    AwaitingToolResult {
        tool_name: String,
        tool_use_id: String,
        content: String,
    },
    Closed,
}

enum Flow {
    Continue,
    Completed,
}

pub(crate) struct ResponseProcessor {
    ctx: Arc<SessionContext>,
    stream: Box<dyn EventStream>,
    audio_tx: AudioQueueSender,
    cancel: CancellationToken,
    state: ToolState,
    role: SpeakerRole,
    speculative: bool,
    dedup: TextDeduplicator,
    decode_failures: u32,
    reconnect_attempt: u32,
}

impl ResponseProcessor {
    pub(crate) fn new(
        ctx: Arc<SessionContext>,
        stream: Box<dyn EventStream>,
        audio_tx: AudioQueueSender,
        cancel: CancellationToken,
    ) -> Self {
        let cooldown = ctx.config.read().dedup_cooldown();
        Self {
            ctx,
            stream,
            audio_tx,
            cancel,
            state: ToolState::Idle,
            role: SpeakerRole::Assistant,
            speculative: false,
            dedup: TextDeduplicator::new(cooldown),
            decode_failures: 0,
            reconnect_attempt: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Response processor cancelled");
                    return;
                }
                next = self.stream.recv() => next,
            };

            let failure = match next {
                Ok(Some(frame)) => match self.process_frame(frame).await {
                    Ok(Flow::Continue) => continue,
                    Ok(Flow::Completed) => {
                        self.state = ToolState::Closed;
                        if self.ctx.is_closing() {
                            debug!("Completion ended during close");
                            return;
                        }
                        info!(prompt_name = %self.ctx.prompt_name(), "Completion ended");
                        // nothing reads this stream any more; later sends fail with NotActive
                        self.ctx.sender.shutdown().await;
                        emit_status(&self.ctx.callbacks, SessionStatus::Completed).await;
                        return;
                    }
                    Err(reason) => reason,
                },
                Ok(None) => "stream ended unexpectedly".to_string(),
                Err(e) => e.to_string(),
            };

            if self.ctx.is_closing() {
                debug!("Stream ended during close: {}", failure);
                return;
            }
            if !self.recover(failure).await {
                return;
            }
        }
    }

    /// Handle one frame. `Err` carries the reason for a transport failure.
    async fn process_frame(&mut self, frame: Bytes) -> Result<Flow, String> {
        let result = match OutputEvent::parse(&frame) {
            Ok(event) => self.handle_event(event).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(flow) => {
                self.decode_failures = 0;
                self.reconnect_attempt = 0;
                Ok(flow)
            }
            Err(SonicError::Decode(reason)) => {
                self.decode_failures += 1;
                let budget = self.ctx.config.read().max_consecutive_decode_failures;
                warn!(
                    failures = self.decode_failures,
                    budget, "Skipping malformed frame: {}", reason
                );
                if self.decode_failures >= budget {
                    Err(format!(
                        "{} consecutive malformed frames, last: {}",
                        self.decode_failures, reason
                    ))
                } else {
                    Ok(Flow::Continue)
                }
            }
            Err(e) if e.is_transport() => Err(e.to_string()),
            Err(e) => {
                // local failures do not end the session
                warn!("Failed to handle event: {}", e);
                emit_error(&self.ctx.callbacks, e).await;
                Ok(Flow::Continue)
            }
        }
    }

    async fn handle_event(&mut self, event: OutputEvent) -> SonicResult<Flow> {
        match event {
            OutputEvent::ContentStart(start) => {
                if let Some(role) = start.role {
                    self.role = role;
                }
                // blocks without a generation stage (AUDIO, TOOL) keep the current one
                if let Some(speculative) = start.is_speculative()
                    && speculative != self.speculative
                {
                    trace!(speculative, "Generation stage changed");
                    self.speculative = speculative;
                    self.dedup.clear();
                }
            }
            OutputEvent::TextOutput(text) => self.handle_text(text).await,
            OutputEvent::AudioOutput(audio) => {
                let pcm = audio.decode()?;
                self.handle_audio(pcm).await;
            }
            OutputEvent::ToolUse(tool_use) => {
                if let ToolState::AwaitingToolResult { tool_use_id, .. } = &self.state {
                    warn!(
                        previous = %tool_use_id,
                        "toolUse arrived while another tool call was pending"
                    );
                }
                info!(
                    tool = %tool_use.tool_name,
                    tool_use_id = %tool_use.tool_use_id,
                    "Tool use requested"
                );
                self.state = ToolState::AwaitingToolResult {
                    tool_name: tool_use.tool_name,
                    tool_use_id: tool_use.tool_use_id,
                    content: tool_use.content,
                };
            }
            OutputEvent::ContentEnd(end) if end.is_tool() => {
                match std::mem::replace(&mut self.state, ToolState::Idle) {
                    ToolState::AwaitingToolResult {
                        tool_name,
                        tool_use_id,
                        content,
                    } => {
                        self.answer_tool(&tool_name, &tool_use_id, &content).await?;
                    }
                    ToolState::Idle => {
                        debug!("TOOL contentEnd with no pending toolUse, ignoring");
                    }
                    ToolState::Closed => self.state = ToolState::Closed,
                }
            }
            OutputEvent::ContentEnd(end) => {
                trace!(stop_reason = ?end.stop_reason, "Content ended");
            }
            OutputEvent::CompletionStart => debug!("Completion started"),
            OutputEvent::CompletionEnd(end) => {
                debug!(stop_reason = ?end.stop_reason, "Completion end received");
                return Ok(Flow::Completed);
            }
            OutputEvent::UsageEvent => trace!("Usage event"),
            OutputEvent::Other(kind) => debug!(kind = %kind, "Ignoring output event"),
        }
        Ok(Flow::Continue)
    }

    async fn handle_text(&mut self, text: TextOutputEvent) {
        if text.is_interruption() {
            info!("Barge-in detected");
            self.ctx.trigger_barge_in().await;
            return;
        }

        if text.content.trim().is_empty() {
            return;
        }

        let role = text.role.unwrap_or(self.role);
        let show_speculative = self.ctx.config.read().show_speculative;
        if role == SpeakerRole::Assistant && self.speculative && !show_speculative {
            trace!("Suppressing speculative assistant text");
            return;
        }

        if !self.dedup.should_emit(role, &text.content) {
            trace!(role = %role, "Suppressing duplicate text");
            return;
        }

        let cb = self.ctx.callbacks.read().text.clone();
        if let Some(cb) = cb {
            cb(TextOutput {
                role,
                text: text.content,
                speculative: self.speculative,
            })
            .await;
        }
    }

    async fn handle_audio(&mut self, pcm: Vec<u8>) {
        let latency = self.ctx.latency.lock().observe_output();
        if let Some(latency) = latency {
            debug!(latency_ms = latency.as_millis() as u64, "Response latency");
            let cb = self.ctx.callbacks.read().latency.clone();
            if let Some(cb) = cb {
                cb(latency).await;
            }
        }

        let epoch = self.ctx.barge_in.current();
        if self.audio_tx.send((epoch, Bytes::from(pcm))).is_err() {
            debug!("Audio queue closed, dropping chunk");
        }
    }

    /// Run the tool and send its result as a TOOL content block.
    async fn answer_tool(
        &mut self,
        tool_name: &str,
        tool_use_id: &str,
        content: &str,
    ) -> SonicResult<()> {
        let result = self.ctx.tools.dispatch(tool_name, content).await;
        debug!(tool = tool_name, result = %result, "Tool result");

        let prompt_name = self.ctx.prompt_name();
        let content_name = Uuid::new_v4().to_string();
        let sender = &self.ctx.sender;
        sender
            .send(&InputEvent::tool_content_start(
                &prompt_name,
                &content_name,
                tool_use_id,
            )?)
            .await?;
        sender
            .send(&InputEvent::tool_result(
                &prompt_name,
                &content_name,
                &result,
            )?)
            .await?;
        sender
            .send(&InputEvent::content_end(&prompt_name, &content_name)?)
            .await
    }

    /// Reconnect after a transport failure. Returns false once the session
    /// has been failed or cancelled.
    async fn recover(&mut self, reason: String) -> bool {
        warn!(prompt_name = %self.ctx.prompt_name(), "Stream closed: {}", reason);
        emit_status(
            &self.ctx.callbacks,
            SessionStatus::StreamClosed {
                reason: reason.clone(),
            },
        )
        .await;

        let policy = self.ctx.config.read().reconnection.clone();
        let mut last_error = reason;

        while policy.should_retry(self.reconnect_attempt) {
            if self.ctx.is_closing() {
                return false;
            }
            self.reconnect_attempt += 1;
            let attempt = self.reconnect_attempt;
            emit_status(&self.ctx.callbacks, SessionStatus::Reconnecting { attempt }).await;

            self.ctx.sender.shutdown().await;
            let delay = policy.calculate_delay(attempt);
            info!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");

            let ctx = self.ctx.clone();
            let reopened = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                reopened = async move {
                    tokio::time::sleep(delay).await;
                    ctx.open_stream().await
                } => reopened,
            };

            match reopened {
                Ok(stream) => {
                    self.stream = stream;
                    self.state = ToolState::Idle;
                    self.decode_failures = 0;
                    self.dedup.clear();
                    info!(attempt, "Reconnected");
                    emit_status(&self.ctx.callbacks, SessionStatus::Reconnected { attempt })
                        .await;
                    return true;
                }
                Err(e) => {
                    warn!(attempt, "Reconnect attempt failed: {}", e);
                    last_error = e.to_string();
                }
            }
        }

        self.fail(last_error).await;
        false
    }

    async fn fail(&mut self, reason: String) {
        error!(prompt_name = %self.ctx.prompt_name(), "Session failed: {}", reason);
        self.ctx.sender.shutdown().await;
        self.state = ToolState::Closed;
        emit_status(
            &self.ctx.callbacks,
            SessionStatus::Failed {
                reason: reason.clone(),
            },
        )
        .await;
        emit_error(&self.ctx.callbacks, SonicError::SessionFailed(reason)).await;
    }
}
