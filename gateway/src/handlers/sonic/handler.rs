//! Companion WebSocket handler
//!
//! Each connection on `/ws/{client_id}` gets its own [`StreamManager`]. The
//! session is registered in the [`SessionRegistry`](crate::state::SessionRegistry)
//! for the lifetime of the socket and closed with the full handshake when the
//! client leaves.

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::core::sonic::{
    AudioChunk, SessionStatus, SonicError, SonicVoice, StreamManager, TextOutput,
};
use crate::state::AppState;

use super::messages::{
    SonicIncomingMessage, SonicMessageRoute, SonicOutgoingMessage, decode_audio,
};

/// Channel buffer between session callbacks and the socket writer
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Maximum WebSocket frame size (2 MB)
const MAX_WS_FRAME_SIZE: usize = 2 * 1024 * 1024;

/// Maximum WebSocket message size (2 MB)
const MAX_WS_MESSAGE_SIZE: usize = 2 * 1024 * 1024;

/// Idle check interval
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Base idle timeout before a silent connection is closed
const BASE_IDLE_SECS: u64 = 300;

/// Jitter applied to the idle timeout (±10%)
const IDLE_JITTER_SECS: u64 = 30;

/// How long the writer gets to flush the final messages
const SENDER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Companion WebSocket handler
///
/// Upgrades the connection and runs one Nova Sonic session for `client_id`.
pub async fn sonic_ws_handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!(client_id = %client_id, "Sonic WebSocket connection upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_sonic_socket(socket, client_id, state))
}

async fn handle_sonic_socket(socket: WebSocket, client_id: String, app_state: Arc<AppState>) {
    info!(client_id = %client_id, "Sonic WebSocket connection established");

    let (mut sender, mut receiver) = socket.split();
    let (message_tx, mut message_rx) = mpsc::channel::<SonicMessageRoute>(CHANNEL_BUFFER_SIZE);

    let mut sender_task = tokio::spawn(async move {
        while let Some(route) = message_rx.recv().await {
            let result = match route {
                SonicMessageRoute::Outgoing(message) => match serde_json::to_string(&message) {
                    Ok(json_str) => sender.send(Message::Text(json_str.into())).await,
                    Err(e) => {
                        error!("Failed to serialize outgoing message: {}", e);
                        continue;
                    }
                },
                SonicMessageRoute::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };

            if let Err(e) = result {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
    });

    let manager = app_state.new_session();
    if let Err(e) = app_state.sessions.insert(&client_id, manager.clone()) {
        warn!(client_id = %client_id, "Rejecting session: {}", e);
        send_outgoing(
            &message_tx,
            SonicOutgoingMessage::error("session_rejected", e.to_string()),
        )
        .await;
        finish_sender(message_tx, sender_task).await;
        return;
    }

    register_callbacks(&manager, &message_tx);

    let started = match manager.initialize().await {
        Ok(()) => manager.start_audio_input().await,
        Err(e) => Err(e),
    };
    if let Err(e) = started {
        error!(client_id = %client_id, "Failed to start Sonic session: {}", e);
        send_outgoing(
            &message_tx,
            SonicOutgoingMessage::error("connection_error", format!("Failed to connect: {e}")),
        )
        .await;
        app_state.sessions.remove(&client_id);
        manager.close().await;
        finish_sender(message_tx, sender_task).await;
        return;
    }

    let jitter = rand::random_range(0..=IDLE_JITTER_SECS * 2);
    let idle_timeout = Duration::from_secs(BASE_IDLE_SECS - IDLE_JITTER_SECS + jitter);
    let mut last_activity = std::time::Instant::now();
    let mut writer_done = false;

    loop {
        select! {
            msg_result = receiver.next() => {
                last_activity = std::time::Instant::now();

                match msg_result {
                    Some(Ok(msg)) => {
                        if !process_sonic_message(msg, &manager, &message_tx).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(client_id = %client_id, "Sonic WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        info!(client_id = %client_id, "Sonic WebSocket connection closed by client");
                        break;
                    }
                }
            }
            _ = &mut sender_task, if !writer_done => {
                debug!(client_id = %client_id, "WebSocket writer finished");
                writer_done = true;
                break;
            }
            _ = tokio::time::sleep(IDLE_CHECK_INTERVAL) => {
                if last_activity.elapsed() > idle_timeout {
                    warn!(
                        client_id = %client_id,
                        "Sonic WebSocket connection idle for {}s, closing stale connection",
                        last_activity.elapsed().as_secs()
                    );
                    send_outgoing(
                        &message_tx,
                        SonicOutgoingMessage::error("idle_timeout", "Connection closed due to inactivity"),
                    )
                    .await;
                    break;
                }
            }
        }
    }

    // cleanup: unregister first so the session is never listed after close starts
    app_state.sessions.remove(&client_id);
    manager.close().await;
    if !writer_done {
        finish_sender(message_tx, sender_task).await;
    }

    info!(client_id = %client_id, "Sonic WebSocket connection terminated");
}

/// Forward session output to the socket writer.
fn register_callbacks(manager: &StreamManager, message_tx: &mpsc::Sender<SonicMessageRoute>) {
    let tx = message_tx.clone();
    manager.on_text(Arc::new(move |output: TextOutput| {
        let tx = tx.clone();
        Box::pin(async move {
            send_outgoing(&tx, SonicOutgoingMessage::text(&output)).await;
        })
    }));

    let tx = message_tx.clone();
    manager.on_audio(Arc::new(move |chunk: AudioChunk| {
        let tx = tx.clone();
        Box::pin(async move {
            send_outgoing(&tx, SonicOutgoingMessage::audio(&chunk.data)).await;
        })
    }));

    let tx = message_tx.clone();
    manager.on_latency(Arc::new(move |latency: Duration| {
        let tx = tx.clone();
        Box::pin(async move {
            send_outgoing(&tx, SonicOutgoingMessage::latency(latency)).await;
        })
    }));

    let tx = message_tx.clone();
    manager.on_status(Arc::new(move |status: SessionStatus| {
        let tx = tx.clone();
        Box::pin(async move {
            send_outgoing(&tx, SonicOutgoingMessage::status(&status)).await;
            // the session is gone (model finished, retries exhausted or closed
            // through the API)
            if status.is_terminal() {
                let _ = tx.send(SonicMessageRoute::Close).await;
            }
        })
    }));

    let tx = message_tx.clone();
    manager.on_error(Arc::new(move |error: SonicError| {
        let tx = tx.clone();
        Box::pin(async move {
            send_outgoing(
                &tx,
                SonicOutgoingMessage::error("session_error", error.to_string()),
            )
            .await;
        })
    }));
}

/// Process one incoming WebSocket frame. Returns false to end the connection.
async fn process_sonic_message(
    msg: Message,
    manager: &StreamManager,
    message_tx: &mpsc::Sender<SonicMessageRoute>,
) -> bool {
    match msg {
        Message::Text(text) => {
            debug!("Received text message: {} bytes", text.len());

            let incoming: SonicIncomingMessage = match serde_json::from_str(&text) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!("Failed to parse sonic message: {}", e);
                    send_outgoing(
                        message_tx,
                        SonicOutgoingMessage::error(
                            "parse_error",
                            format!("Invalid message format: {e}"),
                        ),
                    )
                    .await;
                    return true;
                }
            };

            if let Err(e) = incoming.validate_size() {
                warn!("Message validation failed: {}", e);
                send_outgoing(message_tx, SonicOutgoingMessage::error("validation_error", e))
                    .await;
                return true;
            }

            handle_sonic_incoming(incoming, manager, message_tx).await
        }
        Message::Binary(data) => {
            // raw PCM frames are accepted alongside the JSON audio message
            forward_audio(manager, data, message_tx).await;
            true
        }
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            info!("Sonic WebSocket close received");
            false
        }
    }
}

async fn handle_sonic_incoming(
    msg: SonicIncomingMessage,
    manager: &StreamManager,
    message_tx: &mpsc::Sender<SonicMessageRoute>,
) -> bool {
    match msg {
        SonicIncomingMessage::Audio { data } => {
            match decode_audio(&data) {
                Ok(pcm) => forward_audio(manager, pcm, message_tx).await,
                Err(e) => {
                    send_outgoing(message_tx, SonicOutgoingMessage::error("audio_error", e)).await
                }
            }
            true
        }
        SonicIncomingMessage::BargeIn => {
            manager.barge_in().await;
            true
        }
        SonicIncomingMessage::VoiceChange { voice } => {
            let voice = match SonicVoice::parse(&voice) {
                Ok(voice) => voice,
                Err(e) => {
                    send_outgoing(
                        message_tx,
                        SonicOutgoingMessage::error("invalid_voice", e.to_string()),
                    )
                    .await;
                    return true;
                }
            };
            if let Err(e) = manager.change_voice(voice).await {
                error!("Voice change failed: {}", e);
                send_outgoing(
                    message_tx,
                    SonicOutgoingMessage::error(
                        "voice_change_error",
                        format!("Failed to change voice: {e}"),
                    ),
                )
                .await;
            }
            true
        }
        SonicIncomingMessage::Text { text } => {
            if let Err(e) = manager.send_text(&text).await {
                send_outgoing(
                    message_tx,
                    SonicOutgoingMessage::error("text_error", format!("Failed to send text: {e}")),
                )
                .await;
            }
            true
        }
        SonicIncomingMessage::End => {
            info!("Client ended the session");
            false
        }
    }
}

async fn forward_audio(
    manager: &StreamManager,
    pcm: bytes::Bytes,
    message_tx: &mpsc::Sender<SonicMessageRoute>,
) {
    match manager.send_audio_chunk(pcm).await {
        Ok(()) => {}
        // expected while a reconnect or voice change is in progress
        Err(SonicError::NotActive) | Err(SonicError::Lifecycle(_)) => {
            debug!("Session not accepting audio, dropping chunk");
        }
        Err(e) => {
            warn!("Failed to send audio: {}", e);
            send_outgoing(
                message_tx,
                SonicOutgoingMessage::error("audio_error", format!("Failed to send audio: {e}")),
            )
            .await;
        }
    }
}

async fn send_outgoing(tx: &mpsc::Sender<SonicMessageRoute>, message: SonicOutgoingMessage) {
    if tx.send(SonicMessageRoute::Outgoing(message)).await.is_err() {
        debug!("WebSocket writer is gone, dropping message");
    }
}

/// Ask the writer to close the socket and give it a moment to drain.
async fn finish_sender(
    message_tx: mpsc::Sender<SonicMessageRoute>,
    mut sender_task: tokio::task::JoinHandle<()>,
) {
    let _ = message_tx.send(SonicMessageRoute::Close).await;
    drop(message_tx);
    if tokio::time::timeout(SENDER_DRAIN_TIMEOUT, &mut sender_task)
        .await
        .is_err()
    {
        sender_task.abort();
    }
}
