//! Stream Manager Tests
//!
//! End-to-end session behavior against a scripted transport: initialization
//! and close ordering, lifecycle rejection, tool round trips, barge-in,
//! text filtering and reconnection.

mod common;

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use bytes::Bytes;
use serde_json::{Value, json};

use common::{
    StubConnector, content_start_frame, event_body, event_kind, record, test_config, text_frame,
    wait_until,
};
use sonic_gateway::core::sonic::{SessionStatus, SonicConfig, SonicError, SonicVoice, StreamManager};
use sonic_gateway::core::tools::{DateTimeTool, OrderTrackingTool, ToolRegistry};

fn tools() -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new(Duration::from_secs(2));
    registry.register(Arc::new(DateTimeTool));
    registry.register(Arc::new(OrderTrackingTool));
    Arc::new(registry)
}

fn manager_with(config: SonicConfig, connector: &Arc<StubConnector>) -> StreamManager {
    StreamManager::new(config, connector.clone(), tools())
}

const INIT_SEQUENCE: [&str; 5] = [
    "sessionStart",
    "promptStart",
    "contentStart",
    "textInput",
    "contentEnd",
];

#[tokio::test]
async fn test_initialize_sends_init_sequence_in_order() {
    let connector = StubConnector::new();
    let manager = manager_with(test_config(), &connector);
    let recorded = record(&manager);

    manager.initialize().await.unwrap();
    manager.start_audio_input().await.unwrap();
    connector.wait_for(|events| events.len() >= 6).await;

    let events = connector.events();
    let kinds: Vec<String> = events.iter().map(event_kind).collect();
    assert_eq!(&kinds[..5], &INIT_SEQUENCE);
    assert_eq!(kinds[5], "contentStart");

    let session_start = event_body(&events[0]);
    assert_eq!(session_start["inferenceConfiguration"]["maxTokens"], 1024);

    let prompt_start = event_body(&events[1]);
    let prompt_name = prompt_start["promptName"].as_str().unwrap().to_string();
    assert_eq!(prompt_name, manager.prompt_name());
    assert_eq!(prompt_start["audioOutputConfiguration"]["voiceId"], "matthew");
    assert_eq!(
        prompt_start["toolConfiguration"]["tools"]
            .as_array()
            .unwrap()
            .len(),
        2
    );

    let system_start = event_body(&events[2]);
    assert_eq!(system_start["role"], "SYSTEM");
    assert_eq!(system_start["type"], "TEXT");
    assert_eq!(event_body(&events[3])["contentName"], system_start["contentName"]);

    let audio_start = event_body(&events[5]);
    assert_eq!(audio_start["type"], "AUDIO");
    assert_eq!(audio_start["role"], "USER");
    assert_eq!(audio_start["promptName"], prompt_name.as_str());
    assert_eq!(
        audio_start["audioInputConfiguration"]["sampleRateHertz"],
        16000
    );

    // idempotent: a second call opens nothing new
    manager.start_audio_input().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(connector.events().len(), 6);

    assert!(manager.is_active());
    assert_eq!(recorded.status_codes(), vec!["connected"]);
    manager.close().await;
}

#[tokio::test]
async fn test_initialize_twice_is_rejected() {
    let connector = StubConnector::new();
    let manager = manager_with(test_config(), &connector);

    manager.initialize().await.unwrap();
    assert!(matches!(
        manager.initialize().await,
        Err(SonicError::Lifecycle(_))
    ));
    assert_eq!(connector.connects(), 1);
    manager.close().await;
}

#[tokio::test]
async fn test_initialize_fails_when_transport_refuses() {
    let connector = StubConnector::new();
    connector.refuse_connections(true);
    let manager = manager_with(test_config(), &connector);

    assert!(matches!(
        manager.initialize().await,
        Err(SonicError::ConnectionFailed(_))
    ));
    assert!(!manager.is_active());
}

#[tokio::test]
async fn test_audio_is_framed_on_open_content() {
    let connector = StubConnector::new();
    let manager = manager_with(test_config(), &connector);
    manager.initialize().await.unwrap();

    // no audio content yet
    assert!(matches!(
        manager.send_audio_chunk(Bytes::from_static(&[0, 0])).await,
        Err(SonicError::Lifecycle(_))
    ));

    manager.start_audio_input().await.unwrap();
    manager
        .send_audio_chunk(Bytes::from_static(&[1, 0, 2, 0]))
        .await
        .unwrap();
    connector.wait_for(|events| events.len() >= 7).await;

    let events = connector.events();
    let audio_start = event_body(&events[5]);
    let audio_input = event_body(&events[6]);
    assert_eq!(event_kind(&events[6]), "audioInput");
    assert_eq!(audio_input["contentName"], audio_start["contentName"]);
    assert_eq!(
        audio_input["content"],
        base64::engine::general_purpose::STANDARD.encode([1u8, 0, 2, 0])
    );

    manager.close().await;
}

#[tokio::test]
async fn test_close_handshake_order_and_idempotence() {
    let connector = StubConnector::new();
    let manager = manager_with(test_config(), &connector);
    let recorded = record(&manager);

    manager.initialize().await.unwrap();
    manager.start_audio_input().await.unwrap();
    manager.close().await;
    connector.wait_for(|events| events.len() >= 9).await;

    let events = connector.events();
    let kinds: Vec<String> = events.iter().map(event_kind).collect();
    assert_eq!(&kinds[6..], &["contentEnd", "promptEnd", "sessionEnd"]);
    // the audio content is the one being ended
    assert_eq!(
        event_body(&events[6])["contentName"],
        event_body(&events[5])["contentName"]
    );

    manager.close().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(connector.events().len(), 9);
    assert!(!manager.is_active());

    let closed = recorded
        .status_codes()
        .iter()
        .filter(|code| **code == "closed")
        .count();
    assert_eq!(closed, 1);

    assert!(matches!(
        manager.send_text("hello").await,
        Err(SonicError::NotActive)
    ));
}

#[tokio::test]
async fn test_send_text_is_a_complete_user_block() {
    let connector = StubConnector::new();
    let manager = manager_with(test_config(), &connector);
    manager.initialize().await.unwrap();

    manager.send_text("Where is my order?").await.unwrap();
    connector.wait_for(|events| events.len() >= 8).await;

    let events = connector.events();
    let kinds: Vec<String> = events.iter().map(event_kind).collect();
    assert_eq!(&kinds[5..8], &["contentStart", "textInput", "contentEnd"]);
    assert_eq!(event_body(&events[5])["role"], "USER");
    assert_eq!(event_body(&events[6])["content"], "Where is my order?");

    assert!(matches!(
        manager.send_text("   ").await,
        Err(SonicError::InvalidEvent(_))
    ));
    manager.close().await;
}

#[tokio::test]
async fn test_tool_use_round_trip() {
    let connector = StubConnector::new();
    let manager = manager_with(test_config(), &connector);
    manager.initialize().await.unwrap();

    connector
        .push(json!({"event": {"toolUse": {
            "toolName": "trackOrderTool",
            "toolUseId": "tool-1",
            "content": "{\"orderId\":\"ORD-42\"}"
        }}}))
        .await;
    connector
        .push(json!({"event": {"contentEnd": {"type": "TOOL", "stopReason": "TOOL_USE"}}}))
        .await;
    connector.wait_for(|events| events.len() >= 8).await;

    let events = connector.events();
    let kinds: Vec<String> = events.iter().map(event_kind).collect();
    assert_eq!(&kinds[5..8], &["contentStart", "toolResult", "contentEnd"]);

    let tool_start = event_body(&events[5]);
    assert_eq!(tool_start["type"], "TOOL");
    assert_eq!(tool_start["role"], "TOOL");
    assert_eq!(
        tool_start["toolResultInputConfiguration"]["toolUseId"],
        "tool-1"
    );

    let result: Value =
        serde_json::from_str(event_body(&events[6])["content"].as_str().unwrap()).unwrap();
    assert_eq!(result["orderNumber"], "ORD-42");
    assert!(result["orderStatus"].is_string());

    manager.close().await;
}

#[tokio::test]
async fn test_unknown_tool_answers_with_error_payload() {
    let connector = StubConnector::new();
    let manager = manager_with(test_config(), &connector);
    let recorded = record(&manager);
    manager.initialize().await.unwrap();

    connector
        .push(json!({"event": {"toolUse": {
            "toolName": "launchRocketTool",
            "toolUseId": "tool-2",
            "content": "{}"
        }}}))
        .await;
    connector
        .push(json!({"event": {"contentEnd": {"type": "TOOL"}}}))
        .await;
    connector.wait_for(|events| events.len() >= 8).await;

    let events = connector.events();
    let result: Value =
        serde_json::from_str(event_body(&events[6])["content"].as_str().unwrap()).unwrap();
    assert_eq!(result["error"], "Unknown tool: launchRocketTool");

    // tool failures stay in-band
    assert!(recorded.errors.lock().is_empty());
    assert!(manager.is_active());
    manager.close().await;
}

#[tokio::test]
async fn test_text_dedup_and_speculative_filter() {
    let connector = StubConnector::new();
    let manager = manager_with(test_config(), &connector);
    let recorded = record(&manager);
    manager.initialize().await.unwrap();

    connector.push(text_frame("USER", "what time is it")).await;
    connector.push(text_frame("USER", "what time is it")).await;
    connector
        .push(content_start_frame("ASSISTANT", "TEXT", Some("SPECULATIVE")))
        .await;
    connector.push(text_frame("ASSISTANT", "It is noon.")).await;
    connector
        .push(content_start_frame("ASSISTANT", "TEXT", Some("FINAL")))
        .await;
    connector.push(text_frame("ASSISTANT", "It is noon.")).await;
    connector.push(text_frame("ASSISTANT", "   ")).await;

    wait_until(|| recorded.texts.lock().len() >= 2).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let texts = recorded.texts.lock().clone();
    assert_eq!(texts.len(), 2);
    assert_eq!(texts[0].text, "what time is it");
    assert_eq!(texts[1].text, "It is noon.");
    assert!(!texts[1].speculative);
    manager.close().await;
}

#[tokio::test]
async fn test_blocks_without_stage_keep_speculative_mode() {
    let connector = StubConnector::new();
    let manager = manager_with(test_config(), &connector);
    let recorded = record(&manager);
    manager.initialize().await.unwrap();

    connector
        .push(content_start_frame("ASSISTANT", "TEXT", Some("SPECULATIVE")))
        .await;
    // an AUDIO block carries no generation stage
    connector
        .push(content_start_frame("ASSISTANT", "AUDIO", None))
        .await;
    connector.push(text_frame("ASSISTANT", "Still a draft.")).await;
    connector.push(text_frame("USER", "marker")).await;

    wait_until(|| !recorded.texts.lock().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    let texts = recorded.texts.lock().clone();
    assert_eq!(texts.len(), 1);
    assert_eq!(texts[0].text, "marker");
    manager.close().await;
}

#[tokio::test]
async fn test_speculative_text_shown_when_enabled() {
    let connector = StubConnector::new();
    let config = SonicConfig {
        show_speculative: true,
        ..test_config()
    };
    let manager = manager_with(config, &connector);
    let recorded = record(&manager);
    manager.initialize().await.unwrap();

    connector
        .push(content_start_frame("ASSISTANT", "TEXT", Some("SPECULATIVE")))
        .await;
    connector.push(text_frame("ASSISTANT", "Let me check.")).await;

    wait_until(|| !recorded.texts.lock().is_empty()).await;
    assert!(recorded.texts.lock()[0].speculative);
    manager.close().await;
}

#[tokio::test]
async fn test_audio_output_reaches_host() {
    let connector = StubConnector::new();
    let manager = manager_with(test_config(), &connector);
    let recorded = record(&manager);
    manager.initialize().await.unwrap();

    let pcm = vec![7u8; 4096];
    let encoded = base64::engine::general_purpose::STANDARD.encode(&pcm);
    connector
        .push(json!({"event": {"audioOutput": {"content": encoded}}}))
        .await;

    wait_until(|| !recorded.audio.lock().is_empty()).await;
    let total: usize = recorded.audio.lock().iter().map(Bytes::len).sum();
    assert_eq!(total, 4096);
    manager.close().await;
}

#[tokio::test]
async fn test_interruption_marker_triggers_barge_in() {
    let connector = StubConnector::new();
    let manager = manager_with(test_config(), &connector);
    let recorded = record(&manager);
    manager.initialize().await.unwrap();

    connector
        .push(text_frame("ASSISTANT", "{ \"interrupted\" : true }"))
        .await;

    recorded.wait_for_status("barge_in_handled").await;
    // the marker itself is never shown
    assert!(recorded.texts.lock().is_empty());
    manager.close().await;
}

#[tokio::test]
async fn test_malformed_frames_are_skipped_within_budget() {
    let connector = StubConnector::new();
    let manager = manager_with(test_config(), &connector);
    let recorded = record(&manager);
    manager.initialize().await.unwrap();

    connector.push_raw(b"not json").await;
    connector.push(text_frame("USER", "still here")).await;

    wait_until(|| !recorded.texts.lock().is_empty()).await;
    assert!(!recorded.status_codes().contains(&"stream_closed"));
    assert_eq!(connector.connects(), 1);
    manager.close().await;
}

#[tokio::test]
async fn test_completion_end_is_reported_as_completed() {
    let connector = StubConnector::new();
    let manager = manager_with(test_config(), &connector);
    let recorded = record(&manager);
    manager.initialize().await.unwrap();

    connector
        .push(json!({"event": {"completionEnd": {"stopReason": "END_TURN"}}}))
        .await;

    recorded.wait_for_status("completed").await;
    assert!(!recorded.status_codes().contains(&"stream_closed"));
    manager.close().await;
}

#[tokio::test]
async fn test_completed_session_stops_accepting_input() {
    let connector = StubConnector::new();
    let manager = manager_with(test_config(), &connector);
    let recorded = record(&manager);
    manager.initialize().await.unwrap();
    manager.start_audio_input().await.unwrap();
    connector.wait_for(|events| events.len() >= 6).await;

    connector
        .push(json!({"event": {"completionEnd": {"stopReason": "END_TURN"}}}))
        .await;
    recorded.wait_for_status("completed").await;

    assert!(!manager.is_active());
    assert!(matches!(
        manager.send_audio_chunk(Bytes::from_static(&[0, 0])).await,
        Err(SonicError::NotActive)
    ));
    assert!(matches!(
        manager.send_text("anyone there?").await,
        Err(SonicError::NotActive)
    ));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(connector.events().len(), 6);

    // the later close still reports exactly once
    manager.close().await;
    let closed = recorded
        .status_codes()
        .iter()
        .filter(|code| **code == "closed")
        .count();
    assert_eq!(closed, 1);
}

#[tokio::test]
async fn test_close_handshake_continues_after_failed_step() {
    let connector = StubConnector::new();
    let manager = manager_with(test_config(), &connector);
    let recorded = record(&manager);
    manager.initialize().await.unwrap();
    manager.start_audio_input().await.unwrap();
    connector.wait_for(|events| events.len() >= 6).await;

    connector.fail_next_send("contentEnd");
    manager.close().await;
    connector.wait_for(|events| events.len() >= 8).await;

    // the audio contentEnd was lost; the remaining steps still went out
    let kinds = connector.kinds();
    assert_eq!(&kinds[6..], &["promptEnd", "sessionEnd"]);
    assert!(!manager.is_active());

    manager.close().await;
    let closed = recorded
        .status_codes()
        .iter()
        .filter(|code| **code == "closed")
        .count();
    assert_eq!(closed, 1);
}

#[tokio::test]
async fn test_latency_reported_after_user_stops_speaking() {
    let connector = StubConnector::new();
    let config = SonicConfig {
        silence_threshold_ms: 20,
        ..test_config()
    };
    let manager = manager_with(config, &connector);
    let recorded = record(&manager);
    manager.initialize().await.unwrap();
    manager.start_audio_input().await.unwrap();

    let speech: Vec<u8> = std::iter::repeat_n(8000i16.to_le_bytes(), 160)
        .flatten()
        .collect();
    let silence = vec![0u8; 320];
    manager.send_audio_chunk(Bytes::from(speech)).await.unwrap();
    manager
        .send_audio_chunk(Bytes::from(silence.clone()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    manager.send_audio_chunk(Bytes::from(silence)).await.unwrap();

    let encoded = base64::engine::general_purpose::STANDARD.encode([1u8, 0, 2, 0]);
    connector
        .push(json!({"event": {"audioOutput": {"content": encoded}}}))
        .await;

    wait_until(|| !recorded.latencies.lock().is_empty()).await;
    let latency = recorded.latencies.lock()[0];
    assert!(latency >= Duration::from_millis(20), "latency {latency:?}");

    // only the first chunk after the pause is measured
    connector
        .push(json!({"event": {"audioOutput": {"content": encoded}}}))
        .await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(recorded.latencies.lock().len(), 1);
    manager.close().await;
}

#[tokio::test]
async fn test_reconnects_after_stream_loss() {
    let connector = StubConnector::new();
    let manager = manager_with(test_config(), &connector);
    let recorded = record(&manager);
    manager.initialize().await.unwrap();
    manager.start_audio_input().await.unwrap();
    let first_prompt = manager.prompt_name();

    connector.end_stream();
    recorded.wait_for_status("reconnected").await;

    let codes = recorded.status_codes();
    assert_eq!(
        codes,
        vec!["connected", "stream_closed", "reconnecting", "reconnected"]
    );
    assert_eq!(
        recorded.statuses.lock()[3],
        SessionStatus::Reconnected { attempt: 1 }
    );
    assert_eq!(connector.connects(), 2);
    assert_ne!(manager.prompt_name(), first_prompt);

    // a fresh init sequence, then the audio content is reopened
    connector.wait_for(|events| events.len() >= 12).await;
    let kinds = connector.kinds();
    assert_eq!(&kinds[6..11], &INIT_SEQUENCE);
    assert_eq!(kinds[11], "contentStart");

    manager
        .send_audio_chunk(Bytes::from_static(&[0, 1]))
        .await
        .unwrap();
    manager.close().await;
}

#[tokio::test]
async fn test_fails_when_retries_exhausted() {
    let connector = StubConnector::new();
    let manager = manager_with(test_config(), &connector);
    let recorded = record(&manager);
    manager.initialize().await.unwrap();

    connector.refuse_connections(true);
    connector.end_stream();
    recorded.wait_for_status("failed").await;

    let codes = recorded.status_codes();
    assert_eq!(
        codes,
        vec![
            "connected",
            "stream_closed",
            "reconnecting",
            "reconnecting",
            "failed"
        ]
    );
    // initial connection plus two attempts
    assert_eq!(connector.connects(), 3);
    wait_until(|| {
        recorded
            .errors
            .lock()
            .iter()
            .any(|e| e.starts_with("Session failed"))
    })
    .await;
    assert!(!manager.is_active());

    manager.close().await;
}

#[tokio::test]
async fn test_change_voice_restarts_session() {
    let connector = StubConnector::new();
    let manager = manager_with(test_config(), &connector);
    let recorded = record(&manager);
    manager.initialize().await.unwrap();
    manager.start_audio_input().await.unwrap();

    manager.change_voice(SonicVoice::Tiffany).await.unwrap();
    assert_eq!(manager.voice(), SonicVoice::Tiffany);
    assert_eq!(
        manager.config().system_prompt.as_deref(),
        Some(SonicVoice::Tiffany.persona_prompt())
    );

    connector.wait_for(|events| events.len() >= 15).await;
    let events = connector.events();
    let kinds: Vec<String> = events.iter().map(event_kind).collect();
    // old session closed before the new one starts
    assert_eq!(&kinds[6..9], &["contentEnd", "promptEnd", "sessionEnd"]);
    assert_eq!(&kinds[9..14], &INIT_SEQUENCE);
    assert_eq!(kinds[14], "contentStart");
    assert_eq!(
        event_body(&events[10])["audioOutputConfiguration"]["voiceId"],
        "tiffany"
    );

    let codes = recorded.status_codes();
    assert_eq!(codes, vec!["connected", "changing_voice", "voice_changed"]);

    // same voice is a no-op
    manager.change_voice(SonicVoice::Tiffany).await.unwrap();
    assert_eq!(connector.connects(), 2);
    manager.close().await;
}
