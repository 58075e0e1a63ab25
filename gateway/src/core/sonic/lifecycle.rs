//! Client-side content lifecycle validation.
//!
//! Every content block moves through `contentStart -> data* -> contentEnd`.
//! [`ContentTracker`] checks each outbound event against that order before it
//! reaches the transport, so protocol mistakes surface as
//! [`SonicError::Lifecycle`] instead of remote validation failures.

use std::collections::HashSet;

use super::base::{SonicError, SonicResult};
use super::events::{ContentType, InputEvent};

/// Tracks open content blocks for one prompt.
#[derive(Debug, Default)]
pub struct ContentTracker {
    /// Open blocks in start order
    open: Vec<(String, ContentType)>,
    /// Every content name started since the last reset
    started: HashSet<String>,
}

impl ContentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that `event` is legal in the current state.
    pub fn validate(&self, event: &InputEvent) -> SonicResult<()> {
        match event {
            InputEvent::ContentStart(start) => {
                if self.started.contains(&start.content_name) {
                    return Err(SonicError::Lifecycle(format!(
                        "content {} was already started",
                        start.content_name
                    )));
                }
                if let Some(name) = self.open_name(start.content_type) {
                    return Err(SonicError::Lifecycle(format!(
                        "{} content {} is still active",
                        start.content_type, name
                    )));
                }
                Ok(())
            }
            InputEvent::TextInput(input) => {
                self.check_data(event.kind(), &input.content_name, ContentType::Text)
            }
            InputEvent::AudioInput(input) => {
                self.check_data(event.kind(), &input.content_name, ContentType::Audio)
            }
            InputEvent::ToolResult(input) => {
                self.check_data(event.kind(), &input.content_name, ContentType::Tool)
            }
            InputEvent::ContentEnd(end) => {
                if self.type_of(&end.content_name).is_some() {
                    Ok(())
                } else if self.started.contains(&end.content_name) {
                    Err(SonicError::Lifecycle(format!(
                        "content {} was already ended",
                        end.content_name
                    )))
                } else {
                    Err(SonicError::Lifecycle(format!(
                        "contentEnd for {} without contentStart",
                        end.content_name
                    )))
                }
            }
            _ => Ok(()),
        }
    }

    /// Apply the transition for an event that was sent successfully.
    pub fn record(&mut self, event: &InputEvent) {
        match event {
            InputEvent::ContentStart(start) => {
                self.started.insert(start.content_name.clone());
                self.open
                    .push((start.content_name.clone(), start.content_type));
            }
            InputEvent::ContentEnd(end) => {
                self.open.retain(|(name, _)| name != &end.content_name);
            }
            // a new prompt or session starts from a clean slate
            InputEvent::SessionStart(_) | InputEvent::PromptStart(_) => self.reset(),
            _ => {}
        }
    }

    /// Name of the open block of the given type, if any.
    pub fn open_name(&self, content_type: ContentType) -> Option<&str> {
        self.open
            .iter()
            .find(|(_, ty)| *ty == content_type)
            .map(|(name, _)| name.as_str())
    }

    /// Names of all open blocks, in start order.
    pub fn open_contents(&self) -> Vec<String> {
        self.open.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn reset(&mut self) {
        self.open.clear();
        self.started.clear();
    }

    fn type_of(&self, content_name: &str) -> Option<ContentType> {
        self.open
            .iter()
            .find(|(name, _)| name == content_name)
            .map(|(_, ty)| *ty)
    }

    fn check_data(&self, kind: &str, content_name: &str, expected: ContentType) -> SonicResult<()> {
        match self.type_of(content_name) {
            Some(ty) if ty == expected => Ok(()),
            Some(ty) => Err(SonicError::Lifecycle(format!(
                "{kind} sent to {ty} content {content_name}"
            ))),
            None if self.started.contains(content_name) => Err(SonicError::Lifecycle(format!(
                "{kind} after content {content_name} ended"
            ))),
            None => Err(SonicError::Lifecycle(format!(
                "{kind} for {content_name} without contentStart"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sonic::base::SpeakerRole;
    use serde_json::json;

    fn apply(tracker: &mut ContentTracker, event: InputEvent) -> SonicResult<()> {
        tracker.validate(&event)?;
        tracker.record(&event);
        Ok(())
    }

    #[test]
    fn test_normal_sequence() {
        let mut tracker = ContentTracker::new();
        apply(&mut tracker, InputEvent::audio_content_start("p", "a").unwrap()).unwrap();
        apply(&mut tracker, InputEvent::audio_input("p", "a", &[0, 0]).unwrap()).unwrap();
        assert_eq!(tracker.open_name(ContentType::Audio), Some("a"));
        apply(&mut tracker, InputEvent::content_end("p", "a").unwrap()).unwrap();
        assert!(tracker.open_contents().is_empty());
    }

    #[test]
    fn test_data_before_start_is_rejected() {
        let tracker = ContentTracker::new();
        let err = tracker
            .validate(&InputEvent::audio_input("p", "a", &[0]).unwrap())
            .unwrap_err();
        assert!(matches!(err, SonicError::Lifecycle(msg) if msg.contains("without contentStart")));
    }

    #[test]
    fn test_wrong_data_kind_is_rejected() {
        let mut tracker = ContentTracker::new();
        apply(
            &mut tracker,
            InputEvent::text_content_start("p", "t", SpeakerRole::System).unwrap(),
        )
        .unwrap();
        assert!(
            tracker
                .validate(&InputEvent::audio_input("p", "t", &[0]).unwrap())
                .is_err()
        );
        assert!(
            tracker
                .validate(&InputEvent::tool_result("p", "t", &json!({})).unwrap())
                .is_err()
        );
        assert!(
            tracker
                .validate(&InputEvent::text_input("p", "t", "hi").unwrap())
                .is_ok()
        );
    }

    #[test]
    fn test_double_end_is_rejected() {
        let mut tracker = ContentTracker::new();
        apply(&mut tracker, InputEvent::audio_content_start("p", "a").unwrap()).unwrap();
        apply(&mut tracker, InputEvent::content_end("p", "a").unwrap()).unwrap();
        let err = apply(&mut tracker, InputEvent::content_end("p", "a").unwrap()).unwrap_err();
        assert!(matches!(err, SonicError::Lifecycle(msg) if msg.contains("already ended")));
    }

    #[test]
    fn test_restarting_a_name_is_rejected() {
        let mut tracker = ContentTracker::new();
        apply(&mut tracker, InputEvent::audio_content_start("p", "a").unwrap()).unwrap();
        apply(&mut tracker, InputEvent::content_end("p", "a").unwrap()).unwrap();
        assert!(
            apply(&mut tracker, InputEvent::audio_content_start("p", "a").unwrap()).is_err()
        );
    }

    #[test]
    fn test_one_active_content_per_type() {
        let mut tracker = ContentTracker::new();
        apply(&mut tracker, InputEvent::audio_content_start("p", "a1").unwrap()).unwrap();
        assert!(
            apply(&mut tracker, InputEvent::audio_content_start("p", "a2").unwrap()).is_err()
        );
        // a different type may be open at the same time
        apply(&mut tracker, InputEvent::tool_content_start("p", "t1", "id").unwrap()).unwrap();
        assert_eq!(tracker.open_contents(), vec!["a1".to_string(), "t1".to_string()]);
    }

    #[test]
    fn test_prompt_start_resets() {
        let mut tracker = ContentTracker::new();
        apply(&mut tracker, InputEvent::audio_content_start("p", "a").unwrap()).unwrap();
        apply(
            &mut tracker,
            InputEvent::prompt_start("p2", Default::default(), &[]).unwrap(),
        )
        .unwrap();
        assert!(tracker.open_contents().is_empty());
        assert!(tracker.open_name(ContentType::Audio).is_none());
    }
}
