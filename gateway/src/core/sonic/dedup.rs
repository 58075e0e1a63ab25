//! Time-windowed text de-duplication.
//!
//! The model may repeat a line when it switches between speculative and
//! final generation. A (role, text) pair seen within the cooldown is dropped;
//! after the window expires the same text is delivered again.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::base::SpeakerRole;

/// Collapse runs of whitespace and trim the ends.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug)]
pub struct TextDeduplicator {
    cooldown: Duration,
    seen: HashMap<(SpeakerRole, String), Instant>,
}

impl TextDeduplicator {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            seen: HashMap::new(),
        }
    }

    /// Returns true if the text should be delivered, and records it.
    pub fn should_emit(&mut self, role: SpeakerRole, text: &str) -> bool {
        self.should_emit_at(role, text, Instant::now())
    }

    pub fn should_emit_at(&mut self, role: SpeakerRole, text: &str, now: Instant) -> bool {
        let cooldown = self.cooldown;
        self.seen
            .retain(|_, at| now.saturating_duration_since(*at) < cooldown);

        let key = (role, normalize_text(text));
        if self.seen.contains_key(&key) {
            return false;
        }
        self.seen.insert(key, now);
        true
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  hello   there\n world "), "hello there world");
        assert_eq!(normalize_text("   "), "");
    }

    #[test]
    fn test_duplicate_within_window_is_suppressed() {
        let mut dedup = TextDeduplicator::new(Duration::from_secs(2));
        let t0 = Instant::now();
        assert!(dedup.should_emit_at(SpeakerRole::Assistant, "Hello", t0));
        assert!(!dedup.should_emit_at(
            SpeakerRole::Assistant,
            " Hello ",
            t0 + Duration::from_millis(500)
        ));
    }

    #[test]
    fn test_duplicate_after_window_is_delivered() {
        let mut dedup = TextDeduplicator::new(Duration::from_secs(2));
        let t0 = Instant::now();
        assert!(dedup.should_emit_at(SpeakerRole::Assistant, "Hello", t0));
        assert!(dedup.should_emit_at(
            SpeakerRole::Assistant,
            "Hello",
            t0 + Duration::from_millis(2001)
        ));
    }

    #[test]
    fn test_roles_are_keyed_separately() {
        let mut dedup = TextDeduplicator::new(Duration::from_secs(2));
        let t0 = Instant::now();
        assert!(dedup.should_emit_at(SpeakerRole::User, "yes", t0));
        assert!(dedup.should_emit_at(SpeakerRole::Assistant, "yes", t0));
        assert_eq!(dedup.len(), 2);
    }

    #[test]
    fn test_clear_and_pruning() {
        let mut dedup = TextDeduplicator::new(Duration::from_secs(2));
        let t0 = Instant::now();
        dedup.should_emit_at(SpeakerRole::User, "a", t0);
        dedup.clear();
        assert!(dedup.is_empty());
        assert!(dedup.should_emit_at(SpeakerRole::User, "a", t0));

        dedup.should_emit_at(SpeakerRole::User, "b", t0 + Duration::from_secs(5));
        // "a" expired and was pruned
        assert_eq!(dedup.len(), 1);
    }
}
