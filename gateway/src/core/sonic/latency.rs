//! Response latency measurement.
//!
//! Measures the time from the end of user speech, detected as sustained
//! silence in the input audio, to the first assistant audio chunk.

use std::time::Duration;
use tokio::time::Instant;

/// Peak absolute sample value of 16-bit little-endian PCM.
pub fn peak_amplitude(pcm: &[u8]) -> u16 {
    pcm.chunks_exact(2)
        .map(|s| i16::from_le_bytes([s[0], s[1]]).unsigned_abs())
        .max()
        .unwrap_or(0)
}

#[derive(Debug)]
pub struct LatencyTracker {
    silence_threshold: Duration,
    silence_peak: u16,
    heard_speech: bool,
    silence_started: Option<Instant>,
    speech_ended: Option<Instant>,
}

impl LatencyTracker {
    pub fn new(silence_threshold: Duration, silence_peak: u16) -> Self {
        Self {
            silence_threshold,
            silence_peak,
            heard_speech: false,
            silence_started: None,
            speech_ended: None,
        }
    }

    pub fn is_silence(&self, pcm: &[u8]) -> bool {
        pcm.is_empty() || peak_amplitude(pcm) < self.silence_peak
    }

    /// Feed one captured input chunk.
    pub fn observe_input(&mut self, pcm: &[u8]) {
        self.observe_input_at(pcm, Instant::now());
    }

    pub fn observe_input_at(&mut self, pcm: &[u8], now: Instant) {
        if !self.is_silence(pcm) {
            self.heard_speech = true;
            self.silence_started = None;
            // the user resumed talking
            self.speech_ended = None;
            return;
        }

        let started = *self.silence_started.get_or_insert(now);
        if self.heard_speech && now.saturating_duration_since(started) >= self.silence_threshold {
            self.speech_ended = Some(started);
            self.heard_speech = false;
        }
    }

    /// Feed one assistant audio chunk. Returns the latency for the first
    /// chunk after a detected end of user speech.
    pub fn observe_output(&mut self) -> Option<Duration> {
        self.observe_output_at(Instant::now())
    }

    pub fn observe_output_at(&mut self, now: Instant) -> Option<Duration> {
        self.speech_ended
            .take()
            .map(|ended| now.saturating_duration_since(ended))
    }

    /// Forget pending measurements, e.g. after a barge-in.
    pub fn reset(&mut self) {
        self.heard_speech = false;
        self.silence_started = None;
        self.speech_ended = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(sample: i16, frames: usize) -> Vec<u8> {
        std::iter::repeat_n(sample.to_le_bytes(), frames)
            .flatten()
            .collect()
    }

    #[test]
    fn test_peak_amplitude() {
        assert_eq!(peak_amplitude(&[]), 0);
        let mut data = pcm(100, 4);
        data.extend_from_slice(&(-3000i16).to_le_bytes());
        assert_eq!(peak_amplitude(&data), 3000);
        assert_eq!(peak_amplitude(&pcm(i16::MIN, 1)), 32768);
    }

    #[test]
    fn test_silence_detection() {
        let tracker = LatencyTracker::new(Duration::from_millis(500), 500);
        assert!(tracker.is_silence(&[]));
        assert!(tracker.is_silence(&pcm(499, 16)));
        assert!(!tracker.is_silence(&pcm(-500, 16)));
    }

    #[test]
    fn test_latency_from_speech_end_to_first_audio() {
        let mut tracker = LatencyTracker::new(Duration::from_millis(500), 500);
        let t0 = Instant::now();
        tracker.observe_input_at(&pcm(4000, 512), t0);
        tracker.observe_input_at(&pcm(0, 512), t0 + Duration::from_millis(100));
        // not long enough yet
        assert!(tracker.observe_output_at(t0 + Duration::from_millis(300)).is_none());

        tracker.observe_input_at(&pcm(0, 512), t0 + Duration::from_millis(650));
        let latency = tracker
            .observe_output_at(t0 + Duration::from_millis(900))
            .unwrap();
        assert_eq!(latency, Duration::from_millis(800));

        // reported once
        assert!(tracker.observe_output_at(t0 + Duration::from_millis(950)).is_none());
    }

    #[test]
    fn test_silence_without_speech_reports_nothing() {
        let mut tracker = LatencyTracker::new(Duration::from_millis(500), 500);
        let t0 = Instant::now();
        tracker.observe_input_at(&pcm(0, 512), t0);
        tracker.observe_input_at(&pcm(0, 512), t0 + Duration::from_secs(2));
        assert!(tracker.observe_output_at(t0 + Duration::from_secs(3)).is_none());
    }

    #[test]
    fn test_resumed_speech_cancels_measurement() {
        let mut tracker = LatencyTracker::new(Duration::from_millis(500), 500);
        let t0 = Instant::now();
        tracker.observe_input_at(&pcm(4000, 512), t0);
        tracker.observe_input_at(&pcm(0, 512), t0 + Duration::from_millis(10));
        tracker.observe_input_at(&pcm(0, 512), t0 + Duration::from_millis(600));
        tracker.observe_input_at(&pcm(4000, 512), t0 + Duration::from_millis(700));
        assert!(tracker.observe_output_at(t0 + Duration::from_millis(800)).is_none());
    }
}
