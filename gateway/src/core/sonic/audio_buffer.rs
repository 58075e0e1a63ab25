//! Assistant audio output buffering.
//!
//! Decoded chunks are tagged with the barge-in epoch current at enqueue time
//! and pass through an unbounded FIFO into the flush task. The task
//! accumulates them in an [`AudioOutputBuffer`] and hands runs to the audio
//! callback when the threshold is reached or the queue has been idle for the
//! poll interval. A barge-in bumps the epoch: the buffer is cleared and every
//! chunk queued under an older epoch is dropped.

use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::base::{AudioChunk, SharedCallbacks};
use super::config::OUTPUT_SAMPLE_RATE;

/// Producer side of the audio FIFO: `(epoch, pcm)` pairs.
pub type AudioQueueSender = mpsc::UnboundedSender<(u64, Bytes)>;
pub type AudioQueueReceiver = mpsc::UnboundedReceiver<(u64, Bytes)>;

/// Byte accumulator with a flush threshold.
#[derive(Debug)]
pub struct AudioOutputBuffer {
    threshold: usize,
    buf: BytesMut,
}

impl AudioOutputBuffer {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            buf: BytesMut::with_capacity(threshold * 2),
        }
    }

    /// Append a chunk. Returns the buffered run once it reaches the threshold.
    pub fn push(&mut self, chunk: &[u8]) -> Option<Bytes> {
        self.buf.extend_from_slice(chunk);
        if self.buf.len() >= self.threshold {
            Some(self.buf.split().freeze())
        } else {
            None
        }
    }

    /// Flush whatever is buffered.
    pub fn take(&mut self) -> Option<Bytes> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.buf.split().freeze())
        }
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Barge-in generation counter shared by producers and the flush task.
#[derive(Debug, Default)]
pub struct BargeInSignal {
    epoch: AtomicU64,
    notify: Notify,
}

impl BargeInSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Start a new epoch and wake the flush task. Returns the new epoch.
    pub fn trigger(&self) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.notify.notify_one();
        epoch
    }

    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

/// Spawn the flush task for one session.
pub fn spawn_flush_task(
    mut rx: AudioQueueReceiver,
    signal: Arc<BargeInSignal>,
    callbacks: SharedCallbacks,
    threshold: usize,
    poll_interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buffer = AudioOutputBuffer::new(threshold);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!(dropped = buffer.len(), "Audio flush task cancelled");
                    break;
                }

                _ = signal.notified() => {
                    debug!(dropped = buffer.len(), "Barge-in, clearing audio buffer");
                    buffer.clear();
                }

                item = rx.recv() => {
                    let Some((epoch, data)) = item else {
                        debug!("Audio queue closed");
                        break;
                    };
                    if epoch < signal.current() {
                        // queued before the last barge-in
                        continue;
                    }
                    if let Some(run) = buffer.push(&data) {
                        deliver(&callbacks, run).await;
                    }
                }

                _ = tokio::time::sleep(poll_interval), if !buffer.is_empty() => {
                    if let Some(run) = buffer.take() {
                        deliver(&callbacks, run).await;
                    }
                }
            }
        }
    })
}

async fn deliver(callbacks: &SharedCallbacks, data: Bytes) {
    let cb = callbacks.read().audio.clone();
    if let Some(cb) = cb {
        cb(AudioChunk {
            data,
            sample_rate: OUTPUT_SAMPLE_RATE,
        })
        .await;
    }
}
