//! WAV files as capture and playback devices.
//!
//! `hound` does blocking file I/O, so both ends run on `spawn_blocking`
//! threads and talk to the async side over channels.

use bytes::Bytes;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::io::{Read, Seek, Write};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{AudioIoError, AudioIoResult};
use crate::core::sonic::{
    INPUT_CHUNK_FRAMES as CHUNK_FRAMES, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE,
};

/// Chunks buffered between the reader thread and the session
const CAPTURE_QUEUE_SIZE: usize = 16;

/// Streams a 16kHz mono 16-bit WAV file as microphone input.
pub struct WavCapture {
    rx: mpsc::Receiver<Bytes>,
    task: JoinHandle<AudioIoResult<u64>>,
}

impl WavCapture {
    /// Open `path` and start reading. With `pace`, chunks are released at
    /// real-time speed.
    pub fn open(path: &Path, pace: bool) -> AudioIoResult<Self> {
        let reader = WavReader::open(path)?;
        info!(path = %path.display(), "Opened capture file");
        Self::from_reader(reader, pace)
    }

    pub fn from_reader<R>(reader: WavReader<R>, pace: bool) -> AudioIoResult<Self>
    where
        R: Read + Send + 'static,
    {
        check_capture_spec(&reader.spec())?;

        let (tx, rx) = mpsc::channel(CAPTURE_QUEUE_SIZE);
        let task = tokio::task::spawn_blocking(move || read_chunks(reader, tx, pace));
        Ok(Self { rx, task })
    }

    /// Next chunk of little-endian PCM, or `None` at end of file.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Stop reading and return the number of frames delivered.
    pub async fn finish(self) -> AudioIoResult<u64> {
        drop(self.rx);
        self.task
            .await
            .map_err(|e| AudioIoError::Task(e.to_string()))?
    }
}

fn check_capture_spec(spec: &WavSpec) -> AudioIoResult<()> {
    if spec.channels != 1
        || spec.bits_per_sample != 16
        || spec.sample_format != SampleFormat::Int
        || spec.sample_rate != INPUT_SAMPLE_RATE
    {
        return Err(AudioIoError::UnsupportedFormat(format!(
            "expected {} Hz mono 16-bit PCM, got {} Hz, {} channel(s), {} bits",
            INPUT_SAMPLE_RATE, spec.sample_rate, spec.channels, spec.bits_per_sample
        )));
    }
    Ok(())
}

fn read_chunks<R: Read>(
    mut reader: WavReader<R>,
    tx: mpsc::Sender<Bytes>,
    pace: bool,
) -> AudioIoResult<u64> {
    let chunk_duration =
        Duration::from_secs_f64(CHUNK_FRAMES as f64 / f64::from(reader.spec().sample_rate));
    let mut next_release = Instant::now();
    let mut frames = 0u64;
    let mut buf = Vec::with_capacity(CHUNK_FRAMES * 2);

    let mut send = |buf: &mut Vec<u8>| -> bool {
        if pace {
            next_release += chunk_duration;
            let now = Instant::now();
            if next_release > now {
                std::thread::sleep(next_release - now);
            }
        }
        let chunk = Bytes::from(std::mem::replace(buf, Vec::with_capacity(CHUNK_FRAMES * 2)));
        tx.blocking_send(chunk).is_ok()
    };

    for sample in reader.samples::<i16>() {
        buf.extend_from_slice(&sample?.to_le_bytes());
        frames += 1;
        if buf.len() == CHUNK_FRAMES * 2 && !send(&mut buf) {
            debug!("Capture consumer went away, stopping early");
            return Ok(frames);
        }
    }
    if !buf.is_empty() {
        send(&mut buf);
    }

    debug!(frames, "Capture file exhausted");
    Ok(frames)
}

/// Writes assistant audio (24kHz mono 16-bit) to a WAV file.
pub struct WavPlayback {
    tx: mpsc::UnboundedSender<Bytes>,
    task: JoinHandle<AudioIoResult<u64>>,
}

impl WavPlayback {
    pub fn create(path: &Path) -> AudioIoResult<Self> {
        let writer = WavWriter::create(path, playback_spec())?;
        info!(path = %path.display(), "Created playback file");
        Ok(Self::from_writer(writer))
    }

    pub fn from_writer<W>(writer: WavWriter<W>) -> Self
    where
        W: Write + Seek + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::task::spawn_blocking(move || write_chunks(writer, rx));
        Self { tx, task }
    }

    /// A handle for session callbacks. Every clone must be dropped before
    /// [`finish`](Self::finish) can complete.
    pub fn sender(&self) -> mpsc::UnboundedSender<Bytes> {
        self.tx.clone()
    }

    pub fn write(&self, pcm: Bytes) -> AudioIoResult<()> {
        self.tx.send(pcm).map_err(|_| AudioIoError::ChannelClosed)
    }

    /// Finalize the file and return the number of frames written.
    pub async fn finish(self) -> AudioIoResult<u64> {
        drop(self.tx);
        self.task
            .await
            .map_err(|e| AudioIoError::Task(e.to_string()))?
    }
}

pub fn playback_spec() -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate: OUTPUT_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

fn write_chunks<W: Write + Seek>(
    mut writer: WavWriter<W>,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
) -> AudioIoResult<u64> {
    let mut frames = 0u64;
    // odd trailing byte carried into the next chunk
    let mut carry: Option<u8> = None;

    while let Some(chunk) = rx.blocking_recv() {
        let mut bytes = chunk.as_ref();
        if let Some(low) = carry.take()
            && let Some((&high, rest)) = bytes.split_first()
        {
            writer.write_sample(i16::from_le_bytes([low, high]))?;
            frames += 1;
            bytes = rest;
        }

        let mut pairs = bytes.chunks_exact(2);
        for pair in &mut pairs {
            writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
            frames += 1;
        }
        carry = pairs.remainder().first().copied();
    }

    writer.finalize()?;
    debug!(frames, "Playback file finalized");
    Ok(frames)
}
