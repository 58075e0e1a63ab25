//! Duplex transport seam.
//!
//! A [`TransportConnector`] opens one bidirectional stream and returns its
//! two halves: an [`EventSink`] for serialized input events and an
//! [`EventStream`] yielding raw output frames. The Bedrock implementation
//! lives in [`super::bedrock`]; tests plug in channel-backed stubs.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::base::{SonicError, SonicResult};
use super::config::SonicConfig;

/// Outbound half of a duplex stream.
#[async_trait]
pub trait EventSink: Send {
    /// Hand one serialized event to the transport.
    async fn send(&mut self, payload: Bytes) -> SonicResult<()>;

    /// Signal end of input. Further sends fail.
    async fn close(&mut self) -> SonicResult<()>;
}

/// Inbound half of a duplex stream.
#[async_trait]
pub trait EventStream: Send {
    /// Next output frame. `Ok(None)` means the remote side ended the stream.
    async fn recv(&mut self) -> SonicResult<Option<Bytes>>;
}

/// Opens duplex streams to the model.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(
        &self,
        config: &SonicConfig,
    ) -> SonicResult<(Box<dyn EventSink>, Box<dyn EventStream>)>;
}

/// [`EventSink`] over an mpsc channel.
pub struct ChannelSink {
    tx: Option<mpsc::Sender<Bytes>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx: Some(tx) }
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn send(&mut self, payload: Bytes) -> SonicResult<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| SonicError::Transport("input stream is closed".to_string()))?;
        tx.send(payload)
            .await
            .map_err(|_| SonicError::Transport("input stream receiver dropped".to_string()))
    }

    async fn close(&mut self) -> SonicResult<()> {
        // dropping the sender ends the input stream
        self.tx.take();
        Ok(())
    }
}

/// [`EventStream`] over an mpsc channel of frames or errors.
pub struct ChannelStream {
    rx: mpsc::Receiver<SonicResult<Bytes>>,
}

impl ChannelStream {
    pub fn new(rx: mpsc::Receiver<SonicResult<Bytes>>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl EventStream for ChannelStream {
    async fn recv(&mut self) -> SonicResult<Option<Bytes>> {
        match self.rx.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}
