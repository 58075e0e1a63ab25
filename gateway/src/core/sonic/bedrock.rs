//! Bedrock bidirectional stream transport.
//!
//! Opens `InvokeModelWithBidirectionalStream` for the configured model. The
//! SDK call runs in its own task: serialized events reach it through an mpsc
//! channel turned into the request body, and each output chunk is forwarded
//! as one JSON frame.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_bedrockruntime::Client as BedrockClient;
use aws_sdk_bedrockruntime::types::{
    BidirectionalInputPayloadPart, InvokeModelWithBidirectionalStreamInput,
    InvokeModelWithBidirectionalStreamOutput,
};
use aws_smithy_types::Blob;
use bytes::Bytes;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use zeroize::Zeroize;

use super::base::{SonicError, SonicResult};
use super::config::SonicConfig;
use super::transport::{ChannelSink, ChannelStream, EventSink, EventStream, TransportConnector};

/// Time allowed for the stream to open.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const INPUT_CHANNEL_SIZE: usize = 256;
const OUTPUT_CHANNEL_SIZE: usize = 256;

/// Static AWS credentials. Without them the default provider chain is used.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Drop for AwsCredentials {
    fn drop(&mut self) {
        self.secret_access_key.zeroize();
        if let Some(token) = self.session_token.as_mut() {
            token.zeroize();
        }
    }
}

/// [`TransportConnector`] backed by the Bedrock runtime SDK.
#[derive(Debug, Clone)]
pub struct BedrockConnector {
    credentials: Option<AwsCredentials>,
    connect_timeout: Duration,
}

impl BedrockConnector {
    pub fn new(credentials: Option<AwsCredentials>) -> Self {
        Self {
            credentials,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    async fn client(&self, region: &str) -> BedrockClient {
        let loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()));

        let sdk_config = match &self.credentials {
            Some(creds) => {
                let credentials = aws_credential_types::Credentials::new(
                    creds.access_key_id.clone(),
                    creds.secret_access_key.clone(),
                    creds.session_token.clone(),
                    None, // Expiration
                    "sonic-gateway",
                );
                loader.credentials_provider(credentials).load().await
            }
            // env vars, profiles, IAM roles
            None => loader.load().await,
        };

        BedrockClient::new(&sdk_config)
    }
}

#[async_trait]
impl TransportConnector for BedrockConnector {
    async fn connect(
        &self,
        config: &SonicConfig,
    ) -> SonicResult<(Box<dyn EventSink>, Box<dyn EventStream>)> {
        let client = self.client(&config.region).await;
        let model_id = config.model_id.clone();
        let connect_timeout = self.connect_timeout;

        let (input_tx, mut input_rx) = mpsc::channel::<Bytes>(INPUT_CHANNEL_SIZE);
        let (output_tx, output_rx) = mpsc::channel::<SonicResult<Bytes>>(OUTPUT_CHANNEL_SIZE);

        // The request only completes once the first input events flow, so the
        // sink is handed out before `send()` resolves.
        tokio::spawn(async move {
            let input_stream = async_stream::stream! {
                while let Some(payload) = input_rx.recv().await {
                    // Blob requires an owned Vec
                    let part = BidirectionalInputPayloadPart::builder()
                        .bytes(Blob::new(payload.to_vec()))
                        .build();
                    yield Ok(InvokeModelWithBidirectionalStreamInput::Chunk(part));
                }
                debug!("Input stream ended");
            };

            let request = client
                .invoke_model_with_bidirectional_stream()
                .model_id(model_id.clone())
                .body(input_stream.into())
                .send();

            let mut output = match tokio::time::timeout(connect_timeout, request).await {
                Ok(Ok(output)) => {
                    info!(model_id = %model_id, "Bidirectional stream opened");
                    output
                }
                Ok(Err(e)) => {
                    error!("Failed to open bidirectional stream: {}", e);
                    let _ = output_tx
                        .send(Err(SonicError::ConnectionFailed(e.to_string())))
                        .await;
                    return;
                }
                Err(_) => {
                    error!(
                        "Bidirectional stream did not open within {:?}",
                        connect_timeout
                    );
                    let _ = output_tx
                        .send(Err(SonicError::Timeout(format!(
                            "stream open exceeded {}s",
                            connect_timeout.as_secs()
                        ))))
                        .await;
                    return;
                }
            };

            loop {
                let next = tokio::select! {
                    next = output.body.recv() => next,
                    _ = output_tx.closed() => {
                        debug!("Output receiver dropped, leaving stream task");
                        break;
                    }
                };

                match next {
                    Ok(Some(InvokeModelWithBidirectionalStreamOutput::Chunk(part))) => {
                        let Some(blob) = part.bytes() else {
                            continue;
                        };
                        let frame = Bytes::copy_from_slice(blob.as_ref());
                        if output_tx.send(Ok(frame)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Some(other)) => {
                        debug!("Ignoring unhandled output variant: {:?}", other);
                    }
                    Ok(None) => {
                        info!("Bidirectional stream ended");
                        break;
                    }
                    Err(e) => {
                        warn!("Bidirectional stream error: {}", e);
                        let _ = output_tx
                            .send(Err(SonicError::Transport(e.to_string())))
                            .await;
                        break;
                    }
                }
            }
        });

        Ok((
            Box::new(ChannelSink::new(input_tx)),
            Box::new(ChannelStream::new(output_rx)),
        ))
    }
}
