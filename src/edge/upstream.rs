use futures::{StreamExt, TryStreamExt};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;

use crate::edge::sse::{ServerSentEvent, SseDecoder};
use crate::edge::warrant::WarrantSet;
use crate::errors::EdgeError;
use crate::settings;

pub const API_VERSION: &str = "v2";

/// Frames buffered between the stream reader and the event consumer.
const EVENT_BUFFER: usize = 256;

/// HTTP access to the source of truth.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    api_key: String,
    api_endpoint: String,
    streaming_endpoint: String,
}

impl std::fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("api_endpoint", &self.api_endpoint)
            .field("streaming_endpoint", &self.streaming_endpoint)
            .finish_non_exhaustive()
    }
}

impl UpstreamClient {
    pub fn new(cfg: &settings::Upstream) -> Result<Self, EdgeError> {
        if cfg.api_key.is_empty() {
            return Err(EdgeError::MissingApiKey);
        }

        let http = reqwest::Client::builder()
            .user_agent(concat!("warrant-edge/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            api_key: cfg.api_key.clone(),
            api_endpoint: cfg.api_endpoint.trim_end_matches('/').to_string(),
            streaming_endpoint: cfg.streaming_endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn streaming_endpoint(&self) -> &str {
        &self.streaming_endpoint
    }

    fn authorization(&self) -> String {
        format!("ApiKey {}", self.api_key)
    }

    /// Fetches the complete expanded warrant set.
    pub async fn fetch_warrants(&self) -> Result<WarrantSet, EdgeError> {
        let url = format!("{}/{API_VERSION}/expand", self.api_endpoint);
        let response = self
            .http
            .get(&url)
            .header(AUTHORIZATION, self.authorization())
            .send()
            .await?;

        let status = response.status();
        if !(status.is_success() || status.is_redirection()) {
            let body = response.text().await?;
            return Err(EdgeError::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(EdgeError::InvalidSnapshot)
    }

    /// Opens the event stream. Frames are read on a background task and
    /// handed over in arrival order; the channel closes when the connection
    /// does.
    pub async fn subscribe(&self) -> Result<Subscription, EdgeError> {
        let url = format!("{}/events", self.streaming_endpoint);
        let response = self
            .http
            .get(&url)
            .query(&[("stream", self.api_key.as_str())])
            .header(AUTHORIZATION, self.authorization())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EdgeError::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let body = response.bytes_stream().map_err(std::io::Error::other);
        let mut lines = FramedRead::new(StreamReader::new(body), LinesCodec::new());

        let reader = tokio::spawn(async move {
            let mut decoder = SseDecoder::new();
            while let Some(line) = lines.next().await {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        tracing::warn!(error = %err, "Event stream read failed");
                        break;
                    }
                };
                if let Some(frame) = decoder.push_line(&line) {
                    if tx.send(frame).await.is_err() {
                        break;
                    }
                }
            }
            tracing::debug!("Event stream closed");
        });

        Ok(Subscription { events: rx, reader })
    }
}

/// An open event stream. Dropping it closes the connection.
#[derive(Debug)]
pub struct Subscription {
    events: mpsc::Receiver<ServerSentEvent>,
    reader: JoinHandle<()>,
}

impl Subscription {
    /// Next frame, or `None` once the upstream connection has ended.
    pub async fn next(&mut self) -> Option<ServerSentEvent> {
        self.events.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
