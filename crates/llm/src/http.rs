use std::time::Duration;

use futures::StreamExt;
use serde::Deserialize;
use snafu::ResultExt;

use super::transport::{
    BoxFuture, BuildClientSnafu, ByteStream, ChatTransport, ConnectSnafu, EndpointVariant,
    ReadSnafu, StatusSnafu, TransportResult,
};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTransportConfig {
    pub base_url: String,
    pub connect_timeout: Option<Duration>,
}

impl HttpTransportConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim().to_string(),
            connect_timeout: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

#[derive(Debug, Deserialize)]
struct PingResponse {
    status: String,
}

/// Streams answers from the chat backend over plain HTTP.
///
/// `GET <base>/chat?q=...` for the general variant and `GET <base>/ask?q=...` for
/// the contextual one; both answer with NDJSON as `text/plain`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> TransportResult<Self> {
        let mut builder = reqwest::Client::builder();
        // Only the connect phase is bounded; a total timeout would cut long answers.
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder.build().context(BuildClientSnafu {
            stage: "build-http-client",
        })?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn endpoint_url(&self, variant: EndpointVariant) -> String {
        format!("{}/{}", self.base_url, variant.path())
    }

    /// Health check against `<base>/ping`.
    pub async fn ping(&self) -> TransportResult<bool> {
        let endpoint = format!("{}/ping", self.base_url);
        let response = self
            .client
            .get(&endpoint)
            .send()
            .await
            .context(ConnectSnafu {
                stage: "ping-send",
                endpoint: endpoint.clone(),
            })?;

        if !response.status().is_success() {
            return Ok(false);
        }

        let payload = response
            .json::<PingResponse>()
            .await
            .context(ReadSnafu { stage: "ping-body" })?;
        Ok(payload.status == "ok")
    }

    async fn open(&self, question: &str, variant: EndpointVariant) -> TransportResult<ByteStream> {
        let endpoint = self.endpoint_url(variant);
        tracing::debug!(%endpoint, %variant, "opening chat stream");

        let response = self
            .client
            .get(&endpoint)
            .query(&[("q", question)])
            .header(reqwest::header::ACCEPT, "text/plain")
            .send()
            .await
            .context(ConnectSnafu {
                stage: "open-stream-send",
                endpoint: endpoint.clone(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return StatusSnafu {
                stage: "open-stream-status",
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
            }
            .fail();
        }

        let stream = response.bytes_stream().map(|chunk| {
            chunk.context(ReadSnafu {
                stage: "read-stream-chunk",
            })
        });
        Ok(Box::pin(stream))
    }
}

impl ChatTransport for HttpTransport {
    fn open_stream<'a>(
        &'a self,
        question: &'a str,
        variant: EndpointVariant,
    ) -> BoxFuture<'a, TransportResult<ByteStream>> {
        Box::pin(self.open(question, variant))
    }
}
