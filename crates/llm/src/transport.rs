use std::fmt;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use snafu::Snafu;

/// Backend behavior a conversation is bound to for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointVariant {
    /// Plain model chat.
    General,
    /// Answers augmented with retrieved context.
    #[serde(alias = "ragged")]
    Contextual,
}

impl EndpointVariant {
    pub const ALL: [EndpointVariant; 2] = [EndpointVariant::General, EndpointVariant::Contextual];

    /// Route segment on the chat backend.
    pub fn path(self) -> &'static str {
        match self {
            Self::General => "chat",
            Self::Contextual => "ask",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Contextual => "contextual",
        }
    }

    /// Inverse of [`path`](Self::path), ignoring ASCII case.
    pub fn from_path(segment: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|variant| variant.path().eq_ignore_ascii_case(segment))
    }
}

impl fmt::Display for EndpointVariant {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.name())
    }
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type TransportResult<T> = Result<T, TransportError>;

/// Raw response body as delivered by the transport, in arbitrary chunk sizes.
///
/// An `Err` item means the connection broke after the stream was opened.
pub type ByteStream = Pin<Box<dyn Stream<Item = TransportResult<Bytes>> + Send>>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TransportError {
    #[snafu(display("failed to build http client on `{stage}`: {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("failed to reach {endpoint}: {source}"))]
    Connect {
        stage: &'static str,
        endpoint: String,
        source: reqwest::Error,
    },
    #[snafu(display("API error: {status} {reason}"))]
    Status {
        stage: &'static str,
        status: u16,
        reason: String,
    },
    #[snafu(display("stream read failed on `{stage}`: {source}"))]
    Read {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("stream i/o failed on `{stage}`: {source}"))]
    Io {
        stage: &'static str,
        source: std::io::Error,
    },
}

/// Opens one response stream per question.
///
/// Failing the returned future means the stream never opened; errors yielded by
/// the [`ByteStream`] itself mean it opened and then broke.
pub trait ChatTransport: Send + Sync {
    fn open_stream<'a>(
        &'a self,
        question: &'a str,
        variant: EndpointVariant,
    ) -> BoxFuture<'a, TransportResult<ByteStream>>;
}
