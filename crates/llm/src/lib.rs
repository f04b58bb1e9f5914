#![deny(unsafe_code)]

//! Wire side of rill: opening answer streams and turning their bytes into events.

/// Newline framing over raw response chunks.
pub mod decoder;
/// NDJSON event lines.
pub mod event;
pub mod http;
/// Transport contract and endpoint variants.
pub mod transport;

pub use decoder::{DEFAULT_MAX_LINE_BYTES, LineDecoder, decode_lines};
pub use event::{EventParseError, StreamEvent, parse_line};
pub use http::{DEFAULT_BASE_URL, HttpTransport, HttpTransportConfig};
pub use transport::{
    BoxFuture, ByteStream, ChatTransport, EndpointVariant, TransportError, TransportResult,
};
