//! pagechat-wire: decoding of the streamed answer protocol
//!
//! The backend answers a question with free-form text and a single JSON
//! metadata object, separated by a reserved sentinel. This crate turns the raw
//! byte stream into ordered [`DecodeEvent`]s and provides the thin HTTP client
//! that opens such a stream.

pub mod client;
pub mod decoder;
pub mod error;
pub mod stream;
pub mod types;

pub use client::{BackendClient, Credentials, Endpoint, ExchangeRequest};
pub use decoder::{DecoderConfig, MetadataPlacement, SENTINEL, StreamDecoder, Utf8ChunkDecoder};
pub use error::{Error, Result};
pub use stream::{ByteChunkStream, DecodeEvent, DecodeEventStream, FailureKind, StreamFailure, decode_stream};
pub use types::{Metadata, SourceRef};
