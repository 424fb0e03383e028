//! Decode events and the async stream adapter

use std::pin::Pin;

use async_stream::stream;
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

use crate::{
    decoder::{DecoderConfig, StreamDecoder},
    error::Result,
    types::Metadata,
};

/// Why a stream ended without metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The metadata segment is not valid JSON of the expected shape
    MalformedMetadata,
    /// The stream ended before the separator was seen
    MissingMetadata,
    /// The metadata segment exceeded the configured cap
    MetadataTooLarge,
    /// Reading the underlying stream failed
    Transport,
}

/// Terminal failure of a decoded stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl std::fmt::Display for StreamFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            FailureKind::MalformedMetadata => "malformed metadata",
            FailureKind::MissingMetadata => "missing metadata",
            FailureKind::MetadataTooLarge => "metadata too large",
            FailureKind::Transport => "transport error",
        };
        write!(f, "{}: {}", kind, self.detail)
    }
}

/// Events produced while decoding a response stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum DecodeEvent {
    /// More answer text, in arrival order
    TextAppended(String),
    /// The metadata object; always directly precedes `StreamEnded`
    MetadataReady(Metadata),
    /// The stream ended cleanly
    StreamEnded,
    /// The stream failed; no further events follow
    StreamFailed(StreamFailure),
}

impl DecodeEvent {
    /// Create a failure event
    pub fn failed(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self::StreamFailed(StreamFailure {
            kind,
            detail: detail.into(),
        })
    }

    /// Check if this is a terminal event (StreamEnded or StreamFailed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, DecodeEvent::StreamEnded | DecodeEvent::StreamFailed(_))
    }
}

/// Raw response body chunks
pub type ByteChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// A stream of decode events
pub type DecodeEventStream = Pin<Box<dyn Stream<Item = DecodeEvent> + Send>>;

/// Decode a byte stream chunk by chunk.
///
/// Once `cancel` fires no further events are yielded; a read already in
/// flight is allowed to complete and its chunk is dropped.
pub fn decode_stream(
    mut chunks: ByteChunkStream,
    config: DecoderConfig,
    cancel: CancellationToken,
) -> DecodeEventStream {
    Box::pin(stream! {
        let mut decoder = StreamDecoder::new(config);
        let mut chunk_count = 0usize;

        while let Some(chunk) = chunks.next().await {
            if cancel.is_cancelled() {
                tracing::debug!("Decode cancelled after {} chunks", chunk_count);
                return;
            }

            let events = match chunk {
                Ok(bytes) => {
                    chunk_count += 1;
                    tracing::trace!("Chunk {}: {} bytes", chunk_count, bytes.len());
                    decoder.feed(&bytes)
                }
                Err(e) => {
                    tracing::warn!("Stream read failed after {} chunks: {}", chunk_count, e);
                    decoder.fail(FailureKind::Transport, e.to_string())
                }
            };

            for event in events {
                yield event;
            }
            if decoder.is_done() {
                return;
            }
        }

        if cancel.is_cancelled() {
            return;
        }
        tracing::debug!("Stream ended after {} chunks", chunk_count);
        for event in decoder.finish() {
            yield event;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{decoder::SENTINEL, error::Error};

    fn chunks_of(parts: Vec<Result<&[u8]>>) -> ByteChunkStream {
        let items: Vec<Result<Bytes>> = parts
            .into_iter()
            .map(|p| p.map(Bytes::copy_from_slice))
            .collect();
        Box::pin(futures::stream::iter(items))
    }

    #[tokio::test]
    async fn test_decode_stream_happy_path() {
        let wire = format!(
            "Paris is the capital.{}{}",
            SENTINEL, r#"{"cost":2,"sources":[{"documentId":"geo","page":4}]}"#
        );
        let bytes = wire.as_bytes();
        let stream = chunks_of(vec![Ok(&bytes[..5]), Ok(&bytes[5..30]), Ok(&bytes[30..])]);

        let events: Vec<_> = decode_stream(stream, DecoderConfig::default(), CancellationToken::new())
            .collect()
            .await;

        let text: String = events
            .iter()
            .filter_map(|e| match e {
                DecodeEvent::TextAppended(t) => Some(t.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Paris is the capital.");
        assert!(matches!(events.last(), Some(DecodeEvent::StreamEnded)));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn test_read_error_becomes_transport_failure() {
        let stream = chunks_of(vec![
            Ok(&b"half an ans"[..]),
            Err(Error::Transport("connection reset".into())),
            Ok(&b"never seen"[..]),
        ]);

        let events: Vec<_> = decode_stream(stream, DecoderConfig::default(), CancellationToken::new())
            .collect()
            .await;

        assert_eq!(events[0], DecodeEvent::TextAppended("half an ans".into()));
        match events.last() {
            Some(DecodeEvent::StreamFailed(f)) => {
                assert_eq!(f.kind, FailureKind::Transport);
                assert!(f.detail.contains("connection reset"));
            }
            other => panic!("expected transport failure, got {:?}", other),
        }
        assert!(!events.iter().any(|e| matches!(e, DecodeEvent::TextAppended(t) if t.contains("never"))));
    }

    #[tokio::test]
    async fn test_cancel_stops_events() {
        let cancel = CancellationToken::new();
        let stream = chunks_of(vec![Ok(&b"first "[..]), Ok(&b"second"[..])]);
        let mut events = decode_stream(stream, DecoderConfig::default(), cancel.clone());

        let first = events.next().await;
        assert_eq!(first, Some(DecodeEvent::TextAppended("first".into())));

        cancel.cancel();
        assert_eq!(events.next().await, None);
    }

    #[test]
    fn test_failure_display() {
        let failure = StreamFailure {
            kind: FailureKind::MalformedMetadata,
            detail: "expected value at line 1 column 2".into(),
        };
        assert_eq!(
            failure.to_string(),
            "malformed metadata: expected value at line 1 column 2"
        );
    }
}
