//! Incremental decoding of the answer/metadata byte stream
//!
//! The decoder is synchronous and push-driven: feed it chunks in arrival order
//! and it returns the [`DecodeEvent`]s each chunk produced. The async adapter in
//! [`crate::stream`] wraps it around a byte stream.

use crate::{
    stream::{DecodeEvent, FailureKind},
    types::Metadata,
};

/// Separator between the answer text and the JSON metadata
pub const SENTINEL: &str = "\n ###endjson### \n\n";

/// Default cap on buffered metadata text (1 MiB)
pub const DEFAULT_MAX_METADATA_LEN: usize = 1024 * 1024;

/// Decodes UTF-8 across chunk boundaries.
///
/// An incomplete trailing code point is held back until the next chunk
/// completes it. Invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    partial: Vec<u8>,
}

impl Utf8ChunkDecoder {
    /// Create a new decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.partial);
        bytes.extend_from_slice(chunk);

        let mut out = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    if let Ok(valid) = std::str::from_utf8(valid) {
                        out.push_str(valid);
                    }
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[len..];
                        }
                        None => {
                            // Incomplete code point at the end of the chunk
                            self.partial = tail.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush at end of stream. A dangling partial code point becomes U+FFFD.
    pub fn finish(&mut self) -> String {
        if self.partial.is_empty() {
            String::new()
        } else {
            self.partial.clear();
            char::REPLACEMENT_CHARACTER.to_string()
        }
    }

    /// Whether bytes of an incomplete code point are being held
    pub fn has_partial(&self) -> bool {
        !self.partial.is_empty()
    }
}

/// Which side of the sentinel the metadata sits on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MetadataPlacement {
    /// Answer text, sentinel, then the JSON object
    #[default]
    Trailing,
    /// JSON object, sentinel, then the answer text
    Leading,
}

/// Decoder configuration
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Which side of the sentinel the metadata sits on
    pub placement: MetadataPlacement,
    /// Upper bound on buffered metadata text, in bytes
    pub max_metadata_len: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            placement: MetadataPlacement::Trailing,
            max_metadata_len: DEFAULT_MAX_METADATA_LEN,
        }
    }
}

impl DecoderConfig {
    /// Configuration for backends that send the metadata first
    pub fn leading() -> Self {
        Self {
            placement: MetadataPlacement::Leading,
            ..Default::default()
        }
    }

    /// Set the metadata size cap
    pub fn with_max_metadata_len(mut self, len: usize) -> Self {
        self.max_metadata_len = len;
        self
    }
}

#[derive(Debug)]
enum Phase {
    /// Trailing: streaming answer text, sentinel not seen yet
    Answer,
    /// Trailing: sentinel seen, collecting the JSON object
    Metadata,
    /// Leading: collecting the JSON object, sentinel not seen yet
    Prelude,
    /// Leading: metadata parsed and held, streaming answer text
    Body { metadata: Metadata, started: bool },
    Done,
}

/// Splits decoded text into answer text and metadata.
///
/// `buffer` holds text that cannot be released yet: in [`Phase::Answer`] a
/// tail that may be the start of a sentinel split across chunks (plus trailing
/// whitespace), in the metadata phases the JSON collected so far.
#[derive(Debug)]
pub struct StreamDecoder {
    config: DecoderConfig,
    utf8: Utf8ChunkDecoder,
    phase: Phase,
    buffer: String,
}

impl StreamDecoder {
    /// Create a new decoder
    pub fn new(config: DecoderConfig) -> Self {
        let phase = match config.placement {
            MetadataPlacement::Trailing => Phase::Answer,
            MetadataPlacement::Leading => Phase::Prelude,
        };
        Self {
            config,
            utf8: Utf8ChunkDecoder::new(),
            phase,
            buffer: String::new(),
        }
    }

    /// Whether a terminal event has been produced
    pub fn is_done(&self) -> bool {
        matches!(self.phase, Phase::Done)
    }

    /// Feed the next chunk of raw bytes
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<DecodeEvent> {
        let mut events = Vec::new();
        if self.is_done() {
            return events;
        }
        let text = self.utf8.decode(chunk);
        if !text.is_empty() {
            self.consume(&text, &mut events);
        }
        events
    }

    /// Signal a clean end of stream
    pub fn finish(&mut self) -> Vec<DecodeEvent> {
        let mut events = Vec::new();
        if self.is_done() {
            return events;
        }

        let tail = self.utf8.finish();
        if !tail.is_empty() {
            self.consume(&tail, &mut events);
        }

        match std::mem::replace(&mut self.phase, Phase::Done) {
            Phase::Answer => {
                self.flush_held_text(&mut events);
                events.push(DecodeEvent::failed(
                    FailureKind::MissingMetadata,
                    "stream ended before the metadata separator",
                ));
            }
            Phase::Metadata => match Metadata::parse(&self.buffer) {
                Ok(metadata) => {
                    events.push(DecodeEvent::MetadataReady(metadata));
                    events.push(DecodeEvent::StreamEnded);
                }
                Err(e) => {
                    tracing::warn!("Malformed metadata after separator: {}", e);
                    events.push(DecodeEvent::failed(FailureKind::MalformedMetadata, e.to_string()));
                }
            },
            Phase::Prelude => {
                events.push(DecodeEvent::failed(
                    FailureKind::MissingMetadata,
                    "stream ended before the metadata separator",
                ));
            }
            Phase::Body { metadata, .. } => {
                events.push(DecodeEvent::MetadataReady(metadata));
                events.push(DecodeEvent::StreamEnded);
            }
            Phase::Done => {}
        }
        self.buffer.clear();
        events
    }

    /// Terminate with a failure (e.g. the underlying read failed).
    ///
    /// Answer text held back for sentinel detection is released first so the
    /// partial answer is never lost.
    pub fn fail(&mut self, kind: FailureKind, detail: impl Into<String>) -> Vec<DecodeEvent> {
        let mut events = Vec::new();
        self.fail_into(kind, detail.into(), &mut events);
        events
    }

    fn fail_into(&mut self, kind: FailureKind, detail: String, events: &mut Vec<DecodeEvent>) {
        if self.is_done() {
            return;
        }
        if matches!(self.phase, Phase::Answer) {
            self.flush_held_text(events);
        }
        self.phase = Phase::Done;
        self.buffer.clear();
        events.push(DecodeEvent::failed(kind, detail));
    }

    fn consume(&mut self, text: &str, events: &mut Vec<DecodeEvent>) {
        match self.phase {
            Phase::Answer => self.consume_answer(text, events),
            Phase::Metadata => self.consume_metadata(text, events),
            Phase::Prelude => self.consume_prelude(text, events),
            Phase::Body { .. } => self.consume_body(text, events),
            Phase::Done => {}
        }
    }

    fn consume_answer(&mut self, text: &str, events: &mut Vec<DecodeEvent>) {
        self.buffer.push_str(text);

        if let Some(pos) = self.buffer.find(SENTINEL) {
            let answer = self.buffer[..pos].trim_end();
            if !answer.is_empty() {
                events.push(DecodeEvent::TextAppended(answer.to_string()));
            }
            let rest = self.buffer[pos + SENTINEL.len()..].to_string();
            tracing::debug!("Metadata separator found, {} bytes follow", rest.len());
            self.buffer.clear();
            self.phase = Phase::Metadata;
            self.consume_metadata(&rest, events);
            return;
        }

        let held = partial_sentinel_len(&self.buffer);
        let releasable = &self.buffer[..self.buffer.len() - held];
        let release_to = releasable.trim_end().len();
        if release_to > 0 {
            let released: String = self.buffer.drain(..release_to).collect();
            events.push(DecodeEvent::TextAppended(released));
        }
    }

    fn consume_metadata(&mut self, text: &str, events: &mut Vec<DecodeEvent>) {
        self.buffer.push_str(text);
        if self.buffer.len() > self.config.max_metadata_len {
            let detail = format!(
                "metadata exceeds {} bytes",
                self.config.max_metadata_len
            );
            self.fail_into(FailureKind::MetadataTooLarge, detail, events);
        }
    }

    fn consume_prelude(&mut self, text: &str, events: &mut Vec<DecodeEvent>) {
        self.buffer.push_str(text);

        let Some(pos) = self.buffer.find(SENTINEL) else {
            if self.buffer.len() > self.config.max_metadata_len + SENTINEL.len() {
                let detail = format!(
                    "metadata exceeds {} bytes",
                    self.config.max_metadata_len
                );
                self.fail_into(FailureKind::MetadataTooLarge, detail, events);
            }
            return;
        };

        match Metadata::parse(&self.buffer[..pos]) {
            Ok(metadata) => {
                let rest = self.buffer[pos + SENTINEL.len()..].to_string();
                tracing::debug!(cost = metadata.cost, "Leading metadata parsed");
                self.buffer.clear();
                self.phase = Phase::Body {
                    metadata,
                    started: false,
                };
                self.consume_body(&rest, events);
            }
            Err(e) => {
                tracing::warn!("Malformed metadata before separator: {}", e);
                self.fail_into(FailureKind::MalformedMetadata, e.to_string(), events);
            }
        }
    }

    fn consume_body(&mut self, text: &str, events: &mut Vec<DecodeEvent>) {
        let Phase::Body { started, .. } = &mut self.phase else {
            return;
        };
        let text = if *started { text } else { text.trim_start() };
        if text.is_empty() {
            return;
        }
        *started = true;
        events.push(DecodeEvent::TextAppended(text.to_string()));
    }

    fn flush_held_text(&mut self, events: &mut Vec<DecodeEvent>) {
        if !self.buffer.is_empty() {
            events.push(DecodeEvent::TextAppended(std::mem::take(&mut self.buffer)));
        }
    }
}

/// Length of the longest proper prefix of [`SENTINEL`] that `text` ends with.
fn partial_sentinel_len(text: &str) -> usize {
    let max = text.len().min(SENTINEL.len() - 1);
    (1..=max)
        .rev()
        .find(|&n| text.ends_with(&SENTINEL[..n]))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_of(events: &[DecodeEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                DecodeEvent::TextAppended(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    fn decode_all(config: DecoderConfig, chunks: &[&[u8]]) -> Vec<DecodeEvent> {
        let mut decoder = StreamDecoder::new(config);
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(decoder.feed(chunk));
        }
        events.extend(decoder.finish());
        events
    }

    fn failure_kind(events: &[DecodeEvent]) -> Option<FailureKind> {
        events.iter().find_map(|e| match e {
            DecodeEvent::StreamFailed(f) => Some(f.kind),
            _ => None,
        })
    }

    // --- UTF-8 chunk decoding ---

    #[test]
    fn test_utf8_two_byte_split_across_two_chunks() {
        let bytes = "café".as_bytes();
        let (a, b) = bytes.split_at(bytes.len() - 1);
        let mut d = Utf8ChunkDecoder::new();
        let first = d.decode(a);
        assert_eq!(first, "caf");
        assert!(d.has_partial());
        assert_eq!(first + &d.decode(b), "café");
        assert!(!d.has_partial());
    }

    #[test]
    fn test_utf8_three_byte_split_across_three_chunks() {
        let euro = "€".as_bytes();
        let mut d = Utf8ChunkDecoder::new();
        assert_eq!(d.decode(&euro[..1]), "");
        assert_eq!(d.decode(&euro[1..2]), "");
        assert_eq!(d.decode(&euro[2..]), "€");
    }

    #[test]
    fn test_utf8_four_byte_split_across_three_chunks() {
        let bytes = "a🦀b".as_bytes();
        let mut d = Utf8ChunkDecoder::new();
        let mut out = d.decode(&bytes[..2]);
        out.push_str(&d.decode(&bytes[2..4]));
        out.push_str(&d.decode(&bytes[4..]));
        assert_eq!(out, "a🦀b");
    }

    #[test]
    fn test_utf8_invalid_byte_is_replaced() {
        let mut d = Utf8ChunkDecoder::new();
        assert_eq!(d.decode(b"ok\xFFok"), "ok\u{FFFD}ok");
    }

    #[test]
    fn test_utf8_dangling_partial_flushed_on_finish() {
        let mut d = Utf8ChunkDecoder::new();
        assert_eq!(d.decode(&"é".as_bytes()[..1]), "");
        assert_eq!(d.finish(), "\u{FFFD}");
        assert_eq!(d.finish(), "");
    }

    // --- Trailing placement ---

    #[test]
    fn test_text_without_sentinel_is_concatenated_in_order() {
        let chunks: [&[u8]; 3] = [b"The answer ", b"is forty", b" two."];
        let mut decoder = StreamDecoder::new(DecoderConfig::default());
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(decoder.feed(chunk));
        }
        assert!(!events.iter().any(|e| matches!(e, DecodeEvent::MetadataReady(_))));
        assert!(!decoder.is_done());

        events.extend(decoder.finish());
        assert_eq!(text_of(&events), "The answer is forty two.");
        assert_eq!(failure_kind(&events), Some(FailureKind::MissingMetadata));
    }

    #[test]
    fn test_single_and_multi_chunk_yield_same_result() {
        let wire = format!(
            "hello world{}{}",
            SENTINEL, r#"{"cost":1,"sources":[{"documentId":"d1"}]}"#
        );
        let bytes = wire.as_bytes();

        let whole = decode_all(DecoderConfig::default(), &[bytes]);
        let split = decode_all(
            DecoderConfig::default(),
            &[&bytes[..3], &bytes[3..8], &bytes[8..]],
        );

        for events in [&whole, &split] {
            assert_eq!(text_of(events), "hello world");
            let meta = events.iter().find_map(|e| match e {
                DecodeEvent::MetadataReady(m) => Some(m),
                _ => None,
            });
            assert_eq!(meta.map(|m| m.cost), Some(1.0));
            assert!(matches!(events.last(), Some(DecodeEvent::StreamEnded)));
        }
    }

    #[test]
    fn test_sentinel_split_across_chunks() {
        let wire = format!("hello world{}{}", SENTINEL, r#"{"cost":3,"sources":[]}"#);
        let bytes = wire.as_bytes();
        let sentinel_mid = "hello world".len() + 6;

        let events = decode_all(
            DecoderConfig::default(),
            &[&bytes[..sentinel_mid], &bytes[sentinel_mid..sentinel_mid + 5], &bytes[sentinel_mid + 5..]],
        );
        assert_eq!(text_of(&events), "hello world");
        assert!(events.iter().any(|e| matches!(e, DecodeEvent::MetadataReady(m) if m.cost == 3.0)));
    }

    #[test]
    fn test_false_sentinel_prefix_is_released() {
        let events = decode_all(DecoderConfig::default(), &[b"a\n ###end", b"less"]);
        assert_eq!(text_of(&events), "a\n ###endless");
    }

    #[test]
    fn test_multibyte_char_split_before_sentinel() {
        let wire = format!("naïve{}{}", SENTINEL, r#"{"cost":0}"#);
        let bytes = wire.as_bytes();
        // split inside the two-byte 'ï'
        let events = decode_all(DecoderConfig::default(), &[&bytes[..3], &bytes[3..]]);
        assert_eq!(text_of(&events), "naïve");
    }

    #[test]
    fn test_malformed_metadata_fails_and_keeps_text() {
        let wire = format!("partial answer{}{{\"cost\": oops", SENTINEL);
        let events = decode_all(DecoderConfig::default(), &[wire.as_bytes()]);
        assert_eq!(text_of(&events), "partial answer");
        assert_eq!(failure_kind(&events), Some(FailureKind::MalformedMetadata));
        assert!(!events.iter().any(|e| matches!(e, DecodeEvent::StreamEnded)));
    }

    #[test]
    fn test_metadata_over_cap_fails() {
        let config = DecoderConfig::default().with_max_metadata_len(8);
        let wire = format!("x{}{}", SENTINEL, r#"{"cost":1,"sources":[]}"#);
        let events = decode_all(config, &[wire.as_bytes()]);
        assert_eq!(failure_kind(&events), Some(FailureKind::MetadataTooLarge));
    }

    #[test]
    fn test_fail_releases_held_text() {
        let mut decoder = StreamDecoder::new(DecoderConfig::default());
        let mut events = decoder.feed(b"so far \n ###");
        events.extend(decoder.fail(FailureKind::Transport, "connection reset"));
        assert_eq!(text_of(&events), "so far \n ###");
        assert_eq!(failure_kind(&events), Some(FailureKind::Transport));
    }

    #[test]
    fn test_no_events_after_terminal() {
        let mut decoder = StreamDecoder::new(DecoderConfig::default());
        decoder.fail(FailureKind::Transport, "gone");
        assert!(decoder.is_done());
        assert!(decoder.feed(b"more").is_empty());
        assert!(decoder.finish().is_empty());
        assert!(decoder.fail(FailureKind::Transport, "again").is_empty());
    }

    // --- Leading placement ---

    #[test]
    fn test_leading_metadata_then_text() {
        let wire = format!(r#"{{"cost": 0, "sources": ""}}{}  Hello there"#, SENTINEL);
        let bytes = wire.as_bytes();
        let mut decoder = StreamDecoder::new(DecoderConfig::leading());

        let mut events = decoder.feed(&bytes[..10]);
        assert!(events.is_empty());
        events.extend(decoder.feed(&bytes[10..]));
        events.extend(decoder.feed(b", reader"));
        assert!(!events.iter().any(|e| matches!(e, DecodeEvent::MetadataReady(_))));

        events.extend(decoder.finish());
        assert_eq!(text_of(&events), "Hello there, reader");
        let n = events.len();
        assert!(matches!(&events[n - 2], DecodeEvent::MetadataReady(m) if m.sources.is_empty()));
        assert!(matches!(events[n - 1], DecodeEvent::StreamEnded));
    }

    #[test]
    fn test_leading_malformed_fails_immediately() {
        let wire = format!("not json{}text", SENTINEL);
        let mut decoder = StreamDecoder::new(DecoderConfig::leading());
        let events = decoder.feed(wire.as_bytes());
        assert_eq!(failure_kind(&events), Some(FailureKind::MalformedMetadata));
        assert!(decoder.is_done());
    }

    #[test]
    fn test_leading_without_sentinel_is_missing_metadata() {
        let events = decode_all(DecoderConfig::leading(), &[b"{\"cost\": 1}"]);
        assert_eq!(failure_kind(&events), Some(FailureKind::MissingMetadata));
        assert_eq!(text_of(&events), "");
    }

    #[test]
    fn test_partial_sentinel_len() {
        assert_eq!(partial_sentinel_len("abc"), 0);
        assert_eq!(partial_sentinel_len("abc\n"), 1);
        assert_eq!(partial_sentinel_len("abc\n ###endjson"), 12);
        assert_eq!(partial_sentinel_len(""), 0);
    }
}
