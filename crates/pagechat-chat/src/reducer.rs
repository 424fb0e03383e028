//! Folds decode events into the conversation history

use pagechat_wire::{DecodeEvent, FailureKind, Metadata, SourceRef, StreamFailure};
use serde::{Deserialize, Serialize};

use crate::{
    conversation::{ConversationEntry, ConversationHistory},
    error::{Error, Result},
};

/// What the completion callback receives.
///
/// Only the lead source is passed on; the full list stays on the entry's
/// metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplySource {
    /// The first source the backend reported
    Source(SourceRef),
    /// The backend reported no sources
    NoSources,
}

impl ReplySource {
    /// Pick the lead source out of the metadata
    pub fn from_metadata(metadata: &Metadata) -> Self {
        match metadata.lead_source() {
            Some(source) => ReplySource::Source(source.clone()),
            None => ReplySource::NoSources,
        }
    }

    /// The source, if there is one
    pub fn source(&self) -> Option<&SourceRef> {
        match self {
            ReplySource::Source(s) => Some(s),
            ReplySource::NoSources => None,
        }
    }
}

/// Refers to the answer entry of one exchange.
///
/// Handles carry the history generation they were issued in; after a reset
/// they are rejected with [`Error::StaleHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerHandle {
    index: usize,
    generation: u64,
}

impl AnswerHandle {
    /// Position of the answer entry in the history
    pub fn index(&self) -> usize {
        self.index
    }
}

type CompletionCallback = Box<dyn Fn(&ReplySource) + Send + Sync>;

/// Owns the conversation history and applies stream events to it
#[derive(Default)]
pub struct ConversationReducer {
    history: ConversationHistory,
    generation: u64,
    on_complete: Option<CompletionCallback>,
}

impl ConversationReducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the callback invoked once per completed exchange.
    ///
    /// It runs while the reducer is being mutated and must not call back into it.
    pub fn on_reply_complete(&mut self, f: impl Fn(&ReplySource) + Send + Sync + 'static) {
        self.on_complete = Some(Box::new(f));
    }

    /// Read access to the history
    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// Copy of all entries, for readers outside the reducer
    pub fn snapshot(&self) -> Vec<ConversationEntry> {
        self.history.entries().to_vec()
    }

    /// Whether an exchange is in flight
    pub fn is_busy(&self) -> bool {
        self.history.in_flight().is_some()
    }

    /// Append a question and its pending answer.
    pub fn start_exchange(&mut self, question: impl Into<String>) -> Result<AnswerHandle> {
        if self.is_busy() {
            return Err(Error::ConcurrentExchange);
        }
        self.history.push(ConversationEntry::question(question));
        let index = self.history.push(ConversationEntry::pending_answer());
        tracing::debug!(index, "Exchange started");
        Ok(AnswerHandle {
            index,
            generation: self.generation,
        })
    }

    /// Append streamed text to the answer
    pub fn on_text_appended(&mut self, handle: AnswerHandle, text: &str) -> Result<()> {
        self.in_flight_entry(handle)?.append(text);
        Ok(())
    }

    /// Complete the answer and notify the completion callback
    pub fn on_metadata_ready(&mut self, handle: AnswerHandle, metadata: Metadata) -> Result<ReplySource> {
        let source = ReplySource::from_metadata(&metadata);
        let entry = self.in_flight_entry(handle)?;
        tracing::debug!(
            index = handle.index,
            cost = metadata.cost,
            sources = metadata.sources.len(),
            "Exchange complete"
        );
        entry.complete(metadata);

        if let Some(callback) = &self.on_complete {
            callback(&source);
        }
        Ok(source)
    }

    /// Mark the answer failed. Text received so far is kept.
    pub fn on_stream_failed(&mut self, handle: AnswerHandle, failure: &StreamFailure) -> Result<()> {
        let entry = self.in_flight_entry(handle)?;
        tracing::warn!(index = handle.index, "Exchange failed: {}", failure);
        entry.fail(failure_message(failure));
        Ok(())
    }

    /// Clean end of stream.
    ///
    /// A no-op once metadata has completed the entry; an answer still in flight
    /// at this point never received its metadata and is failed.
    pub fn on_stream_ended(&mut self, handle: AnswerHandle) -> Result<()> {
        self.check_generation(handle)?;
        let in_flight = self
            .history
            .get(handle.index)
            .is_some_and(|e| e.status.is_in_flight());
        if in_flight {
            let failure = StreamFailure {
                kind: FailureKind::MissingMetadata,
                detail: "stream ended without metadata".into(),
            };
            self.on_stream_failed(handle, &failure)?;
        }
        Ok(())
    }

    /// Apply one decode event. Returns the reply source when the event
    /// completed the exchange.
    pub fn apply(&mut self, handle: AnswerHandle, event: DecodeEvent) -> Result<Option<ReplySource>> {
        match event {
            DecodeEvent::TextAppended(text) => self.on_text_appended(handle, &text).map(|_| None),
            DecodeEvent::MetadataReady(metadata) => self.on_metadata_ready(handle, metadata).map(Some),
            DecodeEvent::StreamEnded => self.on_stream_ended(handle).map(|_| None),
            DecodeEvent::StreamFailed(failure) => self.on_stream_failed(handle, &failure).map(|_| None),
        }
    }

    /// Drop the whole history, including an exchange in flight. No callbacks run.
    pub fn reset(&mut self) {
        tracing::debug!(entries = self.history.len(), "Conversation reset");
        self.history.clear();
        self.generation += 1;
    }

    fn check_generation(&self, handle: AnswerHandle) -> Result<()> {
        if handle.generation != self.generation {
            return Err(Error::StaleHandle);
        }
        Ok(())
    }

    fn in_flight_entry(&mut self, handle: AnswerHandle) -> Result<&mut ConversationEntry> {
        self.check_generation(handle)?;
        let entry = self
            .history
            .get_mut(handle.index)
            .ok_or(Error::StaleHandle)?;
        if entry.status.is_terminal() {
            return Err(Error::EntryFinalized {
                index: handle.index,
                status: entry.status,
            });
        }
        Ok(entry)
    }
}

/// Message shown on a failed answer
pub fn failure_message(failure: &StreamFailure) -> String {
    match failure.kind {
        FailureKind::Transport => "Connection to the assistant was interrupted, please retry".into(),
        FailureKind::MalformedMetadata | FailureKind::MissingMetadata | FailureKind::MetadataTooLarge => {
            "The reply could not be completed, please retry".into()
        }
    }
}
