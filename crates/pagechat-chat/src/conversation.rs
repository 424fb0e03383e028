//! Conversation entries and the ordered history

use pagechat_wire::Metadata;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who produced an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Question,
    Answer,
}

/// Lifecycle of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Streaming,
    Complete,
    Failed,
}

impl EntryStatus {
    /// Complete and Failed accept no further mutation
    pub fn is_terminal(&self) -> bool {
        matches!(self, EntryStatus::Complete | EntryStatus::Failed)
    }

    /// Pending or Streaming
    pub fn is_in_flight(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Streaming => "streaming",
            EntryStatus::Complete => "complete",
            EntryStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One turn of the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    /// Stable identifier, usable as a UI key
    pub id: Uuid,
    pub role: Role,
    pub text: String,
    pub status: EntryStatus,
    /// Set exactly once, on the transition to Complete
    pub metadata: Option<Metadata>,
    /// Set only when Failed
    pub error: Option<String>,
    /// Creation time (Unix millis)
    pub created_at: i64,
}

impl ConversationEntry {
    /// A question, complete as soon as it is asked
    pub fn question(text: impl Into<String>) -> Self {
        Self::new(Role::Question, text.into(), EntryStatus::Complete)
    }

    /// An empty answer waiting for its stream
    pub fn pending_answer() -> Self {
        Self::new(Role::Answer, String::new(), EntryStatus::Pending)
    }

    fn new(role: Role, text: String, status: EntryStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text,
            status,
            metadata: None,
            error: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Source count reported by the backend, if complete
    pub fn source_count(&self) -> usize {
        self.metadata.as_ref().map_or(0, |m| m.sources.len())
    }

    pub(crate) fn append(&mut self, text: &str) {
        self.text.push_str(text);
        if self.status == EntryStatus::Pending {
            self.status = EntryStatus::Streaming;
        }
    }

    pub(crate) fn complete(&mut self, metadata: Metadata) {
        self.metadata = Some(metadata);
        self.status = EntryStatus::Complete;
    }

    pub(crate) fn fail(&mut self, message: String) {
        self.error = Some(message);
        self.status = EntryStatus::Failed;
    }
}

/// Ordered history, oldest first. Entries are only ever removed all at once.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    entries: Vec<ConversationEntry>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries in chronological order
    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ConversationEntry> {
        self.entries.get(index)
    }

    pub fn last(&self) -> Option<&ConversationEntry> {
        self.entries.last()
    }

    /// Index of the entry still Pending or Streaming, if any
    pub fn in_flight(&self) -> Option<usize> {
        self.entries.iter().rposition(|e| e.status.is_in_flight())
    }

    pub(crate) fn push(&mut self, entry: ConversationEntry) -> usize {
        self.entries.push(entry);
        self.entries.len() - 1
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut ConversationEntry> {
        self.entries.get_mut(index)
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
