//! Chat event types

use serde::{Deserialize, Serialize};

use crate::reducer::ReplySource;

/// Events broadcast to subscribers (e.g. the rendering layer)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// A question and its pending answer were appended
    ExchangeStarted { index: usize, question: String },

    /// Streamed text was appended to the answer at `index`
    AnswerUpdated { index: usize, delta: String },

    /// The answer completed
    ReplyCompleted {
        index: usize,
        cost: f64,
        source: ReplySource,
    },

    /// The answer failed; partial text remains on the entry
    ExchangeFailed { index: usize, message: String },

    /// The history was cleared
    ConversationReset,
}

impl ChatEvent {
    /// Check if this event ends an exchange
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChatEvent::ReplyCompleted { .. } | ChatEvent::ExchangeFailed { .. } | ChatEvent::ConversationReset
        )
    }
}
