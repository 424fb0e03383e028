//! pagechat-chat: conversation state for a document assistant
//!
//! This crate owns the ordered question/answer history, folds decoded stream
//! events into it, and drives one streaming exchange at a time against a
//! [`Transport`].

pub mod chat;
pub mod conversation;
pub mod error;
pub mod events;
pub mod handle;
pub mod reducer;
pub mod transport;

pub use chat::{Chat, ChatConfig, Outcome};
pub use conversation::{ConversationEntry, ConversationHistory, EntryStatus, Role};
pub use error::{Error, Result};
pub use events::ChatEvent;
pub use handle::ChatHandle;
pub use reducer::{AnswerHandle, ConversationReducer, ReplySource};
pub use transport::{HttpTransport, RetryConfig, Transport};
