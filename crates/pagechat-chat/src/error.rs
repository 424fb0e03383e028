//! Error types for pagechat-chat

use thiserror::Error;

use crate::conversation::EntryStatus;

/// Result type alias using pagechat-chat Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running an exchange
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the wire layer
    #[error(transparent)]
    Wire(#[from] pagechat_wire::Error),

    /// An exchange was started while another one is still in flight
    #[error("An exchange is already in progress")]
    ConcurrentExchange,

    /// A mutation targeted an entry that is already complete or failed
    #[error("Entry {index} is already {status}")]
    EntryFinalized { index: usize, status: EntryStatus },

    /// The handle was issued before the conversation was reset
    #[error("Answer handle refers to a conversation that has been reset")]
    StaleHandle,

    /// No API key configured
    #[error("Please set your API key")]
    MissingApiKey,

    /// No user profile (field of study) configured
    #[error("Please enter your major")]
    MissingUserProfile,

    /// No document index selected
    #[error("Please select a document first")]
    MissingIndex,
}

impl Error {
    /// Check if this error comes from a missing configuration value
    pub fn is_missing_config(&self) -> bool {
        matches!(
            self,
            Error::MissingApiKey | Error::MissingUserProfile | Error::MissingIndex
        )
    }
}
