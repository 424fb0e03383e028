//! Drives one streaming exchange at a time

use futures::StreamExt;
use pagechat_wire::{
    Credentials, DecodeEvent, DecoderConfig, ExchangeRequest, FailureKind, StreamFailure, decode_stream,
};
use std::sync::{Arc, atomic::Ordering};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::{
    conversation::ConversationEntry,
    error::{Error, Result},
    events::ChatEvent,
    handle::ChatHandle,
    reducer::{AnswerHandle, ConversationReducer, ReplySource, failure_message},
    transport::Transport,
};

/// Chat configuration
#[derive(Debug, Clone, Default)]
pub struct ChatConfig {
    /// Index name of the document being discussed
    pub index: Option<String>,
    /// API key and user profile forwarded with each request
    pub credentials: Option<Credentials>,
    /// Stream decoder settings
    pub decoder: DecoderConfig,
}

/// How an exchange ended
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The answer completed
    Completed(ReplySource),
    /// The answer failed with a user-presentable message
    Failed(String),
    /// The conversation was reset while the exchange was running
    Reset,
}

/// Conversation with the document assistant
pub struct Chat {
    config: ChatConfig,
    transport: Arc<dyn Transport>,
    handle: ChatHandle,
}

impl Chat {
    /// Create a new chat
    pub fn new(config: ChatConfig, transport: Arc<dyn Transport>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            transport,
            handle: ChatHandle::new(ConversationReducer::new(), event_tx),
        }
    }

    /// Subscribe to chat events
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.handle.event_tx.subscribe()
    }

    /// Get a cloneable handle for resetting or aborting from outside
    pub fn handle(&self) -> ChatHandle {
        self.handle.clone()
    }

    /// Get the chat config
    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Set the document index questions are asked against
    pub fn set_index(&mut self, index: impl Into<String>) {
        self.config.index = Some(index.into());
    }

    /// Set the credentials forwarded with each request
    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.config.credentials = Some(credentials);
    }

    /// Register the callback invoked with the lead source of each completed reply
    pub fn on_reply_complete(&self, f: impl Fn(&ReplySource) + Send + Sync + 'static) {
        self.handle.reducer.lock().on_reply_complete(f);
    }

    /// Copy of the current history
    pub fn entries(&self) -> Vec<ConversationEntry> {
        self.handle.snapshot()
    }

    /// Clear the conversation, discarding any exchange in flight
    pub fn reset(&self) {
        self.handle.reset();
    }

    /// Abort the running exchange
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Whether an exchange is currently running
    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    /// Ask a question about the selected document
    pub async fn ask(&self, question: &str) -> Result<Outcome> {
        let credentials = self.credentials()?;
        if credentials
            .user_profile
            .as_deref()
            .is_none_or(|p| p.trim().is_empty())
        {
            return Err(Error::MissingUserProfile);
        }
        let index = self.config.index.as_deref().ok_or(Error::MissingIndex)?;

        let request = ExchangeRequest::query(question, index, credentials);
        self.run_exchange(question, request).await
    }

    /// Ask for a summary of a whole document
    pub async fn summarize(&self, file: &str) -> Result<Outcome> {
        let credentials = self.credentials()?;
        let request = ExchangeRequest::summarize(file, credentials);
        self.run_exchange(&format!("Summarize {}", file), request).await
    }

    fn credentials(&self) -> Result<&Credentials> {
        self.config
            .credentials
            .as_ref()
            .filter(|c| !c.api_key.trim().is_empty())
            .ok_or(Error::MissingApiKey)
    }

    async fn run_exchange(&self, question: &str, request: ExchangeRequest) -> Result<Outcome> {
        // The pending entry and its cancel token become visible together
        let (answer, cancel, exchange_id) = {
            let mut reducer = self.handle.reducer.lock();
            let answer = reducer.start_exchange(question)?;
            let cancel = {
                let mut guard = self.handle.cancel.lock();
                *guard = CancellationToken::new();
                guard.clone()
            };
            let exchange_id = self.handle.exchange_id.fetch_add(1, Ordering::AcqRel) + 1;
            self.handle.is_running.store(true, Ordering::Release);
            (answer, cancel, exchange_id)
        };
        let _ = self.handle.event_tx.send(ChatEvent::ExchangeStarted {
            index: answer.index(),
            question: question.to_string(),
        });

        let outcome = self.drive(answer, &request, cancel).await;

        // An exchange discarded by a reset may finish after a newer one started
        let _reducer = self.handle.reducer.lock();
        if self.handle.exchange_id.load(Ordering::Acquire) == exchange_id {
            self.handle.is_running.store(false, Ordering::Release);
            self.handle.idle_notify.notify_waiters();
        }
        Ok(outcome)
    }

    async fn drive(&self, answer: AnswerHandle, request: &ExchangeRequest, cancel: CancellationToken) -> Outcome {
        let body = match self.transport.open(request, cancel.clone()).await {
            Ok(body) => body,
            Err(e) => {
                let failure = StreamFailure {
                    kind: FailureKind::Transport,
                    detail: e.to_string(),
                };
                return self.fail(answer, &failure);
            }
        };

        let mut events = decode_stream(body, self.config.decoder.clone(), cancel.clone());
        while let Some(event) = events.next().await {
            let delta = match &event {
                DecodeEvent::TextAppended(text) => Some(text.clone()),
                _ => None,
            };
            let failure = match &event {
                DecodeEvent::StreamFailed(f) => Some(f.clone()),
                _ => None,
            };
            let cost = match &event {
                DecodeEvent::MetadataReady(m) => m.cost,
                _ => 0.0,
            };

            let applied = self.handle.reducer.lock().apply(answer, event);
            match applied {
                Ok(Some(source)) => {
                    let _ = self.handle.event_tx.send(ChatEvent::ReplyCompleted {
                        index: answer.index(),
                        cost,
                        source: source.clone(),
                    });
                    return Outcome::Completed(source);
                }
                Ok(None) => {
                    if let Some(delta) = delta {
                        let _ = self.handle.event_tx.send(ChatEvent::AnswerUpdated {
                            index: answer.index(),
                            delta,
                        });
                    }
                    if let Some(failure) = failure {
                        return self.announce_failure(answer, failure_message(&failure));
                    }
                }
                Err(Error::StaleHandle) => return Outcome::Reset,
                Err(e) => {
                    tracing::error!("Dropping decode event: {}", e);
                    return self.announce_failure(answer, e.to_string());
                }
            }
        }

        // The decoder always ends with a terminal event unless cancelled
        let failure = StreamFailure {
            kind: FailureKind::Transport,
            detail: "request aborted".into(),
        };
        self.fail(answer, &failure)
    }

    fn fail(&self, answer: AnswerHandle, failure: &StreamFailure) -> Outcome {
        let result = self.handle.reducer.lock().on_stream_failed(answer, failure);
        match result {
            Ok(()) => self.announce_failure(answer, failure_message(failure)),
            Err(Error::StaleHandle) => Outcome::Reset,
            Err(e) => self.announce_failure(answer, e.to_string()),
        }
    }

    fn announce_failure(&self, answer: AnswerHandle, message: String) -> Outcome {
        let _ = self.handle.event_tx.send(ChatEvent::ExchangeFailed {
            index: answer.index(),
            message: message.clone(),
        });
        Outcome::Failed(message)
    }
}
