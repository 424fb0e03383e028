//! A cloneable handle for resetting or aborting the chat from external code.

use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::{conversation::ConversationEntry, events::ChatEvent, reducer::ConversationReducer};

/// A cloneable handle for poking the chat from external code.
///
/// All fields are `Arc`-wrapped, so cloning is cheap.
#[derive(Clone)]
pub struct ChatHandle {
    pub(crate) cancel: Arc<Mutex<CancellationToken>>,
    pub(crate) reducer: Arc<Mutex<ConversationReducer>>,
    pub(crate) event_tx: broadcast::Sender<ChatEvent>,
    pub(crate) idle_notify: Arc<tokio::sync::Notify>,
    pub(crate) is_running: Arc<AtomicBool>,
    /// Id of the most recently started exchange; only it may clear `is_running`
    pub(crate) exchange_id: Arc<AtomicU64>,
}

impl ChatHandle {
    pub(crate) fn new(reducer: ConversationReducer, event_tx: broadcast::Sender<ChatEvent>) -> Self {
        Self {
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            reducer: Arc::new(Mutex::new(reducer)),
            event_tx,
            idle_notify: Arc::new(tokio::sync::Notify::new()),
            is_running: Arc::new(AtomicBool::new(false)),
            exchange_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Clear the conversation.
    ///
    /// The in-flight stream (if any) is cancelled and its entry discarded
    /// without running failure or completion callbacks.
    pub fn reset(&self) {
        self.cancel.lock().cancel();
        self.reducer.lock().reset();
        let _ = self.event_tx.send(ChatEvent::ConversationReset);
    }

    /// Abort the current exchange. Its answer is marked failed with the
    /// text received so far.
    pub fn abort(&self) {
        self.cancel.lock().cancel();
    }

    /// Copy of the current history
    pub fn snapshot(&self) -> Vec<ConversationEntry> {
        self.reducer.lock().snapshot()
    }

    /// Wait until no exchange is running.
    pub async fn wait_for_idle(&self) {
        let notified = self.idle_notify.notified();
        if !self.is_running.load(Ordering::Acquire) {
            return;
        }
        notified.await;
    }

    /// Wait until idle, with a timeout.
    /// Returns `true` if idle was reached, `false` on timeout.
    pub async fn wait_for_idle_timeout(&self, timeout: std::time::Duration) -> bool {
        if !self.is_running.load(Ordering::Acquire) {
            return true;
        }
        tokio::time::timeout(timeout, self.wait_for_idle())
            .await
            .is_ok()
    }

    /// Whether an exchange is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }
}
