use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use quire_core::ids::{MessageId, SessionContext};

/// Notifications for the view layer. Views re-read a store snapshot on receipt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViewSignal {
    /// A message's text, status or extensions changed.
    Changed(MessageId),
    /// The reveal has progressed far enough that the view should follow it.
    ScrollToBottom,
    /// The store was replaced with authoritative history.
    Resynced,
    /// An older history page was merged in front of the transcript.
    HistoryPrepended { added: usize },
    /// The store was emptied (session switch or disconnect).
    Reset,
}

/// Broadcast side of [`ViewSignal`]s. Sending with no listeners is fine.
#[derive(Clone)]
pub struct ViewSignals {
    tx: broadcast::Sender<ViewSignal>,
}

impl ViewSignals {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, signal: ViewSignal) {
        let _ = self.tx.send(signal);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewSignal> {
        self.tx.subscribe()
    }
}

/// Which session is currently shown, observable through a watch channel.
#[derive(Clone)]
pub struct SessionState {
    tx: Arc<watch::Sender<Option<SessionContext>>>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Option<SessionContext> {
        self.tx.borrow().clone()
    }

    pub fn is_active(&self, context: &SessionContext) -> bool {
        self.tx.borrow().as_ref() == Some(context)
    }

    pub fn set(&self, context: Option<SessionContext>) {
        self.tx.send_replace(context);
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<SessionContext>> {
        self.tx.subscribe()
    }
}
