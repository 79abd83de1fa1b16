//! # Reconciliation
//!
//! Recovers from any divergence between the streamed transcript and the
//! server by reloading the newest history page and replacing the store.
//!
//! Only one reload runs at a time. While it is in flight the scheduler does
//! not drain, and any reveal in progress stops at its next chunk. Callers
//! that must end up with fresh history use [`Reconciler::reload`], which
//! waits out a reload already in flight and retries for the current session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use quire_core::api::{ChatApi, HistoryQuery};
use quire_core::errors::ApiError;

use crate::error::EngineError;
use crate::queue::OrderingQueue;
use crate::state::{SessionState, ViewSignal, ViewSignals};
use crate::store::{HistoryMode, SharedStore};

/// Result of a [`Reconciler::resync`] call.
#[derive(Debug)]
pub enum ResyncOutcome {
    /// The store now holds the fetched page.
    Replaced { messages: usize },
    /// Another resync was already running; nothing was done.
    InFlight,
    NoSession,
    /// The active session changed while fetching; the page was discarded.
    SessionChanged,
    /// The store was reset while fetching; the page was discarded.
    StoreReset,
    /// The fetch failed. The store keeps its last-known-good contents.
    Failed(ApiError),
}

impl ResyncOutcome {
    pub fn is_replaced(&self) -> bool {
        matches!(self, Self::Replaced { .. })
    }
}

/// Clears the reloading flag however the resync future ends, including
/// when it is dropped mid-fetch.
struct ReloadGuard<'a>(&'a watch::Sender<bool>);

impl Drop for ReloadGuard<'_> {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}

pub struct Reconciler {
    api: Arc<dyn ChatApi>,
    store: SharedStore,
    queue: OrderingQueue,
    session: SessionState,
    signals: ViewSignals,
    page_size: u32,
    reloading: watch::Sender<bool>,
    resyncs: AtomicU64,
}

impl Reconciler {
    pub fn new(
        api: Arc<dyn ChatApi>,
        store: SharedStore,
        queue: OrderingQueue,
        session: SessionState,
        signals: ViewSignals,
        page_size: u32,
    ) -> Self {
        Self {
            api,
            store,
            queue,
            session,
            signals,
            page_size: page_size.max(1),
            reloading: watch::Sender::new(false),
            resyncs: AtomicU64::new(0),
        }
    }

    pub fn is_reloading(&self) -> bool {
        *self.reloading.borrow()
    }

    /// Resolves once no resync is in flight.
    pub async fn wait_idle(&self) {
        let mut rx = self.reloading.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|reloading| !*reloading).await;
    }

    /// Like [`Reconciler::resync`], but never gives up because another
    /// reload was in flight or the session changed under it: it waits for
    /// the other reload to finish and retries for whatever session is
    /// active then.
    #[instrument(skip(self))]
    pub async fn reload(&self, reason: &str) -> ResyncOutcome {
        loop {
            match self.resync(reason).await {
                ResyncOutcome::InFlight => {
                    debug!("waiting for in-flight resync before reloading");
                    self.wait_idle().await;
                }
                ResyncOutcome::SessionChanged => {
                    debug!("session changed during reload, retrying");
                }
                outcome => return outcome,
            }
        }
    }

    /// Number of resyncs that reached the fetch stage.
    pub fn resync_count(&self) -> u64 {
        self.resyncs.load(Ordering::Relaxed)
    }

    /// Reload page 1 for the active session and replace the store with it.
    ///
    /// The queue is cleared whether or not the fetch succeeds: queued events
    /// were produced against a transcript that is no longer trusted.
    #[instrument(skip(self))]
    pub async fn resync(&self, reason: &str) -> ResyncOutcome {
        let acquired = self.reloading.send_if_modified(|reloading| {
            if *reloading {
                false
            } else {
                *reloading = true;
                true
            }
        });
        if !acquired {
            debug!("resync already in flight");
            return ResyncOutcome::InFlight;
        }
        let _guard = ReloadGuard(&self.reloading);

        let Some(context) = self.session.current() else {
            debug!("no active session, nothing to resync");
            return ResyncOutcome::NoSession;
        };
        self.resyncs.fetch_add(1, Ordering::Relaxed);
        let generation = self.store.read().generation();

        let query = HistoryQuery::first_page(self.page_size);
        match self.api.history(&context, &query).await {
            Ok(page) => {
                if !self.session.is_active(&context) {
                    debug!(session = %context, "session changed during resync, discarding page");
                    return ResyncOutcome::SessionChanged;
                }
                let messages = page.messages.len();
                {
                    let mut store = self.store.write();
                    if store.generation() != generation {
                        debug!(session = %context, "store reset during resync, discarding page");
                        return ResyncOutcome::StoreReset;
                    }
                    store.append_history_page(page.messages, HistoryMode::Replace);
                }
                let dropped = self.queue.clear();
                info!(session = %context, messages, dropped, "transcript resynced");
                self.signals.emit(ViewSignal::Resynced);
                ResyncOutcome::Replaced { messages }
            }
            Err(err) => {
                let dropped = if self.session.is_active(&context) {
                    self.queue.clear()
                } else {
                    0
                };
                warn!(
                    session = %context,
                    error = %err,
                    error_kind = err.error_kind(),
                    dropped,
                    "resync failed, keeping last-known-good transcript"
                );
                ResyncOutcome::Failed(err)
            }
        }
    }

    /// Fetch an older history page and merge it without duplicating keys.
    /// Returns how many messages were added.
    #[instrument(skip(self))]
    pub async fn load_older(&self, page: u32) -> Result<usize, EngineError> {
        let context = self.session.current().ok_or(EngineError::NoActiveSession)?;
        let fetched = self
            .api
            .history(&context, &HistoryQuery::page(page, self.page_size))
            .await?;
        if !self.session.is_active(&context) {
            debug!(session = %context, "session changed while paging, discarding page");
            return Ok(0);
        }

        let added = self
            .store
            .write()
            .append_history_page(fetched.messages, HistoryMode::Prepend);
        debug!(session = %context, page, added, total = fetched.total, "older history merged");
        if added > 0 {
            self.signals.emit(ViewSignal::HistoryPrepended { added });
        }
        Ok(added)
    }
}
