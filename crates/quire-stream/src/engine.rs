//! # Chat Engine
//!
//! Owns one session's live pipeline: the transport subscription feeding the
//! normalizer, the ordering queue, the playback scheduler and the store.
//! Views hold a [`ChatEngine`] and read snapshots when signalled.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use quire_core::api::ChatApi;
use quire_core::ids::{MessageId, SessionContext};
use quire_core::messages::Message;

use crate::config::PlaybackConfig;
use crate::error::EngineError;
use crate::normalizer::EventNormalizer;
use crate::queue::OrderingQueue;
use crate::reconcile::{Reconciler, ResyncOutcome};
use crate::scheduler::PlaybackScheduler;
use crate::state::{SessionState, ViewSignal, ViewSignals};
use crate::store::{MessageStore, SharedStore};
use crate::transport::{Transport, UnsubscribeHandle};

struct LiveSubscription {
    topic: String,
    handle: UnsubscribeHandle,
    normalizer: JoinHandle<()>,
}

impl LiveSubscription {
    fn stop(self) {
        self.handle.unsubscribe();
        self.normalizer.abort();
        debug!(topic = %self.topic, "live subscription stopped");
    }
}

struct Driver {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct ChatEngine {
    transport: Arc<dyn Transport>,
    api: Arc<dyn ChatApi>,
    queue: OrderingQueue,
    store: SharedStore,
    session: SessionState,
    signals: ViewSignals,
    monitor: Arc<Reconciler>,
    scheduler: Arc<PlaybackScheduler>,
    live: Mutex<Option<LiveSubscription>>,
    driver: Mutex<Option<Driver>>,
    needs_resync: AtomicBool,
    received: Arc<AtomicU64>,
}

impl ChatEngine {
    pub fn new(transport: Arc<dyn Transport>, api: Arc<dyn ChatApi>, config: PlaybackConfig) -> Self {
        let queue = OrderingQueue::new();
        let store = MessageStore::shared();
        let session = SessionState::new();
        let signals = ViewSignals::new(config.signal_capacity);
        let monitor = Arc::new(Reconciler::new(
            Arc::clone(&api),
            Arc::clone(&store),
            queue.clone(),
            session.clone(),
            signals.clone(),
            config.history_page_size,
        ));
        let scheduler = Arc::new(PlaybackScheduler::new(
            config,
            Arc::clone(&api),
            queue.clone(),
            Arc::clone(&store),
            session.clone(),
            signals.clone(),
            Arc::clone(&monitor),
        ));
        Self {
            transport,
            api,
            queue,
            store,
            session,
            signals,
            monitor,
            scheduler,
            live: Mutex::new(None),
            driver: Mutex::new(None),
            needs_resync: AtomicBool::new(false),
            received: Arc::default(),
        }
    }

    /// Spawn the scheduler loop. Calling it again while running is a no-op.
    pub fn start(&self) {
        let mut driver = self.driver.lock();
        if driver.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&self.scheduler).run(cancel.clone()));
        *driver = Some(Driver { cancel, handle });
    }

    /// Switch to `context`: drop the previous session's state, subscribe to
    /// its channel and load the newest history page.
    ///
    /// A failed history load is returned, but the session stays open and
    /// subscribed so a later resync can recover.
    #[instrument(skip(self), fields(session = %context))]
    pub async fn open_session(&self, context: SessionContext) -> Result<(), EngineError> {
        self.reset();
        self.session.set(Some(context.clone()));
        self.subscribe(&context).await?;
        info!("session opened");
        self.load_latest("session opened").await
    }

    /// Stop live delivery and empty the queue and store. Safe to call any
    /// number of times.
    pub fn reset(&self) {
        if let Some(live) = self.live.lock().take() {
            live.stop();
        }
        let dropped = self.queue.clear();
        self.store.write().reset();
        debug!(dropped, "engine state reset");
        self.signals.emit(ViewSignal::Reset);
    }

    pub fn close_session(&self) {
        self.reset();
        if let Some(context) = self.session.current() {
            info!(session = %context, "session closed");
        }
        self.session.set(None);
        self.needs_resync.store(false, Ordering::Release);
    }

    /// The transport dropped. Live state is discarded until reconnect.
    pub fn on_disconnect(&self) {
        self.reset();
        if self.session.current().is_some() {
            self.needs_resync.store(true, Ordering::Release);
            warn!("transport disconnected, session needs resync");
        }
    }

    /// Resubscribe and resync the current session after a disconnect.
    /// Returns `false` when there was nothing to restore.
    #[instrument(skip(self))]
    pub async fn on_reconnect(&self) -> Result<bool, EngineError> {
        if !self.needs_resync.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        let Some(context) = self.session.current() else {
            return Ok(false);
        };
        if let Err(err) = self.subscribe(&context).await {
            self.needs_resync.store(true, Ordering::Release);
            return Err(err);
        }
        self.load_latest("reconnected").await?;
        Ok(true)
    }

    /// Merge history page `page` (2 and up) in front of the transcript.
    pub async fn load_older(&self, page: u32) -> Result<usize, EngineError> {
        self.monitor.load_older(page).await
    }

    /// Send a user message. It appears immediately and takes the server's
    /// sequence once acknowledged; on failure it is removed again.
    #[instrument(skip(self, text))]
    pub async fn send(&self, text: &str) -> Result<MessageId, EngineError> {
        let context = self.session.current().ok_or(EngineError::NoActiveSession)?;
        let key = MessageId::new();
        {
            let mut store = self.store.write();
            let provisional = store.last_sequence().map_or(1, |seq| seq + 1);
            store.upsert(Message::user(key.clone(), text, provisional, context.clone()));
        }
        self.signals.emit(ViewSignal::Changed(key.clone()));
        self.signals.emit(ViewSignal::ScrollToBottom);

        match self.api.send_message(&context, &key, text).await {
            Ok(receipt) => {
                self.store.write().set_sequence(&key, receipt.sequence);
                debug!(message_id = %key, sequence = receipt.sequence, "message sent");
                self.signals.emit(ViewSignal::Changed(key.clone()));
                Ok(key)
            }
            Err(err) => {
                self.store.write().remove(&key);
                warn!(message_id = %key, error = %err, error_kind = err.error_kind(), "send failed");
                self.signals.emit(ViewSignal::Changed(key));
                Err(err.into())
            }
        }
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.store.read().snapshot()
    }

    pub fn view_signals(&self) -> broadcast::Receiver<ViewSignal> {
        self.signals.subscribe()
    }

    pub fn active_session(&self) -> watch::Receiver<Option<SessionContext>> {
        self.session.subscribe()
    }

    pub fn current_session(&self) -> Option<SessionContext> {
        self.session.current()
    }

    /// Live payloads taken off the transport so far, across subscriptions.
    /// Anything they produced is already in the queue.
    pub fn payloads_received(&self) -> u64 {
        self.received.load(Ordering::Acquire)
    }

    pub fn needs_resync(&self) -> bool {
        self.needs_resync.load(Ordering::Acquire)
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn queue(&self) -> &OrderingQueue {
        &self.queue
    }

    pub fn monitor(&self) -> &Arc<Reconciler> {
        &self.monitor
    }

    /// The scheduler, for driving cycles by hand instead of via [`ChatEngine::start`].
    pub fn scheduler(&self) -> &Arc<PlaybackScheduler> {
        &self.scheduler
    }

    /// Stop the scheduler loop and live subscription, waiting for the loop to exit.
    pub async fn shutdown(&self) {
        let driver = self.driver.lock().take();
        if let Some(live) = self.live.lock().take() {
            live.stop();
        }
        if let Some(driver) = driver {
            driver.cancel.cancel();
            if let Err(err) = driver.handle.await {
                if !err.is_cancelled() {
                    warn!(error = %err, "scheduler task failed");
                }
            }
        }
        info!("engine shut down");
    }

    async fn subscribe(&self, context: &SessionContext) -> Result<(), EngineError> {
        let subscription = self.transport.subscribe(&context.topic()).await?;
        let normalizer =
            EventNormalizer::new(context.clone(), self.queue.clone()).with_counter(Arc::clone(&self.received));
        let live = LiveSubscription {
            topic: subscription.topic,
            handle: subscription.handle,
            normalizer: tokio::spawn(normalizer.run(subscription.payloads)),
        };
        if let Some(previous) = self.live.lock().replace(live) {
            previous.stop();
        }
        Ok(())
    }

    /// Load page 1 for the active session, waiting out any resync still
    /// running for a previous session.
    async fn load_latest(&self, reason: &str) -> Result<(), EngineError> {
        match self.monitor.reload(reason).await {
            ResyncOutcome::Failed(err) => Err(err.into()),
            _ => Ok(()),
        }
    }
}

impl Drop for ChatEngine {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.get_mut().take() {
            driver.cancel.cancel();
        }
        if let Some(live) = self.live.get_mut().take() {
            live.stop();
        }
    }
}
