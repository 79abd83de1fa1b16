//! # Playback Scheduler
//!
//! The single writer for stream-driven store mutation. Each cycle drains the
//! ordering queue head-first, applying events whose prerequisites hold and
//! stopping at the first one that must wait.
//!
//! Fragments are revealed a few characters at a time with a pacing delay, so
//! a cycle may take a while. The store lock is only ever held between those
//! suspension points.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use quire_core::api::ChatApi;
use quire_core::events::{QueuedEvent, StreamEvent};
use quire_core::ids::{MessageId, SessionContext};
use quire_core::messages::{Message, MessageStatus};

use crate::config::PlaybackConfig;
use crate::queue::OrderingQueue;
use crate::reconcile::Reconciler;
use crate::state::{SessionState, ViewSignal, ViewSignals};
use crate::store::SharedStore;

/// What a single [`PlaybackScheduler::drain_cycle`] did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub applied: usize,
    pub dropped: usize,
    /// The cycle ended on an event that cannot be applied yet.
    pub deferred: bool,
    /// The cycle triggered a resync.
    pub resynced: bool,
    /// A resync was in flight, so nothing was drained.
    pub skipped: bool,
    /// A reveal stopped early because the transcript was replaced.
    pub interrupted: bool,
}

enum Outcome {
    Applied,
    Dropped,
    /// The target message does not exist yet.
    Missing,
    /// The event's offset does not match the current text length.
    Mismatch { len: usize },
    Interrupted,
}

/// The head event that has been blocking the queue, and since when.
struct Stall {
    event: StreamEvent,
    since: Instant,
}

pub struct PlaybackScheduler {
    config: PlaybackConfig,
    api: Arc<dyn ChatApi>,
    queue: OrderingQueue,
    store: SharedStore,
    session: SessionState,
    signals: ViewSignals,
    monitor: Arc<Reconciler>,
    stall: Mutex<Option<Stall>>,
}

impl PlaybackScheduler {
    pub fn new(
        config: PlaybackConfig,
        api: Arc<dyn ChatApi>,
        queue: OrderingQueue,
        store: SharedStore,
        session: SessionState,
        signals: ViewSignals,
        monitor: Arc<Reconciler>,
    ) -> Self {
        Self {
            config,
            api,
            queue,
            store,
            session,
            signals,
            monitor,
            stall: Mutex::new(None),
        }
    }

    /// Drain cycles every `cycle_interval` until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        debug!(interval_ms = self.config.cycle_interval.as_millis() as u64, "scheduler started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.cycle_interval) => {}
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                report = self.drain_cycle() => {
                    if report != CycleReport::default() {
                        trace!(?report, "cycle finished");
                    }
                }
            }
        }
        debug!("scheduler stopped");
    }

    /// Apply queued events until the queue is empty or the head must wait.
    pub async fn drain_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();
        if self.monitor.is_reloading() {
            report.skipped = true;
            return report;
        }

        while let Some(queued) = self.queue.dequeue() {
            if !self.session.is_active(&queued.context) {
                trace!(
                    session = %queued.context,
                    message_id = %queued.event.message_id(),
                    "dropping event for inactive session"
                );
                report.dropped += 1;
                continue;
            }

            match self.apply(&queued).await {
                Outcome::Applied => {
                    report.applied += 1;
                    self.stall.lock().take();
                }
                Outcome::Dropped => report.dropped += 1,
                Outcome::Missing => {
                    if self.promote_init(&queued) {
                        continue;
                    }
                    let stalled = self.is_stalled(&queued.event);
                    self.queue.requeue_front(queued);
                    report.deferred = true;
                    if stalled {
                        warn!("queue head blocked past the stall timeout, resyncing");
                        self.stall.lock().take();
                        self.monitor.resync("stalled queue head").await;
                        report.resynced = true;
                    }
                    break;
                }
                Outcome::Mismatch { len } => {
                    if self.promote_continuation(&queued, len) {
                        continue;
                    }
                    warn!(
                        message_id = %queued.event.message_id(),
                        event_type = queued.event.event_type(),
                        offset = queued.event.offset(),
                        len,
                        "offset divergence, resyncing"
                    );
                    report.dropped += 1;
                    self.stall.lock().take();
                    self.monitor.resync("offset divergence").await;
                    report.resynced = true;
                    break;
                }
                Outcome::Interrupted => {
                    report.interrupted = true;
                    break;
                }
            }
        }
        report
    }

    async fn apply(&self, queued: &QueuedEvent) -> Outcome {
        match &queued.event {
            StreamEvent::Init { message_id, sequence, .. } => {
                {
                    let mut store = self.store.write();
                    if store.contains(message_id) {
                        debug!(%message_id, "duplicate init ignored");
                        return Outcome::Dropped;
                    }
                    store.upsert(Message::assistant_pending(
                        message_id.clone(),
                        *sequence,
                        queued.context.clone(),
                    ));
                }
                self.signals.emit(ViewSignal::Changed(message_id.clone()));
                Outcome::Applied
            }
            StreamEvent::Continue {
                message_id,
                offset,
                fragment,
            } => {
                if let Err(outcome) = self.check_offset(message_id, *offset) {
                    return outcome;
                }
                self.reveal(&queued.context, message_id, fragment).await
            }
            StreamEvent::Done { message_id, offset } => {
                if let Err(outcome) = self.check_offset(message_id, *offset) {
                    return outcome;
                }
                if let Some(message) = self.store.write().find_mut(message_id) {
                    message.status = MessageStatus::Success;
                }
                debug!(%message_id, "message complete");
                self.signals.emit(ViewSignal::Changed(message_id.clone()));
                self.fetch_extensions(queued.context.clone(), message_id.clone());
                Outcome::Applied
            }
            StreamEvent::Failed { message_id } => {
                let marked = match self.store.write().find_mut(message_id) {
                    Some(message) => {
                        message.status = MessageStatus::Failed;
                        true
                    }
                    None => false,
                };
                if !marked {
                    debug!(%message_id, "failure for unknown message ignored");
                    return Outcome::Dropped;
                }
                debug!(%message_id, "message failed");
                self.signals.emit(ViewSignal::Changed(message_id.clone()));
                Outcome::Applied
            }
        }
    }

    fn check_offset(&self, message_id: &MessageId, offset: usize) -> Result<(), Outcome> {
        let store = self.store.read();
        let Some(message) = store.find(message_id) else {
            return Err(Outcome::Missing);
        };
        if message.is_terminal() {
            debug!(%message_id, status = ?message.status, "event for finished message ignored");
            return Err(Outcome::Dropped);
        }
        let len = message.len();
        if len != offset {
            return Err(Outcome::Mismatch { len });
        }
        Ok(())
    }

    /// Append `fragment` chunk by chunk, pausing between chunks.
    async fn reveal(&self, context: &SessionContext, message_id: &MessageId, fragment: &str) -> Outcome {
        let generation = self.store.read().generation();
        let scroll_every = self.config.scroll_every_chunks;

        for (idx, chunk) in chunk_text(fragment, self.config.chunk_chars).into_iter().enumerate() {
            if idx > 0 && !self.config.chunk_delay.is_zero() {
                tokio::time::sleep(self.config.chunk_delay).await;
            }
            if self.monitor.is_reloading() || !self.session.is_active(context) {
                debug!(%message_id, "reveal interrupted");
                return Outcome::Interrupted;
            }
            {
                let mut store = self.store.write();
                if store.generation() != generation {
                    debug!(%message_id, "transcript replaced during reveal");
                    return Outcome::Interrupted;
                }
                let Some(message) = store.find_mut(message_id) else {
                    return Outcome::Interrupted;
                };
                message.text.push_str(chunk);
            }
            self.signals.emit(ViewSignal::Changed(message_id.clone()));
            if scroll_every > 0 && (idx + 1) % scroll_every == 0 {
                self.signals.emit(ViewSignal::ScrollToBottom);
            }
        }
        trace!(%message_id, chars = fragment.chars().count(), "fragment revealed");
        Outcome::Applied
    }

    /// The head needs a message that does not exist yet. If its `Init` is
    /// already queued further back, move it in front of the head.
    fn promote_init(&self, head: &QueuedEvent) -> bool {
        let target = head.event.message_id();
        let Some(init) = self.queue.take_first(|e| {
            e.context == head.context
                && matches!(&e.event, StreamEvent::Init { message_id, .. } if message_id == target)
        }) else {
            return false;
        };
        trace!(message_id = %target, "promoting queued init");
        self.queue.requeue_front(head.clone());
        self.queue.requeue_front(init);
        true
    }

    /// The head skips ahead of the text. If the fragment that continues the
    /// text at `len` is already queued, move it in front of the head.
    fn promote_continuation(&self, head: &QueuedEvent, len: usize) -> bool {
        let target = head.event.message_id();
        let Some(next) = self.queue.take_first(|e| {
            e.context == head.context
                && matches!(
                    &e.event,
                    StreamEvent::Continue { message_id, offset, .. } if message_id == target && *offset == len
                )
        }) else {
            return false;
        };
        trace!(message_id = %target, offset = len, "promoting queued continuation");
        self.queue.requeue_front(head.clone());
        self.queue.requeue_front(next);
        true
    }

    /// Records `head` as blocking and reports whether it has blocked for
    /// longer than the stall timeout.
    fn is_stalled(&self, head: &StreamEvent) -> bool {
        let Some(timeout) = self.config.stall_timeout else {
            return false;
        };
        let now = Instant::now();
        let mut stall = self.stall.lock();
        match stall.as_ref() {
            Some(blocked) if &blocked.event == head => now.duration_since(blocked.since) >= timeout,
            _ => {
                *stall = Some(Stall {
                    event: head.clone(),
                    since: now,
                });
                false
            }
        }
    }

    fn fetch_extensions(&self, context: SessionContext, message_id: MessageId) {
        let api = Arc::clone(&self.api);
        let store = Arc::clone(&self.store);
        let session = self.session.clone();
        let signals = self.signals.clone();
        tokio::spawn(async move {
            let ext = match api.message_extensions(&context, &message_id).await {
                Ok(ext) => ext,
                Err(err) => {
                    warn!(%message_id, error = %err, error_kind = err.error_kind(), "extensions fetch failed");
                    return;
                }
            };
            if !session.is_active(&context) {
                return;
            }
            let attached = match store.write().find_mut(&message_id) {
                Some(message) => {
                    message.ext = Some(ext);
                    true
                }
                None => false,
            };
            if attached {
                signals.emit(ViewSignal::Changed(message_id));
            }
        });
    }
}

/// Split `text` into pieces of at most `size` characters.
fn chunk_text(text: &str, size: usize) -> Vec<&str> {
    let size = size.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in text.char_indices() {
        if count == size {
            chunks.push(&text[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        chunks.push(&text[start..]);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use quire_api::MockChatApi;
    use quire_core::errors::ApiError;
    use quire_core::messages::{MessageExt, RelDoc, Role};

    use super::*;
    use crate::store::MessageStore;

    struct Harness {
        api: Arc<MockChatApi>,
        store: SharedStore,
        queue: OrderingQueue,
        session: SessionState,
        signals: ViewSignals,
        monitor: Arc<Reconciler>,
        scheduler: PlaybackScheduler,
    }

    fn ctx() -> SessionContext {
        SessionContext::new("sp", "s1")
    }

    fn harness_with(config: PlaybackConfig) -> Harness {
        let api = Arc::new(MockChatApi::new());
        let store = MessageStore::shared();
        let queue = OrderingQueue::new();
        let session = SessionState::new();
        let signals = ViewSignals::new(512);
        session.set(Some(ctx()));
        let monitor = Arc::new(Reconciler::new(
            api.clone(),
            store.clone(),
            queue.clone(),
            session.clone(),
            signals.clone(),
            config.history_page_size,
        ));
        let scheduler = PlaybackScheduler::new(
            config,
            api.clone(),
            queue.clone(),
            store.clone(),
            session.clone(),
            signals.clone(),
            monitor.clone(),
        );
        Harness {
            api,
            store,
            queue,
            session,
            signals,
            monitor,
            scheduler,
        }
    }

    fn harness() -> Harness {
        harness_with(PlaybackConfig::instant())
    }

    fn init(id: &str, sequence: i64) -> QueuedEvent {
        QueuedEvent::new(
            ctx(),
            StreamEvent::Init {
                message_id: MessageId::from(id),
                sequence,
                context: ctx(),
            },
        )
    }

    fn cont(id: &str, offset: usize, fragment: &str) -> QueuedEvent {
        QueuedEvent::new(
            ctx(),
            StreamEvent::Continue {
                message_id: MessageId::from(id),
                offset,
                fragment: fragment.into(),
            },
        )
    }

    fn done(id: &str, offset: usize) -> QueuedEvent {
        QueuedEvent::new(
            ctx(),
            StreamEvent::Done {
                message_id: MessageId::from(id),
                offset,
            },
        )
    }

    fn failed(id: &str) -> QueuedEvent {
        QueuedEvent::new(
            ctx(),
            StreamEvent::Failed {
                message_id: MessageId::from(id),
            },
        )
    }

    fn message(h: &Harness, id: &str) -> Option<Message> {
        h.store.read().find(&MessageId::from(id)).cloned()
    }

    fn permutations(items: &[QueuedEvent]) -> Vec<Vec<QueuedEvent>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let first = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, first.clone());
                out.push(tail);
            }
        }
        out
    }

    #[test]
    fn chunk_text_counts_chars() {
        assert_eq!(chunk_text("Hello", 2), vec!["He", "ll", "o"]);
        assert_eq!(chunk_text("héllo", 2), vec!["hé", "ll", "o"]);
        assert_eq!(chunk_text("ab", 0), vec!["a", "b"]);
        assert!(chunk_text("", 2).is_empty());
    }

    #[tokio::test]
    async fn init_continue_done_builds_message() {
        let h = harness();
        for ev in [init("m1", 5), cont("m1", 0, "Hel"), cont("m1", 3, "lo"), done("m1", 5)] {
            h.queue.enqueue(ev);
        }

        let report = h.scheduler.drain_cycle().await;

        assert_eq!(report.applied, 4);
        let m = message(&h, "m1").unwrap();
        assert_eq!(m.text, "Hello");
        assert_eq!(m.status, MessageStatus::Success);
        assert_eq!(m.sequence, 5);
        assert_eq!(m.role, Role::Assistant);
        assert!(h.queue.is_empty());
    }

    #[tokio::test]
    async fn duplicate_init_is_idempotent() {
        let h = harness();
        for ev in [init("m1", 1), cont("m1", 0, "Hi"), init("m1", 1)] {
            h.queue.enqueue(ev);
        }

        let report = h.scheduler.drain_cycle().await;

        assert_eq!(report.applied, 2);
        assert_eq!(report.dropped, 1);
        assert_eq!(h.store.read().len(), 1);
        assert_eq!(message(&h, "m1").unwrap().text, "Hi");
    }

    #[tokio::test]
    async fn any_arrival_order_yields_canonical_text() {
        let events = vec![
            init("m", 1),
            cont("m", 0, "He"),
            cont("m", 2, "ll"),
            cont("m", 4, "o!"),
            done("m", 6),
        ];
        for order in permutations(&events) {
            let h = harness();
            for ev in order.clone() {
                h.queue.enqueue(ev);
            }

            let report = h.scheduler.drain_cycle().await;

            let m = message(&h, "m").unwrap();
            assert_eq!(m.text, "Hello!", "order: {order:?}");
            assert_eq!(m.status, MessageStatus::Success);
            assert!(!report.resynced);
            assert!(h.queue.is_empty());
        }
    }

    #[tokio::test]
    async fn continue_before_init_is_deferred() {
        let h = harness();
        h.queue.enqueue(cont("m", 0, "Hi"));

        let report = h.scheduler.drain_cycle().await;
        assert!(report.deferred);
        assert_eq!(h.queue.len(), 1);
        assert!(h.store.read().is_empty());

        h.queue.enqueue(init("m", 1));
        let report = h.scheduler.drain_cycle().await;
        assert_eq!(report.applied, 2);
        assert_eq!(message(&h, "m").unwrap().text, "Hi");
    }

    #[tokio::test]
    async fn divergence_resyncs_and_discards_event() {
        let h = harness();
        let authoritative = Message {
            text: "ABC".into(),
            status: MessageStatus::Success,
            ..Message::assistant_pending(MessageId::from("m2"), 2, ctx())
        };
        h.api.set_page(1, vec![authoritative.clone()]);
        for ev in [init("m2", 2), cont("m2", 0, "A"), cont("m2", 5, "X")] {
            h.queue.enqueue(ev);
        }

        let report = h.scheduler.drain_cycle().await;

        assert!(report.resynced);
        assert_eq!(h.store.read().snapshot(), vec![authoritative]);
        assert!(h.queue.is_empty());
        assert_eq!(h.api.history_call_count(), 1);
        assert!(!h.store.read().snapshot()[0].text.contains('X'));
    }

    #[tokio::test]
    async fn done_with_wrong_offset_resyncs() {
        let h = harness();
        let page_msg = Message {
            text: "abc".into(),
            ..Message::assistant_pending(MessageId::from("m"), 1, ctx())
        };
        h.api.set_page(1, vec![page_msg.clone()]);
        for ev in [init("m", 1), cont("m", 0, "ab"), done("m", 5)] {
            h.queue.enqueue(ev);
        }

        let report = h.scheduler.drain_cycle().await;

        assert!(report.resynced);
        assert_eq!(h.store.read().snapshot(), vec![page_msg]);
        assert!(h.queue.is_empty());
        assert_ne!(message(&h, "m").unwrap().status, MessageStatus::Success);
    }

    #[tokio::test]
    async fn failed_for_unknown_message_is_noop() {
        let h = harness();
        h.queue.enqueue(failed("m3"));

        let report = h.scheduler.drain_cycle().await;

        assert_eq!(report.dropped, 1);
        assert!(h.store.read().is_empty());
        assert_eq!(h.api.history_call_count(), 0);
    }

    #[tokio::test]
    async fn failed_marks_existing_message() {
        let h = harness();
        for ev in [init("m", 1), cont("m", 0, "par"), failed("m"), cont("m", 3, "tial")] {
            h.queue.enqueue(ev);
        }

        let report = h.scheduler.drain_cycle().await;

        let m = message(&h, "m").unwrap();
        assert_eq!(m.status, MessageStatus::Failed);
        assert_eq!(m.text, "par");
        assert_eq!(report.dropped, 1);
        assert!(!report.resynced);
    }

    #[tokio::test]
    async fn foreign_session_events_are_dropped() {
        let h = harness();
        let other = SessionContext::new("sp", "s2");
        h.queue.enqueue(QueuedEvent::new(
            other.clone(),
            StreamEvent::Init {
                message_id: MessageId::from("x"),
                sequence: 1,
                context: other,
            },
        ));

        let report = h.scheduler.drain_cycle().await;

        assert_eq!(report.dropped, 1);
        assert!(h.store.read().is_empty());
    }

    #[tokio::test]
    async fn skips_while_reloading() {
        let h = harness_with(PlaybackConfig::instant());
        h.api.delay_history(Duration::from_secs(1));
        h.queue.enqueue(init("m", 1));

        let monitor = h.monitor.clone();
        let resync = tokio::spawn(async move { monitor.resync("slow").await });
        tokio::task::yield_now().await;

        let report = h.scheduler.drain_cycle().await;
        assert!(report.skipped);
        assert_eq!(h.queue.len(), 1);
        resync.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn paced_reveal_emits_scroll_signals() {
        let config = PlaybackConfig {
            chunk_chars: 2,
            chunk_delay: Duration::from_millis(30),
            scroll_every_chunks: 13,
            ..PlaybackConfig::default()
        };
        let h = harness_with(config);
        let fragment = "x".repeat(60);
        h.queue.enqueue(init("m", 1));
        h.queue.enqueue(cont("m", 0, &fragment));
        let mut rx = h.signals.subscribe();

        let started = Instant::now();
        h.scheduler.drain_cycle().await;

        // 30 chunks with a pause between each pair.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(29 * 30), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(30 * 30), "{elapsed:?}");
        assert_eq!(message(&h, "m").unwrap().text, fragment);

        let mut scrolls = 0;
        let mut changes = 0;
        while let Ok(signal) = rx.try_recv() {
            match signal {
                ViewSignal::ScrollToBottom => scrolls += 1,
                ViewSignal::Changed(_) => changes += 1,
                _ => {}
            }
        }
        assert_eq!(scrolls, 2);
        assert_eq!(changes, 31);
    }

    #[tokio::test(start_paused = true)]
    async fn resync_mid_reveal_interrupts() {
        let config = PlaybackConfig {
            chunk_chars: 1,
            chunk_delay: Duration::from_millis(30),
            ..PlaybackConfig::default()
        };
        let h = harness_with(config);
        h.api.set_page(1, vec![Message::user(MessageId::from("u"), "fresh", 1, ctx())]);
        h.queue.enqueue(init("m", 2));
        h.queue.enqueue(cont("m", 0, "abcdefghij"));

        let monitor = h.monitor.clone();
        let resync = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            monitor.resync("external").await
        });

        let report = h.scheduler.drain_cycle().await;
        resync.await.unwrap();

        assert!(report.interrupted);
        assert!(message(&h, "m").is_none());
        assert_eq!(message(&h, "u").unwrap().text, "fresh");
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_head_forces_resync() {
        let config = PlaybackConfig {
            stall_timeout: Some(Duration::from_secs(10)),
            ..PlaybackConfig::instant()
        };
        let h = harness_with(config);
        h.queue.enqueue(done("orphan", 4));

        let first = h.scheduler.drain_cycle().await;
        assert!(first.deferred && !first.resynced);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!h.scheduler.drain_cycle().await.resynced);

        tokio::time::sleep(Duration::from_secs(5)).await;
        let report = h.scheduler.drain_cycle().await;
        assert!(report.resynced);
        assert!(h.queue.is_empty());
        assert_eq!(h.monitor.resync_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stall_timeout_can_be_disabled() {
        let config = PlaybackConfig {
            stall_timeout: None,
            ..PlaybackConfig::instant()
        };
        let h = harness_with(config);
        h.queue.enqueue(done("orphan", 4));

        h.scheduler.drain_cycle().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        let report = h.scheduler.drain_cycle().await;

        assert!(!report.resynced);
        assert_eq!(h.queue.len(), 1);
    }

    #[tokio::test]
    async fn done_attaches_extensions() {
        let h = harness();
        let ext = MessageExt {
            rel_docs: vec![RelDoc {
                id: "d1".into(),
                title: "Doc".into(),
                space_id: String::new(),
                resource: String::new(),
            }],
        };
        h.api.set_extensions(MessageId::from("m"), ext.clone());
        for ev in [init("m", 1), cont("m", 0, "ok"), done("m", 2)] {
            h.queue.enqueue(ev);
        }

        h.scheduler.drain_cycle().await;
        for _ in 0..10 {
            if message(&h, "m").unwrap().ext.is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(message(&h, "m").unwrap().ext, Some(ext));
        assert_eq!(h.api.extension_call_count(), 1);
    }

    #[tokio::test]
    async fn extensions_failure_leaves_message_intact() {
        let h = harness();
        for ev in [init("m", 1), cont("m", 0, "ok"), done("m", 2)] {
            h.queue.enqueue(ev);
        }

        h.scheduler.drain_cycle().await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        let m = message(&h, "m").unwrap();
        assert_eq!(m.status, MessageStatus::Success);
        assert!(m.ext.is_none());
        assert_eq!(h.api.extension_call_count(), 1);
    }

    #[tokio::test]
    async fn events_for_finished_message_are_ignored() {
        let h = harness();
        for ev in [init("m", 1), cont("m", 0, "ok"), done("m", 2), cont("m", 2, "more"), done("m", 6)] {
            h.queue.enqueue(ev);
        }

        let report = h.scheduler.drain_cycle().await;

        assert_eq!(report.dropped, 2);
        assert!(!report.resynced);
        assert_eq!(message(&h, "m").unwrap().text, "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_drains_until_cancelled() {
        let h = harness();
        let Harness {
            queue,
            store,
            scheduler,
            session,
            ..
        } = h;
        let scheduler = Arc::new(scheduler);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(scheduler.clone().run(cancel.clone()));

        queue.enqueue(init("m", 1));
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(store.read().contains(&MessageId::from("m")));

        cancel.cancel();
        task.await.unwrap();
        assert!(session.current().is_some());
    }

    #[tokio::test]
    async fn api_errors_do_not_leave_reloading_set() {
        let h = harness();
        h.api.fail_history(Some(ApiError::Network("down".into())));
        for ev in [init("m", 1), cont("m", 3, "bad")] {
            h.queue.enqueue(ev);
        }

        let report = h.scheduler.drain_cycle().await;

        assert!(report.resynced);
        assert!(!h.monitor.is_reloading());
        assert!(h.queue.is_empty());
        assert!(message(&h, "m").is_some());
    }
}
