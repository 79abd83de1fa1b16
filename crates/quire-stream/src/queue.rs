use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use quire_core::events::QueuedEvent;

/// FIFO of stream events awaiting application.
///
/// Cloning yields another handle to the same queue: the normalizer appends at
/// the tail while the scheduler consumes from the head. Each operation takes
/// the lock once, so it is atomic with respect to the other side.
#[derive(Clone, Default)]
pub struct OrderingQueue {
    inner: Arc<Mutex<VecDeque<QueuedEvent>>>,
}

impl OrderingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, event: QueuedEvent) {
        self.inner.lock().push_back(event);
    }

    pub fn dequeue(&self) -> Option<QueuedEvent> {
        self.inner.lock().pop_front()
    }

    pub fn peek(&self) -> Option<QueuedEvent> {
        self.inner.lock().front().cloned()
    }

    /// Put an event that cannot be applied yet back at the head.
    pub fn requeue_front(&self, event: QueuedEvent) {
        self.inner.lock().push_front(event);
    }

    /// Remove and return the first pending event matching `pred`.
    pub fn take_first(&self, pred: impl Fn(&QueuedEvent) -> bool) -> Option<QueuedEvent> {
        let mut queue = self.inner.lock();
        let idx = queue.iter().position(pred)?;
        queue.remove(idx)
    }

    /// Drop everything pending. Returns how many events were discarded.
    pub fn clear(&self) -> usize {
        let mut queue = self.inner.lock();
        let dropped = queue.len();
        queue.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
