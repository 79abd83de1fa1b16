use std::sync::Arc;

use parking_lot::RwLock;

use quire_core::ids::MessageId;
use quire_core::messages::Message;

/// How a fetched history page merges into the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryMode {
    /// Newest page: replaces the store wholesale.
    Replace,
    /// Older page during backward pagination: adds only unseen keys.
    Prepend,
}

/// The transcript, one entry per key, kept in `sequence` order.
///
/// Sequence changes must go through [`MessageStore::upsert`] or
/// [`MessageStore::set_sequence`] so ordering is maintained.
#[derive(Clone, Debug, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
    /// Bumped whenever the contents are replaced wholesale.
    generation: u64,
}

/// Store handle shared by the scheduler, the monitor and view readers.
/// The lock is never held across an await.
pub type SharedStore = Arc<RwLock<MessageStore>>;

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedStore {
        Arc::new(RwLock::new(Self::new()))
    }

    fn position(&self, key: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.key == key)
    }

    fn insert_sorted(&mut self, message: Message) {
        let idx = self.messages.partition_point(|m| m.sequence <= message.sequence);
        self.messages.insert(idx, message);
    }

    /// Insert or replace by key. Returns `true` when the key was new.
    pub fn upsert(&mut self, message: Message) -> bool {
        match self.position(&message.key) {
            Some(idx) if self.messages[idx].sequence == message.sequence => {
                self.messages[idx] = message;
                false
            }
            Some(idx) => {
                self.messages.remove(idx);
                self.insert_sorted(message);
                false
            }
            None => {
                self.insert_sorted(message);
                true
            }
        }
    }

    pub fn find(&self, key: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.key == key)
    }

    /// Mutable access for text/status/ext updates. Do not change `sequence` here.
    pub fn find_mut(&mut self, key: &MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| &m.key == key)
    }

    pub fn contains(&self, key: &MessageId) -> bool {
        self.position(key).is_some()
    }

    pub fn set_sequence(&mut self, key: &MessageId, sequence: i64) -> bool {
        let Some(idx) = self.position(key) else {
            return false;
        };
        let mut message = self.messages.remove(idx);
        message.sequence = sequence;
        self.insert_sorted(message);
        true
    }

    pub fn remove(&mut self, key: &MessageId) -> Option<Message> {
        self.position(key).map(|idx| self.messages.remove(idx))
    }

    /// Merge a history page. Returns how many messages were added.
    pub fn append_history_page(&mut self, page: Vec<Message>, mode: HistoryMode) -> usize {
        if mode == HistoryMode::Replace {
            self.messages.clear();
            self.generation += 1;
        }
        let mut added = 0;
        for message in page {
            match mode {
                HistoryMode::Replace => {
                    if self.upsert(message) {
                        added += 1;
                    }
                }
                HistoryMode::Prepend => {
                    if !self.contains(&message.key) {
                        self.insert_sorted(message);
                        added += 1;
                    }
                }
            }
        }
        added
    }

    pub fn reset(&mut self) {
        self.messages.clear();
        self.generation += 1;
    }

    /// Changes on every wholesale replacement; writers that suspend compare it
    /// before resuming so they never append to a replaced transcript.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn last_sequence(&self) -> Option<i64> {
        self.messages.last().map(|m| m.sequence)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
