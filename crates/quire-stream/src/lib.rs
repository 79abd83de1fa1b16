//! # quire-stream
//!
//! Reconstructs a chat transcript from an unreliable, incrementally delivered
//! event stream. Live payloads are normalized into an ordering queue, applied
//! by a paced playback scheduler, and reconciled against REST history
//! whenever the stream and the transcript disagree.

pub mod config;
pub mod engine;
pub mod error;
pub mod normalizer;
pub mod queue;
pub mod reconcile;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod transport;

pub use config::PlaybackConfig;
pub use engine::ChatEngine;
pub use error::EngineError;
pub use normalizer::EventNormalizer;
pub use queue::OrderingQueue;
pub use reconcile::{Reconciler, ResyncOutcome};
pub use scheduler::{CycleReport, PlaybackScheduler};
pub use state::{SessionState, ViewSignal, ViewSignals};
pub use store::{HistoryMode, MessageStore, SharedStore};
pub use transport::{MemoryTransport, Subscription, Transport, TransportError, UnsubscribeHandle};
