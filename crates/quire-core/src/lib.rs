pub mod api;
pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;

pub use api::{ChatApi, HistoryPage, HistoryQuery, SendReceipt};
pub use errors::ApiError;
pub use events::{QueuedEvent, StreamEvent};
pub use ids::{MessageId, SessionContext, SessionId, SpaceId};
pub use messages::{Message, MessageExt, MessageStatus, RelDoc, Role};
