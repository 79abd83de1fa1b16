pub mod http;
pub mod mock;
mod wire;

pub use http::HttpChatApi;
pub use mock::MockChatApi;
