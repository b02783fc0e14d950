mod handler;
mod model;

pub use handler::{offline, send};
pub use model::{OfflineMessagesRequest, SendMessageRequest};
