use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageRef},
    Result,
};

/// Cross-messenger outbound port.
///
/// The relay only ever sends plain text; delivery guarantees and retries
/// belong to the implementation.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef>;
}
