//! Relay dispatch: turning handler effects into outbound messages.

use std::sync::Arc;

use crate::{domain::ChatId, messaging::port::MessagingPort, Result};

/// Outbound side effect produced by the message handler.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// Calculation result, sent to the destination chat.
    Relay { chat_id: ChatId, text: String },
    /// Notice sent back to the source chat (division by zero).
    Notice { chat_id: ChatId, text: String },
}

impl Effect {
    pub fn chat_id(&self) -> ChatId {
        match self {
            Effect::Relay { chat_id, .. } | Effect::Notice { chat_id, .. } => *chat_id,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Effect::Relay { text, .. } | Effect::Notice { text, .. } => text,
        }
    }
}

#[derive(Clone)]
pub struct RelayDispatcher {
    messenger: Arc<dyn MessagingPort>,
}

impl RelayDispatcher {
    pub fn new(messenger: Arc<dyn MessagingPort>) -> Self {
        Self { messenger }
    }

    /// Send every effect in order; the first transport failure aborts the rest.
    pub async fn dispatch(&self, effects: &[Effect]) -> Result<()> {
        for effect in effects {
            let sent = self
                .messenger
                .send_text(effect.chat_id(), effect.text())
                .await?;
            tracing::debug!(
                chat_id = sent.chat_id.0,
                message_id = sent.message_id.0,
                "effect delivered"
            );
        }
        Ok(())
    }
}
