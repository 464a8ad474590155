//! Telegram update handlers.
//!
//! Every message on every chat the bot can see lands here; the core pipeline
//! decides whether it is an operator command in a relayed chat.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use calc_relay_core::{
    domain::{ChatId, UserId},
    handler::{process_message, IncomingMessage},
};

use crate::router::AppState;

/// Map a Telegram message into the transport-agnostic shape.
///
/// Returns `None` for messages without text (photos, stickers, service messages).
pub fn incoming_from(msg: &Message) -> Option<IncomingMessage> {
    let text = msg.text()?;
    Some(IncomingMessage {
        sender: msg.from().map(|u| UserId(u.id.0 as i64)),
        chat_id: ChatId(msg.chat.id.0),
        text: text.to_string(),
    })
}

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(incoming) = incoming_from(&msg) else {
        return Ok(());
    };

    // Failures stay scoped to this message; the dispatcher keeps serving.
    if let Err(e) = process_message(&incoming, &state.deps, &state.dispatcher).await {
        tracing::error!(
            chat_id = incoming.chat_id.0,
            user_id = incoming.sender.map(|u| u.0),
            "failed to process message: {e}"
        );
    }

    Ok(())
}
