//! Telegram update handlers.
//!
//! Each handler only converts the update into an `IncomingEvent` and forwards
//! it to the engine; resolution and rendering happen in `lfb-core`.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};

use crate::router::AppState;

mod callback;
mod text;

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    callback::handle_callback(bot, q, state).await
}

pub async fn handle_message(_bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    if msg.text().is_some() {
        return text::handle_text(msg, state).await;
    }

    // Only text is routed; stickers, media and service messages are ignored.
    tracing::debug!(chat = msg.chat.id.0, "ignoring non-text message");
    Ok(())
}
