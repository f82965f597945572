use std::sync::Arc;

use teloxide::prelude::*;

use lfb_core::{
    domain::{ChatId, MessageId, UserId},
    messaging::types::IncomingEvent,
};

use crate::router::AppState;

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let message = q.message.as_ref().map(|m| (m.chat.id.0, m.id.0));
    let data = q.data.clone().unwrap_or_default();

    // Presses without a carrying message or payload are acknowledged and dropped.
    let Some((chat_id, message_id)) = message.filter(|_| !data.is_empty()) else {
        let _ = bot.answer_callback_query(q.id.clone()).await;
        return Ok(());
    };

    let event = callback_event(
        chat_id,
        q.from.id.0 as i64,
        q.from.username.as_deref(),
        message_id,
        &q.id,
        &data,
    );
    state.forward(event).await;
    Ok(())
}

/// The engine acknowledges the press once the event is dispatched.
fn callback_event(
    chat_id: i64,
    user_id: i64,
    username: Option<&str>,
    message_id: i32,
    query_id: &str,
    data: &str,
) -> IncomingEvent {
    let event = IncomingEvent::callback(ChatId(chat_id), UserId(user_id), data)
        .with_origin(MessageId(message_id))
        .with_callback_query_id(query_id);
    match username {
        Some(name) => event.with_username(name),
        None => event,
    }
}
