use std::sync::Arc;

use teloxide::prelude::*;

use lfb_core::{
    domain::{ChatId, MessageId, UserId},
    messaging::types::IncomingEvent,
};

use crate::router::AppState;

pub async fn handle_text(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let event = text_event(
        msg.chat.id.0,
        user.id.0 as i64,
        user.username.as_deref(),
        msg.id.0,
        text,
    );
    state.forward(event).await;
    Ok(())
}

/// Text (or `/command`) event replying to the user's message.
fn text_event(
    chat_id: i64,
    user_id: i64,
    username: Option<&str>,
    message_id: i32,
    text: &str,
) -> IncomingEvent {
    let event = IncomingEvent::message(ChatId(chat_id), UserId(user_id), text)
        .with_origin(MessageId(message_id));
    match username {
        Some(name) => event.with_username(name),
        None => event,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lfb_core::messaging::types::EventKind;

    #[test]
    fn slash_text_becomes_command() {
        let ev = text_event(1, 2, Some("alice"), 10, "/start");
        assert_eq!(ev.kind, EventKind::Command);
        assert_eq!(ev.origin, Some(MessageId(10)));
        assert_eq!(ev.username.as_deref(), Some("alice"));
    }

    #[test]
    fn plain_text_keeps_raw_input() {
        let ev = text_event(1, 2, None, 11, "  Help ");
        assert_eq!(ev.kind, EventKind::Text);
        assert_eq!(ev.text, "  Help ");
        assert_eq!(ev.chat_id, ChatId(1));
        assert!(ev.username.is_none());
    }
}
