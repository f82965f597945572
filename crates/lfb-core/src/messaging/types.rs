use crate::{
    domain::{ChatId, MessageId, UserId},
    errors::Error,
    Result,
};

/// Reply keyboards are limited to this many user-defined buttons.
pub const MAX_REPLY_BUTTONS: usize = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Text,
    Callback,
    Command,
}

/// Normalized inbound event handed over by the transport.
#[derive(Clone, Debug)]
pub struct IncomingEvent {
    pub kind: EventKind,
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub username: Option<String>,
    /// Raw text for text/command events, callback data for callback events.
    pub text: String,
    /// Platform id of the callback query, used to acknowledge the press.
    pub callback_query_id: Option<String>,
    /// Message that originated this event (the user's message, or the message
    /// carrying the pressed inline button).
    pub origin: Option<MessageId>,
}

impl IncomingEvent {
    /// Text message; a leading `/` makes it a command event.
    pub fn message(chat_id: ChatId, user_id: UserId, text: impl Into<String>) -> Self {
        let text = text.into();
        let kind = if text.starts_with('/') {
            EventKind::Command
        } else {
            EventKind::Text
        };
        Self {
            kind,
            chat_id,
            user_id,
            username: None,
            text,
            callback_query_id: None,
            origin: None,
        }
    }

    pub fn callback(chat_id: ChatId, user_id: UserId, data: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Callback,
            chat_id,
            user_id,
            username: None,
            text: data.into(),
            callback_query_id: None,
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: MessageId) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_callback_query_id(mut self, id: impl Into<String>) -> Self {
        self.callback_query_id = Some(id.into());
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyboardKind {
    /// Keyboard replacing the text input; pressing a button sends its label.
    Reply,
    /// Buttons attached under a message; pressing sends the callback id.
    Inline,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    /// Trigger key sent back on press (label for reply sets, callback id for inline).
    pub key: String,
}

impl Button {
    pub fn new(label: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            key: key.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ButtonSet {
    pub kind: KeyboardKind,
    pub buttons: Vec<Button>,
}

impl ButtonSet {
    pub fn reply(buttons: Vec<Button>) -> Self {
        Self {
            kind: KeyboardKind::Reply,
            buttons,
        }
    }

    pub fn inline(buttons: Vec<Button>) -> Self {
        Self {
            kind: KeyboardKind::Inline,
            buttons,
        }
    }

    pub fn len(&self) -> usize {
        self.buttons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buttons.is_empty()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.buttons.iter().map(|b| b.label.as_str()).collect()
    }

    /// Check the set can be rendered (non-empty, no blank label or key).
    pub fn validate(&self) -> Result<()> {
        if self.buttons.is_empty() {
            return Err(Error::RenderFailure("empty button set".to_string()));
        }
        if let Some(b) = self
            .buttons
            .iter()
            .find(|b| b.label.trim().is_empty() || b.key.trim().is_empty())
        {
            return Err(Error::RenderFailure(format!(
                "button with blank label or key: {b:?}"
            )));
        }
        Ok(())
    }
}

/// How an outbound message relates to existing messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderMode {
    Send,
    Reply(MessageId),
    /// Replace the text (and inline buttons) of an existing message.
    Edit(MessageId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub chat_id: ChatId,
    pub text: String,
    pub buttons: Option<ButtonSet>,
    pub mode: RenderMode,
}

/// One entry of the platform-side command menu.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandHint {
    pub name: String,
    pub description: String,
}
