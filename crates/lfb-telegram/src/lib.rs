//! Telegram adapter (teloxide).
//!
//! This crate implements the `lfb-core` Transport over the Telegram Bot API.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{
        BotCommand, InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup,
        ReplyMarkup,
    },
};

use tokio::time::sleep;

pub mod handlers;
pub mod router;

use lfb_core::{
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::Transport,
        types::{ButtonSet, CommandHint, KeyboardKind, OutboundMessage, RenderMode},
    },
    Result,
};

#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub fn from_token(token: &str) -> Self {
        Self::new(Bot::new(token))
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }

    async fn send(
        &self,
        chat_id: ChatId,
        text: &str,
        reply_to: Option<MessageId>,
        markup: Option<ReplyMarkup>,
    ) -> Result<MessageRef> {
        let msg = self
            .with_retry(|| {
                let mut req = self.bot.send_message(Self::tg_chat(chat_id), text.to_string());
                if let Some(id) = reply_to {
                    req = req.reply_to_message_id(Self::tg_msg_id(id));
                }
                if let Some(m) = markup.clone() {
                    req = req.reply_markup(m);
                }
                req
            })
            .await?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn edit(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        markup: Option<InlineKeyboardMarkup>,
    ) -> Result<MessageRef> {
        self.with_retry(|| {
            let mut req = self.bot.edit_message_text(
                Self::tg_chat(chat_id),
                Self::tg_msg_id(message_id),
                text.to_string(),
            );
            if let Some(m) = markup.clone() {
                req = req.reply_markup(m);
            }
            req
        })
        .await?;

        Ok(MessageRef {
            chat_id,
            message_id,
        })
    }
}

/// One button per row for inline sets; two per row for reply keyboards.
pub fn inline_markup(buttons: &ButtonSet) -> InlineKeyboardMarkup {
    let rows: Vec<Vec<InlineKeyboardButton>> = buttons
        .buttons
        .iter()
        .map(|b| vec![InlineKeyboardButton::callback(b.label.clone(), b.key.clone())])
        .collect();
    InlineKeyboardMarkup::new(rows)
}

pub fn reply_markup(buttons: &ButtonSet) -> KeyboardMarkup {
    let rows: Vec<Vec<KeyboardButton>> = buttons
        .buttons
        .chunks(2)
        .map(|row| {
            row.iter()
                .map(|b| KeyboardButton::new(b.label.clone()))
                .collect()
        })
        .collect();
    KeyboardMarkup::new(rows).resize_keyboard(true)
}

fn markup_for(buttons: &ButtonSet) -> ReplyMarkup {
    match buttons.kind {
        KeyboardKind::Inline => ReplyMarkup::InlineKeyboard(inline_markup(buttons)),
        KeyboardKind::Reply => ReplyMarkup::Keyboard(reply_markup(buttons)),
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn render(&self, msg: OutboundMessage) -> Result<MessageRef> {
        let markup = msg.buttons.as_ref().map(markup_for);
        match msg.mode {
            RenderMode::Send => self.send(msg.chat_id, &msg.text, None, markup).await,
            RenderMode::Reply(origin) => {
                self.send(msg.chat_id, &msg.text, Some(origin), markup)
                    .await
            }
            RenderMode::Edit(origin) => match markup {
                // Reply keyboards cannot be attached to an edited message.
                Some(ReplyMarkup::Keyboard(kb)) => {
                    self.send(msg.chat_id, &msg.text, None, Some(ReplyMarkup::Keyboard(kb)))
                        .await
                }
                Some(ReplyMarkup::InlineKeyboard(kb)) => {
                    self.edit(msg.chat_id, origin, &msg.text, Some(kb)).await
                }
                _ => self.edit(msg.chat_id, origin, &msg.text, None).await,
            },
        }
    }

    async fn publish_command_menu(&self, hints: &[CommandHint]) -> Result<()> {
        let commands: Vec<BotCommand> = hints
            .iter()
            .map(|h| BotCommand::new(h.name.clone(), h.description.clone()))
            .collect();
        self.with_retry(|| self.bot.set_my_commands(commands.clone()))
            .await?;
        Ok(())
    }

    async fn answer_callback(&self, callback_query_id: &str) -> Result<()> {
        self.with_retry(|| self.bot.answer_callback_query(callback_query_id.to_string()))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lfb_core::messaging::types::Button;

    #[test]
    fn reply_keyboard_rows_hold_two_buttons() {
        let set = ButtonSet::reply(vec![
            Button::new("A", "A"),
            Button::new("B", "B"),
            Button::new("Back", "previous_menu"),
        ]);
        let kb = reply_markup(&set);
        assert_eq!(kb.keyboard.len(), 2);
        assert_eq!(kb.keyboard[0][1].text, "B");
    }

    #[test]
    fn inline_buttons_carry_callback_ids() {
        let set = ButtonSet::inline(vec![Button::new("Info", "cb_1")]);
        let kb = inline_markup(&set);
        assert_eq!(kb.inline_keyboard.len(), 1);
        assert_eq!(kb.inline_keyboard[0][0].text, "Info");
    }
}
