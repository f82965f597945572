//! In-memory transport used by the unit tests.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::{
    domain::{MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::Transport,
        types::{CommandHint, OutboundMessage},
    },
    Result,
};

#[derive(Default)]
pub struct FakeTransport {
    next_id: Mutex<i32>,
    fail_text: Option<String>,
    rendered: Mutex<Vec<OutboundMessage>>,
    published: Mutex<Vec<Vec<CommandHint>>>,
    answered: Mutex<Vec<String>>,
}

impl FakeTransport {
    /// Fails every render whose text equals `text`.
    pub fn failing_on(text: &str) -> Self {
        Self {
            fail_text: Some(text.to_string()),
            ..Self::default()
        }
    }

    pub fn rendered(&self) -> Vec<OutboundMessage> {
        self.rendered.lock().unwrap().clone()
    }

    pub fn last(&self) -> OutboundMessage {
        self.rendered().pop().expect("nothing rendered")
    }

    pub fn published(&self) -> Vec<Vec<CommandHint>> {
        self.published.lock().unwrap().clone()
    }

    pub fn answered(&self) -> Vec<String> {
        self.answered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn render(&self, msg: OutboundMessage) -> Result<MessageRef> {
        if self.fail_text.as_deref() == Some(msg.text.as_str()) {
            return Err(Error::External("send rejected".to_string()));
        }
        let chat_id = msg.chat_id;
        self.rendered.lock().unwrap().push(msg);
        let mut id = self.next_id.lock().unwrap();
        *id += 1;
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(*id),
        })
    }

    async fn publish_command_menu(&self, hints: &[CommandHint]) -> Result<()> {
        self.published.lock().unwrap().push(hints.to_vec());
        Ok(())
    }

    async fn answer_callback(&self, callback_query_id: &str) -> Result<()> {
        self.answered
            .lock()
            .unwrap()
            .push(callback_query_id.to_string());
        Ok(())
    }
}
