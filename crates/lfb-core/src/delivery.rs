use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use tracing::warn;

use crate::{
    domain::{ChatId, MessageId},
    messaging::{
        port::Transport,
        types::{OutboundMessage, RenderMode},
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryKind {
    /// Standalone message.
    Send,
    /// Quote the message that started the dispatch cycle doing the delivery.
    ReplyToOrigin,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingDelivery {
    pub kind: DeliveryKind,
    pub text: String,
}

impl PendingDelivery {
    pub fn send(text: impl Into<String>) -> Self {
        Self {
            kind: DeliveryKind::Send,
            text: text.into(),
        }
    }

    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            kind: DeliveryKind::ReplyToOrigin,
            text: text.into(),
        }
    }
}

/// Outcome of flushing one chat's queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Per-chat buffer of messages waiting for a dispatch cycle to deliver them.
///
/// Entries are only appended or taken as a whole.
#[derive(Debug, Default)]
pub struct DeliveryQueue {
    pending: Mutex<HashMap<ChatId, Vec<PendingDelivery>>>,
}

impl DeliveryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, chat_id: ChatId, delivery: PendingDelivery) {
        self.lock().entry(chat_id).or_default().push(delivery);
    }

    pub fn pending(&self, chat_id: ChatId) -> usize {
        self.lock().get(&chat_id).map_or(0, Vec::len)
    }

    /// Take every queued entry for the chat, leaving it empty.
    pub fn take(&self, chat_id: ChatId) -> Vec<PendingDelivery> {
        self.lock().remove(&chat_id).unwrap_or_default()
    }

    /// Drop queued entries (cancelled cycle). Returns how many were dropped.
    pub fn discard(&self, chat_id: ChatId) -> usize {
        self.take(chat_id).len()
    }

    /// Handle bound to one chat, given to handlers.
    pub fn outbox(self: &Arc<Self>, chat_id: ChatId) -> Outbox {
        Outbox {
            queue: self.clone(),
            chat_id,
        }
    }

    /// Deliver everything queued for `chat_id` in FIFO order.
    ///
    /// `origin` is the message of the current cycle; without it reply entries
    /// are sent as plain messages.
    pub async fn drain(
        &self,
        transport: &dyn Transport,
        chat_id: ChatId,
        origin: Option<MessageId>,
    ) -> DrainReport {
        let mut report = DrainReport::default();
        for delivery in self.take(chat_id) {
            let mode = match (delivery.kind, origin) {
                (DeliveryKind::ReplyToOrigin, Some(id)) => RenderMode::Reply(id),
                _ => RenderMode::Send,
            };
            let msg = OutboundMessage {
                chat_id,
                text: delivery.text,
                buttons: None,
                mode,
            };
            if deliver_best_effort(transport, msg).await {
                report.delivered += 1;
            } else {
                report.failed += 1;
            }
        }
        report
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ChatId, Vec<PendingDelivery>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Render through the transport; failures are logged and reported as `false`.
pub async fn deliver_best_effort(transport: &dyn Transport, msg: OutboundMessage) -> bool {
    let chat_id = msg.chat_id;
    match transport.render(msg).await {
        Ok(_) => true,
        Err(e) => {
            warn!(chat_id = chat_id.0, error = %e, "outbound delivery failed");
            false
        }
    }
}

/// Chat-bound enqueue handle.
#[derive(Clone, Debug)]
pub struct Outbox {
    queue: Arc<DeliveryQueue>,
    chat_id: ChatId,
}

impl Outbox {
    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    pub fn send(&self, text: impl Into<String>) {
        self.queue
            .enqueue(self.chat_id, PendingDelivery::send(text));
    }

    pub fn reply(&self, text: impl Into<String>) {
        self.queue
            .enqueue(self.chat_id, PendingDelivery::reply(text));
    }
}
