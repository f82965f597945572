//! Uniform invocation contract for user handlers.
//!
//! Every handler is stored behind one async trait taking an owned
//! [`HandlerContext`]. Closures of other shapes (zero-argument, sync) are
//! wrapped once, at registration, by the adapters below.

use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::{
    delivery::Outbox,
    domain::{ChatId, MessageId, UserId},
    errors::Error,
    messaging::types::{ButtonSet, IncomingEvent},
    navigation::SessionData,
    Result,
};

/// What a handler wants rendered for the current event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Menu { text: String, buttons: ButtonSet },
    /// Render nothing (the handler used its outbox instead).
    Nothing,
}

impl From<&str> for Reply {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Reply {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// Everything a handler may look at or act on during one dispatch cycle.
#[derive(Clone, Debug)]
pub struct HandlerContext {
    pub event: IncomingEvent,
    /// Normalized key the event matched.
    pub trigger: String,
    pub session: SessionData,
    outbox: Outbox,
}

impl HandlerContext {
    pub fn new(event: IncomingEvent, trigger: String, session: SessionData, outbox: Outbox) -> Self {
        Self {
            event,
            trigger,
            session,
            outbox,
        }
    }

    pub fn chat_id(&self) -> ChatId {
        self.event.chat_id
    }

    pub fn user_id(&self) -> UserId {
        self.event.user_id
    }

    pub fn text(&self) -> &str {
        &self.event.text
    }

    pub fn origin(&self) -> Option<MessageId> {
        self.event.origin
    }

    /// Queue an extra message, delivered after the handler returns.
    pub fn send(&self, text: impl Into<String>) {
        self.outbox.send(text);
    }

    /// Queue a message quoting the event's origin message.
    pub fn reply(&self, text: impl Into<String>) {
        self.outbox.reply(text);
    }
}

#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, ctx: HandlerContext) -> Result<Reply>;
}

struct SyncHandler<F>(F);

#[async_trait]
impl<F> Handler for SyncHandler<F>
where
    F: Fn(&HandlerContext) -> Result<Reply> + Send + Sync,
{
    async fn call(&self, ctx: HandlerContext) -> Result<Reply> {
        (self.0)(&ctx)
    }
}

struct NoArgHandler<F>(F);

#[async_trait]
impl<F> Handler for NoArgHandler<F>
where
    F: Fn() -> Result<Reply> + Send + Sync,
{
    async fn call(&self, _ctx: HandlerContext) -> Result<Reply> {
        (self.0)()
    }
}

struct AsyncHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for AsyncHandler<F>
where
    F: Fn(HandlerContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Reply>> + Send,
{
    async fn call(&self, ctx: HandlerContext) -> Result<Reply> {
        (self.0)(ctx).await
    }
}

/// Wrap a synchronous handler that reads the context.
pub fn handler_fn<F>(f: F) -> Arc<dyn Handler>
where
    F: Fn(&HandlerContext) -> Result<Reply> + Send + Sync + 'static,
{
    Arc::new(SyncHandler(f))
}

/// Wrap a synchronous handler that ignores the context.
pub fn handler_fn0<F>(f: F) -> Arc<dyn Handler>
where
    F: Fn() -> Result<Reply> + Send + Sync + 'static,
{
    Arc::new(NoArgHandler(f))
}

/// Wrap an async handler.
pub fn async_handler<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(HandlerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply>> + Send + 'static,
{
    Arc::new(AsyncHandler(f))
}

struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run a handler to completion on its own task.
///
/// Errors and panics come back as `Error::HandlerFailure`; nothing escapes.
/// Dropping the returned future aborts the handler task.
pub async fn invoke(handler: &Arc<dyn Handler>, ctx: HandlerContext) -> Result<Reply> {
    let handler = handler.clone();
    let mut task = AbortOnDrop(tokio::spawn(async move { handler.call(ctx).await }));

    match (&mut task.0).await {
        Ok(Ok(reply)) => Ok(reply),
        Ok(Err(Error::HandlerFailure(msg))) => Err(Error::HandlerFailure(msg)),
        Ok(Err(e)) => Err(Error::HandlerFailure(e.to_string())),
        Err(e) if e.is_panic() => Err(Error::HandlerFailure("handler panicked".to_string())),
        Err(e) => Err(Error::HandlerFailure(format!("handler task failed: {e}"))),
    }
}
