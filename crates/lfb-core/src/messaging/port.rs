use async_trait::async_trait;

use crate::{
    domain::MessageRef,
    messaging::types::{CommandHint, OutboundMessage},
    Result,
};

/// Outbound port implemented by the platform adapter.
///
/// The engine decides on (text, button set, mode); the adapter turns that into
/// platform-specific messages and keyboards.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn render(&self, msg: OutboundMessage) -> Result<MessageRef>;

    /// Register the command menu with the platform.
    async fn publish_command_menu(&self, hints: &[CommandHint]) -> Result<()>;

    /// Acknowledge a button press so the client stops its spinner.
    async fn answer_callback(&self, callback_query_id: &str) -> Result<()>;
}
