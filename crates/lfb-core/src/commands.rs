use std::sync::{Mutex, PoisonError};

use tracing::info;

use crate::{messaging::port::Transport, messaging::types::CommandHint, Result};

/// Split `/cmd@botname arg1 ...` into (`cmd`, `arg1 ...`). The name is lowercased.
pub fn parse_command(text: &str) -> (String, String) {
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = normalize_command(first.split('@').next().unwrap_or(""));

    (cmd, rest)
}

/// Command name without the leading slash, lowercased.
pub fn normalize_command(name: &str) -> String {
    name.trim().trim_start_matches('/').to_lowercase()
}

/// Command hints shown in the platform's command menu.
#[derive(Debug, Default)]
pub struct CommandMenu {
    hints: Mutex<Vec<CommandHint>>,
}

impl CommandMenu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a hint. Replacing keeps the original position.
    pub fn register_hint(&self, command: &str, description: impl Into<String>) {
        let name = normalize_command(command);
        let description = description.into();
        let mut hints = self.hints.lock().unwrap_or_else(PoisonError::into_inner);
        match hints.iter_mut().find(|h| h.name == name) {
            Some(h) => h.description = description,
            None => hints.push(CommandHint { name, description }),
        }
    }

    pub fn hints(&self) -> Vec<CommandHint> {
        self.hints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Push the full hint list to the platform. Safe to repeat.
    pub async fn publish(&self, transport: &dyn Transport) -> Result<usize> {
        let hints = self.hints();
        transport.publish_command_menu(&hints).await?;
        info!(commands = hints.len(), "published command menu");
        Ok(hints.len())
    }
}
