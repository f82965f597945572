//! Conversational dispatch engine for menu-driven chat bots.
//!
//! This crate is transport-agnostic: the chat platform lives behind the
//! [`messaging::port::Transport`] port implemented in adapter crates.

pub mod commands;
pub mod config;
pub mod delivery;
pub mod dispatch;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod handler;
pub mod logging;
pub mod menu;
pub mod menu_file;
pub mod messaging;
pub mod navigation;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::Engine;
pub use errors::{Error, Result};
