/// Core error type for the dispatch engine.
///
/// Only `Config` is fatal (the engine cannot start without a token). Every
/// other variant is recovered inside a dispatch cycle or surfaced to the
/// caller that registered a handler.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    /// Invalid registration (too many reply buttons, empty text, ...).
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no handler for trigger: {0}")]
    UnknownTrigger(String),

    #[error("handler failed: {0}")]
    HandlerFailure(String),

    #[error("render failed: {0}")]
    RenderFailure(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
