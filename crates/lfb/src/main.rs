use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use lfb_core::{config::Config, menu_file::MenuFile, Engine};
use lfb_telegram::TelegramTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    lfb_core::logging::init("lfb")?;

    let cfg = Arc::new(Config::load()?);
    let transport = Arc::new(TelegramTransport::from_token(&cfg.telegram_bot_token));
    let engine = Arc::new(Engine::new(cfg.clone(), transport));

    if let Some(path) = &cfg.menu_file {
        let menus = MenuFile::load(path)
            .with_context(|| format!("failed to load menu file {}", path.display()))?;
        menus.apply(&engine).context("invalid menu file")?;
        info!(path = %path.display(), "menu file applied");
    }

    lfb_telegram::router::run_polling(cfg, engine)
        .await
        .context("telegram bot failed")
}
