use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use lfb_core::{config::Config, messaging::types::IncomingEvent, Engine};

use crate::handlers;

/// Inbound events buffered between the Telegram dispatcher and the engine.
const EVENT_BUFFER: usize = 1024;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub events: mpsc::Sender<IncomingEvent>,
}

impl AppState {
    /// Hand an event to the engine. Dropped with a warning once the engine stopped.
    pub async fn forward(&self, event: IncomingEvent) {
        let chat = event.chat_id.0;
        if self.events.send(event).await.is_err() {
            warn!(chat, "engine is not accepting events; dropping update");
        }
    }
}

pub async fn run_polling(cfg: Arc<Config>, engine: Arc<Engine>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    match bot.get_me().await {
        Ok(me) => info!(username = %me.username(), "lfb started"),
        Err(e) => warn!(error = %e, "get_me failed"),
    }

    if !engine.commands().hints().is_empty() {
        if let Err(e) = engine.publish_commands().await {
            warn!(error = %e, "failed to publish command menu");
        }
    }

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run(rx).await })
    };

    let state = Arc::new(AppState {
        engine: engine.clone(),
        events: tx,
    });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("dispatcher stopped; shutting down engine");
    engine.stop();
    match runner.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!(error = %e, "engine failed");
            Err(e.into())
        }
        Err(e) => Err(anyhow::anyhow!("engine task failed: {e}")),
    }
}
