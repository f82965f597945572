use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{
    sync::mpsc,
    task::JoinSet,
    time::{interval, timeout, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    commands::{normalize_command, CommandMenu},
    config::Config,
    delivery::{DeliveryQueue, PendingDelivery},
    dispatch::{DispatchReport, Resolver},
    domain::ChatId,
    errors::Error,
    menu::{back_handler_key, install, register_logged, validate_buttons, validate_response, Menu},
    messaging::{
        port::Transport,
        types::{ButtonSet, IncomingEvent},
    },
    navigation::{NavigationState, SessionStore},
    registry::{Namespace, Response, SharedRegistry, TriggerRegistry},
    Result,
};

/// The bot engine: registration API, dispatch, and the event loop.
///
/// Registration is allowed at any time; running dispatch cycles keep the
/// registry snapshot they started with.
pub struct Engine {
    cfg: Arc<Config>,
    registry: Arc<SharedRegistry>,
    commands: Arc<CommandMenu>,
    sessions: Arc<SessionStore>,
    queue: Arc<DeliveryQueue>,
    resolver: Arc<Resolver>,
    shutdown: CancellationToken,
}

impl Engine {
    pub fn new(cfg: Arc<Config>, transport: Arc<dyn Transport>) -> Self {
        let registry = Arc::new(SharedRegistry::new(TriggerRegistry::new(
            cfg.messages.root.clone(),
        )));
        let commands = Arc::new(CommandMenu::new());
        let sessions = Arc::new(SessionStore::new(cfg.session_idle_ttl));
        let queue = Arc::new(DeliveryQueue::new());
        let resolver = Arc::new(
            Resolver::new(
                registry.clone(),
                sessions.clone(),
                queue.clone(),
                commands.clone(),
                transport,
                cfg.messages.clone(),
            )
            .with_debug_user_data(cfg.debug_user_data),
        );

        Self {
            cfg,
            registry,
            commands,
            sessions,
            queue,
            resolver,
            shutdown: CancellationToken::new(),
        }
    }

    /// Current registry snapshot.
    pub fn registry(&self) -> Arc<TriggerRegistry> {
        self.registry.snapshot()
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn queue(&self) -> &Arc<DeliveryQueue> {
        &self.queue
    }

    pub fn commands(&self) -> &Arc<CommandMenu> {
        &self.commands
    }

    // ============== Registration ==============

    fn register(&self, ns: Namespace, key: &str, response: Response) -> Result<()> {
        if key.trim().is_empty() {
            return Err(Error::Configuration(format!(
                "empty key in namespace {ns:?}"
            )));
        }
        validate_response(&response)?;
        self.registry.update(|r| {
            register_logged(r, ns, key, response);
            Ok(())
        })
    }

    /// Free-text handler, consulted after menus and triggers.
    pub fn register_text_handler(&self, key: &str, response: impl Into<Response>) -> Result<()> {
        self.register(Namespace::Message, key, response.into())
    }

    /// Exact reply key (typically a reply-keyboard button label).
    pub fn register_reply(&self, key: &str, response: impl Into<Response>) -> Result<()> {
        self.register(Namespace::Reply, key, response.into())
    }

    /// Custom checker, consulted before any menu lookup.
    pub fn register_checker(&self, key: &str, response: impl Into<Response>) -> Result<()> {
        self.register(Namespace::Checker, key, response.into())
    }

    pub fn register_callback_handler(&self, key: &str, response: impl Into<Response>) -> Result<()> {
        self.register(Namespace::Callback, key, response.into())
    }

    pub fn register_command(&self, name: &str, response: impl Into<Response>) -> Result<()> {
        self.register(Namespace::Command, &normalize_command(name), response.into())
    }

    pub fn register_hint(&self, name: &str, description: impl Into<String>) {
        self.commands.register_hint(name, description);
    }

    /// Exact reply key opening a menu; the options' answers are registered too.
    pub fn register_menu(&self, key: &str, menu: Menu) -> Result<ButtonSet> {
        if key.trim().is_empty() {
            return Err(Error::Configuration("empty menu key".to_string()));
        }
        let back_label = self.cfg.messages.back_label.clone();
        self.registry.update(|r| {
            let text = menu.text.clone();
            let buttons = install(r, menu, &back_label)?;
            let response = Response::menu(text, buttons.clone());
            validate_response(&response)?;
            register_logged(r, Namespace::Reply, key, response);
            Ok(buttons)
        })
    }

    /// Substring trigger opening a menu. An empty menu text uses the trigger
    /// itself as the prompt.
    pub fn register_trigger(&self, trigger: &str, menu: Menu) -> Result<ButtonSet> {
        if trigger.trim().is_empty() {
            return Err(Error::Configuration("empty trigger".to_string()));
        }
        let back_label = self.cfg.messages.back_label.clone();
        self.registry.update(|r| {
            let prompt = if menu.text.trim().is_empty() {
                trigger.trim().to_string()
            } else {
                menu.text.clone()
            };
            let buttons = install(r, menu, &back_label)?;
            register_logged(
                r,
                Namespace::Trigger,
                trigger,
                Response::menu(prompt, buttons.clone()),
            );
            Ok(buttons)
        })
    }

    /// Register a menu's answers without binding it to a key; the returned
    /// set can be attached to any response.
    pub fn install_menu(&self, menu: Menu) -> Result<ButtonSet> {
        let back_label = self.cfg.messages.back_label.clone();
        self.registry.update(|r| install(r, menu, &back_label))
    }

    /// Target of `Menu::with_back_to(id)` buttons.
    pub fn register_back_handler(
        &self,
        id: &str,
        text: impl Into<String>,
        buttons: Option<ButtonSet>,
    ) -> Result<()> {
        let text = text.into();
        let response = match buttons {
            Some(buttons) => Response::menu(text, buttons),
            None => Response::Text(text),
        };
        self.register(Namespace::Callback, &back_handler_key(id), response)
    }

    /// Universal responder for text events. While set, it shadows checkers,
    /// menus, triggers and text handlers.
    pub fn set_global_fallback(&self, response: Option<Response>) -> Result<()> {
        if let Some(r) = &response {
            validate_response(r)?;
        }
        self.registry.update(|r| {
            r.set_global_fallback(response);
            Ok(())
        })
    }

    /// Root state: rendered by `/start` and by "back" with nothing to go back to.
    pub fn set_start(&self, text: impl Into<String>, buttons: Option<ButtonSet>) -> Result<()> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(Error::Configuration(
                "start message must not be empty".to_string(),
            ));
        }
        if let Some(b) = &buttons {
            validate_buttons(b)?;
        }
        self.registry.update(|r| {
            r.set_root(NavigationState::new(text, buttons));
            Ok(())
        })
    }

    /// Root state with a menu attached.
    pub fn set_start_menu(&self, menu: Menu) -> Result<()> {
        let back_label = self.cfg.messages.back_label.clone();
        self.registry.update(|r| {
            let text = menu.text.clone();
            if text.trim().is_empty() {
                return Err(Error::Configuration(
                    "start message must not be empty".to_string(),
                ));
            }
            let buttons = install(r, menu, &back_label)?;
            r.set_root(NavigationState::new(text, Some(buttons)));
            Ok(())
        })
    }

    pub fn unregister(&self, ns: Namespace, key: Option<&str>) -> usize {
        self.registry
            .update(|r| Ok::<_, Error>(r.unregister(ns, key)))
            .unwrap_or(0)
    }

    // ============== Delivery ==============

    /// Queue a message for a chat outside of any dispatch cycle. It goes out
    /// at the end of the chat's next cycle.
    pub fn send_later(&self, chat_id: ChatId, text: impl Into<String>) {
        self.queue.enqueue(chat_id, PendingDelivery::send(text));
    }

    /// Like `send_later`, quoting the message that starts the next cycle.
    pub fn reply_later(&self, chat_id: ChatId, text: impl Into<String>) {
        self.queue.enqueue(chat_id, PendingDelivery::reply(text));
    }

    pub async fn publish_commands(&self) -> Result<usize> {
        self.commands
            .publish(self.resolver.transport().as_ref())
            .await
    }

    // ============== Event loop ==============

    /// Process one event directly, bypassing the per-chat workers.
    pub async fn dispatch(&self, event: IncomingEvent) -> DispatchReport {
        self.resolver.dispatch(event).await
    }

    /// Request a graceful stop of `run`.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Consume events until `stop` is called or the sender side closes.
    ///
    /// Events for one chat are handled in arrival order by that chat's
    /// worker; different chats run in parallel. On stop, queued events are
    /// still processed for up to `shutdown_grace`, then in-flight cycles are
    /// cancelled and their chats' pending deliveries dropped.
    pub async fn run(&self, mut events: mpsc::Receiver<IncomingEvent>) -> Result<()> {
        let mut workers: HashMap<ChatId, Worker> = HashMap::new();
        let mut retired: HashMap<ChatId, CancellationToken> = HashMap::new();
        let mut tasks = JoinSet::new();
        let abort = CancellationToken::new();
        let worker_idle = self.cfg.session_sweep_interval;

        let mut sweep = interval(self.cfg.session_sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        sweep.tick().await;

        info!("engine started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = sweep.tick() => {
                    let evicted = self.sessions.evict_idle().await;
                    if evicted > 0 {
                        debug!(evicted, "evicted idle sessions");
                    }
                    retire_idle_workers(&mut workers, &mut retired, worker_idle);
                    retired.retain(|_, done| !done.is_cancelled());
                    while let Some(res) = tasks.try_join_next() {
                        log_worker_exit(res);
                    }
                }
                ev = events.recv() => {
                    let Some(ev) = ev else { break };
                    self.route(ev, &mut workers, &mut retired, &mut tasks, &abort);
                }
            }
        }

        info!(workers = workers.len(), "engine stopping, draining chats");
        drop(workers);

        let grace = self.cfg.shutdown_grace;
        let drained = timeout(grace, async {
            while let Some(res) = tasks.join_next().await {
                log_worker_exit(res);
            }
        })
        .await;

        if drained.is_err() {
            warn!(?grace, "shutdown grace elapsed, cancelling in-flight cycles");
            abort.cancel();
            while let Some(res) = tasks.join_next().await {
                log_worker_exit(res);
            }
        }

        info!("engine stopped");
        Ok(())
    }

    fn route(
        &self,
        ev: IncomingEvent,
        workers: &mut HashMap<ChatId, Worker>,
        retired: &mut HashMap<ChatId, CancellationToken>,
        tasks: &mut JoinSet<()>,
        abort: &CancellationToken,
    ) {
        let chat_id = ev.chat_id;
        let ev = match workers.get_mut(&chat_id) {
            Some(worker) => match worker.tx.send(ev) {
                Ok(()) => {
                    worker.last_used = tokio::time::Instant::now();
                    return;
                }
                Err(mpsc::error::SendError(ev)) => ev,
            },
            None => ev,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let done = CancellationToken::new();
        let after = retired.remove(&chat_id);
        tasks.spawn(chat_worker(
            self.resolver.clone(),
            self.queue.clone(),
            chat_id,
            rx,
            after,
            done.clone(),
            abort.clone(),
        ));
        // The receiver is alive until the worker sees the channel closed.
        let _ = tx.send(ev);
        workers.insert(
            chat_id,
            Worker {
                tx,
                done,
                last_used: tokio::time::Instant::now(),
            },
        );
    }
}

struct Worker {
    tx: mpsc::UnboundedSender<IncomingEvent>,
    done: CancellationToken,
    last_used: tokio::time::Instant,
}

/// Close idle workers' channels; they finish what is queued and exit.
fn retire_idle_workers(
    workers: &mut HashMap<ChatId, Worker>,
    retired: &mut HashMap<ChatId, CancellationToken>,
    idle: Duration,
) {
    let now = tokio::time::Instant::now();
    workers.retain(|chat_id, w| {
        if now.saturating_duration_since(w.last_used) < idle {
            return true;
        }
        retired.insert(*chat_id, w.done.clone());
        false
    });
}

fn log_worker_exit(res: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = res {
        warn!(error = %e, "chat worker ended abnormally");
    }
}

/// Sequential per-chat event processor.
///
/// Waits for the chat's previous worker (if it is still draining) so events
/// keep their arrival order across worker restarts.
async fn chat_worker(
    resolver: Arc<Resolver>,
    queue: Arc<DeliveryQueue>,
    chat_id: ChatId,
    mut rx: mpsc::UnboundedReceiver<IncomingEvent>,
    after: Option<CancellationToken>,
    done: CancellationToken,
    abort: CancellationToken,
) {
    let _done = done.drop_guard();
    if let Some(previous) = after {
        previous.cancelled().await;
    }

    while let Some(ev) = rx.recv().await {
        tokio::select! {
            _ = abort.cancelled() => {
                let dropped = queue.discard(chat_id);
                warn!(chat_id = chat_id.0, dropped, "dispatch cycle cancelled");
                break;
            }
            _ = resolver.dispatch(ev) => {}
        }
    }
}
