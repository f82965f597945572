//! The dispatch resolver: one inbound event in, at most one render plus the
//! chat's deferred deliveries out.
//!
//! Text events resolve in this order, first match wins:
//! 1. back press or custom back target (callback)  2. callback id  3. global fallback
//! 4. custom checker  5. "back" text  6. exact reply key
//! 7. substring trigger  8. free-text handler  9. "not understood".
//! Commands only look at the command table.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::{
    commands::{parse_command, CommandMenu},
    config::Messages,
    delivery::{deliver_best_effort, DeliveryQueue},
    errors::Error,
    handler::{invoke, HandlerContext, Reply},
    menu::{is_back_handler_key, BACK_SENTINEL},
    messaging::{
        port::Transport,
        types::{EventKind, IncomingEvent, OutboundMessage, RenderMode},
    },
    navigation::{NavigationState, SessionData, SessionStore, UserSession},
    registry::{normalize, Namespace, Response, SharedRegistry, TriggerRegistry},
};

/// Lifecycle of one dispatch cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Received,
    Resolving,
    Invoking,
    Delivering,
    Done,
    Failed,
}

/// Which rule answered the event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rule {
    Back,
    /// Jump to a custom back target registered with `register_back_handler`.
    BackTo,
    Callback,
    UnknownCallback,
    GlobalFallback,
    Checker,
    Reply,
    Trigger,
    Message,
    NotUnderstood,
    Command,
    Start,
    Setup,
    UnknownCommand,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchReport {
    pub rule: Rule,
    pub stages: Vec<Stage>,
    /// Deferred deliveries flushed at the end of the cycle.
    pub delivered: usize,
}

impl DispatchReport {
    pub fn failed(&self) -> bool {
        self.stages.contains(&Stage::Failed)
    }
}

/// How a resolved response changes the user's place in the menu tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Nav {
    /// Forward step: the state being left goes onto the history.
    Push,
    Stay,
    /// Custom back target: the history is reset, never grown.
    Jump,
}

pub struct Resolver {
    registry: Arc<SharedRegistry>,
    sessions: Arc<SessionStore>,
    queue: Arc<DeliveryQueue>,
    commands: Arc<CommandMenu>,
    transport: Arc<dyn Transport>,
    messages: Messages,
    debug_user_data: bool,
}

impl Resolver {
    pub fn new(
        registry: Arc<SharedRegistry>,
        sessions: Arc<SessionStore>,
        queue: Arc<DeliveryQueue>,
        commands: Arc<CommandMenu>,
        transport: Arc<dyn Transport>,
        messages: Messages,
    ) -> Self {
        Self {
            registry,
            sessions,
            queue,
            commands,
            transport,
            messages,
            debug_user_data: false,
        }
    }

    /// Log who sent what at `info` level.
    pub fn with_debug_user_data(mut self, on: bool) -> Self {
        self.debug_user_data = on;
        self
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Run one full dispatch cycle. Never fails: handler and render errors
    /// are logged and degraded to fallback output.
    pub async fn dispatch(&self, event: IncomingEvent) -> DispatchReport {
        let mut cycle = Cycle {
            stages: vec![Stage::Received],
        };

        if self.debug_user_data {
            info!(
                chat_id = event.chat_id.0,
                user_id = event.user_id.0,
                username = event.username.as_deref().unwrap_or("-"),
                kind = ?event.kind,
                text = %event.text,
                "incoming event"
            );
        }

        if let Some(id) = &event.callback_query_id {
            if let Err(e) = self.transport.answer_callback(id).await {
                debug!(error = %e, "failed to acknowledge callback");
            }
        }

        // One consistent registry view for the whole cycle.
        let registry = self.registry.snapshot();
        cycle.stage(Stage::Resolving);

        let rule = match event.kind {
            EventKind::Command => self.dispatch_command(&registry, &event, &mut cycle).await,
            EventKind::Text | EventKind::Callback => {
                let session = self.sessions.session(event.user_id).await;
                let mut session = session.lock().await;
                self.dispatch_navigating(&registry, &event, &mut session, &mut cycle)
                    .await
            }
        };

        cycle.stage(Stage::Delivering);
        let drained = self
            .queue
            .drain(self.transport.as_ref(), event.chat_id, event.origin)
            .await;
        cycle.stage(Stage::Done);

        debug!(
            chat_id = event.chat_id.0,
            ?rule,
            delivered = drained.delivered,
            "dispatch cycle done"
        );

        DispatchReport {
            rule,
            stages: cycle.stages,
            delivered: drained.delivered,
        }
    }

    async fn dispatch_navigating(
        &self,
        registry: &TriggerRegistry,
        event: &IncomingEvent,
        session: &mut UserSession,
        cycle: &mut Cycle,
    ) -> Rule {
        let key = normalize(&event.text);
        let mode = match (event.kind, event.origin) {
            (EventKind::Callback, Some(id)) => RenderMode::Edit(id),
            _ => RenderMode::Send,
        };

        if event.kind == EventKind::Callback {
            // 1. back button
            if key == BACK_SENTINEL {
                self.go_back(registry, event, session, mode).await;
                return Rule::Back;
            }
            if is_back_handler_key(&key) {
                if let Some(response) = registry.lookup(Namespace::Callback, &key) {
                    self.respond(registry, event, session, cycle, &key, response, Nav::Jump, mode)
                        .await;
                    return Rule::BackTo;
                }
            }
            // 2. callback id
            if let Some(response) = registry.lookup(Namespace::Callback, &key) {
                self.respond(registry, event, session, cycle, &key, response, Nav::Push, mode)
                    .await;
                return Rule::Callback;
            }
            let err = Error::UnknownTrigger(key);
            debug!(error = %err, "callback without handler");
            self.render_text(event, &self.messages.unknown_command, mode)
                .await;
            return Rule::UnknownCallback;
        }

        // 3. global fallback shadows everything below it
        if let Some(response) = registry.global_fallback() {
            self.respond(registry, event, session, cycle, &key, response, Nav::Stay, mode)
                .await;
            return Rule::GlobalFallback;
        }

        // 4. custom checker
        if let Some(response) = registry.lookup(Namespace::Checker, &key) {
            self.respond(registry, event, session, cycle, &key, response, Nav::Stay, mode)
                .await;
            return Rule::Checker;
        }

        // 5. "back" typed or pressed on a reply keyboard
        if key == "back" || key == BACK_SENTINEL || key == normalize(&self.messages.back_label) {
            self.go_back(registry, event, session, mode).await;
            return Rule::Back;
        }

        // 6. exact reply key
        if let Some(response) = registry.lookup(Namespace::Reply, &key) {
            self.respond(registry, event, session, cycle, &key, response, Nav::Push, mode)
                .await;
            return Rule::Reply;
        }

        // 7. substring trigger
        if let Some((trigger, response)) = registry.find_trigger_in(&key) {
            let trigger = trigger.to_string();
            self.respond(registry, event, session, cycle, &trigger, response, Nav::Push, mode)
                .await;
            return Rule::Trigger;
        }

        // 8. free-text handler
        if let Some(response) = registry.lookup(Namespace::Message, &key) {
            self.respond(registry, event, session, cycle, &key, response, Nav::Stay, mode)
                .await;
            return Rule::Message;
        }

        // 9.
        let err = Error::UnknownTrigger(key);
        debug!(error = %err, "text not understood");
        self.render_text(event, &self.messages.not_understood, mode)
            .await;
        Rule::NotUnderstood
    }

    async fn dispatch_command(
        &self,
        registry: &TriggerRegistry,
        event: &IncomingEvent,
        cycle: &mut Cycle,
    ) -> Rule {
        let (name, _args) = parse_command(&event.text);

        if let Some(response) = registry.lookup(Namespace::Command, &name) {
            // Session data only; commands never touch navigation.
            let data = self
                .sessions
                .session(event.user_id)
                .await
                .lock()
                .await
                .data
                .clone();
            if let Some(state) = self
                .resolve_response(registry, event, data, cycle, &name, response, false)
                .await
            {
                self.render_state(event, &state, RenderMode::Send).await;
            }
            return Rule::Command;
        }

        match name.as_str() {
            "start" => {
                // Starting over forgets where the user was.
                self.sessions.clear(event.user_id).await;
                self.render_state(event, registry.root(), RenderMode::Send)
                    .await;
                Rule::Start
            }
            "setup" => {
                if let Err(e) = self.commands.publish(self.transport.as_ref()).await {
                    warn!(error = %e, "failed to publish command menu");
                }
                Rule::Setup
            }
            _ => {
                let err = Error::UnknownTrigger(format!("/{name}"));
                debug!(error = %err, "unknown command");
                self.render_text(event, &self.messages.unknown_command, RenderMode::Send)
                    .await;
                Rule::UnknownCommand
            }
        }
    }

    async fn go_back(
        &self,
        registry: &TriggerRegistry,
        event: &IncomingEvent,
        session: &mut UserSession,
        mode: RenderMode,
    ) {
        match session.history.pop() {
            Some(previous) => {
                self.render_state(event, &previous, mode).await;
                session.current = Some(previous);
            }
            None => {
                self.render_state(event, registry.root(), mode).await;
                session.current = None;
            }
        }
    }

    /// Resolve, render, and record the navigation step.
    ///
    /// History changes only once the render call has returned successfully,
    /// so a cycle dropped mid-render or a rejected render leaves the session
    /// untouched.
    #[allow(clippy::too_many_arguments)]
    async fn respond(
        &self,
        registry: &TriggerRegistry,
        event: &IncomingEvent,
        session: &mut UserSession,
        cycle: &mut Cycle,
        trigger: &str,
        response: &Response,
        nav: Nav,
        mode: RenderMode,
    ) {
        let follow_triggers = nav != Nav::Stay;
        let Some(state) = self
            .resolve_response(
                registry,
                event,
                session.data.clone(),
                cycle,
                trigger,
                response,
                follow_triggers,
            )
            .await
        else {
            return;
        };

        let delivered = self.render_state(event, &state, mode).await;
        if !delivered || cycle.failed() {
            return;
        }

        match nav {
            Nav::Push => {
                let leaving = session
                    .current
                    .take()
                    .unwrap_or_else(|| registry.root().clone());
                session.history.push(leaving);
                session.current = Some(state);
            }
            Nav::Jump => {
                session.history.clear();
                session.current = Some(state);
            }
            Nav::Stay => {}
        }
    }

    /// Turn a response into the state to render. `None` means render nothing.
    #[allow(clippy::too_many_arguments)]
    async fn resolve_response(
        &self,
        registry: &TriggerRegistry,
        event: &IncomingEvent,
        data: SessionData,
        cycle: &mut Cycle,
        trigger: &str,
        response: &Response,
        follow_triggers: bool,
    ) -> Option<NavigationState> {
        let reply = match response {
            Response::Text(text) => Reply::Text(text.clone()),
            Response::Menu { text, buttons } => Reply::Menu {
                text: text.clone(),
                buttons: buttons.clone(),
            },
            Response::Handler(handler) => {
                cycle.stage(Stage::Invoking);
                let ctx = HandlerContext::new(
                    event.clone(),
                    trigger.to_string(),
                    data,
                    self.queue.outbox(event.chat_id),
                );
                match invoke(handler, ctx).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        cycle.stage(Stage::Failed);
                        error!(
                            chat_id = event.chat_id.0,
                            user_id = event.user_id.0,
                            trigger,
                            error = %e,
                            "handler failed"
                        );
                        return Some(NavigationState::new(self.messages.fallback.clone(), None));
                    }
                }
            }
        };

        match reply {
            Reply::Nothing => None,
            Reply::Menu { text, buttons } => Some(NavigationState::new(text, Some(buttons))),
            Reply::Text(text) => {
                // An answer naming a registered trigger opens that trigger's menu.
                if follow_triggers {
                    if let Some(Response::Menu { text, buttons }) =
                        registry.lookup(Namespace::Trigger, &text)
                    {
                        return Some(NavigationState::new(text.clone(), Some(buttons.clone())));
                    }
                }
                Some(NavigationState::new(text, None))
            }
        }
    }

    async fn render_text(&self, event: &IncomingEvent, text: &str, mode: RenderMode) {
        self.render_state(event, &NavigationState::new(text, None), mode)
            .await;
    }

    /// Render best-effort; malformed button sets degrade to plain text.
    /// Returns whether the transport accepted the message.
    async fn render_state(
        &self,
        event: &IncomingEvent,
        state: &NavigationState,
        mode: RenderMode,
    ) -> bool {
        let buttons = match state.buttons() {
            Some(set) => match set.validate() {
                Ok(()) => Some(set.clone()),
                Err(e) => {
                    warn!(chat_id = event.chat_id.0, error = %e, "dropping malformed buttons");
                    None
                }
            },
            None => None,
        };

        let msg = OutboundMessage {
            chat_id: event.chat_id,
            text: state.text().to_string(),
            buttons,
            mode,
        };
        deliver_best_effort(self.transport.as_ref(), msg).await
    }
}

struct Cycle {
    stages: Vec<Stage>,
}

impl Cycle {
    fn stage(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    fn failed(&self) -> bool {
        self.stages.contains(&Stage::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        domain::{ChatId, MessageId, UserId},
        engine::Engine,
        handler::{handler_fn, handler_fn0},
        menu::Menu,
        messaging::types::{Button, ButtonSet},
        testing::FakeTransport,
    };

    const CHAT: ChatId = ChatId(10);
    const USER: UserId = UserId(20);

    fn engine() -> (Engine, Arc<FakeTransport>) {
        let transport = Arc::new(FakeTransport::default());
        let engine = Engine::new(Arc::new(Config::with_token("t")), transport.clone());
        (engine, transport)
    }

    fn text(t: &str) -> IncomingEvent {
        IncomingEvent::message(CHAT, USER, t)
    }

    fn press(data: &str) -> IncomingEvent {
        IncomingEvent::callback(CHAT, USER, data).with_origin(MessageId(99))
    }

    async fn history_len(engine: &Engine) -> usize {
        let session = engine.sessions().session(USER).await;
        let session = session.lock().await;
        session.history.len()
    }

    #[tokio::test]
    async fn nested_menu_and_back_navigation() {
        let (engine, transport) = engine();
        engine
            .register_menu("help", Menu::reply("pick one").option("A", "ansA").option("B", "ansB"))
            .unwrap();
        engine.register_reply("A", "ansA").unwrap();

        let report = engine.dispatch(text("Help")).await;
        assert_eq!(report.rule, Rule::Reply);
        let out = transport.last();
        assert_eq!(out.text, "pick one");
        assert_eq!(out.buttons.as_ref().map(|b| b.labels()), Some(vec!["A", "B"]));

        engine.dispatch(text("a")).await;
        let out = transport.last();
        assert_eq!(out.text, "ansA");
        assert!(out.buttons.is_none());
        assert_eq!(history_len(&engine).await, 2);
        {
            let session = engine.sessions().session(USER).await;
            let session = session.lock().await;
            assert_eq!(session.history.peek().map(|s| s.text()), Some("pick one"));
        }

        let report = engine.dispatch(text("back")).await;
        assert_eq!(report.rule, Rule::Back);
        let out = transport.last();
        assert_eq!(out.text, "pick one");
        assert_eq!(out.buttons.map(|b| b.len()), Some(2));
        assert_eq!(history_len(&engine).await, 1);
    }

    #[tokio::test]
    async fn back_on_empty_history_renders_root() {
        let (engine, transport) = engine();

        let report = engine.dispatch(text("Back")).await;
        assert_eq!(report.rule, Rule::Back);
        assert_eq!(transport.last().text, "Hello! I'm a bot.");

        engine.dispatch(press(BACK_SENTINEL)).await;
        let out = transport.last();
        assert_eq!(out.text, "Hello! I'm a bot.");
        assert_eq!(out.mode, RenderMode::Edit(MessageId(99)));
        assert!(!report.failed());
    }

    #[tokio::test]
    async fn custom_back_target_jumps_without_growing_history() {
        let (engine, transport) = engine();
        let sub = engine
            .install_menu(Menu::inline("Sub").option("Leaf", "leaf").with_back_to("main"))
            .unwrap();
        engine
            .register_callback_handler("open", Response::menu("Sub", sub))
            .unwrap();
        engine.register_back_handler("main", "Main", None).unwrap();

        for _ in 0..3 {
            assert_eq!(engine.dispatch(press("open")).await.rule, Rule::Callback);
            assert_eq!(history_len(&engine).await, 1);

            let report = engine.dispatch(press("back_main")).await;
            assert_eq!(report.rule, Rule::BackTo);
            let out = transport.last();
            assert_eq!(out.text, "Main");
            assert_eq!(out.mode, RenderMode::Edit(MessageId(99)));
            assert_eq!(history_len(&engine).await, 0);
        }

        engine.dispatch(press(BACK_SENTINEL)).await;
        assert_eq!(transport.last().text, "Hello! I'm a bot.");
    }

    #[tokio::test]
    async fn start_resets_navigation() {
        let (engine, transport) = engine();
        engine
            .register_menu("help", Menu::reply("pick one").option("A", "ansA"))
            .unwrap();

        engine.dispatch(text("help")).await;
        engine.dispatch(text("A")).await;
        assert_eq!(history_len(&engine).await, 2);

        assert_eq!(engine.dispatch(text("/start")).await.rule, Rule::Start);
        assert_eq!(history_len(&engine).await, 0);

        assert_eq!(engine.dispatch(text("back")).await.rule, Rule::Back);
        assert_eq!(transport.last().text, "Hello! I'm a bot.");
    }

    #[tokio::test]
    async fn callback_uses_latest_handler_and_pushes_once() {
        let (engine, transport) = engine();
        engine.register_callback_handler("btn_1", "old").unwrap();
        engine
            .register_callback_handler("btn_1", handler_fn0(|| Ok(Reply::from("new"))))
            .unwrap();

        let report = engine
            .dispatch(press("btn_1").with_callback_query_id("q1"))
            .await;
        assert_eq!(report.rule, Rule::Callback);
        assert!(report.stages.contains(&Stage::Invoking));

        let out = transport.last();
        assert_eq!(out.text, "new");
        assert_eq!(out.mode, RenderMode::Edit(MessageId(99)));
        assert_eq!(history_len(&engine).await, 1);
        assert_eq!(transport.answered(), vec!["q1".to_string()]);
    }

    #[tokio::test]
    async fn unknown_callback_renders_unknown_command() {
        let (engine, transport) = engine();
        let report = engine.dispatch(press("nope")).await;
        assert_eq!(report.rule, Rule::UnknownCallback);
        assert_eq!(transport.last().text, "Unknown command");
        assert_eq!(history_len(&engine).await, 0);
    }

    #[tokio::test]
    async fn failing_handler_renders_fallback_and_engine_keeps_serving() {
        let (engine, transport) = engine();
        engine
            .register_callback_handler(
                "btn_1",
                handler_fn0(|| Err(Error::External("boom".to_string()))),
            )
            .unwrap();
        engine.register_text_handler("ping", "pong").unwrap();

        let report = engine.dispatch(press("btn_1")).await;
        assert!(report.failed());
        assert_eq!(report.stages.last(), Some(&Stage::Done));
        assert_eq!(transport.last().text, "Something went wrong. Please try again.");
        assert_eq!(history_len(&engine).await, 0);

        let report = engine.dispatch(text("ping")).await;
        assert_eq!(report.rule, Rule::Message);
        assert_eq!(transport.last().text, "pong");
    }

    #[tokio::test]
    async fn global_fallback_shadows_exact_matches() {
        let (engine, transport) = engine();
        engine.register_reply("hello", "exact").unwrap();
        engine.register_checker("hello", "checker").unwrap();
        engine
            .set_global_fallback(Some(Response::text("fallback")))
            .unwrap();

        let report = engine.dispatch(text("hello")).await;
        assert_eq!(report.rule, Rule::GlobalFallback);
        assert_eq!(transport.last().text, "fallback");

        // Callbacks and commands are not affected.
        engine.register_callback_handler("cb", "from callback").unwrap();
        engine.dispatch(press("cb")).await;
        assert_eq!(transport.last().text, "from callback");

        engine.set_global_fallback(None).unwrap();
        engine.dispatch(text("hello")).await;
        assert_eq!(transport.last().text, "checker");
    }

    #[tokio::test]
    async fn exact_matches_outrank_substring_triggers() {
        let (engine, transport) = engine();
        engine
            .register_trigger("price", Menu::reply("").option("Cheap", "1$").option("Pricey", "9$"))
            .unwrap();
        engine.register_reply("price list", "the list").unwrap();
        engine.register_checker("price check", "checked").unwrap();
        engine
            .register_trigger("bac", Menu::reply("bacon?").option("Yes", "ok"))
            .unwrap();

        assert_eq!(engine.dispatch(text("price list")).await.rule, Rule::Reply);
        assert_eq!(transport.last().text, "the list");

        assert_eq!(engine.dispatch(text("Price Check")).await.rule, Rule::Checker);
        assert_eq!(transport.last().text, "checked");

        assert_eq!(engine.dispatch(text("back")).await.rule, Rule::Back);
        assert_eq!(transport.last().text, "Hello! I'm a bot.");

        let report = engine.dispatch(text("what is the PRICE today")).await;
        assert_eq!(report.rule, Rule::Trigger);
        let out = transport.last();
        assert_eq!(out.text, "price");
        assert_eq!(out.buttons.map(|b| b.labels().len()), Some(2));
    }

    #[tokio::test]
    async fn reply_naming_a_trigger_opens_its_menu() {
        let (engine, transport) = engine();
        engine
            .register_trigger("catalog", Menu::reply("Choose a section").option("Books", "b"))
            .unwrap();
        engine.register_reply("shop", "catalog").unwrap();

        engine.dispatch(text("shop")).await;
        let out = transport.last();
        assert_eq!(out.text, "Choose a section");
        assert_eq!(out.buttons.as_ref().map(|b| b.labels()), Some(vec!["Books"]));
    }

    #[tokio::test]
    async fn nothing_registered() {
        let (engine, transport) = engine();

        assert_eq!(engine.dispatch(text("anything")).await.rule, Rule::NotUnderstood);
        assert_eq!(transport.last().text, "I don't understand this command.");

        assert_eq!(engine.dispatch(text("/frobnicate")).await.rule, Rule::UnknownCommand);
        assert_eq!(transport.last().text, "Unknown command");
    }

    #[tokio::test]
    async fn commands_resolve_by_name_and_skip_history() {
        let (engine, transport) = engine();
        engine.register_command("/About", "about us").unwrap();
        engine.register_reply("about", "text route").unwrap();

        let report = engine.dispatch(text("/about@bot extra")).await;
        assert_eq!(report.rule, Rule::Command);
        assert_eq!(transport.last().text, "about us");
        assert_eq!(history_len(&engine).await, 0);

        engine
            .set_start("Welcome", Some(ButtonSet::reply(vec![Button::new("About", "About")])))
            .unwrap();
        assert_eq!(engine.dispatch(text("/start")).await.rule, Rule::Start);
        let out = transport.last();
        assert_eq!(out.text, "Welcome");
        assert!(out.buttons.is_some());

        engine.register_hint("about", "About the bot");
        assert_eq!(engine.dispatch(text("/setup")).await.rule, Rule::Setup);
        assert_eq!(transport.published().len(), 1);
    }

    #[tokio::test]
    async fn deferred_deliveries_flush_on_next_cycle_in_order() {
        let (engine, transport) = engine();
        engine.register_text_handler("hi", "hello").unwrap();

        engine.send_later(CHAT, "first");
        engine.reply_later(CHAT, "second");
        assert_eq!(engine.queue().pending(CHAT), 2);

        let report = engine
            .dispatch(text("hi").with_origin(MessageId(5)))
            .await;
        assert_eq!(report.delivered, 2);

        let texts: Vec<String> = transport.rendered().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["hello", "first", "second"]);
        assert_eq!(transport.last().mode, RenderMode::Reply(MessageId(5)));
        assert_eq!(engine.queue().pending(CHAT), 0);
    }

    #[tokio::test]
    async fn handler_outbox_is_flushed_after_its_render() {
        let (engine, transport) = engine();
        engine
            .register_text_handler(
                "order",
                handler_fn(|ctx| {
                    ctx.session.set("orders", serde_json::json!(1));
                    ctx.reply("order received");
                    Ok(Reply::from("working on it"))
                }),
            )
            .unwrap();

        let report = engine
            .dispatch(text("Order").with_origin(MessageId(3)))
            .await;
        assert_eq!(report.delivered, 1);

        let out = transport.rendered();
        assert_eq!(out[0].text, "working on it");
        assert_eq!(out[1].text, "order received");
        assert_eq!(out[1].mode, RenderMode::Reply(MessageId(3)));

        let session = engine.sessions().session(USER).await;
        let session = session.lock().await;
        assert_eq!(session.data.get("orders"), Some(serde_json::json!(1)));
    }

    #[tokio::test]
    async fn malformed_handler_buttons_degrade_to_plain_text() {
        let (engine, transport) = engine();
        engine
            .register_reply(
                "broken",
                handler_fn0(|| {
                    Ok(Reply::Menu {
                        text: "still here".to_string(),
                        buttons: ButtonSet::inline(vec![]),
                    })
                }),
            )
            .unwrap();

        let report = engine.dispatch(text("broken")).await;
        assert!(!report.failed());
        let out = transport.last();
        assert_eq!(out.text, "still here");
        assert!(out.buttons.is_none());
    }

    #[tokio::test]
    async fn transport_errors_do_not_fail_the_cycle() {
        let transport = Arc::new(FakeTransport::failing_on("pong"));
        let engine = Engine::new(Arc::new(Config::with_token("t")), transport.clone());
        engine.register_reply("ping", "pong").unwrap();

        let report = engine.dispatch(text("ping")).await;
        assert_eq!(report.rule, Rule::Reply);
        assert_eq!(report.stages.last(), Some(&Stage::Done));
        assert!(transport.rendered().is_empty());
        // The user never saw "pong", so there is nothing to go back from.
        assert_eq!(history_len(&engine).await, 0);
    }

    #[tokio::test]
    async fn stage_trail_for_a_handler_cycle() {
        let (engine, _transport) = engine();
        engine
            .register_reply("x", handler_fn0(|| Ok(Reply::Nothing)))
            .unwrap();

        let report = engine.dispatch(text("x")).await;
        assert_eq!(
            report.stages,
            vec![
                Stage::Received,
                Stage::Resolving,
                Stage::Invoking,
                Stage::Delivering,
                Stage::Done
            ]
        );
        // Nothing rendered, nothing pushed.
        assert_eq!(history_len(&engine).await, 0);
    }
}
