//! JSON bot definition loaded at startup.
//!
//! ```json
//! {
//!   "start": { "text": "Hi!", "kind": "reply", "options": [{ "label": "Help", "answer": "..." }] },
//!   "menus": { "help": { "text": "pick one", "options": [{ "label": "A", "answer": "ansA" }] } },
//!   "triggers": [{ "trigger": "price", "options": [{ "label": "Cheap", "answer": "1$" }] }],
//!   "messages": { "hi": "hello" },
//!   "callbacks": { "about": "About us" },
//!   "commands": { "help": "Use the buttons" },
//!   "hints": [{ "command": "help", "description": "Show help" }]
//! }
//! ```

use std::{collections::BTreeMap, fs, path::Path};

use serde::Deserialize;

use crate::{
    engine::Engine,
    menu::{BackButton, Menu, MenuOption},
    messaging::types::KeyboardKind,
    registry::Response,
    Result,
};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MenuFile {
    pub start: Option<MenuDef>,
    pub menus: BTreeMap<String, MenuDef>,
    pub triggers: Vec<TriggerDef>,
    pub replies: BTreeMap<String, String>,
    pub messages: BTreeMap<String, String>,
    pub checkers: BTreeMap<String, String>,
    pub callbacks: BTreeMap<String, AnswerDef>,
    pub commands: BTreeMap<String, String>,
    pub hints: Vec<HintDef>,
    pub back_handlers: Vec<BackHandlerDef>,
    pub fallback: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KindDef {
    #[default]
    Reply,
    Inline,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum BackDef {
    #[default]
    None,
    /// `true` adds a plain back button.
    Flag(bool),
    /// Name of a back handler.
    To(String),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MenuDef {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub kind: KindDef,
    pub options: Vec<OptionDef>,
    #[serde(default)]
    pub back: BackDef,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptionDef {
    pub label: String,
    #[serde(default)]
    pub callback: Option<String>,
    pub answer: AnswerDef,
}

/// Either plain text or a nested menu.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum AnswerDef {
    Text(String),
    Menu(MenuDef),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerDef {
    pub trigger: String,
    #[serde(flatten)]
    pub menu: MenuDef,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HintDef {
    pub command: String,
    pub description: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackHandlerDef {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub menu: Option<MenuDef>,
}

impl MenuFile {
    pub fn load(path: &Path) -> Result<Self> {
        let txt = fs::read_to_string(path)?;
        Self::parse(&txt)
    }

    pub fn parse(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Register everything in the file. Stops at the first invalid entry.
    pub fn apply(&self, engine: &Engine) -> Result<()> {
        if let Some(start) = &self.start {
            engine.set_start_menu(to_menu(engine, start)?)?;
        }
        for (key, def) in &self.menus {
            engine.register_menu(key, to_menu(engine, def)?)?;
        }
        for def in &self.triggers {
            engine.register_trigger(&def.trigger, to_menu(engine, &def.menu)?)?;
        }
        for (key, text) in &self.replies {
            engine.register_reply(key, text.as_str())?;
        }
        for (key, text) in &self.messages {
            engine.register_text_handler(key, text.as_str())?;
        }
        for (key, text) in &self.checkers {
            engine.register_checker(key, text.as_str())?;
        }
        for (key, answer) in &self.callbacks {
            engine.register_callback_handler(key, to_response(engine, answer)?)?;
        }
        for (name, text) in &self.commands {
            engine.register_command(name, text.as_str())?;
        }
        for hint in &self.hints {
            engine.register_hint(&hint.command, hint.description.clone());
        }
        for def in &self.back_handlers {
            let buttons = match &def.menu {
                Some(menu) => Some(engine.install_menu(to_menu(engine, menu)?)?),
                None => None,
            };
            engine.register_back_handler(&def.id, def.text.clone(), buttons)?;
        }
        if let Some(text) = &self.fallback {
            engine.set_global_fallback(Some(Response::text(text.clone())))?;
        }
        Ok(())
    }
}

fn to_menu(engine: &Engine, def: &MenuDef) -> Result<Menu> {
    let kind = match def.kind {
        KindDef::Reply => KeyboardKind::Reply,
        KindDef::Inline => KeyboardKind::Inline,
    };
    let back = match &def.back {
        BackDef::None | BackDef::Flag(false) => BackButton::None,
        BackDef::Flag(true) => BackButton::Previous,
        BackDef::To(id) => BackButton::To(id.clone()),
    };
    let options = def
        .options
        .iter()
        .map(|opt| {
            Ok(MenuOption {
                label: opt.label.clone(),
                callback: opt.callback.clone(),
                answer: to_response(engine, &opt.answer)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Menu {
        text: def.text.clone(),
        kind,
        options,
        back,
    })
}

/// Nested menus are installed right away so their answers are registered.
fn to_response(engine: &Engine, answer: &AnswerDef) -> Result<Response> {
    match answer {
        AnswerDef::Text(text) => Ok(Response::text(text.clone())),
        AnswerDef::Menu(def) => {
            let menu = to_menu(engine, def)?;
            let text = menu.text.clone();
            let buttons = engine.install_menu(menu)?;
            Ok(Response::menu(text, buttons))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, registry::Namespace, testing::FakeTransport};
    use std::sync::Arc;

    const SAMPLE: &str = r#"{
        "start": {
            "text": "Hi!",
            "options": [
                { "label": "Help", "answer": {
                    "text": "pick one",
                    "options": [
                        { "label": "A", "answer": "ansA" },
                        { "label": "B", "answer": "ansB" }
                    ],
                    "back": true
                } },
                { "label": "Contacts", "answer": "mail us" }
            ]
        },
        "triggers": [
            { "trigger": "price", "kind": "inline", "options": [
                { "label": "Cheap", "callback": "cheap", "answer": "1$" }
            ] }
        ],
        "messages": { "hi": "hello" },
        "callbacks": { "about": "About us" },
        "commands": { "/help": "Use the buttons" },
        "hints": [ { "command": "help", "description": "Show help" } ]
    }"#;

    #[test]
    fn applies_every_section() {
        let engine = Engine::new(
            Arc::new(Config::with_token("t")),
            Arc::new(FakeTransport::default()),
        );
        MenuFile::parse(SAMPLE).unwrap().apply(&engine).unwrap();

        let reg = engine.registry();
        assert_eq!(reg.root().text(), "Hi!");
        assert_eq!(
            reg.root().buttons().map(|b| b.labels()),
            Some(vec!["Help", "Contacts"])
        );
        match reg.lookup(Namespace::Reply, "help") {
            Some(Response::Menu { text, buttons }) => {
                assert_eq!(text, "pick one");
                assert_eq!(buttons.labels(), vec!["A", "B", "Back"]);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(reg.contains(Namespace::Reply, "a"));
        assert!(reg.contains(Namespace::Trigger, "price"));
        assert!(reg.contains(Namespace::Callback, "cheap"));
        assert!(reg.contains(Namespace::Message, "hi"));
        assert!(reg.contains(Namespace::Callback, "about"));
        assert!(reg.contains(Namespace::Command, "help"));
        assert_eq!(engine.commands().hints().len(), 1);
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(MenuFile::parse(r#"{ "mesages": {} }"#).is_err());
    }
}
