//! Menu definitions: a prompt plus options, each option answering with its
//! own response. Installing a menu registers the option answers and returns
//! the button set to attach to the prompt.

use tracing::warn;

use crate::{
    errors::Error,
    messaging::types::{Button, ButtonSet, KeyboardKind, MAX_REPLY_BUTTONS},
    registry::{Namespace, Response, TriggerRegistry},
    Result,
};

/// Callback id / text of the generic "go back" button.
pub const BACK_SENTINEL: &str = "previous_menu";

const BACK_HANDLER_PREFIX: &str = "back_";

/// Callback id of a custom back target registered with `register_back_handler`.
pub fn back_handler_key(id: &str) -> String {
    format!("{BACK_HANDLER_PREFIX}{id}")
}

pub fn is_back_handler_key(key: &str) -> bool {
    key.len() > BACK_HANDLER_PREFIX.len() && key.starts_with(BACK_HANDLER_PREFIX)
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum BackButton {
    #[default]
    None,
    /// Pop the navigation history.
    Previous,
    /// Jump to a custom back handler (inline menus).
    To(String),
}

#[derive(Clone, Debug)]
pub struct MenuOption {
    pub label: String,
    /// Inline only: explicit callback id, generated when absent.
    pub callback: Option<String>,
    pub answer: Response,
}

#[derive(Clone, Debug)]
pub struct Menu {
    pub text: String,
    pub kind: KeyboardKind,
    pub options: Vec<MenuOption>,
    pub back: BackButton,
}

impl Menu {
    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: KeyboardKind::Reply,
            options: Vec::new(),
            back: BackButton::None,
        }
    }

    pub fn inline(text: impl Into<String>) -> Self {
        Self {
            kind: KeyboardKind::Inline,
            ..Self::reply(text)
        }
    }

    pub fn option(mut self, label: impl Into<String>, answer: impl Into<Response>) -> Self {
        self.options.push(MenuOption {
            label: label.into(),
            callback: None,
            answer: answer.into(),
        });
        self
    }

    pub fn option_with_id(
        mut self,
        label: impl Into<String>,
        callback: impl Into<String>,
        answer: impl Into<Response>,
    ) -> Self {
        self.options.push(MenuOption {
            label: label.into(),
            callback: Some(callback.into()),
            answer: answer.into(),
        });
        self
    }

    pub fn with_back(mut self) -> Self {
        self.back = BackButton::Previous;
        self
    }

    pub fn with_back_to(mut self, id: impl Into<String>) -> Self {
        self.back = BackButton::To(id.into());
        self
    }
}

/// Reject responses that could never render.
pub fn validate_response(response: &Response) -> Result<()> {
    match response {
        Response::Text(t) if t.trim().is_empty() => Err(Error::Configuration(
            "response text must not be empty".to_string(),
        )),
        Response::Menu { text, buttons } => {
            if text.trim().is_empty() {
                return Err(Error::Configuration(
                    "menu text must not be empty".to_string(),
                ));
            }
            validate_buttons(buttons)
        }
        _ => Ok(()),
    }
}

/// Reply sets are capped at `MAX_REPLY_BUTTONS` user buttons; a trailing
/// back button does not count.
pub fn validate_buttons(buttons: &ButtonSet) -> Result<()> {
    buttons
        .validate()
        .map_err(|e| Error::Configuration(e.to_string()))?;
    if buttons.kind == KeyboardKind::Reply {
        let user_buttons = buttons
            .buttons
            .iter()
            .filter(|b| !is_back_button(b))
            .count();
        if user_buttons > MAX_REPLY_BUTTONS {
            return Err(Error::Configuration(format!(
                "reply keyboard has {user_buttons} buttons, at most {MAX_REPLY_BUTTONS} allowed"
            )));
        }
    }
    Ok(())
}

/// The button `install` appends for `BackButton`. User reply buttons carry
/// their label as key, so a label like `back_office` never matches.
fn is_back_button(button: &Button) -> bool {
    button.key != button.label
        && (button.key == BACK_SENTINEL || is_back_handler_key(&button.key))
}

/// Register, logging when an existing entry is replaced.
pub fn register_logged(reg: &mut TriggerRegistry, ns: Namespace, key: &str, response: Response) {
    if reg.register(ns, key, response).is_some() {
        warn!(?ns, key, "registration conflict: previous handler replaced");
    }
}

/// Register the menu's option answers and build its button set.
pub fn install(reg: &mut TriggerRegistry, menu: Menu, back_label: &str) -> Result<ButtonSet> {
    if menu.options.is_empty() {
        return Err(Error::Configuration(format!(
            "menu {:?} has no options",
            menu.text
        )));
    }
    if menu.kind == KeyboardKind::Reply && menu.options.len() > MAX_REPLY_BUTTONS {
        return Err(Error::Configuration(format!(
            "menu {:?} has {} reply buttons, at most {MAX_REPLY_BUTTONS} allowed",
            menu.text,
            menu.options.len()
        )));
    }

    let mut buttons = Vec::with_capacity(menu.options.len() + 1);
    for opt in menu.options {
        if opt.label.trim().is_empty() {
            return Err(Error::Configuration(format!(
                "menu {:?} has a button without label",
                menu.text
            )));
        }
        validate_response(&opt.answer)?;

        match menu.kind {
            KeyboardKind::Reply => {
                register_logged(reg, Namespace::Reply, &opt.label, opt.answer);
                buttons.push(Button::new(opt.label.clone(), opt.label));
            }
            KeyboardKind::Inline => {
                let id = match opt.callback {
                    Some(id) => id,
                    None => reg.generate_callback_id(),
                };
                register_logged(reg, Namespace::Callback, &id, opt.answer);
                buttons.push(Button::new(opt.label, id));
            }
        }
    }

    match menu.back {
        BackButton::None => {}
        BackButton::Previous => buttons.push(Button::new(back_label, BACK_SENTINEL)),
        BackButton::To(id) => buttons.push(Button::new(back_label, back_handler_key(&id))),
    }

    Ok(ButtonSet {
        kind: menu.kind,
        buttons,
    })
}
