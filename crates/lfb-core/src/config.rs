use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// Fixed texts the resolver falls back to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Messages {
    /// Root message shown by `/start` and by "back" on an empty history.
    pub root: String,
    /// Rendered when a handler fails.
    pub fallback: String,
    pub not_understood: String,
    pub unknown_command: String,
    /// Label of the automatically appended back button.
    pub back_label: String,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            root: "Hello! I'm a bot.".to_string(),
            fallback: "Something went wrong. Please try again.".to_string(),
            not_understood: "I don't understand this command.".to_string(),
            unknown_command: "Unknown command".to_string(),
            back_label: "Back".to_string(),
        }
    }
}

/// Typed configuration for the bot process.
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub telegram_bot_token: String,
    pub menu_file: Option<PathBuf>,

    // Sessions
    pub session_idle_ttl: Duration,
    pub session_sweep_interval: Duration,

    // Shutdown
    pub shutdown_grace: Duration,

    // Behavior flags
    pub debug_user_data: bool,

    pub messages: Messages,
}

impl Config {
    /// Config with defaults for everything but the token.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            telegram_bot_token: token.into(),
            menu_file: None,
            session_idle_ttl: Duration::from_secs(3600),
            session_sweep_interval: Duration::from_secs(60),
            shutdown_grace: Duration::from_millis(5000),
            debug_user_data: false,
            messages: Messages::default(),
        }
    }

    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup (env, test maps).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // Required: the token. `TOKEN` is accepted for compatibility with older deployments.
        let token = lookup("TELEGRAM_BOT_TOKEN")
            .and_then(non_empty)
            .or_else(|| lookup("TOKEN").and_then(non_empty))
            .ok_or_else(|| {
                Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
            })?;

        let mut cfg = Self::with_token(token.trim());

        cfg.menu_file = lookup("BOT_MENU_FILE").and_then(non_empty).map(PathBuf::from);

        if let Some(secs) = parse_u64(lookup("SESSION_IDLE_TTL_SECS")) {
            cfg.session_idle_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_u64(lookup("SESSION_SWEEP_INTERVAL_SECS")) {
            // A zero interval would make `tokio::time::interval` panic.
            cfg.session_sweep_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(ms) = parse_u64(lookup("SHUTDOWN_GRACE_MS")) {
            cfg.shutdown_grace = Duration::from_millis(ms);
        }
        if let Some(flag) = parse_bool(lookup("DEBUG_USER_DATA")) {
            cfg.debug_user_data = flag;
        }

        let msgs = &mut cfg.messages;
        for (key, slot) in [
            ("ROOT_MESSAGE", &mut msgs.root),
            ("FALLBACK_MESSAGE", &mut msgs.fallback),
            ("NOT_UNDERSTOOD_MESSAGE", &mut msgs.not_understood),
            ("UNKNOWN_COMMAND_MESSAGE", &mut msgs.unknown_command),
            ("BACK_BUTTON_LABEL", &mut msgs.back_label),
        ] {
            if let Some(v) = lookup(key).and_then(non_empty) {
                *slot = v;
            }
        }

        Ok(cfg)
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, unquote(v.trim()));
    }
}

fn unquote(val: &str) -> &str {
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return &val[1..val.len() - 1];
    }
    val
}

fn parse_bool(v: Option<String>) -> Option<bool> {
    v.map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn parse_u64(v: Option<String>) -> Option<u64> {
    v.and_then(|s| s.trim().parse::<u64>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
