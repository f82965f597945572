use std::{
    collections::HashMap,
    sync::{Arc, PoisonError},
    time::Duration,
};

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::{domain::UserId, messaging::types::ButtonSet};

/// What the user was looking at: text plus its buttons.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NavigationState {
    text: String,
    buttons: Option<ButtonSet>,
}

impl NavigationState {
    pub fn new(text: impl Into<String>, buttons: Option<ButtonSet>) -> Self {
        Self {
            text: text.into(),
            buttons,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn buttons(&self) -> Option<&ButtonSet> {
        self.buttons.as_ref()
    }
}

/// LIFO of previously rendered states. Unbounded; eviction happens per session.
#[derive(Clone, Debug, Default)]
pub struct NavigationHistory {
    stack: Vec<NavigationState>,
}

impl NavigationHistory {
    pub fn push(&mut self, state: NavigationState) {
        self.stack.push(state);
    }

    pub fn pop(&mut self) -> Option<NavigationState> {
        self.stack.pop()
    }

    pub fn peek(&self) -> Option<&NavigationState> {
        self.stack.last()
    }

    pub fn clear(&mut self) {
        self.stack.clear();
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

/// Free-form per-user key/value data handlers can read and write.
#[derive(Clone, Debug, Default)]
pub struct SessionData {
    inner: Arc<std::sync::Mutex<HashMap<String, serde_json::Value>>>,
}

impl SessionData {
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: serde_json::Value) -> Option<serde_json::Value> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value)
    }

    pub fn remove(&self, key: &str) -> Option<serde_json::Value> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }
}

#[derive(Debug, Default)]
pub struct UserSession {
    pub history: NavigationHistory,
    /// Last state rendered by a navigating rule; `None` means "at the root".
    pub current: Option<NavigationState>,
    pub data: SessionData,
}

#[derive(Debug)]
struct SessionSlot {
    session: Arc<Mutex<UserSession>>,
    last_seen: Instant,
}

/// Per-user sessions with idle eviction.
///
/// A session is created on first interaction and dropped once it has been
/// idle for `idle_ttl` and nobody holds it.
#[derive(Debug)]
pub struct SessionStore {
    slots: Mutex<HashMap<UserId, SessionSlot>>,
    idle_ttl: Duration,
}

impl SessionStore {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            idle_ttl,
        }
    }

    /// Get (or create) the user's session and mark it as seen.
    pub async fn session(&self, user_id: UserId) -> Arc<Mutex<UserSession>> {
        let mut slots = self.slots.lock().await;
        let slot = slots.entry(user_id).or_insert_with(|| SessionSlot {
            session: Arc::new(Mutex::new(UserSession::default())),
            last_seen: Instant::now(),
        });
        slot.last_seen = Instant::now();
        slot.session.clone()
    }

    pub async fn push(&self, user_id: UserId, state: NavigationState) {
        let session = self.session(user_id).await;
        let mut session = session.lock().await;
        session.history.push(state);
    }

    pub async fn pop(&self, user_id: UserId) -> Option<NavigationState> {
        let session = self.session(user_id).await;
        let mut session = session.lock().await;
        session.history.pop()
    }

    pub async fn clear(&self, user_id: UserId) {
        let session = self.session(user_id).await;
        let mut session = session.lock().await;
        session.history.clear();
        session.current = None;
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }

    pub async fn evict_idle(&self) -> usize {
        self.evict_idle_at(Instant::now()).await
    }

    /// Drop sessions idle since before `now - idle_ttl` that are not in use.
    pub async fn evict_idle_at(&self, now: Instant) -> usize {
        let mut slots = self.slots.lock().await;
        let before = slots.len();
        slots.retain(|_, slot| {
            let idle = now.saturating_duration_since(slot.last_seen) >= self.idle_ttl;
            let in_use = Arc::strong_count(&slot.session) > 1;
            !idle || in_use
        });
        before - slots.len()
    }
}
