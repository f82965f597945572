use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use crate::{handler::Handler, messaging::types::ButtonSet, navigation::NavigationState};

/// Case-normalize a trigger key.
pub fn normalize(key: &str) -> String {
    key.trim().to_lowercase()
}

/// Lookup tables.
///
/// `Checker`, `Reply`, `Trigger` and `Message` hold exact-text keys; callback
/// ids and command names live in their own tables and never collide with text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Custom checkers, consulted before any menu lookup.
    Checker,
    /// Reply-keyboard answers and menu entry points.
    Reply,
    /// Substring triggers, matched in registration order.
    Trigger,
    /// Plain free-text handlers, consulted last.
    Message,
    Callback,
    Command,
}

/// What a trigger resolves to, decided once at registration time.
#[derive(Clone)]
pub enum Response {
    Text(String),
    Menu { text: String, buttons: ButtonSet },
    Handler(Arc<dyn Handler>),
}

impl Response {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn menu(text: impl Into<String>, buttons: ButtonSet) -> Self {
        Self::Menu {
            text: text.into(),
            buttons,
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(t) => f.debug_tuple("Text").field(t).finish(),
            Self::Menu { text, buttons } => f
                .debug_struct("Menu")
                .field("text", text)
                .field("buttons", &buttons.labels())
                .finish(),
            Self::Handler(_) => f.write_str("Handler(..)"),
        }
    }
}

impl From<&str> for Response {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Response {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Arc<dyn Handler>> for Response {
    fn from(h: Arc<dyn Handler>) -> Self {
        Self::Handler(h)
    }
}

#[derive(Clone, Debug, Default)]
struct Table {
    entries: HashMap<String, Response>,
    order: Vec<String>,
}

/// Trigger key -> response mappings, one table per namespace.
///
/// Plain data: cloning is how [`SharedRegistry`] publishes a new snapshot.
#[derive(Clone, Debug)]
pub struct TriggerRegistry {
    tables: HashMap<Namespace, Table>,
    global_fallback: Option<Response>,
    root: NavigationState,
    next_callback: u64,
}

impl TriggerRegistry {
    pub fn new(root_text: impl Into<String>) -> Self {
        Self {
            tables: HashMap::new(),
            global_fallback: None,
            root: NavigationState::new(root_text, None),
            next_callback: 0,
        }
    }

    /// Store `entry` under the normalized key; returns the entry it replaced.
    pub fn register(&mut self, ns: Namespace, key: &str, entry: Response) -> Option<Response> {
        let key = normalize(key);
        let table = self.tables.entry(ns).or_default();
        let previous = table.entries.insert(key.clone(), entry);
        if previous.is_none() {
            table.order.push(key);
        }
        previous
    }

    pub fn lookup(&self, ns: Namespace, key: &str) -> Option<&Response> {
        self.tables.get(&ns)?.entries.get(&normalize(key))
    }

    pub fn contains(&self, ns: Namespace, key: &str) -> bool {
        self.lookup(ns, key).is_some()
    }

    /// Remove one key, or the whole namespace when `key` is `None`.
    /// Returns how many entries were removed.
    pub fn unregister(&mut self, ns: Namespace, key: Option<&str>) -> usize {
        let Some(table) = self.tables.get_mut(&ns) else {
            return 0;
        };
        match key {
            Some(key) => {
                let key = normalize(key);
                if table.entries.remove(&key).is_none() {
                    return 0;
                }
                table.order.retain(|k| k != &key);
                1
            }
            None => {
                let n = table.entries.len();
                *table = Table::default();
                n
            }
        }
    }

    /// Keys of a namespace in registration order.
    pub fn keys(&self, ns: Namespace) -> Vec<&str> {
        self.tables
            .get(&ns)
            .map(|t| t.order.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// First registered trigger contained in `text` (already normalized).
    pub fn find_trigger_in(&self, text: &str) -> Option<(&str, &Response)> {
        let table = self.tables.get(&Namespace::Trigger)?;
        table
            .order
            .iter()
            .filter(|k| !k.is_empty() && text.contains(k.as_str()))
            .find_map(|k| table.entries.get(k).map(|r| (k.as_str(), r)))
    }

    pub fn set_global_fallback(&mut self, response: Option<Response>) {
        self.global_fallback = response;
    }

    pub fn global_fallback(&self) -> Option<&Response> {
        self.global_fallback.as_ref()
    }

    pub fn set_root(&mut self, root: NavigationState) {
        self.root = root;
    }

    /// State rendered by `/start` and by "back" with an empty history.
    pub fn root(&self) -> &NavigationState {
        &self.root
    }

    /// Allocate a callback id no other inline button of this registry uses.
    pub fn generate_callback_id(&mut self) -> String {
        loop {
            self.next_callback += 1;
            let id = format!("cb_{}", self.next_callback);
            if !self.contains(Namespace::Callback, &id) {
                return id;
            }
        }
    }
}

/// Copy-on-write holder for the registry.
///
/// Dispatch cycles take an `Arc` snapshot and never observe a half-applied
/// registration; writers clone, mutate, then swap.
#[derive(Debug)]
pub struct SharedRegistry {
    current: RwLock<Arc<TriggerRegistry>>,
}

impl SharedRegistry {
    pub fn new(registry: TriggerRegistry) -> Self {
        Self {
            current: RwLock::new(Arc::new(registry)),
        }
    }

    pub fn snapshot(&self) -> Arc<TriggerRegistry> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply `f` to a private copy and publish it only if `f` succeeds.
    pub fn update<T, E>(
        &self,
        f: impl FnOnce(&mut TriggerRegistry) -> Result<T, E>,
    ) -> Result<T, E> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = TriggerRegistry::clone(&guard);
        let out = f(&mut next)?;
        *guard = Arc::new(next);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_of(r: Option<&Response>) -> Option<String> {
        match r {
            Some(Response::Text(t)) => Some(t.clone()),
            _ => None,
        }
    }

    #[test]
    fn keys_are_case_folded_and_last_registration_wins() {
        let mut reg = TriggerRegistry::new("root");
        assert!(reg.register(Namespace::Reply, "Help", "one".into()).is_none());
        let previous = reg.register(Namespace::Reply, "  HELP ", "two".into());
        assert_eq!(text_of(previous.as_ref()), Some("one".to_string()));
        assert_eq!(
            text_of(reg.lookup(Namespace::Reply, "help")),
            Some("two".to_string())
        );
        assert_eq!(reg.keys(Namespace::Reply), vec!["help"]);
    }

    #[test]
    fn namespaces_do_not_collide() {
        let mut reg = TriggerRegistry::new("root");
        reg.register(Namespace::Callback, "start", "cb".into());
        reg.register(Namespace::Command, "start", "cmd".into());
        assert_eq!(
            text_of(reg.lookup(Namespace::Callback, "start")),
            Some("cb".to_string())
        );
        assert_eq!(
            text_of(reg.lookup(Namespace::Command, "start")),
            Some("cmd".to_string())
        );
        assert!(reg.lookup(Namespace::Reply, "start").is_none());
    }

    #[test]
    fn unregister_one_or_all() {
        let mut reg = TriggerRegistry::new("root");
        reg.register(Namespace::Message, "a", "1".into());
        reg.register(Namespace::Message, "b", "2".into());
        reg.register(Namespace::Message, "c", "3".into());

        assert_eq!(reg.unregister(Namespace::Message, Some("B")), 1);
        assert_eq!(reg.unregister(Namespace::Message, Some("b")), 0);
        assert_eq!(reg.keys(Namespace::Message), vec!["a", "c"]);

        assert_eq!(reg.unregister(Namespace::Message, None), 2);
        assert!(reg.keys(Namespace::Message).is_empty());
        assert_eq!(reg.unregister(Namespace::Command, None), 0);
    }

    #[test]
    fn substring_triggers_follow_registration_order() {
        let mut reg = TriggerRegistry::new("root");
        reg.register(Namespace::Trigger, "price", "p".into());
        reg.register(Namespace::Trigger, "price list", "pl".into());
        // Overwriting keeps the original position.
        reg.register(Namespace::Trigger, "price", "p2".into());

        let (key, resp) = reg.find_trigger_in("show me the price list").unwrap();
        assert_eq!(key, "price");
        assert_eq!(text_of(Some(resp)), Some("p2".to_string()));
        assert!(reg.find_trigger_in("hello").is_none());
    }

    #[test]
    fn generated_callback_ids_are_distinct() {
        let mut reg = TriggerRegistry::new("root");
        reg.register(Namespace::Callback, "cb_2", "taken".into());
        let a = reg.generate_callback_id();
        reg.register(Namespace::Callback, &a, "x".into());
        let b = reg.generate_callback_id();
        assert_eq!(a, "cb_1");
        assert_eq!(b, "cb_3");
    }

    #[test]
    fn shared_registry_keeps_old_snapshots_and_discards_failed_updates() {
        let shared = SharedRegistry::new(TriggerRegistry::new("root"));
        let before = shared.snapshot();

        shared
            .update(|r| {
                r.register(Namespace::Reply, "x", "1".into());
                Ok::<_, ()>(())
            })
            .unwrap();
        assert!(before.lookup(Namespace::Reply, "x").is_none());
        assert!(shared.snapshot().lookup(Namespace::Reply, "x").is_some());

        let res: Result<(), &str> = shared.update(|r| {
            r.register(Namespace::Reply, "y", "2".into());
            Err("nope")
        });
        assert!(res.is_err());
        assert!(shared.snapshot().lookup(Namespace::Reply, "y").is_none());
    }
}
