//! Reactive key-value store for transient component props.
//!
//! Components receive fresh data through here rather than by mutating their
//! `ComponentEntry`. Slots are keyed `{chat_id}:{node_id}` — the colon form
//! is the single convention; `slot_key` is the only place the key is built,
//! so producers and consumers cannot drift apart.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::MutexGuard;

use chatstream_protocol::ChatId;
use serde_json::Value;
use tracing::debug;

pub fn slot_key(chat_id: &ChatId, node_id: &str) -> String {
    format!("{chat_id}:{node_id}")
}

#[derive(Default)]
pub struct ComponentDataStore {
    slots: Mutex<HashMap<String, Value>>,
}

impl ComponentDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the slot wholesale.
    pub fn set_slot(&self, key: &str, data: Value) {
        self.lock().insert(key.to_string(), data);
    }

    /// Shallow-merge an object into the slot. Non-object existing values
    /// (or a non-object partial) fall back to replacement.
    pub fn update_slot(&self, key: &str, partial: Value) {
        let mut slots = self.lock();
        match (slots.get_mut(key), partial) {
            (Some(Value::Object(existing)), Value::Object(partial)) => {
                for (k, v) in partial {
                    existing.insert(k, v);
                }
            }
            (_, partial) => {
                debug!(key, "update_slot replacing non-object slot");
                slots.insert(key.to_string(), partial);
            }
        }
    }

    pub fn get_slot(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    pub fn remove_slot(&self, key: &str) {
        self.lock().remove(key);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn slot_key_uses_the_colon_convention() {
        assert_eq!(slot_key(&ChatId::from("c1"), "n1"), "c1:n1");
    }

    #[test]
    fn update_merges_shallowly_and_last_write_wins_per_field() {
        let store = ComponentDataStore::new();
        let key = slot_key(&ChatId::from("c1"), "n1");
        store.set_slot(&key, json!({"a": 1, "b": 1}));
        store.update_slot(&key, json!({"b": 2, "c": 3}));
        assert_eq!(store.get_slot(&key), Some(json!({"a": 1, "b": 2, "c": 3})));
    }

    #[test]
    fn update_on_missing_or_non_object_slot_replaces() {
        let store = ComponentDataStore::new();
        store.update_slot("k", json!({"a": 1}));
        assert_eq!(store.get_slot("k"), Some(json!({"a": 1})));
        store.set_slot("k", json!("text"));
        store.update_slot("k", json!({"a": 2}));
        assert_eq!(store.get_slot("k"), Some(json!({"a": 2})));
    }

    #[test]
    fn remove_and_clear_drop_slots() {
        let store = ComponentDataStore::new();
        store.set_slot("a", json!(1));
        store.set_slot("b", json!(2));
        store.remove_slot("a");
        assert_eq!(store.get_slot("a"), None);
        store.clear();
        assert_eq!(store.get_slot("b"), None);
    }
}
