//! Shared global variable namespace
//!
//! One mapping per workflow run, visible to every host through the `global.`
//! template prefix. It is the only mutable structure touched by multiple
//! host execution threads concurrently, so every access goes through a
//! mutex; compound read-modify-write sequences use [`GlobalNamespace::update`]
//! to stay atomic.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct GlobalNamespace {
    vars: Mutex<HashMap<String, Value>>,
}

impl GlobalNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.vars.lock().unwrap().get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.vars.lock().unwrap().insert(name.into(), value);
    }

    /// Atomically transform one entry. The closure sees the current value
    /// (None when unset) and returns the new one; the lock is held for the
    /// whole sequence.
    pub fn update<F>(&self, name: &str, f: F) -> Value
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        let mut vars = self.vars.lock().unwrap();
        let next = f(vars.get(name));
        vars.insert(name.to_string(), next.clone());
        next
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.vars.lock().unwrap().clone()
    }
}
