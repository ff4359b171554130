//! Script environment variable store.
//!
//! Holds the environment-like bindings of a [`State`](crate::State).  Names
//! are kept sorted so that `env` output and [`VarStore::environ`] are stable.
//! The synthetic `${/}` and `${:}` bindings are not stored here; they are
//! resolved by the state during expansion and never reach a child
//! environment.

use std::collections::BTreeMap;

/// Key/value variable store.
#[derive(Debug, Default, Clone)]
pub struct VarStore {
    vars: BTreeMap<String, String>,
}

impl VarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from `KEY=VALUE` strings.  Later duplicates win; entries
    /// without `=` are ignored.
    pub fn from_environ<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut vars = Self::new();
        for kv in entries {
            if let Some((k, v)) = kv.as_ref().split_once('=') {
                if !k.is_empty() {
                    vars.set(k, v);
                }
            }
        }
        vars
    }

    /// Set (or overwrite) a variable.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// The variables as `KEY=VALUE` strings, suitable for a child process.
    pub fn environ(&self) -> Vec<String> {
        self.vars.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
