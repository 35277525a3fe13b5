//! A write-once-then-read-many map from key to handler

use crate::error::{ReplicationError, Result};
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;

/// Handlers indexed by key, at most one handler per key.
///
/// Registration takes `&mut self`: populate the registry during start-up,
/// then share it behind an `Arc` for lookups.
#[derive(Debug)]
pub struct KeyedRegistry<K, V> {
    kind: &'static str,
    entries: HashMap<K, V>,
}

impl<K, V> KeyedRegistry<K, V>
where
    K: Eq + Hash + Display,
{
    /// `kind` names the handlers in error messages, e.g. "adapter factory"
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
        }
    }

    pub fn register(&mut self, key: K, value: V) -> Result<()> {
        if self.entries.contains_key(&key) {
            return Err(ReplicationError::Conflict(format!(
                "{} for {} already registered",
                self.kind, key
            )));
        }
        self.entries.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &K) -> Result<&V> {
        self.entries.get(key).ok_or_else(|| {
            ReplicationError::NotFound(format!("{} for {} not found", self.kind, key))
        })
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
