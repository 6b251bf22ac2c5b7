use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

type Key = String;
type Field = String;

/// The Store owns the two keyspaces served by the commands: plain string keys and hashes of
/// string fields. Each keyspace sits behind its own reader/writer lock, so readers of one never
/// wait for writers of the other. The store is shared and cloned cheaply using reference
/// counting.
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<InnerStore>,
}

impl Store {
    pub fn new() -> Store {
        Self::default()
    }
}

impl Deref for Store {
    type Target = InnerStore;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[derive(Default)]
pub struct InnerStore {
    strings: RwLock<HashMap<Key, Bytes>>,
    hashes: RwLock<HashMap<Key, HashMap<Field, Bytes>>>,
}

impl InnerStore {
    /// Inserts or replaces the value of `key`.
    pub fn set(&self, key: Key, value: Bytes) {
        self.strings.write().insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.strings.read().get(key).cloned()
    }

    /// Number of string keys.
    pub fn len(&self) -> usize {
        self.strings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0 && self.hash_len() == 0
    }

    /// Sets `field` in the hash stored at `key`, creating the hash if it doesn't exist yet.
    pub fn hset(&self, key: Key, field: Field, value: Bytes) {
        self.hashes
            .write()
            .entry(key)
            .or_default()
            .insert(field, value);
    }

    pub fn hget(&self, key: &str, field: &str) -> Option<Bytes> {
        self.hashes
            .read()
            .get(key)
            .and_then(|hash| hash.get(field))
            .cloned()
    }

    /// Returns a snapshot of every field/value pair of the hash at `key`, in no particular
    /// order. `None` means the hash was never written, which is different from an empty one.
    pub fn hgetall(&self, key: &str) -> Option<Vec<(Field, Bytes)>> {
        self.hashes.read().get(key).map(|hash| {
            hash.iter()
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect()
        })
    }

    /// Number of hashes.
    pub fn hash_len(&self) -> usize {
        self.hashes.read().len()
    }
}
