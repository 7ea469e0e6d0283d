//! Dictionary implementation

use std::collections::btree_map;
use std::collections::BTreeMap;

use super::Slot;
use crate::codec::{record_len, Value};
use crate::error::{KvError, Result};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Dictionary {
    entries: BTreeMap<String, Slot>,
    live_size: usize,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// `KvError::NotFound` when the key is absent or was removed
    pub fn get(&self, key: &str) -> Result<&Value> {
        self.entries
            .get(key)
            .map(|slot| &slot.value)
            .ok_or(KvError::NotFound)
    }

    /// Insert or overwrite, returning the previous value
    pub fn put(&mut self, key: String, value: Value) -> Option<Value> {
        let len = record_len(&key, Some(&value));
        self.live_size += len;
        let previous = self.entries.insert(key, Slot { value, record_len: len });
        previous.map(|slot| {
            self.live_size -= slot.record_len;
            slot.value
        })
    }

    pub fn delete(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key).map(|slot| {
            self.live_size -= slot.record_len;
            slot.value
        })
    }

    /// All live keys in sorted order
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes needed to serialize every live entry (no tombstones)
    pub fn live_size(&self) -> usize {
        self.live_size
    }

    /// Live entries in sorted key order
    pub fn iter(&self) -> DictionaryIter<'_> {
        DictionaryIter {
            inner: self.entries.iter(),
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.live_size = 0;
    }
}

/// Iterator over Dictionary entries
pub struct DictionaryIter<'a> {
    inner: btree_map::Iter<'a, String, Slot>,
}

impl<'a> Iterator for DictionaryIter<'a> {
    type Item = (&'a str, &'a Value);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|(key, slot)| (key.as_str(), &slot.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
