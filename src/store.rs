//! Local value store.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::id::Id;

/// The values this node holds, keyed by the identifier of their key.
///
/// Writes are last-writer-wins; reads return the stored bytes verbatim.
/// Entries live until the node is dropped.
#[derive(Default)]
pub struct ValueStore {
    values: Mutex<HashMap<Id, Bytes>>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: Id, value: Bytes) {
        self.values.lock().insert(key, value);
    }

    pub fn get(&self, key: &Id) -> Option<Bytes> {
        self.values.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}
