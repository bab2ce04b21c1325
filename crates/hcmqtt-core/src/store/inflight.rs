// Single-flight bookkeeping for store fetches.
//
// Each outstanding fetch is a spawned task wrapped in a `Shared` future so
// any number of callers can await the same result. Entries carry a unique
// id; a finished (or cancelled) task only removes the entry if it is still
// its own, so a newer fetch under the same key is never evicted.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use futures_util::future::{BoxFuture, Shared};

use crate::error::CoreError;

pub(crate) type SharedFetch = Shared<BoxFuture<'static, Result<(), Arc<CoreError>>>>;

pub(crate) struct InflightMap<K> {
    entries: HashMap<K, (u64, SharedFetch)>,
}

impl<K> Default for InflightMap<K> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash> InflightMap<K> {
    pub(crate) fn get(&self, key: &K) -> Option<SharedFetch> {
        self.entries.get(key).map(|(_, fetch)| fetch.clone())
    }

    pub(crate) fn insert(&mut self, key: K, id: u64, fetch: SharedFetch) {
        self.entries.insert(key, (id, fetch));
    }

    /// Remove `key` only if it still belongs to fetch `id`.
    pub(crate) fn release(&mut self, key: &K, id: u64) {
        if self.entries.get(key).is_some_and(|(current, _)| *current == id) {
            self.entries.remove(key);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use futures_util::FutureExt;

    use super::*;

    fn ready() -> SharedFetch {
        async { Ok(()) }.boxed().shared()
    }

    #[test]
    fn release_ignores_stale_ids() {
        let mut map = InflightMap::default();
        map.insert("a", 1, ready());
        map.insert("a", 2, ready());

        map.release(&"a", 1);
        assert!(map.get(&"a").is_some());

        map.release(&"a", 2);
        assert!(map.get(&"a").is_none());
        assert_eq!(map.len(), 0);
    }
}
