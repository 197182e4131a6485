//! Fast in-process store addressing one value by several owner-scoped keys.

use dashmap::DashMap;

/// Concurrent map from `(owner, key)` to a shared value.
///
/// One value is usually stored under three keys (id, alias, view), so all
/// writes and removals take the full key list.
pub struct KeyedStore<V: Clone> {
    entries: DashMap<(String, String), V>,
}

impl<V: Clone> Default for KeyedStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> KeyedStore<V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    fn scoped(owner: &str, key: &str) -> (String, String) {
        (owner.to_string(), key.to_string())
    }

    /// Store `value` under every non-empty key.
    pub fn put_all(&self, owner: &str, keys: &[&str], value: V) {
        for key in keys.iter().filter(|k| !k.is_empty()) {
            self.entries.insert(Self::scoped(owner, key), value.clone());
        }
    }

    pub fn put(&self, owner: &str, key: &str, value: V) {
        self.put_all(owner, &[key], value);
    }

    pub fn get(&self, owner: &str, key: &str) -> Option<V> {
        self.entries
            .get(&Self::scoped(owner, key))
            .map(|entry| entry.value().clone())
    }

    /// Remove every listed key, returning how many were present.
    pub fn remove_all(&self, owner: &str, keys: &[&str]) -> usize {
        keys.iter()
            .filter(|k| !k.is_empty())
            .filter_map(|key| self.entries.remove(&Self::scoped(owner, key)))
            .count()
    }

    /// Snapshot of every stored value; values under several keys repeat.
    pub fn values(&self) -> Vec<V> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_put_all_addresses_every_key() {
        let store = KeyedStore::new();
        store.put_all("alice", &["q1", "mine", "vabc"], 7u32);
        assert_eq!(store.get("alice", "q1"), Some(7));
        assert_eq!(store.get("alice", "mine"), Some(7));
        assert_eq!(store.get("alice", "vabc"), Some(7));
        assert_eq!(store.get("bob", "q1"), None);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_empty_keys_ignored() {
        let store = KeyedStore::new();
        store.put_all("alice", &["q1", ""], 1u32);
        assert_eq!(store.len(), 1);
        assert_eq!(store.remove_all("alice", &["", "q1"]), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_owners_with_separator_stay_distinct() {
        let store = KeyedStore::new();
        store.put("alice", "x-y", 1u32);
        store.put("alice-x", "y", 2u32);
        assert_eq!(store.get("alice", "x-y"), Some(1));
        assert_eq!(store.get("alice-x", "y"), Some(2));
        assert_eq!(store.len(), 2);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Removing the keys that were written leaves nothing behind.
        #[test]
        fn prop_remove_all_inverts_put_all(
            owner in "[a-z]{1,8}",
            keys in prop::collection::hash_set("[a-z0-9]{1,12}", 1..4),
        ) {
            let store = KeyedStore::new();
            let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
            store.put_all(&owner, &keys, 1u8);
            prop_assert_eq!(store.remove_all(&owner, &keys), keys.len());
            prop_assert!(store.is_empty());
        }
    }
}
