//! Observable Entity Stores
//!
//! Plain keyed containers with change notification. A store knows nothing
//! about rendering or networking: whoever cares about a change subscribes a
//! callback and receives a [`StoreEvent`] after the mutation is complete.
//!
//! Entries keep insertion order, so track order survives round trips and
//! snapshots compare deterministically.

use indexmap::IndexMap;
use std::fmt;
use std::hash::Hash;

// ═══════════════════════════════════════════════════════════════════════════════
// EVENTS & SUBSCRIPTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Change notification
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent<K> {
    /// New entry
    Inserted(K),
    /// Existing entry changed (patch or overwrite)
    Updated(K),
    /// Entry removed
    Removed(K),
    /// Order changed, contents unchanged
    Reordered,
    /// Whole collection replaced
    Replaced,
}

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener<E> = Box<dyn Fn(&E) + Send>;

/// Listener list shared by both store kinds
struct Listeners<E> {
    next_id: u64,
    entries: Vec<(SubscriptionId, Listener<E>)>,
}

impl<E> Listeners<E> {
    fn new() -> Self {
        Self {
            next_id: 1,
            entries: Vec::new(),
        }
    }

    fn add(&mut self, listener: Listener<E>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, listener));
        id
    }

    fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(sid, _)| *sid != id);
        before != self.entries.len()
    }

    fn notify(&self, event: &E) {
        for (_, listener) in &self.entries {
            listener(event);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENTITY STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Keyed store for one entity kind
pub struct EntityStore<K, V> {
    entries: IndexMap<K, V>,
    listeners: Listeners<StoreEvent<K>>,
}

impl<K, V> EntityStore<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
            listeners: Listeners::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }

    /// Insert or overwrite; returns the previous value
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let previous = self.entries.insert(key.clone(), value);
        let event = if previous.is_some() {
            StoreEvent::Updated(key)
        } else {
            StoreEvent::Inserted(key)
        };
        self.listeners.notify(&event);
        previous
    }

    /// Mutate an entry in place. `None` if the key is unknown.
    pub fn patch<R>(&mut self, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        let value = self.entries.get_mut(key)?;
        let result = f(value);
        self.listeners.notify(&StoreEvent::Updated(key.clone()));
        Some(result)
    }

    /// Remove an entry, preserving the order of the rest
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let removed = self.entries.shift_remove(key)?;
        self.listeners.notify(&StoreEvent::Removed(key.clone()));
        Some(removed)
    }

    /// Remove every entry matching the predicate; returns the removed keys
    pub fn remove_where(&mut self, mut predicate: impl FnMut(&K, &V) -> bool) -> Vec<K> {
        let doomed: Vec<K> = self
            .entries
            .iter()
            .filter(|(k, v)| predicate(k, v))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed
    }

    /// Destructive replace of the whole collection (snapshot application)
    pub fn replace_all(&mut self, entries: impl IntoIterator<Item = (K, V)>) {
        self.entries = entries.into_iter().collect();
        self.listeners.notify(&StoreEvent::Replaced);
    }

    /// Put the listed keys first, in the given order. Unknown keys are
    /// ignored; unlisted entries keep their relative order after them.
    pub fn reorder(&mut self, order: &[K]) {
        let mut reordered = IndexMap::with_capacity(self.entries.len());
        for key in order {
            if let Some(value) = self.entries.shift_remove(key) {
                reordered.insert(key.clone(), value);
            }
        }
        reordered.extend(self.entries.drain(..));
        self.entries = reordered;
        self.listeners.notify(&StoreEvent::Reordered);
    }

    pub fn subscribe(&mut self, listener: impl Fn(&StoreEvent<K>) + Send + 'static) -> SubscriptionId {
        self.listeners.add(Box::new(listener))
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.listeners.remove(id)
    }
}

impl<K: Eq + Hash + Clone, V: Clone> EntityStore<K, V> {
    /// Owned copy of every value, in store order
    pub fn to_vec(&self) -> Vec<V> {
        self.entries.values().cloned().collect()
    }
}

impl<K: Eq + Hash + Clone, V> Default for EntityStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for EntityStore<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityStore")
            .field("entries", &self.entries)
            .field("listeners", &self.listeners.entries.len())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VALUE STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Single-value store (project settings)
pub struct ValueStore<T> {
    value: T,
    listeners: Listeners<T>,
}

impl<T> ValueStore<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            listeners: Listeners::new(),
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn set(&mut self, value: T) {
        self.value = value;
        self.listeners.notify(&self.value);
    }

    pub fn patch<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = f(&mut self.value);
        self.listeners.notify(&self.value);
        result
    }

    pub fn subscribe(&mut self, listener: impl Fn(&T) + Send + 'static) -> SubscriptionId {
        self.listeners.add(Box::new(listener))
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.listeners.remove(id)
    }
}

impl<T: Default> Default for ValueStore<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for ValueStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueStore")
            .field("value", &self.value)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<StoreEvent<u32>>>>, impl Fn(&StoreEvent<u32>) + Send) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        (log, move |e: &StoreEvent<u32>| sink.lock().unwrap().push(e.clone()))
    }

    #[test]
    fn test_insert_patch_remove_notify() {
        let mut store: EntityStore<u32, String> = EntityStore::new();
        let (log, listener) = recorder();
        store.subscribe(listener);

        store.insert(1, "a".into());
        store.insert(1, "b".into());
        assert_eq!(store.patch(&1, |v| v.push('!')), Some(()));
        assert_eq!(store.patch(&2, |v| v.push('!')), None);
        assert_eq!(store.remove(&1), Some("b!".to_string()));

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                StoreEvent::Inserted(1),
                StoreEvent::Updated(1),
                StoreEvent::Updated(1),
                StoreEvent::Removed(1),
            ]
        );
    }

    #[test]
    fn test_reorder_keeps_unlisted_tail() {
        let mut store: EntityStore<u32, ()> = EntityStore::new();
        for k in [1, 2, 3, 4] {
            store.insert(k, ());
        }
        store.reorder(&[3, 9, 1]);
        assert_eq!(store.keys().copied().collect::<Vec<_>>(), vec![3, 1, 2, 4]);
    }

    #[test]
    fn test_replace_all_is_destructive() {
        let mut store: EntityStore<u32, u32> = EntityStore::new();
        store.insert(1, 1);
        store.insert(2, 2);
        store.replace_all([(7, 7)]);
        assert_eq!(store.len(), 1);
        assert!(store.get(&1).is_none());
        assert_eq!(store.get(&7), Some(&7));
    }

    #[test]
    fn test_unsubscribe() {
        let mut store: EntityStore<u32, u32> = EntityStore::new();
        let (log, listener) = recorder();
        let id = store.subscribe(listener);
        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.insert(1, 1);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_value_store() {
        let mut store = ValueStore::new(10u32);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store.subscribe(move |v| sink.lock().unwrap().push(*v));
        store.set(11);
        store.patch(|v| *v += 1);
        assert_eq!(*store.get(), 12);
        assert_eq!(*seen.lock().unwrap(), vec![11, 12]);
    }

    #[test]
    fn test_remove_where() {
        let mut store: EntityStore<u32, u32> = EntityStore::new();
        for k in 0..6 {
            store.insert(k, k % 2);
        }
        let removed = store.remove_where(|_, v| *v == 1);
        assert_eq!(removed, vec![1, 3, 5]);
        assert_eq!(store.len(), 3);
    }
}
