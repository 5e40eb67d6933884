//! Concurrent get-or-create map used at every level of the node cache.
//!
//! Each key owns a slot. Creating a value locks only that slot, so slow
//! construction (opening a repository, resolving a revision) never blocks
//! unrelated keys. The factory runs at most once per key that ends up
//! populated; a failing factory leaves nothing behind and the next caller
//! tries again.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

type Slot<V> = Arc<Mutex<Option<Arc<V>>>>;

/// Memoizing map from `K` to shared `V`.
#[derive(Debug)]
pub struct Memo<K, V>
where
    K: Eq + Hash,
{
    slots: DashMap<K, Slot<V>>,
}

impl<K, V> Default for Memo<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Memo<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Value for `key` if it has been created.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let slot = self.slots.get(key)?.value().clone();
        let value = slot.lock().clone();
        value
    }

    /// Return the value for `key`, creating it with `factory` if absent.
    ///
    /// Concurrent callers for the same key wait for the one running the
    /// factory and then share its result. Factory errors are returned to
    /// that caller only; waiters re-check and run the factory themselves.
    pub fn get_or_create<E>(
        &self,
        key: &K,
        factory: impl FnOnce() -> Result<V, E>,
    ) -> Result<Arc<V>, E> {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let slot = self.slots.entry(key.clone()).or_default().value().clone();
        let mut guard = slot.lock();
        if let Some(value) = guard.as_ref() {
            return Ok(Arc::clone(value));
        }

        match factory() {
            Ok(value) => {
                let value = Arc::new(value);
                *guard = Some(Arc::clone(&value));
                Ok(value)
            }
            Err(e) => {
                drop(guard);
                self.discard_vacant(key, &slot);
                Err(e)
            }
        }
    }

    /// Drop an empty slot nobody else is holding, so failed lookups of
    /// arbitrary names do not accumulate.
    fn discard_vacant(&self, key: &K, slot: &Slot<V>) {
        // The shard lock is held while the predicate runs, so no new clone
        // of the slot can be handed out concurrently: 2 = map + ours.
        self.slots.remove_if(key, |_, current| {
            Arc::ptr_eq(current, slot)
                && Arc::strong_count(current) == 2
                && current.try_lock().is_some_and(|value| value.is_none())
        });
    }

    /// Number of populated keys.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.value().lock().is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn second_call_reuses_value() {
        let memo: Memo<String, u32> = Memo::new();
        let first = memo
            .get_or_create(&"a".to_string(), || Ok::<_, ()>(1))
            .unwrap();
        let second = memo
            .get_or_create(&"a".to_string(), || Ok::<_, ()>(2))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*second, 1);
    }

    #[test]
    fn failure_does_not_poison_key() {
        let memo: Memo<String, u32> = Memo::new();
        let key = "a".to_string();
        assert!(memo.get_or_create(&key, || Err::<u32, _>("boom")).is_err());
        assert!(memo.get(&key).is_none());
        assert_eq!(memo.slots.len(), 0, "vacant slot should be discarded");

        let value = memo.get_or_create(&key, || Ok::<_, &str>(5)).unwrap();
        assert_eq!(*value, 5);
        assert_eq!(memo.len(), 1);
    }

    #[test]
    fn concurrent_first_access_runs_factory_once() {
        let memo: Arc<Memo<String, u32>> = Arc::new(Memo::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let memo = Arc::clone(&memo);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    memo.get_or_create(&"k".to_string(), || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(20));
                        Ok::<_, ()>(7)
                    })
                    .unwrap()
                })
            })
            .collect();

        let values: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(values.iter().all(|v| Arc::ptr_eq(v, &values[0])));
    }

    #[test]
    fn unrelated_keys_are_independent() {
        let memo: Memo<u32, u32> = Memo::new();
        let a = memo.get_or_create(&1, || Ok::<_, ()>(10)).unwrap();
        let b = memo.get_or_create(&2, || Ok::<_, ()>(20)).unwrap();
        assert_eq!((*a, *b), (10, 20));
        assert_eq!(memo.len(), 2);
    }
}
