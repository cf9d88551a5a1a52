use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::hash::Hash;
use std::sync::Arc;

/// A concurrent compute-once map.
///
/// The first caller for a key runs the initializer; racing callers for the
/// same key wait on that key's cell and get the same value. The map shard
/// lock is released before the initializer runs, so a slow construction
/// never blocks other keys. A failed initializer leaves the cell empty and
/// the next caller retries.
pub struct Memoizer<K, V> {
    cells: DashMap<K, Arc<OnceCell<V>>>,
}

impl<K, V> Default for Memoizer<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Memoizer {
            cells: DashMap::new(),
        }
    }
}

impl<K, V> Memoizer<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_try_init<F, Err>(&self, key: &K, init: F) -> std::result::Result<V, Err>
    where
        F: FnOnce() -> std::result::Result<V, Err>,
    {
        let cell = match self.cells.get(key) {
            Some(cell) => Arc::clone(cell.value()),
            None => Arc::clone(
                self.cells
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(OnceCell::new()))
                    .value(),
            ),
        };
        cell.get_or_try_init(init).cloned()
    }

    /// The value for `key` if it has been computed.
    pub fn get(&self, key: &K) -> Option<V> {
        self.cells.get(key).and_then(|cell| cell.get().cloned())
    }

    /// Every computed value, in no particular order.
    pub fn values(&self) -> Vec<V> {
        self.cells
            .iter()
            .filter_map(|entry| entry.value().get().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.cells.iter().filter(|entry| entry.value().get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    #[test]
    fn concurrent_first_use_constructs_once() {
        let memo: Arc<Memoizer<String, Arc<usize>>> = Arc::new(Memoizer::new());
        let constructions = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let memo = Arc::clone(&memo);
                let constructions = Arc::clone(&constructions);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    memo.get_or_try_init(&"docs".to_string(), || {
                        constructions.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(std::time::Duration::from_millis(20));
                        Ok::<_, ()>(Arc::new(42))
                    })
                    .unwrap()
                })
            })
            .collect();

        let values: Vec<Arc<usize>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(constructions.load(Ordering::SeqCst), 1);
        assert!(values.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn failed_init_is_retried() {
        let memo: Memoizer<&'static str, u32> = Memoizer::new();
        let err = memo.get_or_try_init(&"docs", || Err::<u32, _>("boom"));
        assert_eq!(err, Err("boom"));
        assert_eq!(memo.get(&"docs"), None);
        assert!(memo.is_empty());

        let ok = memo.get_or_try_init(&"docs", || Ok::<_, &str>(7));
        assert_eq!(ok, Ok(7));
        assert_eq!(memo.values(), vec![7]);
    }

    #[test]
    fn distinct_keys_are_independent() {
        let memo: Memoizer<u8, u8> = Memoizer::new();
        memo.get_or_try_init(&1, || Ok::<_, ()>(10)).unwrap();
        memo.get_or_try_init(&2, || Ok::<_, ()>(20)).unwrap();
        assert_eq!(memo.get(&1), Some(10));
        assert_eq!(memo.get(&2), Some(20));
        assert_eq!(memo.len(), 2);
    }
}
