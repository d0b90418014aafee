use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Counters describing an [`ObjectPool`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Objects currently sitting in the free list.
    pub pooled: usize,
    /// Objects allocated because the free list was empty.
    pub created: usize,
    /// Total `take_or_create` calls.
    pub taken: usize,
    /// Total `repool` calls.
    pub returned: usize,
}

impl PoolStats {
    /// Objects handed out and not returned yet.
    pub fn outstanding(&self) -> usize {
        self.taken.saturating_sub(self.returned)
    }
}

/// Free list of boxed objects of one concrete type.
///
/// `take_or_create` pops a recycled object or falls back to a fresh
/// `T::default()`; `repool` hands an object back. Objects beyond the
/// configured capacity are dropped instead of pooled.
///
/// Ownership does the bookkeeping: a taken `Box<T>` can only be returned
/// once because `repool` consumes it.
///
/// # Example
///
/// ```
/// use redlilium_promise::ObjectPool;
///
/// let pool: ObjectPool<Vec<u8>> = ObjectPool::new(4);
/// let buffer = pool.take_or_create();
/// pool.repool(buffer);
///
/// let stats = pool.stats();
/// assert_eq!(stats.pooled, 1);
/// assert_eq!(stats.outstanding(), 0);
/// ```
pub struct ObjectPool<T> {
    free: Mutex<Vec<Box<T>>>,
    capacity: usize,
    created: AtomicUsize,
    taken: AtomicUsize,
    returned: AtomicUsize,
}

impl<T: Default> ObjectPool<T> {
    /// Creates an empty pool that keeps at most `capacity` idle objects.
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            capacity,
            created: AtomicUsize::new(0),
            taken: AtomicUsize::new(0),
            returned: AtomicUsize::new(0),
        }
    }

    /// Takes a recycled object, or creates a new one if none is pooled.
    pub fn take_or_create(&self) -> Box<T> {
        self.taken.fetch_add(1, Ordering::AcqRel);
        if let Some(object) = self.free.lock().pop() {
            return object;
        }
        let created = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        if created == self.capacity + 1 {
            log::debug!(
                "{} pool grew past its capacity of {}",
                std::any::type_name::<T>(),
                self.capacity
            );
        }
        Box::default()
    }

    /// Returns an object to the pool.
    pub fn repool(&self, object: Box<T>) {
        self.returned.fetch_add(1, Ordering::AcqRel);
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(object);
        }
    }

    /// Number of idle objects.
    pub fn len(&self) -> usize {
        self.free.lock().len()
    }

    /// Returns `true` if no idle objects are pooled.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        // Every return follows its take, so read returns first.
        let returned = self.returned.load(Ordering::Acquire);
        PoolStats {
            pooled: self.len(),
            created: self.created.load(Ordering::Relaxed),
            taken: self.taken.load(Ordering::Acquire),
            returned,
        }
    }
}
