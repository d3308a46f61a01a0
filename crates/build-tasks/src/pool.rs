//! Object Pools
//!
//! A free list of reusable values, typically large buffers. Pools are plain
//! values; whoever needs one shared constructs it and hands out references.

use std::io::Cursor;
use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;
type Reset<T> = Box<dyn Fn(&mut T) + Send + Sync>;

/// Thread-safe pool of `T`
pub struct ObjectPool<T> {
    items: Mutex<Vec<T>>,
    factory: Factory<T>,
    reset: Option<Reset<T>>,
}

impl<T> ObjectPool<T> {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            items: Mutex::new(Vec::new()),
            factory: Box::new(factory),
            reset: None,
        }
    }

    /// Run `reset` on every item as it is returned
    pub fn with_reset<R>(mut self, reset: R) -> Self
    where
        R: Fn(&mut T) + Send + Sync + 'static,
    {
        self.reset = Some(Box::new(reset));
        self
    }

    /// Take a pooled item, creating one if the pool is empty
    pub fn rent(&self) -> T {
        let pooled = self.items.lock().pop();
        pooled.unwrap_or_else(|| (self.factory)())
    }

    /// Give `item` back to the pool
    pub fn return_item(&self, mut item: T) {
        if let Some(reset) = &self.reset {
            reset(&mut item);
        }
        self.items.lock().push(item);
    }

    /// Rent an item that returns itself when dropped
    pub fn get(&self) -> Pooled<'_, T> {
        Pooled {
            pool: self,
            item: Some(self.rent()),
        }
    }

    /// Number of idle items
    pub fn available(&self) -> usize {
        self.items.lock().len()
    }
}

/// An item on loan from an [`ObjectPool`]
pub struct Pooled<'a, T> {
    pool: &'a ObjectPool<T>,
    item: Option<T>,
}

impl<T> Pooled<'_, T> {
    /// Keep the item instead of returning it
    pub fn into_inner(mut self) -> Option<T> {
        self.item.take()
    }
}

impl<T> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.item {
            Some(item) => item,
            None => unreachable!("pooled item is only taken on drop or into_inner"),
        }
    }
}

impl<T> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.item {
            Some(item) => item,
            None => unreachable!("pooled item is only taken on drop or into_inner"),
        }
    }
}

impl<T> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.return_item(item);
        }
    }
}

/// Pool of in-memory streams, emptied and rewound on return
pub struct MemoryStreamPool {
    pool: ObjectPool<Cursor<Vec<u8>>>,
}

impl MemoryStreamPool {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// New streams start with `capacity` bytes reserved
    pub fn with_capacity(capacity: usize) -> Self {
        let pool = ObjectPool::new(move || Cursor::new(Vec::with_capacity(capacity))).with_reset(|stream| {
            stream.get_mut().clear();
            stream.set_position(0);
        });
        Self { pool }
    }

    pub fn rent(&self) -> Cursor<Vec<u8>> {
        self.pool.rent()
    }

    pub fn return_item(&self, stream: Cursor<Vec<u8>>) {
        self.pool.return_item(stream);
    }

    pub fn get(&self) -> Pooled<'_, Cursor<Vec<u8>>> {
        self.pool.get()
    }

    pub fn available(&self) -> usize {
        self.pool.available()
    }
}

impl Default for MemoryStreamPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_rent_reuses_returned_items() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let pool = ObjectPool::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Vec::<u8>::with_capacity(16)
        });

        let first = pool.rent();
        pool.return_item(first);
        let _again = pool.rent();
        assert_eq!(created.load(Ordering::SeqCst), 1);

        let _other = pool.rent();
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_guard_returns_on_drop() {
        let pool = ObjectPool::new(String::new).with_reset(|s: &mut String| s.clear());
        {
            let mut s = pool.get();
            s.push_str("scratch");
            assert_eq!(pool.available(), 0);
        }
        assert_eq!(pool.available(), 1);
        assert!(pool.rent().is_empty());

        let kept = pool.get().into_inner();
        assert_eq!(kept.as_deref(), Some(""));
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_memory_stream_reset_on_return() {
        let pool = MemoryStreamPool::with_capacity(64);
        let mut stream = pool.rent();
        stream.write_all(b"some bytes").unwrap();
        assert_eq!(stream.position(), 10);
        pool.return_item(stream);

        let stream = pool.rent();
        assert_eq!(stream.position(), 0);
        assert!(stream.get_ref().is_empty());
        assert!(stream.get_ref().capacity() >= 10);
    }

    #[test]
    fn test_shared_across_threads() {
        let pool = Arc::new(MemoryStreamPool::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let mut stream = pool.get();
                        write!(stream, "{}", i).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(pool.available() >= 1 && pool.available() <= 4);
    }
}
