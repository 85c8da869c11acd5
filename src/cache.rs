//! Request deduplication
//!
//! Keyed by the identity of the input buffer, not its contents: two
//! byte-identical but distinct allocations are distinct work. The
//! first request for a buffer installs a shared future; every
//! concurrent or later request for the same buffer gets a clone of
//! that future and therefore the same result, with the pipeline run
//! once.
//!
//! Entries are retained after delivery. A dropped-and-reallocated
//! buffer can alias an old pointer key, so callers reusing one cache
//! across unrelated buffer generations should `clear()` it between
//! them.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::DecodeError;

type CachedFuture<T> = Shared<BoxFuture<'static, Result<T, DecodeError>>>;

pub struct RequestCache<T: Clone> {
    inner: Mutex<HashMap<usize, CachedFuture<T>>>,
}

impl<T: Clone + Send + Sync + 'static> RequestCache<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Identity key for a buffer: its allocation address
    fn key(buffer: &Arc<[u8]>) -> usize {
        Arc::as_ptr(buffer) as *const u8 as usize
    }

    /// Return the future already registered for this buffer, or install
    /// the one produced by `make`.
    pub fn get_or_insert<F>(&self, buffer: &Arc<[u8]>, make: F) -> CachedFuture<T>
    where
        F: FnOnce() -> BoxFuture<'static, Result<T, DecodeError>>,
    {
        let mut map = self.inner.lock().expect("request cache lock poisoned");
        map.entry(Self::key(buffer))
            .or_insert_with(|| make().shared())
            .clone()
    }

    /// Drop every entry. The reclamation hook for callers that reuse a
    /// decoder across buffer generations.
    pub fn clear(&self) {
        self.inner
            .lock()
            .expect("request cache lock poisoned")
            .clear();
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("request cache lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send + Sync + 'static> Default for RequestCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
