use std::{
    num::NonZeroUsize,
    sync::{Arc, Mutex, PoisonError},
};

use bytes::Bytes;
use lru::LruCache;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ChunkKey {
    path: String,
    chunk: usize,
}

/// LRU of decoded chunks, sized in chunks.
#[derive(Clone)]
pub struct StreamCache {
    cache: Arc<Mutex<LruCache<ChunkKey, Bytes>>>,
}

fn capacity(size: u64) -> NonZeroUsize {
    NonZeroUsize::new(size as usize).unwrap_or(NonZeroUsize::MIN)
}

impl StreamCache {
    pub fn new(size: u64) -> Self {
        Self {
            cache: Arc::new(Mutex::new(LruCache::new(capacity(size)))),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<ChunkKey, Bytes>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, path: &str, chunk: usize) -> Option<Bytes> {
        self.lock()
            .get(&ChunkKey {
                path: path.to_string(),
                chunk,
            })
            .cloned()
    }

    pub fn put(&self, path: &str, chunk: usize, data: Bytes) {
        self.lock().put(
            ChunkKey {
                path: path.to_string(),
                chunk,
            },
            data,
        );
    }

    pub fn resize(&self, size: u64) {
        self.lock().resize(capacity(size));
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn invalidate(&self, path: &str) {
        let mut cache = self.lock();
        let stale: Vec<ChunkKey> = cache
            .iter()
            .filter(|(k, _)| k.path == path)
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            cache.pop(&key);
        }
    }
}
