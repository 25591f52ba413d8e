//! Process-wide negative cache for property lookups in previous documents.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::core::path::DocId;

/// Remembers `property@previous-doc-id` keys whose previous-document
/// subtree proved to hold no revisions for that property at all.
///
/// Entries are written only after a negative scan completed, and the cache
/// is safe to evict at any time.
#[derive(Default)]
pub struct PrevNoPropCache {
    inner: Mutex<HashSet<String>>,
}

impl PrevNoPropCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(property: &str, prev_id: &DocId) -> String {
        format!("{}@{}", property, prev_id)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains(key)
    }

    pub fn put(&self, key: String) {
        self.lock().insert(key);
    }

    pub fn evict_all(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_and_evict() {
        let cache = PrevNoPropCache::new();
        let key = PrevNoPropCache::key("p", &DocId::parse("2:p/a/1-0-1/0").unwrap());
        assert!(!cache.contains(&key));
        cache.put(key.clone());
        assert!(cache.contains(&key));
        cache.evict_all();
        assert!(cache.is_empty());
    }
}
