// Remembers which cluster label a connection first reported, so later requests
// on the same connection that omit node metadata keep resolving to the same group.
use crate::node::ConnectionId;
use dashmap::DashMap;

#[derive(Default)]
pub struct StickinessCache {
    entries: DashMap<ConnectionId, String>,
}

impl StickinessCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `label` for `key` unless an entry already exists and returns the
    /// value that ends up in the cache. Concurrent callers for the same key all
    /// observe the single winning value.
    pub fn compute_if_absent(&self, key: &ConnectionId, label: &str) -> String {
        self.entries
            .entry(key.clone())
            .or_insert_with(|| label.to_owned())
            .value()
            .clone()
    }

    pub fn get(&self, key: &ConnectionId) -> Option<String> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn contains_key(&self, key: &ConnectionId) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&self, key: &ConnectionId) -> Option<String> {
        self.entries.remove(key).map(|(_, label)| label)
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
    use std::sync::Arc;

    #[test]
    fn test_first_write_wins() {
        let cache = StickinessCache::new();
        let conn = ConnectionId::new("10.0.0.1:5555");

        assert_eq!(cache.compute_if_absent(&conn, "priority"), "priority");
        assert_eq!(cache.compute_if_absent(&conn, "normal"), "priority");
        assert_eq!(cache.get(&conn).as_deref(), Some("priority"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_remove() {
        let cache = StickinessCache::new();
        let conn = ConnectionId::new("10.0.0.1:5555");

        assert_eq!(cache.remove(&conn), None);
        cache.compute_if_absent(&conn, "priority");
        assert!(cache.contains_key(&conn));
        assert_eq!(cache.remove(&conn).as_deref(), Some("priority"));
        assert!(!cache.contains_key(&conn));
        assert!(cache.is_empty());

        // A removed key can be bound again
        assert_eq!(cache.compute_if_absent(&conn, "normal"), "normal");
    }

    #[test]
    fn test_concurrent_compute_if_absent() {
        let cache = Arc::new(StickinessCache::new());
        let conn = ConnectionId::new("10.0.0.1:5555");

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let cache = cache.clone();
                let conn = conn.clone();
                std::thread::spawn(move || cache.compute_if_absent(&conn, &format!("label-{i}")))
            })
            .collect();

        let observed: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let stored = cache.get(&conn).unwrap();
        assert!(observed.iter().all(|label| *label == stored));
        assert_eq!(cache.len(), 1);
    }
}
