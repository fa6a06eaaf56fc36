use crate::metrics_defs::SNAPSHOT_UPDATES;
use crate::node::{ConnectionId, Node};
use crate::resolver::NodeGroup;
use crate::snapshot::{Snapshot, SnapshotError};
use parking_lot::RwLock;
use shared::counter;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

type SnapshotSlot = watch::Sender<Option<Arc<Snapshot>>>;

/// Holds the current snapshot of every group and partitions nodes into
/// groups with the grouping function it was built with.
///
/// Snapshots are only ever replaced whole. Readers clone the `Arc` of the
/// snapshot current at the time of the read, so a reader sees either the old
/// or the new snapshot and never a mix of both.
pub struct SnapshotCache<G: NodeGroup> {
    groups: G,
    snapshots: RwLock<HashMap<G::Key, SnapshotSlot>>,
    last_version: AtomicU64,
}

impl<G: NodeGroup> SnapshotCache<G> {
    pub fn new(groups: G) -> Self {
        SnapshotCache {
            groups,
            snapshots: RwLock::new(HashMap::new()),
            last_version: AtomicU64::new(0),
        }
    }

    /// Maps a node on a connection to the key its snapshot is stored under.
    pub fn group_for(&self, connection: &ConnectionId, node: &Node) -> G::Key {
        self.groups.hash(connection, node)
    }

    /// Validates `snapshot`, stamps it with a version no earlier snapshot of
    /// this cache carried, and makes it the current snapshot for `key`.
    pub fn set_snapshot(&self, key: G::Key, snapshot: Snapshot) -> Result<Arc<Snapshot>, SnapshotError> {
        snapshot.validate()?;

        let version = self.last_version.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot = Arc::new(snapshot.with_version(format!("v{version}")));

        let mut write_guard = self.snapshots.write();
        match write_guard.entry(key.clone()) {
            Entry::Occupied(slot) => {
                slot.get().send_replace(Some(snapshot.clone()));
            }
            Entry::Vacant(slot) => {
                let (tx, _rx) = watch::channel(Some(snapshot.clone()));
                slot.insert(tx);
            }
        }
        drop(write_guard);

        tracing::info!(group = ?key, version = snapshot.version(), "Snapshot updated");
        counter!(SNAPSHOT_UPDATES).increment(1);

        Ok(snapshot)
    }

    pub fn get_snapshot(&self, key: &G::Key) -> Option<Arc<Snapshot>> {
        self.snapshots
            .read()
            .get(key)
            .and_then(|slot| slot.borrow().clone())
    }

    /// Subscribes to snapshot changes for `key`. The receiver starts out
    /// holding the current snapshot, if any.
    pub fn watch(&self, key: &G::Key) -> watch::Receiver<Option<Arc<Snapshot>>> {
        if let Some(slot) = self.snapshots.read().get(key) {
            return slot.subscribe();
        }

        self.snapshots
            .write()
            .entry(key.clone())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    /// Keys that currently hold a snapshot.
    pub fn groups(&self) -> Vec<G::Key> {
        self.snapshots
            .read()
            .iter()
            .filter(|(_, slot)| slot.borrow().is_some())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// True once every one of `keys` has a snapshot.
    pub fn is_ready(&self, keys: &[G::Key]) -> bool {
        let read_guard = self.snapshots.read();
        keys.iter().all(|key| {
            read_guard
                .get(key)
                .is_some_and(|slot| slot.borrow().is_some())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{Group, GroupResolver};
    use crate::snapshot::build_snapshot;
    use crate::stickiness::StickinessCache;
    use std::net::SocketAddr;

    fn cache() -> SnapshotCache<GroupResolver> {
        let resolver = GroupResolver::new(Arc::new(StickinessCache::new()), "priority");
        SnapshotCache::new(resolver)
    }

    fn snapshot(group: &str, port: u16) -> Snapshot {
        build_snapshot(group, SocketAddr::from(([127, 0, 0, 1], port)), "my-test-domain")
    }

    #[test]
    fn test_get_and_set() {
        let cache = cache();
        assert!(cache.get_snapshot(&Group::Priority).is_none());
        assert!(!cache.is_ready(&Group::ALL));

        cache
            .set_snapshot(Group::Priority, snapshot("priority", 12000))
            .unwrap();
        assert!(!cache.is_ready(&Group::ALL));
        cache.set_snapshot(Group::Normal, snapshot("normal", 14000)).unwrap();
        assert!(cache.is_ready(&Group::ALL));
        let mut groups = cache.groups();
        groups.sort_by_key(|group| group.as_str());
        assert_eq!(groups, vec![Group::Normal, Group::Priority]);

        let current = cache.get_snapshot(&Group::Priority).unwrap();
        let targets: Vec<&str> = current.routes()[0].target_clusters().collect();
        assert_eq!(targets, vec!["priority"]);
    }

    #[test]
    fn test_versions_are_distinct() {
        let cache = cache();
        let first = cache
            .set_snapshot(Group::Priority, snapshot("priority", 12000))
            .unwrap();
        let second = cache
            .set_snapshot(Group::Normal, snapshot("normal", 14000))
            .unwrap();
        let third = cache
            .set_snapshot(Group::Priority, snapshot("priority", 12001))
            .unwrap();

        assert_ne!(first.version(), second.version());
        assert_ne!(first.version(), third.version());
        assert_ne!(second.version(), third.version());
        assert_eq!(
            cache.get_snapshot(&Group::Priority).unwrap().version(),
            third.version()
        );
    }

    #[test]
    fn test_invalid_snapshot_rejected() {
        let cache = cache();
        let priority = snapshot("priority", 12000);
        let broken = Snapshot::new(vec![], vec![], vec![], priority.routes().to_vec());

        assert!(cache.set_snapshot(Group::Priority, broken).is_err());
        assert!(cache.get_snapshot(&Group::Priority).is_none());
    }

    #[test]
    fn test_group_for_uses_grouping_function() {
        let cache = cache();
        let conn = ConnectionId::new("10.0.0.1:5555");
        assert_eq!(cache.group_for(&conn, &Node::with_cluster("PRIORITY")), Group::Priority);
        assert_eq!(cache.group_for(&conn, &Node::default()), Group::Priority);
    }

    #[tokio::test]
    async fn test_watch_notified_on_replace() {
        let cache = cache();
        let mut rx = cache.watch(&Group::Normal);
        assert!(rx.borrow().is_none());
        // Watching alone does not register a snapshot
        assert!(cache.groups().is_empty());

        cache.set_snapshot(Group::Normal, snapshot("normal", 14000)).unwrap();
        rx.changed().await.unwrap();
        let version = rx.borrow_and_update().as_ref().unwrap().version().to_string();
        assert_eq!(version, cache.get_snapshot(&Group::Normal).unwrap().version());
    }

    #[test]
    fn test_concurrent_readers_see_consistent_snapshots() {
        let cache = Arc::new(cache());
        cache
            .set_snapshot(Group::Priority, snapshot("priority", 12000))
            .unwrap();

        let writer = {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    let name = if i % 2 == 0 { "priority" } else { "priority-alt" };
                    cache
                        .set_snapshot(Group::Priority, snapshot(name, 12000))
                        .unwrap();
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let current = cache.get_snapshot(&Group::Priority).unwrap();
                        let clusters: Vec<&str> =
                            current.clusters().iter().map(|c| c.name.as_str()).collect();
                        for route in current.routes() {
                            for target in route.target_clusters() {
                                assert!(clusters.contains(&target));
                            }
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
