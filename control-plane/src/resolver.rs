use crate::metrics_defs::{GROUP_RESOLUTIONS, STICKY_ENTRIES, STICKY_RESTORES};
use crate::node::{ConnectionId, Node};
use crate::stickiness::StickinessCache;
use shared::{counter, gauge};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// Routing class a proxy is assigned to. Each group owns exactly one live
/// snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Group {
    Priority,
    Normal,
}

impl Group {
    pub const ALL: [Group; 2] = [Group::Priority, Group::Normal];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Group::Priority => "priority",
            Group::Normal => "normal",
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grouping function the snapshot store partitions nodes with. It is called
/// on every discovery request and its output is the snapshot key.
pub trait NodeGroup: Send + Sync {
    type Key: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    fn hash(&self, connection: &ConnectionId, node: &Node) -> Self::Key;
}

/// Case-insensitive label comparison. Characters are compared one by one
/// through their single-character upper and lower case mappings, so
/// `ÜBER` matches `über` and `PRİORİTY` matches `priority`, while
/// mappings that change the length (`ß` to `SS`) never match.
pub fn labels_match(a: &str, b: &str) -> bool {
    let mut a = a.chars();
    let mut b = b.chars();
    loop {
        match (a.next(), b.next()) {
            (None, None) => return true,
            (Some(x), Some(y)) if chars_match(x, y) => continue,
            _ => return false,
        }
    }
}

fn chars_match(x: char, y: char) -> bool {
    if x == y {
        return true;
    }
    let (x, y) = (simple_upper(x), simple_upper(y));
    x == y || simple_lower(x) == simple_lower(y)
}

fn simple_upper(c: char) -> char {
    let mut upper = c.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(u), None) => u,
        _ => c,
    }
}

// Only U+0130 lowercases to more than one char; its simple mapping is the
// leading `i`.
fn simple_lower(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

/// Maps a node to its group, keeping the first non-empty cluster label a
/// connection reported so that requests omitting node metadata stay in the
/// same group.
pub struct GroupResolver {
    cache: Arc<StickinessCache>,
    priority_label: String,
}

impl GroupResolver {
    pub fn new(cache: Arc<StickinessCache>, priority_label: impl Into<String>) -> Self {
        GroupResolver {
            cache,
            priority_label: priority_label.into(),
        }
    }

    /// Never fails: unknown and empty labels resolve to [`Group::Normal`].
    pub fn resolve(&self, connection: &ConnectionId, reported_label: &str) -> Group {
        if !reported_label.is_empty() {
            self.cache.compute_if_absent(connection, reported_label);
            gauge!(STICKY_ENTRIES).set(self.cache.len() as f64);
        }

        let restored = if reported_label.is_empty() {
            self.cache.get(connection)
        } else {
            None
        };

        let effective_label = match &restored {
            Some(label) => {
                tracing::info!(
                    cluster = %label,
                    client = %connection,
                    "Cluster information restored from cache"
                );
                counter!(STICKY_RESTORES).increment(1);
                label.as_str()
            }
            None => reported_label,
        };

        let group = if labels_match(effective_label, &self.priority_label) {
            Group::Priority
        } else {
            Group::Normal
        };

        tracing::debug!(cluster = %effective_label, %group, client = %connection, "Routing node");
        counter!(GROUP_RESOLUTIONS, "group" => group.as_str()).increment(1);

        group
    }
}

impl NodeGroup for GroupResolver {
    type Key = Group;

    fn hash(&self, connection: &ConnectionId, node: &Node) -> Group {
        self.resolve(connection, &node.cluster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> (Arc<StickinessCache>, GroupResolver) {
        let cache = Arc::new(StickinessCache::new());
        let resolver = GroupResolver::new(cache.clone(), "priority");
        (cache, resolver)
    }

    #[test]
    fn test_first_label_wins() {
        let (_cache, resolver) = resolver();
        let conn = ConnectionId::new("10.0.0.1:5555");

        assert_eq!(resolver.resolve(&conn, "priority"), Group::Priority);
        assert_eq!(resolver.resolve(&conn, "normal"), Group::Priority);

        let conn = ConnectionId::new("10.0.0.2:5555");
        assert_eq!(resolver.resolve(&conn, "other"), Group::Normal);
        assert_eq!(resolver.resolve(&conn, "priority"), Group::Normal);
    }

    #[test]
    fn test_empty_label_defaults_to_normal() {
        let (cache, resolver) = resolver();
        let conn = ConnectionId::new("10.0.0.1:5555");

        assert_eq!(resolver.resolve(&conn, ""), Group::Normal);
        // Empty labels never create a binding
        assert!(!cache.contains_key(&conn));
    }

    #[test]
    fn test_sticky_across_omitted_metadata() {
        let (_cache, resolver) = resolver();
        let conn = ConnectionId::new("10.0.0.1:5555");

        assert_eq!(resolver.resolve(&conn, "priority"), Group::Priority);
        assert_eq!(resolver.resolve(&conn, ""), Group::Priority);
        assert_eq!(resolver.resolve(&conn, ""), Group::Priority);

        // Other connections are unaffected
        let other = ConnectionId::new("10.0.0.1:5556");
        assert_eq!(resolver.resolve(&other, ""), Group::Normal);
    }

    #[test]
    fn test_eviction_resets_to_default() {
        let (cache, resolver) = resolver();
        let conn = ConnectionId::new("10.0.0.1:5555");

        assert_eq!(resolver.resolve(&conn, "priority"), Group::Priority);
        cache.remove(&conn);
        assert_eq!(resolver.resolve(&conn, ""), Group::Normal);
    }

    #[test]
    fn test_case_insensitive_label() {
        let (_cache, resolver) = resolver();

        let upper = resolver.resolve(&ConnectionId::new("10.0.0.1:1"), "PRIORITY");
        let lower = resolver.resolve(&ConnectionId::new("10.0.0.1:2"), "priority");
        let mixed = resolver.resolve(&ConnectionId::new("10.0.0.1:3"), "PrIoRiTy");
        assert_eq!(upper, Group::Priority);
        assert_eq!(upper, lower);
        assert_eq!(lower, mixed);

        // Case folding is not limited to ASCII
        let dotted = resolver.resolve(&ConnectionId::new("10.0.0.1:4"), "PRİORİTY");
        assert_eq!(dotted, Group::Priority);

        let resolver = GroupResolver::new(Arc::new(StickinessCache::new()), "über");
        assert_eq!(
            resolver.resolve(&ConnectionId::new("10.0.0.1:5"), "ÜBER"),
            Group::Priority
        );
        assert_eq!(
            resolver.resolve(&ConnectionId::new("10.0.0.1:6"), "UBER"),
            Group::Normal
        );
    }

    #[test]
    fn test_labels_match() {
        assert!(labels_match("priority", "PRIORITY"));
        assert!(labels_match("über", "ÜBER"));
        assert!(labels_match("Σίσυφος", "ΣΊΣΥΦΟΣ"));
        assert!(labels_match("", ""));
        assert!(!labels_match("straße", "STRASSE"));
        assert!(!labels_match("priority", "priorit"));
        assert!(!labels_match("priority", "normal"));
    }

    #[test]
    fn test_unknown_label() {
        let (_cache, resolver) = resolver();
        let conn = ConnectionId::new("10.0.0.2:5555");
        assert_eq!(resolver.resolve(&conn, "unknown-label"), Group::Normal);
    }

    #[test]
    fn test_configured_priority_label() {
        let cache = Arc::new(StickinessCache::new());
        let resolver = GroupResolver::new(cache, "gold");
        let conn = ConnectionId::new("10.0.0.1:5555");

        assert_eq!(resolver.resolve(&conn, "Gold"), Group::Priority);
        assert_eq!(
            resolver.resolve(&ConnectionId::new("10.0.0.1:5556"), "priority"),
            Group::Normal
        );
    }

    #[test]
    fn test_node_group_uses_cluster_label() {
        let (_cache, resolver) = resolver();
        let conn = ConnectionId::new("10.0.0.1:5555");

        assert_eq!(resolver.hash(&conn, &Node::with_cluster("priority")), Group::Priority);
        assert_eq!(resolver.hash(&conn, &Node::default()), Group::Priority);
    }
}
