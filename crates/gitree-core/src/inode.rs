//! Numeric node identities for the kernel protocol.
//!
//! IDs are handed out lazily, the first time a node is reached by name, and
//! are never reused or reclaimed while the process lives. The same
//! `(parent, name)` pair always yields the same ID.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use parking_lot::Mutex;

use crate::error::Result;
use crate::node::{Node, Root};

/// Identity of the root directory.
pub const ROOT_INODE: u64 = 1;

/// A node with an allocated ID.
#[derive(Debug)]
pub struct InodeRecord {
    node: Node,
    contents: Mutex<Option<Arc<[u8]>>>,
}

impl InodeRecord {
    fn new(node: Node) -> Self {
        Self {
            node,
            contents: Mutex::new(None),
        }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    /// File contents, fetched from the provider on first use and kept.
    ///
    /// The per-record lock serializes fetches of one file only.
    pub fn contents(&self) -> Result<Arc<[u8]>> {
        let mut cached = self.contents.lock();
        if let Some(bytes) = cached.as_ref() {
            return Ok(Arc::clone(bytes));
        }
        let bytes: Arc<[u8]> = self.node.contents()?.into();
        *cached = Some(Arc::clone(&bytes));
        Ok(bytes)
    }
}

/// ID → node table plus the `(parent, name)` → ID index.
#[derive(Debug)]
pub struct InodeRegistry {
    records: DashMap<u64, Arc<InodeRecord>>,
    children: DashMap<(u64, String), u64>,
    next: AtomicU64,
}

impl InodeRegistry {
    /// A registry holding only the root.
    pub fn new(root: Arc<Root>) -> Self {
        let records = DashMap::new();
        records.insert(ROOT_INODE, Arc::new(InodeRecord::new(Node::Root(root))));
        Self {
            records,
            children: DashMap::new(),
            next: AtomicU64::new(ROOT_INODE + 1),
        }
    }

    pub fn get(&self, id: u64) -> Option<Arc<InodeRecord>> {
        self.records.get(&id).map(|r| Arc::clone(r.value()))
    }

    /// ID of `node`, known as `name` under `parent`, allocating one if this
    /// is the first time the pair has been seen.
    pub fn assign(&self, parent: u64, name: &str, node: Node) -> (u64, Arc<InodeRecord>) {
        match self.children.entry((parent, name.to_string())) {
            MapEntry::Occupied(existing) => {
                let id = *existing.get();
                if let Some(record) = self.get(id) {
                    return (id, record);
                }
                // Unreachable while records are never removed; re-register.
                let record = Arc::new(InodeRecord::new(node));
                self.records.insert(id, Arc::clone(&record));
                (id, record)
            }
            MapEntry::Vacant(slot) => {
                let id = self.next.fetch_add(1, Ordering::Relaxed);
                let record = Arc::new(InodeRecord::new(node));
                self.records.insert(id, Arc::clone(&record));
                slot.insert(id);
                tracing::trace!(inode = id, parent, name, "allocated inode");
                (id, record)
            }
        }
    }

    /// ID of an already allocated child, without touching the node graph.
    pub fn child_id(&self, parent: u64, name: &str) -> Option<u64> {
        self.children
            .get(&(parent, name.to_string()))
            .map(|id| *id.value())
    }

    /// Number of allocated IDs, the root included.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MemoryProvider, MemoryProviderFactory};
    use std::thread;

    fn registry() -> (InodeRegistry, Arc<Root>) {
        let provider = Arc::new(MemoryProvider::new());
        provider.add_commit(
            "abc1234f00000000000000000000000000000000",
            [("a.txt", "hello")],
        );
        let factory = Arc::new(MemoryProviderFactory::new());
        factory.insert("demo", provider);
        let root = Arc::new(Root::new("/clones", factory));
        (InodeRegistry::new(Arc::clone(&root)), root)
    }

    #[test]
    fn root_is_preallocated() {
        let (registry, _) = registry();
        assert_eq!(registry.len(), 1);
        assert!(matches!(registry.get(ROOT_INODE).unwrap().node(), Node::Root(_)));
        assert!(registry.get(ROOT_INODE + 1).is_none());
    }

    #[test]
    fn same_child_same_id() {
        let (registry, root) = registry();
        let repo = Node::Root(root).child("demo").unwrap();
        let (first, _) = registry.assign(ROOT_INODE, "demo", repo.clone());
        let (second, _) = registry.assign(ROOT_INODE, "demo", repo);
        assert_eq!(first, second);
        assert_eq!(first, ROOT_INODE + 1);
        assert_eq!(registry.child_id(ROOT_INODE, "demo"), Some(first));
    }

    #[test]
    fn ids_are_monotonic_and_unique() {
        let (registry, root) = registry();
        let node = Node::Root(root);
        let ids: Vec<u64> = (0..5)
            .map(|i| registry.assign(ROOT_INODE, &format!("n{i}"), node.clone()).0)
            .collect();
        assert_eq!(ids, [2, 3, 4, 5, 6]);
    }

    #[test]
    fn concurrent_assign_agrees() {
        let (registry, root) = registry();
        let registry = Arc::new(registry);
        let node = Node::Root(root);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let node = node.clone();
                thread::spawn(move || registry.assign(7, "x", node).0)
            })
            .collect();
        let ids: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.iter().all(|&id| id == ids[0]));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn contents_cached_on_record() {
        let (registry, root) = registry();
        let file = Node::Root(root)
            .child("demo")
            .and_then(|n| n.child("abc1234"))
            .and_then(|n| n.child("a.txt"))
            .unwrap();
        let (_, record) = registry.assign(99, "a.txt", file);
        let first = record.contents().unwrap();
        let second = record.contents().unwrap();
        assert_eq!(&*first, b"hello");
        assert!(Arc::ptr_eq(&first, &second));
    }
}
