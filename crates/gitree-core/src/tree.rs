//! Tree builder: turns a provider's flat file listing into a linked tree.
//!
//! The listing only names regular files. Ancestor directories are created
//! top-down the first time a path needs them, memoized by full path for
//! the duration of one build. The memo is scratch state and is dropped
//! with the builder; the finished tree is immutable.

use std::collections::HashMap;
use std::sync::Arc;

use crate::attr::Attributes;
use crate::error::{Error, Result};
use crate::path::split_parent;
use crate::provider::TreeListing;

/// A file or directory inside one commitish's materialized tree.
///
/// Entries carry no path: contents are fetched by commitish + sub-path,
/// which the caller already knows when it walks down to an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    File { size: u64 },
    Directory { children: HashMap<String, Arc<Entry>> },
}

impl Entry {
    pub fn empty_directory() -> Self {
        Entry::Directory {
            children: HashMap::new(),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Entry::Directory { .. })
    }

    /// File size in bytes; directories are always 0.
    pub fn size(&self) -> u64 {
        match self {
            Entry::File { size } => *size,
            Entry::Directory { .. } => 0,
        }
    }

    pub fn attributes(&self) -> Attributes {
        match self {
            Entry::File { size } => Attributes::file(*size),
            Entry::Directory { .. } => Attributes::directory(),
        }
    }

    /// Direct child by name. Files have no children.
    pub fn child(&self, name: &str) -> Option<&Arc<Entry>> {
        match self {
            Entry::Directory { children } => children.get(name),
            Entry::File { .. } => None,
        }
    }

    /// Children sorted by name. Files list as empty.
    pub fn sorted_children(&self) -> Vec<(&str, &Arc<Entry>)> {
        match self {
            Entry::Directory { children } => {
                let mut sorted: Vec<_> = children
                    .iter()
                    .map(|(name, entry)| (name.as_str(), entry))
                    .collect();
                sorted.sort_unstable_by(|a, b| a.0.cmp(b.0));
                sorted
            }
            Entry::File { .. } => Vec::new(),
        }
    }

    pub fn child_count(&self) -> usize {
        match self {
            Entry::Directory { children } => children.len(),
            Entry::File { .. } => 0,
        }
    }

    /// Walk down a slash-separated sub-path; the empty path is `self`.
    pub fn find(self: &Arc<Self>, sub_path: &str) -> Option<Arc<Entry>> {
        let mut current = Arc::clone(self);
        for part in sub_path.split('/').filter(|p| !p.is_empty()) {
            let next = current.child(part)?.clone();
            current = next;
        }
        Some(current)
    }
}

/// Scratch directory used while building.
#[derive(Debug, Default)]
struct PendingDir {
    files: HashMap<String, u64>,
    dirs: HashMap<String, usize>,
}

/// One build pass over a [`TreeListing`].
#[derive(Debug)]
struct TreeBuilder {
    dirs: Vec<PendingDir>,
    by_path: HashMap<String, usize>,
}

impl TreeBuilder {
    fn new() -> Self {
        let mut by_path = HashMap::new();
        by_path.insert(String::new(), 0);
        Self {
            dirs: vec![PendingDir::default()],
            by_path,
        }
    }

    /// Index of the directory at `path`, creating it and its ancestors.
    fn ensure_dir(&mut self, path: &str) -> Result<usize> {
        if let Some(&idx) = self.by_path.get(path) {
            return Ok(idx);
        }
        let (parent_path, name) = split_parent(path);
        if name.is_empty() {
            return Err(Error::internal(format!("malformed tree path '{path}'")));
        }
        let parent = self.ensure_dir(parent_path)?;
        if self.dirs[parent].files.contains_key(name) {
            return Err(Error::internal(format!(
                "tree path '{path}' is both a file and a directory"
            )));
        }

        let idx = self.dirs.len();
        self.dirs.push(PendingDir::default());
        self.dirs[parent].dirs.insert(name.to_string(), idx);
        self.by_path.insert(path.to_string(), idx);
        Ok(idx)
    }

    fn add_file(&mut self, path: &str, size: u64) -> Result<()> {
        let (parent_path, name) = split_parent(path);
        if name.is_empty() {
            return Err(Error::internal(format!("malformed tree path '{path}'")));
        }
        let parent = self.ensure_dir(parent_path)?;
        if self.dirs[parent].dirs.contains_key(name) {
            return Err(Error::internal(format!(
                "tree path '{path}' is both a file and a directory"
            )));
        }
        // A repeated file path keeps the last size seen.
        self.dirs[parent].files.insert(name.to_string(), size);
        Ok(())
    }

    fn freeze(&self, idx: usize) -> Arc<Entry> {
        let pending = &self.dirs[idx];
        let mut children = HashMap::with_capacity(pending.files.len() + pending.dirs.len());
        for (name, &size) in &pending.files {
            children.insert(name.clone(), Arc::new(Entry::File { size }));
        }
        for (name, &child) in &pending.dirs {
            children.insert(name.clone(), self.freeze(child));
        }
        Arc::new(Entry::Directory { children })
    }
}

/// Build the tree for one commit. An empty listing yields an empty root.
///
/// A file path that collides with a directory path (in either order)
/// rejects the whole build with [`Error::Internal`].
pub fn build_tree(listing: &TreeListing) -> Result<Arc<Entry>> {
    let mut builder = TreeBuilder::new();
    for file in &listing.files {
        let path = file.path.trim_start_matches('/');
        builder.add_file(path, file.size)?;
    }
    Ok(builder.freeze(0))
}
