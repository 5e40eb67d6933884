//! Core VFS traits and types.

use std::io::SeekFrom;
use std::path::Path;
use std::time::SystemTime;

use async_trait::async_trait;

use crate::attr::{Attributes, NodeKind};
use crate::error::Result;

/// A directory entry, also used as the result of `stat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Name of the entry (not full path).
    pub name: String,
    pub kind: NodeKind,
    /// Size in bytes (0 for directories).
    pub size: u64,
    pub modified: SystemTime,
    /// Unix permission bits.
    pub permissions: u32,
}

impl DirEntry {
    pub fn from_attributes(name: impl Into<String>, attributes: &Attributes) -> Self {
        Self {
            name: name.into(),
            kind: attributes.kind,
            size: attributes.size,
            modified: attributes.time,
            permissions: u32::from(attributes.permissions),
        }
    }

    /// Synthetic directory entry (root, repository).
    pub fn directory(name: impl Into<String>) -> Self {
        Self::from_attributes(name, &Attributes::directory())
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }
}

/// Read-only filesystem interface.
///
/// All paths are absolute within the filesystem (`/` is the root).
#[async_trait]
pub trait ReadOnlyFilesystem: Send + Sync {
    type File: FileCursor;

    /// Open a file for reading. Directories cannot be opened.
    async fn open(&self, path: &Path) -> Result<Self::File>;

    /// Metadata for a file or directory.
    async fn stat(&self, path: &Path) -> Result<DirEntry>;

    /// Entries of a directory, sorted by name.
    async fn read_directory(&self, path: &Path) -> Result<Vec<DirEntry>>;

    /// Always true; kept so front-ends can advertise it.
    fn read_only(&self) -> bool {
        true
    }
}

/// An open file with its own position.
#[async_trait]
pub trait FileCursor: Send + Sync {
    /// Full path the file was opened with.
    fn name(&self) -> &str;

    fn size(&self) -> u64;

    /// Read at the current position and advance it. Returns 0 at or past
    /// end of file.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Read at `offset` without moving the position.
    async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Move the position; returns the new position.
    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    /// Close the cursor. Every later operation fails with `ClosedResource`.
    fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}
