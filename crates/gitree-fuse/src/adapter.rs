//! Kernel-protocol operations over numeric node IDs.
//!
//! Nothing here knows about FUSE wire types; [`crate::fuse`] translates.
//! Every operation is synchronous and may block on the provider, so the
//! caller is expected to run it on a worker thread.

use std::sync::Arc;

use gitree_core::{Attributes, Error, InodeRecord, InodeRegistry, NodeKind, Root};

/// Kernel-protocol failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    #[error("no such entry")]
    NoEntry,
    #[error("input/output error")]
    Io,
    /// Directory read past the last child.
    #[error("directory offset out of range")]
    OffsetOutOfRange,
}

impl KernelError {
    pub fn errno(self) -> i32 {
        match self {
            KernelError::NoEntry => libc::ENOENT,
            KernelError::Io | KernelError::OffsetOutOfRange => libc::EIO,
        }
    }
}

impl From<Error> for KernelError {
    fn from(e: Error) -> Self {
        match e {
            Error::NotFound(_) | Error::InvalidRevision(_) => KernelError::NoEntry,
            _ => KernelError::Io,
        }
    }
}

pub type KernelResult<T> = std::result::Result<T, KernelError>;

/// One directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub id: u64,
    /// Offset to resume listing after this entry.
    pub next_offset: u64,
    pub name: String,
    pub kind: NodeKind,
}

/// Filesystem-wide numbers for `statfs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    pub inodes: u64,
    pub block_size: u32,
    pub name_max: u32,
}

/// The kernel-protocol adapter.
#[derive(Debug)]
pub struct KernelAdapter {
    inodes: InodeRegistry,
}

impl KernelAdapter {
    pub fn new(root: Arc<Root>) -> Self {
        Self {
            inodes: InodeRegistry::new(root),
        }
    }

    pub fn inodes(&self) -> &InodeRegistry {
        &self.inodes
    }

    fn record(&self, id: u64) -> KernelResult<Arc<InodeRecord>> {
        self.inodes.get(id).ok_or_else(|| {
            tracing::debug!(inode = id, "unknown inode");
            KernelError::NoEntry
        })
    }

    /// Child `name` of `parent`: its ID (allocated on first lookup) and
    /// attributes.
    pub fn lookup(&self, parent: u64, name: &str) -> KernelResult<(u64, Attributes)> {
        let record = self.record(parent)?;
        let child = record.node().child(name).map_err(|e| {
            log_error("lookup", parent, name, &e);
            KernelError::from(e)
        })?;
        let attributes = child.attributes();
        let (id, _) = self.inodes.assign(parent, name, child);
        Ok((id, attributes))
    }

    pub fn attributes(&self, id: u64) -> KernelResult<Attributes> {
        Ok(self.record(id)?.node().attributes())
    }

    /// Opening needs no state beyond the ID itself.
    pub fn open_directory(&self, id: u64) -> KernelResult<()> {
        self.record(id).map(|_| ())
    }

    pub fn open_file(&self, id: u64) -> KernelResult<()> {
        self.record(id).map(|_| ())
    }

    /// Children of `id` sorted by name, starting at index `offset`.
    ///
    /// An `offset` at or past the number of children is
    /// [`KernelError::OffsetOutOfRange`], never an empty listing.
    pub fn read_directory(&self, id: u64, offset: u64) -> KernelResult<Vec<DirectoryEntry>> {
        let record = self.record(id)?;
        let children = record.node().children().map_err(|e| {
            log_error("readdir", id, "", &e);
            KernelError::from(e)
        })?;

        let start = usize::try_from(offset).map_err(|_| KernelError::OffsetOutOfRange)?;
        if start >= children.len() {
            return Err(KernelError::OffsetOutOfRange);
        }

        Ok(children
            .into_iter()
            .enumerate()
            .skip(start)
            .map(|(index, (name, node))| {
                let kind = node.attributes().kind;
                let (child_id, _) = self.inodes.assign(id, &name, node);
                DirectoryEntry {
                    id: child_id,
                    next_offset: index as u64 + 1,
                    name,
                    kind,
                }
            })
            .collect())
    }

    /// Up to `length` bytes of `id` from `offset`.
    ///
    /// Contents are fetched once and cached on the ID. Reading at or past
    /// end of file returns no bytes; directories read as empty.
    pub fn read_file(&self, id: u64, offset: u64, length: usize) -> KernelResult<Vec<u8>> {
        let record = self.record(id)?;
        let contents = record.contents().map_err(|e| {
            log_error("read", id, "", &e);
            KernelError::from(e)
        })?;
        let Ok(start) = usize::try_from(offset) else {
            return Ok(Vec::new());
        };
        let Some(available) = contents.get(start..) else {
            return Ok(Vec::new());
        };
        Ok(available[..available.len().min(length)].to_vec())
    }

    pub fn statfs(&self) -> FsStats {
        FsStats {
            inodes: self.inodes.len() as u64,
            block_size: gitree_core::attr::BLOCK_SIZE,
            name_max: 255,
        }
    }
}

fn log_error(op: &str, inode: u64, name: &str, error: &Error) {
    if error.is_expected() {
        tracing::debug!(op, inode, name, %error, "not found");
    } else {
        tracing::error!(op, inode, name, %error, "request failed");
    }
}
