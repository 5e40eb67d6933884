//! Node attributes, independent of either wire protocol.

use std::sync::OnceLock;
use std::time::SystemTime;

/// File-vs-directory discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    File,
    Directory,
}

/// Permission bits for directories (read + traverse, no write).
pub const DIRECTORY_PERMISSIONS: u16 = 0o555;
/// Permission bits for files (read only).
pub const FILE_PERMISSIONS: u16 = 0o444;
/// Block size advertised to both protocols.
pub const BLOCK_SIZE: u32 = 4096;

/// Attributes reported for every node.
///
/// Timestamps are the time of the query: git trees carry no per-file
/// modification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributes {
    pub kind: NodeKind,
    pub size: u64,
    pub permissions: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub time: SystemTime,
}

impl Attributes {
    pub fn directory() -> Self {
        let (uid, gid) = owner();
        Self {
            kind: NodeKind::Directory,
            size: 0,
            permissions: DIRECTORY_PERMISSIONS,
            nlink: 1,
            uid,
            gid,
            time: SystemTime::now(),
        }
    }

    pub fn file(size: u64) -> Self {
        let (uid, gid) = owner();
        Self {
            kind: NodeKind::File,
            size,
            permissions: FILE_PERMISSIONS,
            nlink: 1,
            uid,
            gid,
            time: SystemTime::now(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    /// Number of 512-byte blocks, as `stat(2)` counts them.
    pub fn blocks(&self) -> u64 {
        self.size.div_ceil(512)
    }
}

/// uid/gid of the serving process, read once.
fn owner() -> (u32, u32) {
    static OWNER: OnceLock<(u32, u32)> = OnceLock::new();
    *OWNER.get_or_init(|| {
        (
            nix::unistd::getuid().as_raw(),
            nix::unistd::getgid().as_raw(),
        )
    })
}
