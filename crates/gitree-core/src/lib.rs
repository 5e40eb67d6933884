//! gitree-core: a forest of git clones as one read-only tree.
//!
//! Paths look like `/<repository>/<commitish>/<subpath...>`. Nothing is read
//! up front: repositories are opened on first reference, a commitish is
//! resolved when it is first named, and its tree is materialized from a flat
//! file listing the first time anything below it is touched.
//!
//! This crate provides:
//!
//! - **Providers**: the git object database behind a narrow trait (`git2`
//!   on disk, or in memory for tests)
//! - **Tree builder**: flat listing → linked [`Entry`] tree
//! - **Node cache**: [`Root`] → [`Repository`] → [`Commitish`] with
//!   at-most-once creation and fetching
//! - **Inode registry**: numeric IDs for kernel-protocol front-ends
//! - **Handle registry**: persistent path ↔ handle map for network front-ends
//! - **VFS**: a path-addressed read-only filesystem trait and its git
//!   implementation
//! - **Config**: the optional `config.toml` and XDG locations

pub mod attr;
pub mod config;
pub mod error;
pub mod handle;
pub mod inode;
mod memo;
pub mod node;
pub mod path;
pub mod provider;
pub mod tree;
pub mod vfs;

/// Files at or above this size are refused instead of being read into memory.
pub const MAX_FILE_SIZE: u64 = 6 * 1024 * 1024;

pub use attr::{Attributes, NodeKind};
pub use error::{Error, Result};
pub use handle::{Handle, HandleRegistry};
pub use inode::{InodeRecord, InodeRegistry, ROOT_INODE};
pub use node::{Commitish, EntryNode, Node, Repository, Root};
pub use path::PathComponents;
pub use provider::{
    CommitId, GitProviderFactory, MemoryProvider, MemoryProviderFactory, ProviderFactory,
    RepositoryProvider,
};
pub use tree::{Entry, build_tree};
pub use vfs::{DirEntry, FileCursor, GitFileSystem, ReadOnlyFilesystem};
