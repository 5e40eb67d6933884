//! Repository providers: the narrow interface the tree engine consumes from
//! the git object database.
//!
//! - **GitProvider**: real clones on disk, read through `git2`
//! - **MemoryProvider**: in-memory commits for tests and fixtures
//!
//! A provider resolves commitish strings to commits, lists the regular
//! files of a commit as a flat path list, and reads one file's bytes.

mod git;
mod memory;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;

pub use git::{GitProvider, GitProviderFactory};
pub use memory::{MemoryProvider, MemoryProviderFactory};

/// Full hex object ID of a resolved commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommitId(String);

impl CommitId {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One regular file in a commit's tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Slash-separated path relative to the tree root, no leading `/`.
    pub path: String,
    pub size: u64,
}

/// Flat listing of every regular file of one commit.
///
/// Directories are implied by file paths; git does not track empty ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeListing {
    pub files: Vec<FileRecord>,
}

impl TreeListing {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Read access to one repository.
///
/// Implementations must be idempotent: resolving the same string twice
/// against unchanged repository state yields the same commit.
pub trait RepositoryProvider: Send + Sync {
    /// Resolve a full SHA, abbreviated SHA, branch or tag.
    fn resolve(&self, commitish: &str) -> Result<CommitId>;

    /// List the regular files of a commit's tree.
    fn list_tree(&self, commit: &CommitId) -> Result<TreeListing>;

    /// Read the full contents of one file at one commit.
    fn file_contents(&self, commit: &CommitId, path: &str) -> Result<Vec<u8>>;
}

/// Opens providers for repositories found under the clones directory.
pub trait ProviderFactory: Send + Sync {
    /// Open the repository called `name`, located at `clone_path`.
    fn open(&self, name: &str, clone_path: &Path) -> Result<Arc<dyn RepositoryProvider>>;
}
