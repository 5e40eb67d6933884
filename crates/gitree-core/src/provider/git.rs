//! Provider backed by a git clone on disk, read through libgit2.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::{ErrorCode, ObjectType, Oid, Repository, TreeWalkMode, TreeWalkResult};
use parking_lot::Mutex;

use super::{CommitId, FileRecord, ProviderFactory, RepositoryProvider, TreeListing};
use crate::error::{Error, Result};

/// Idle handles kept per repository; more are opened on demand under load.
const MAX_IDLE_HANDLES: usize = 8;

/// Read-only access to one git clone.
///
/// `git2::Repository` is not `Sync`, so the provider keeps a small pool of
/// opened handles. Concurrent reads of different blobs each get their own
/// handle instead of queueing on a single one.
pub struct GitProvider {
    clone_path: PathBuf,
    idle: Mutex<Vec<Repository>>,
}

impl std::fmt::Debug for GitProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitProvider")
            .field("clone_path", &self.clone_path)
            .finish()
    }
}

impl GitProvider {
    /// Open the clone at `clone_path` (bare or with a work tree).
    pub fn open(clone_path: impl Into<PathBuf>) -> Result<Self> {
        let clone_path = clone_path.into();
        let repo = Repository::open(&clone_path).map_err(|e| open_error(&clone_path, e))?;
        tracing::info!(
            path = %clone_path.display(),
            bare = repo.is_bare(),
            "opened repository"
        );
        Ok(Self {
            clone_path,
            idle: Mutex::new(vec![repo]),
        })
    }

    pub fn clone_path(&self) -> &Path {
        &self.clone_path
    }

    /// Run `f` with a pooled repository handle.
    fn with_repository<T>(&self, f: impl FnOnce(&Repository) -> Result<T>) -> Result<T> {
        let pooled = self.idle.lock().pop();
        let repo = match pooled {
            Some(repo) => repo,
            None => {
                Repository::open(&self.clone_path).map_err(|e| open_error(&self.clone_path, e))?
            }
        };
        let result = f(&repo);
        let mut idle = self.idle.lock();
        if idle.len() < MAX_IDLE_HANDLES {
            idle.push(repo);
        }
        result
    }
}

fn find_commit<'r>(repo: &'r Repository, commit: &CommitId) -> Result<git2::Commit<'r>> {
    let oid = Oid::from_str(commit.as_str())
        .map_err(|_| Error::InvalidRevision(commit.to_string()))?;
    repo.find_commit(oid)
        .map_err(|e| revision_error(commit.as_str(), e))
}

impl RepositoryProvider for GitProvider {
    fn resolve(&self, commitish: &str) -> Result<CommitId> {
        self.with_repository(|repo| {
            let object = repo
                .revparse_single(commitish)
                .map_err(|e| revision_error(commitish, e))?;
            let commit = object
                .peel_to_commit()
                .map_err(|e| revision_error(commitish, e))?;
            Ok(CommitId::new(commit.id().to_string()))
        })
    }

    fn list_tree(&self, commit: &CommitId) -> Result<TreeListing> {
        self.with_repository(|repo| {
            let tree = find_commit(repo, commit)?.tree().map_err(internal)?;
            let odb = repo.odb().map_err(internal)?;

            let mut files = Vec::new();
            let mut failure = None;
            let walked = tree.walk(TreeWalkMode::PreOrder, |dir, entry| {
                // Trees are descended into; symlinks, submodules and odd modes are skipped.
                if entry.kind() != Some(ObjectType::Blob) || !is_regular_file(entry.filemode()) {
                    return TreeWalkResult::Ok;
                }
                let Some(name) = entry.name() else {
                    tracing::debug!(dir, "skipping entry with non-UTF-8 name");
                    return TreeWalkResult::Ok;
                };
                match odb.read_header(entry.id()) {
                    Ok((size, _)) => {
                        files.push(FileRecord {
                            path: format!("{dir}{name}"),
                            size: size as u64,
                        });
                        TreeWalkResult::Ok
                    }
                    Err(e) => {
                        failure = Some(e);
                        TreeWalkResult::Abort
                    }
                }
            });
            if let Some(e) = failure {
                return Err(internal(e));
            }
            walked.map_err(internal)?;

            tracing::info!(
                path = %self.clone_path.display(),
                commit = %commit,
                files = files.len(),
                "listed tree"
            );
            Ok(TreeListing { files })
        })
    }

    fn file_contents(&self, commit: &CommitId, path: &str) -> Result<Vec<u8>> {
        self.with_repository(|repo| {
            let tree = find_commit(repo, commit)?.tree().map_err(internal)?;
            let entry = tree.get_path(Path::new(path)).map_err(|e| match e.code() {
                ErrorCode::NotFound => Error::not_found(format!("{commit}:{path}")),
                _ => internal(e),
            })?;
            let blob = repo.find_blob(entry.id()).map_err(|e| match e.code() {
                ErrorCode::NotFound => Error::not_found(format!("{commit}:{path}")),
                _ => internal(e),
            })?;
            Ok(blob.content().to_vec())
        })
    }
}

/// Opens a [`GitProvider`] per repository directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitProviderFactory;

impl ProviderFactory for GitProviderFactory {
    fn open(&self, name: &str, clone_path: &Path) -> Result<Arc<dyn RepositoryProvider>> {
        if !clone_path.is_dir() {
            return Err(Error::not_found(format!("repository '{name}'")));
        }
        Ok(Arc::new(GitProvider::open(clone_path)?))
    }
}

/// Regular file modes; 100664 is a legacy mode still found in old histories.
fn is_regular_file(mode: i32) -> bool {
    matches!(mode, 0o100644 | 0o100755 | 0o100664)
}

fn revision_error(commitish: &str, e: git2::Error) -> Error {
    match e.code() {
        ErrorCode::NotFound | ErrorCode::Ambiguous | ErrorCode::InvalidSpec | ErrorCode::Peel => {
            Error::InvalidRevision(commitish.to_string())
        }
        _ => internal(e),
    }
}

fn open_error(path: &Path, e: git2::Error) -> Error {
    match e.code() {
        ErrorCode::NotFound => Error::not_found(format!("git repository at {}", path.display())),
        _ => Error::internal(format!("opening {}: {}", path.display(), e.message())),
    }
}

fn internal(e: git2::Error) -> Error {
    Error::internal(format!("git: {}", e.message()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regular_modes_only() {
        assert!(is_regular_file(0o100644));
        assert!(is_regular_file(0o100755));
        assert!(!is_regular_file(0o120000)); // symlink
        assert!(!is_regular_file(0o160000)); // submodule
        assert!(!is_regular_file(0o040000)); // tree
    }

    #[test]
    fn factory_rejects_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let Err(err) = GitProviderFactory.open("ghost", &dir.path().join("ghost")) else {
            panic!("missing clone directory opened");
        };
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn factory_rejects_plain_directory() {
        let dir = tempfile::tempdir().unwrap();
        let Err(err) = GitProviderFactory.open("plain", dir.path()) else {
            panic!("plain directory opened as a clone");
        };
        assert!(err.is_expected(), "unexpected error: {err}");
    }
}
