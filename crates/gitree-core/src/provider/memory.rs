//! In-memory provider.
//!
//! Used for tests and fixtures. Commits are plain path→bytes maps; refs
//! map names to commit IDs. Call counters and injectable delays/failures
//! let tests observe how often the engine reaches the provider.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use super::{CommitId, FileRecord, ProviderFactory, RepositoryProvider, TreeListing};
use crate::error::{Error, Result};

/// Shortest hex prefix accepted as an abbreviated commit ID (git's minimum).
pub const MIN_ABBREVIATED_LENGTH: usize = 4;

/// In-memory repository.
///
/// Thread-safe via internal locks.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    commits: RwLock<HashMap<CommitId, BTreeMap<String, Vec<u8>>>>,
    refs: RwLock<HashMap<String, CommitId>>,
    listing_delay: Mutex<Option<Duration>>,
    failing_listings: AtomicUsize,
    resolve_calls: AtomicUsize,
    list_tree_calls: AtomicUsize,
    file_contents_calls: AtomicUsize,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a commit with the given files. `id` should be a full hex SHA.
    pub fn add_commit<I, P, C>(&self, id: &str, files: I)
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<Vec<u8>>,
    {
        let files = files
            .into_iter()
            .map(|(path, contents)| (path.into(), contents.into()))
            .collect();
        self.commits.write().insert(CommitId::new(id), files);
    }

    /// Point a branch or tag name at a commit.
    pub fn set_ref(&self, name: &str, id: &str) {
        self.refs.write().insert(name.to_string(), CommitId::new(id));
    }

    /// Make every tree listing sleep first (widens race windows in tests).
    pub fn set_listing_delay(&self, delay: Duration) {
        *self.listing_delay.lock() = Some(delay);
    }

    /// Fail the next `count` tree listings with an internal error.
    pub fn fail_next_listings(&self, count: usize) {
        self.failing_listings.store(count, Ordering::SeqCst);
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn list_tree_calls(&self) -> usize {
        self.list_tree_calls.load(Ordering::SeqCst)
    }

    pub fn file_contents_calls(&self) -> usize {
        self.file_contents_calls.load(Ordering::SeqCst)
    }

    fn resolve_prefix(&self, prefix: &str) -> Result<CommitId> {
        let lowered = prefix.to_ascii_lowercase();
        let commits = self.commits.read();
        let mut matches = commits.keys().filter(|id| id.as_str().starts_with(&lowered));
        match (matches.next(), matches.next()) {
            (Some(id), None) => Ok(id.clone()),
            _ => Err(Error::InvalidRevision(prefix.to_string())),
        }
    }
}

impl RepositoryProvider for MemoryProvider {
    fn resolve(&self, commitish: &str) -> Result<CommitId> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(id) = self.refs.read().get(commitish) {
            return Ok(id.clone());
        }
        let is_hex = commitish.chars().all(|c| c.is_ascii_hexdigit());
        if is_hex && commitish.len() >= MIN_ABBREVIATED_LENGTH {
            return self.resolve_prefix(commitish);
        }
        Err(Error::InvalidRevision(commitish.to_string()))
    }

    fn list_tree(&self, commit: &CommitId) -> Result<TreeListing> {
        self.list_tree_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.listing_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let injected = self
            .failing_listings
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::internal(format!("injected listing failure for {commit}")));
        }

        let commits = self.commits.read();
        let files = commits
            .get(commit)
            .ok_or_else(|| Error::InvalidRevision(commit.to_string()))?;
        Ok(TreeListing {
            files: files
                .iter()
                .map(|(path, contents)| FileRecord {
                    path: path.clone(),
                    size: contents.len() as u64,
                })
                .collect(),
        })
    }

    fn file_contents(&self, commit: &CommitId, path: &str) -> Result<Vec<u8>> {
        self.file_contents_calls.fetch_add(1, Ordering::SeqCst);

        let commits = self.commits.read();
        commits
            .get(commit)
            .and_then(|files| files.get(path))
            .cloned()
            .ok_or_else(|| Error::not_found(format!("{commit}:{path}")))
    }
}

/// Factory handing out registered [`MemoryProvider`]s by repository name.
#[derive(Debug, Default)]
pub struct MemoryProviderFactory {
    providers: RwLock<HashMap<String, Arc<MemoryProvider>>>,
    open_calls: AtomicUsize,
}

impl MemoryProviderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, provider: Arc<MemoryProvider>) {
        self.providers.write().insert(name.to_string(), provider);
    }

    /// Number of times `open` ran, successful or not.
    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }
}

impl ProviderFactory for MemoryProviderFactory {
    fn open(&self, name: &str, _clone_path: &Path) -> Result<Arc<dyn RepositoryProvider>> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        let provider = self
            .providers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("repository '{name}'")))?;
        Ok(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIRST: &str = "abc1234000000000000000000000000000000000";
    const SECOND: &str = "abc9999000000000000000000000000000000000";

    fn provider() -> MemoryProvider {
        let provider = MemoryProvider::new();
        provider.add_commit(FIRST, [("a.txt", "one")]);
        provider.add_commit(SECOND, [("a.txt", "two"), ("b/c.txt", "three")]);
        provider.set_ref("main", SECOND);
        provider
    }

    #[test]
    fn resolves_refs_full_and_short_ids() {
        let provider = provider();
        assert_eq!(provider.resolve("main").unwrap().as_str(), SECOND);
        assert_eq!(provider.resolve(FIRST).unwrap().as_str(), FIRST);
        assert_eq!(provider.resolve("abc1234").unwrap().as_str(), FIRST);
        assert_eq!(provider.resolve("ABC9").unwrap().as_str(), SECOND);
    }

    #[test]
    fn ambiguous_and_unknown_revisions_fail() {
        let provider = provider();
        provider.add_commit("abc1999000000000000000000000000000000000", [("a.txt", "three")]);
        // Too short to be an abbreviation.
        assert!(matches!(provider.resolve("abc"), Err(Error::InvalidRevision(_))));
        // Shared by abc1234... and abc1999...
        assert!(matches!(provider.resolve("abc1"), Err(Error::InvalidRevision(_))));
        assert_eq!(provider.resolve("abc12").unwrap().as_str(), FIRST);
        assert!(matches!(provider.resolve("develop"), Err(Error::InvalidRevision(_))));
    }

    #[test]
    fn listing_reports_sizes() {
        let provider = provider();
        let listing = provider.list_tree(&CommitId::new(SECOND)).unwrap();
        assert_eq!(listing.len(), 2);
        assert!(listing.files.contains(&FileRecord {
            path: "b/c.txt".into(),
            size: 5
        }));
        assert_eq!(provider.list_tree_calls(), 1);
    }

    #[test]
    fn injected_failures_are_consumed() {
        let provider = provider();
        provider.fail_next_listings(1);
        let id = CommitId::new(FIRST);
        assert!(provider.list_tree(&id).is_err());
        assert!(provider.list_tree(&id).is_ok());
    }

    #[test]
    fn factory_opens_registered_only() {
        let factory = MemoryProviderFactory::new();
        factory.insert("demo", Arc::new(provider()));
        assert!(factory.open("demo", Path::new("/clones/demo")).is_ok());
        assert!(factory.open("other", Path::new("/clones/other")).is_err());
        assert_eq!(factory.open_calls(), 2);
    }
}
