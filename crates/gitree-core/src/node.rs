//! The node graph: Root → Repository → Commitish → Entry.
//!
//! Repositories and commitishes are created on first reference and live for
//! the rest of the process. A commitish materializes its tree at most once;
//! every reader after that sees the complete tree.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use parking_lot::{Condvar, Mutex};

use crate::MAX_FILE_SIZE;
use crate::attr::Attributes;
use crate::error::{Error, Result};
use crate::memo::Memo;
use crate::path::{PathComponents, join};
use crate::provider::{CommitId, ProviderFactory, RepositoryProvider};
use crate::tree::{Entry, build_tree};

// =============================================================================
// Root
// =============================================================================

/// Top of the graph: repository name → [`Repository`].
pub struct Root {
    clones_path: PathBuf,
    factory: Arc<dyn ProviderFactory>,
    repositories: Memo<String, Repository>,
}

impl std::fmt::Debug for Root {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Root")
            .field("clones_path", &self.clones_path)
            .field("repositories", &self.repositories.len())
            .finish()
    }
}

impl Root {
    pub fn new(clones_path: impl Into<PathBuf>, factory: Arc<dyn ProviderFactory>) -> Self {
        Self {
            clones_path: clones_path.into(),
            factory,
            repositories: Memo::new(),
        }
    }

    pub fn clones_path(&self) -> &Path {
        &self.clones_path
    }

    /// The repository called `name`, opened on first reference.
    pub fn repository(&self, name: &str) -> Result<Arc<Repository>> {
        if !is_valid_repository_name(name) {
            return Err(Error::not_found(format!("repository '{name}'")));
        }
        self.repositories.get_or_create(&name.to_string(), || {
            let clone_path = self.clones_path.join(name);
            let provider = self.factory.open(name, &clone_path)?;
            tracing::debug!(repository = name, path = %clone_path.display(), "new repository");
            Ok(Repository::new(name, clone_path, provider))
        })
    }
}

/// Rejects names that would step outside the clones directory.
fn is_valid_repository_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\', '\0'])
}

// =============================================================================
// Repository
// =============================================================================

/// One clone: commitish string → [`Commitish`].
pub struct Repository {
    name: String,
    clone_path: PathBuf,
    provider: Arc<dyn RepositoryProvider>,
    commitishes: Memo<String, Commitish>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("name", &self.name)
            .field("clone_path", &self.clone_path)
            .finish()
    }
}

impl Repository {
    fn new(name: &str, clone_path: PathBuf, provider: Arc<dyn RepositoryProvider>) -> Self {
        Self {
            name: name.to_string(),
            clone_path,
            provider,
            commitishes: Memo::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn clone_path(&self) -> &Path {
        &self.clone_path
    }

    /// The commitish called `name`.
    ///
    /// The revision is resolved here, once, and the node stays pinned to
    /// that commit. Unresolvable names are not cached.
    pub fn commitish(&self, name: &str) -> Result<Arc<Commitish>> {
        if name.is_empty() {
            return Err(Error::not_found("empty commitish"));
        }
        self.commitishes.get_or_create(&name.to_string(), || {
            let commit = self.provider.resolve(name)?;
            tracing::debug!(repository = %self.name, commitish = name, commit = %commit, "new commitish");
            Ok(Commitish::new(&self.name, name, commit, Arc::clone(&self.provider)))
        })
    }
}

// =============================================================================
// Commitish
// =============================================================================

/// Materialization state of a commitish tree.
enum FetchState {
    Unfetched,
    Fetching(Arc<Attempt>),
    Fetched(Arc<Entry>),
    Failed,
}

/// One fetch attempt. Waiters hold on to it, so they read this attempt's
/// outcome even if later attempts have run by the time they wake.
struct Attempt {
    number: u64,
    outcome: OnceLock<Result<Arc<Entry>>>,
}

struct FetchCell {
    state: FetchState,
    attempts: u64,
}

/// One revision of one repository.
pub struct Commitish {
    repository: String,
    name: String,
    commit: CommitId,
    provider: Arc<dyn RepositoryProvider>,
    cell: Mutex<FetchCell>,
    fetched: Condvar,
}

impl std::fmt::Debug for Commitish {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Commitish")
            .field("repository", &self.repository)
            .field("name", &self.name)
            .field("commit", &self.commit)
            .field("fetched", &self.is_fetched())
            .finish()
    }
}

impl Commitish {
    fn new(
        repository: &str,
        name: &str,
        commit: CommitId,
        provider: Arc<dyn RepositoryProvider>,
    ) -> Self {
        Self {
            repository: repository.to_string(),
            name: name.to_string(),
            commit,
            provider,
            cell: Mutex::new(FetchCell {
                state: FetchState::Unfetched,
                attempts: 0,
            }),
            fetched: Condvar::new(),
        }
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The commit this node is pinned to.
    pub fn commit(&self) -> &CommitId {
        &self.commit
    }

    pub fn is_fetched(&self) -> bool {
        matches!(self.cell.lock().state, FetchState::Fetched(_))
    }

    /// Root entry of the tree, fetching it from the provider if needed.
    ///
    /// Exactly one caller runs the provider listing per attempt. Callers
    /// arriving during an attempt block until it finishes and get its
    /// outcome. A failed attempt is not cached: the next call retries.
    pub fn tree(&self) -> Result<Arc<Entry>> {
        let mut cell = self.cell.lock();
        let in_flight = match &cell.state {
            FetchState::Fetched(tree) => return Ok(Arc::clone(tree)),
            FetchState::Fetching(attempt) => Some(Arc::clone(attempt)),
            FetchState::Unfetched | FetchState::Failed => None,
        };

        let Some(attempt) = in_flight else {
            cell.attempts += 1;
            let attempt = Arc::new(Attempt {
                number: cell.attempts,
                outcome: OnceLock::new(),
            });
            cell.state = FetchState::Fetching(Arc::clone(&attempt));
            drop(cell);
            return self.fetch(attempt);
        };

        loop {
            if let Some(outcome) = attempt.outcome.get() {
                return outcome.clone();
            }
            self.fetched.wait(&mut cell);
        }
    }

    /// Run one fetch attempt and publish its outcome.
    fn fetch(&self, attempt: Arc<Attempt>) -> Result<Arc<Entry>> {
        let mut guard = FetchGuard {
            commitish: self,
            attempt: Arc::clone(&attempt),
            armed: true,
        };
        let outcome = self
            .provider
            .list_tree(&self.commit)
            .and_then(|listing| build_tree(&listing));
        guard.armed = false;

        match &outcome {
            Ok(tree) => tracing::info!(
                repository = %self.repository,
                commitish = %self.name,
                attempt = attempt.number,
                entries = tree.child_count(),
                "materialized tree"
            ),
            Err(e) => tracing::error!(
                repository = %self.repository,
                commitish = %self.name,
                attempt = attempt.number,
                error = %e,
                "tree fetch failed"
            ),
        }
        self.publish(&attempt, outcome.clone());
        outcome
    }

    /// Record the outcome of `attempt` and wake its waiters.
    fn publish(&self, attempt: &Attempt, outcome: Result<Arc<Entry>>) {
        let mut cell = self.cell.lock();
        cell.state = match &outcome {
            Ok(tree) => FetchState::Fetched(Arc::clone(tree)),
            Err(_) => FetchState::Failed,
        };
        // Only the fetching caller or its guard publishes, never both.
        let _ = attempt.outcome.set(outcome);
        drop(cell);
        self.fetched.notify_all();
    }

    /// The entry at `sub_path` (empty for the tree root).
    pub fn entry(&self, sub_path: &str) -> Result<Arc<Entry>> {
        self.tree()?.find(sub_path).ok_or_else(|| {
            Error::not_found(format!("{}/{}/{}", self.repository, self.name, sub_path))
        })
    }

    /// Full contents of the file at `sub_path`.
    ///
    /// Files at or above [`MAX_FILE_SIZE`] are refused without reading them.
    pub fn read_file(&self, sub_path: &str) -> Result<Vec<u8>> {
        let entry = self.entry(sub_path)?;
        let size = match entry.as_ref() {
            Entry::File { size } => *size,
            Entry::Directory { .. } => {
                return Err(Error::InvalidArgument(format!("{sub_path} is a directory")));
            }
        };
        let full_path = format!("{}/{}/{}", self.repository, self.name, sub_path);
        if size >= MAX_FILE_SIZE {
            return Err(Error::TooLarge {
                path: full_path,
                size,
            });
        }

        let contents = self.provider.file_contents(&self.commit, sub_path)?;
        if contents.len() as u64 != size {
            return Err(Error::internal(format!(
                "{full_path}: listed as {size} bytes but read {}",
                contents.len()
            )));
        }
        tracing::debug!(path = %full_path, size, "read file contents");
        Ok(contents)
    }
}

/// Marks an attempt failed if the fetching thread unwinds mid-fetch, so
/// waiters are released instead of blocking forever.
struct FetchGuard<'a> {
    commitish: &'a Commitish,
    attempt: Arc<Attempt>,
    armed: bool,
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.commitish
                .publish(&self.attempt, Err(Error::internal("tree fetch aborted")));
        }
    }
}

// =============================================================================
// Node
// =============================================================================

/// An entry together with where it lives, so its contents can be fetched.
#[derive(Debug, Clone)]
pub struct EntryNode {
    pub commitish: Arc<Commitish>,
    /// Path below the commitish root.
    pub sub_path: String,
    pub entry: Arc<Entry>,
}

/// Any node of the graph.
///
/// Every operation is spelled out per variant; the no-op cases (listing a
/// file, reading a directory, enumerating the root) are deliberate.
#[derive(Debug, Clone)]
pub enum Node {
    Root(Arc<Root>),
    Repository(Arc<Repository>),
    Commitish(Arc<Commitish>),
    Entry(EntryNode),
}

impl Node {
    /// Walk from `root` to the node named by `components`.
    ///
    /// Missing components stop the walk early: no repository selects the
    /// root, no commitish selects the repository.
    pub fn resolve(root: &Arc<Root>, components: &PathComponents) -> Result<Node> {
        if !components.has_repository() {
            return Ok(Node::Root(Arc::clone(root)));
        }
        let repository = root.repository(&components.repository)?;
        if !components.has_commitish() {
            return Ok(Node::Repository(repository));
        }
        let commitish = repository.commitish(&components.commitish)?;
        if components.sub_path.is_empty() {
            return Ok(Node::Commitish(commitish));
        }
        let entry = commitish.entry(&components.sub_path)?;
        Ok(Node::Entry(EntryNode {
            commitish,
            sub_path: components.sub_path.clone(),
            entry,
        }))
    }

    /// Child called `name`, creating repository and commitish nodes on
    /// first reference and materializing commitish trees on demand.
    pub fn child(&self, name: &str) -> Result<Node> {
        match self {
            Node::Root(root) => Ok(Node::Repository(root.repository(name)?)),
            Node::Repository(repository) => Ok(Node::Commitish(repository.commitish(name)?)),
            Node::Commitish(commitish) => {
                let tree = commitish.tree()?;
                let entry = tree.child(name).cloned().ok_or_else(|| {
                    Error::not_found(format!("{}/{}/{}", commitish.repository, commitish.name, name))
                })?;
                Ok(Node::Entry(EntryNode {
                    commitish: Arc::clone(commitish),
                    sub_path: name.to_string(),
                    entry,
                }))
            }
            Node::Entry(node) => {
                let entry = node.entry.child(name).cloned().ok_or_else(|| {
                    Error::not_found(format!(
                        "{}/{}/{}",
                        node.commitish.repository,
                        node.commitish.name,
                        join(&node.sub_path, name)
                    ))
                })?;
                Ok(Node::Entry(EntryNode {
                    commitish: Arc::clone(&node.commitish),
                    sub_path: join(&node.sub_path, name),
                    entry,
                }))
            }
        }
    }

    /// Children sorted by name.
    ///
    /// The root and repositories list as empty: enumerating every clone or
    /// every possible revision is not supported. Files list as empty.
    pub fn children(&self) -> Result<Vec<(String, Node)>> {
        let (commitish, base, entry) = match self {
            Node::Root(_) | Node::Repository(_) => return Ok(Vec::new()),
            Node::Commitish(commitish) => (commitish, String::new(), commitish.tree()?),
            Node::Entry(node) => (&node.commitish, node.sub_path.clone(), Arc::clone(&node.entry)),
        };
        Ok(entry
            .sorted_children()
            .into_iter()
            .map(|(name, child)| {
                let node = Node::Entry(EntryNode {
                    commitish: Arc::clone(commitish),
                    sub_path: join(&base, name),
                    entry: Arc::clone(child),
                });
                (name.to_string(), node)
            })
            .collect())
    }

    pub fn attributes(&self) -> Attributes {
        match self {
            Node::Root(_) | Node::Repository(_) | Node::Commitish(_) => Attributes::directory(),
            Node::Entry(node) => node.entry.attributes(),
        }
    }

    pub fn is_dir(&self) -> bool {
        match self {
            Node::Root(_) | Node::Repository(_) | Node::Commitish(_) => true,
            Node::Entry(node) => node.entry.is_dir(),
        }
    }

    /// Full file contents; directories of every kind read as empty.
    pub fn contents(&self) -> Result<Vec<u8>> {
        match self {
            Node::Root(_) | Node::Repository(_) | Node::Commitish(_) => Ok(Vec::new()),
            Node::Entry(node) if node.entry.is_dir() => Ok(Vec::new()),
            Node::Entry(node) => node.commitish.read_file(&node.sub_path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MemoryProvider, MemoryProviderFactory};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    const DEMO: &str = "abc1234f00000000000000000000000000000000";

    fn fixture() -> (Arc<Root>, Arc<MemoryProvider>, Arc<MemoryProviderFactory>) {
        let provider = Arc::new(MemoryProvider::new());
        provider.add_commit(DEMO, [("src/a.txt", "hello world!"), ("README.md", "")]);
        provider.set_ref("main", DEMO);
        let factory = Arc::new(MemoryProviderFactory::new());
        factory.insert("demo", Arc::clone(&provider));
        let root = Arc::new(Root::new("/clones", factory.clone()));
        (root, provider, factory)
    }

    #[test]
    fn repository_is_created_once() {
        let (root, _, factory) = fixture();
        let first = root.repository("demo").unwrap();
        let second = root.repository("demo").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.open_calls(), 1);
        assert_eq!(first.clone_path(), Path::new("/clones/demo"));
    }

    #[test]
    fn invalid_repository_names_are_not_found() {
        let (root, _, factory) = fixture();
        for name in ["", ".", "..", "a/b"] {
            assert!(matches!(root.repository(name), Err(Error::NotFound(_))), "{name}");
        }
        assert_eq!(factory.open_calls(), 0);
    }

    #[test]
    fn unknown_repository_is_retried() {
        let (root, _, factory) = fixture();
        assert!(root.repository("later").is_err());
        factory.insert("later", Arc::new(MemoryProvider::new()));
        assert!(root.repository("later").is_ok());
    }

    #[test]
    fn commitish_is_pinned_and_shared() {
        let (root, _, _) = fixture();
        let repo = root.repository("demo").unwrap();
        let by_ref = repo.commitish("main").unwrap();
        let again = repo.commitish("main").unwrap();
        assert!(Arc::ptr_eq(&by_ref, &again));
        assert_eq!(by_ref.commit().as_str(), DEMO);
        assert!(!by_ref.is_fetched());
    }

    #[test]
    fn bad_revision_is_not_cached() {
        let (root, provider, _) = fixture();
        let repo = root.repository("demo").unwrap();
        assert!(matches!(repo.commitish("nope"), Err(Error::InvalidRevision(_))));
        provider.set_ref("nope", DEMO);
        assert!(repo.commitish("nope").is_ok());
    }

    #[test]
    fn tree_is_fetched_once() {
        let (root, provider, _) = fixture();
        let commitish = root.repository("demo").unwrap().commitish("main").unwrap();
        let first = commitish.tree().unwrap();
        let second = commitish.tree().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(provider.list_tree_calls(), 1);
        assert!(commitish.is_fetched());
    }

    #[test]
    fn concurrent_first_fetch_lists_once() {
        let (root, provider, _) = fixture();
        provider.set_listing_delay(Duration::from_millis(50));
        let commitish = root.repository("demo").unwrap().commitish("abc1234").unwrap();
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let commitish = Arc::clone(&commitish);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    commitish.tree().unwrap()
                })
            })
            .collect();
        let trees: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(provider.list_tree_calls(), 1);
        assert!(trees.iter().all(|t| Arc::ptr_eq(t, &trees[0])));
    }

    #[test]
    fn waiters_share_a_failed_attempt_then_retry() {
        let (root, provider, _) = fixture();
        provider.set_listing_delay(Duration::from_millis(200));
        provider.fail_next_listings(1);
        let commitish = root.repository("demo").unwrap().commitish("main").unwrap();
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let commitish = Arc::clone(&commitish);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    commitish.tree().is_err()
                })
            })
            .collect();
        let failed: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(failed.iter().all(|&f| f));
        assert_eq!(provider.list_tree_calls(), 1);

        assert!(commitish.tree().is_ok());
        assert_eq!(provider.list_tree_calls(), 2);
    }

    #[test]
    fn waiter_keeps_its_attempt_outcome() {
        let (root, provider, _) = fixture();
        let commitish = root.repository("demo").unwrap().commitish("main").unwrap();
        let attempt = |number| {
            Arc::new(Attempt {
                number,
                outcome: OnceLock::new(),
            })
        };
        let start = |attempt: &Arc<Attempt>| {
            let mut cell = commitish.cell.lock();
            cell.attempts = attempt.number;
            cell.state = FetchState::Fetching(Arc::clone(attempt));
        };

        let first = attempt(1);
        start(&first);
        let waiter = {
            let commitish = Arc::clone(&commitish);
            thread::spawn(move || commitish.tree())
        };
        thread::sleep(Duration::from_millis(100));

        // A second attempt starts and fails before the waiter gets to run.
        commitish.publish(&first, Err(Error::internal("first attempt")));
        let second = attempt(2);
        start(&second);
        commitish.publish(&second, Err(Error::internal("second attempt")));

        match waiter.join().unwrap() {
            Err(e) => assert_eq!(e, Error::internal("first attempt")),
            Ok(_) => panic!("waiter should see the failed attempt"),
        }
        assert_eq!(provider.list_tree_calls(), 0);
    }

    #[test]
    fn node_walk_and_read() {
        let (root, _, _) = fixture();
        let src = Node::Root(root)
            .child("demo")
            .and_then(|n| n.child("main"))
            .and_then(|n| n.child("src"))
            .unwrap();
        assert!(src.is_dir());

        let children = src.children().unwrap();
        assert_eq!(children.len(), 1);
        let (name, file) = &children[0];
        assert_eq!(name, "a.txt");
        assert_eq!(file.attributes().size, 12);
        assert_eq!(file.contents().unwrap(), b"hello world!");
        assert!(file.children().unwrap().is_empty());
        assert!(matches!(file.child("x"), Err(Error::NotFound(_))));
    }

    #[test]
    fn size_limit_boundary() {
        let (root, provider, _) = fixture();
        let max = MAX_FILE_SIZE as usize;
        provider.add_commit(
            "def5678f00000000000000000000000000000000",
            [("big.bin", vec![0u8; max]), ("almost.bin", vec![1u8; max - 1])],
        );
        let commitish = root.repository("demo").unwrap().commitish("def5678").unwrap();

        let err = commitish.read_file("big.bin").unwrap_err();
        assert!(matches!(err, Error::TooLarge { size, .. } if size == MAX_FILE_SIZE));
        assert_eq!(provider.file_contents_calls(), 0);

        assert_eq!(commitish.read_file("almost.bin").unwrap().len(), max - 1);
        assert_eq!(provider.file_contents_calls(), 1);
    }

    #[test]
    fn reading_a_directory_is_rejected() {
        let (root, _, _) = fixture();
        let commitish = root.repository("demo").unwrap().commitish("main").unwrap();
        assert!(matches!(commitish.read_file("src"), Err(Error::InvalidArgument(_))));
        assert!(matches!(commitish.read_file("src/missing"), Err(Error::NotFound(_))));
    }

    #[test]
    fn root_and_repository_list_empty() {
        let (root, _, _) = fixture();
        let root_node = Node::Root(Arc::clone(&root));
        assert!(root_node.children().unwrap().is_empty());
        let repo = root_node.child("demo").unwrap();
        assert!(repo.children().unwrap().is_empty());
        assert!(repo.contents().unwrap().is_empty());
    }

    #[test]
    fn commitish_lists_sorted() {
        let (root, _, _) = fixture();
        let commitish = Node::Root(root).child("demo").unwrap().child("main").unwrap();
        let names: Vec<_> = commitish
            .children()
            .unwrap()
            .into_iter()
            .map(|(name, node)| (name, node.is_dir()))
            .collect();
        assert_eq!(names, [("README.md".to_string(), false), ("src".to_string(), true)]);
    }
}
