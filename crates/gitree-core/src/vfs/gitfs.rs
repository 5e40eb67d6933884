//! Path-addressed filesystem over the node cache.

use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::OnceCell;

use super::traits::{DirEntry, FileCursor, ReadOnlyFilesystem};
use crate::error::{Error, Result};
use crate::node::{Commitish, Node, Root};
use crate::path::{PathComponents, base_name};

/// Read-only filesystem over every clone below one directory.
///
/// Node graph access may hit the provider (tree listings, blob reads), so
/// it runs on tokio's blocking pool.
#[derive(Debug, Clone)]
pub struct GitFileSystem {
    root: Arc<Root>,
}

impl GitFileSystem {
    pub fn new(root: Arc<Root>) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Arc<Root> {
        &self.root
    }

    async fn resolve(&self, path: &Path) -> Result<(PathComponents, Node)> {
        let components = PathComponents::parse(path)?;
        let root = Arc::clone(&self.root);
        blocking(move || {
            let node = Node::resolve(&root, &components)?;
            Ok((components, node))
        })
        .await
        .inspect_err(|e| log_failure("resolve", path, e))
    }
}

#[async_trait]
impl ReadOnlyFilesystem for GitFileSystem {
    type File = GitFile;

    async fn open(&self, path: &Path) -> Result<GitFile> {
        let components = PathComponents::parse(path)?;
        if !components.has_commitish() {
            return Err(Error::InvalidArgument(format!("{} is a directory", path.display())));
        }
        let (_, node) = self.resolve(path).await?;
        match node {
            Node::Entry(entry) if !entry.entry.is_dir() => Ok(GitFile::new(
                path.display().to_string(),
                entry.commitish,
                entry.sub_path,
                entry.entry.size(),
            )),
            _ => Err(Error::InvalidArgument(format!("{} is a directory", path.display()))),
        }
    }

    async fn stat(&self, path: &Path) -> Result<DirEntry> {
        let (components, node) = self.resolve(path).await?;
        let name = match &node {
            Node::Root(_) => "/",
            Node::Repository(_) => components.repository.as_str(),
            Node::Commitish(_) => components.commitish.as_str(),
            Node::Entry(_) => base_name(&components.sub_path),
        };
        Ok(DirEntry::from_attributes(name, &node.attributes()))
    }

    async fn read_directory(&self, path: &Path) -> Result<Vec<DirEntry>> {
        // The root and repositories are never enumerated, so there is
        // nothing to open until a commitish is named.
        if !PathComponents::parse(path)?.has_commitish() {
            return Ok(Vec::new());
        }
        let (_, node) = self.resolve(path).await?;
        if !node.is_dir() {
            return Err(Error::InvalidArgument(format!("{} is not a directory", path.display())));
        }
        let children = blocking(move || node.children()).await?;
        Ok(children
            .into_iter()
            .map(|(name, child)| DirEntry::from_attributes(name, &child.attributes()))
            .collect())
    }
}

/// An open file inside one commitish.
///
/// Contents are fetched on the first read and kept for the cursor's
/// lifetime.
#[derive(Debug)]
pub struct GitFile {
    name: String,
    commitish: Arc<Commitish>,
    sub_path: String,
    size: u64,
    position: u64,
    closed: AtomicBool,
    contents: OnceCell<Arc<[u8]>>,
}

impl GitFile {
    fn new(name: String, commitish: Arc<Commitish>, sub_path: String, size: u64) -> Self {
        Self {
            name,
            commitish,
            sub_path,
            size,
            position: 0,
            closed: AtomicBool::new(false),
            contents: OnceCell::new(),
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::ClosedResource)
        } else {
            Ok(())
        }
    }

    async fn contents(&self) -> Result<&Arc<[u8]>> {
        self.contents
            .get_or_try_init(|| async {
                let commitish = Arc::clone(&self.commitish);
                let sub_path = self.sub_path.clone();
                let bytes = blocking(move || commitish.read_file(&sub_path))
                    .await
                    .inspect_err(|e| log_failure("read", Path::new(&self.name), e))?;
                Ok::<_, Error>(Arc::from(bytes))
            })
            .await
    }
}

#[async_trait]
impl FileCursor for GitFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.read_at(buf, self.position).await?;
        self.position += n as u64;
        Ok(n)
    }

    async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.ensure_open()?;
        if offset >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let contents = self.contents().await?;
        let start = usize::try_from(offset).map_err(|_| Error::InvalidArgument(offset.to_string()))?;
        let available = contents.get(start..).unwrap_or_default();
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.ensure_open()?;
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => self.size.checked_add_signed(delta),
        };
        let target =
            target.ok_or_else(|| Error::InvalidArgument(format!("seek to {pos:?} in {}", self.name)))?;
        self.position = target;
        Ok(target)
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::ClosedResource);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::internal(format!("blocking task failed: {e}")))?
}

fn log_failure(op: &str, path: &Path, error: &Error) {
    if error.is_expected() {
        tracing::debug!(op, path = %path.display(), %error, "lookup miss");
    } else {
        tracing::error!(op, path = %path.display(), %error, "filesystem operation failed");
    }
}
