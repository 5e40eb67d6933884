//! `nfsserve` filesystem over a [`ReadOnlyFilesystem`].
//!
//! NFS addresses everything by file handle. The handle on the wire is the
//! 16-byte persistent handle from [`HandleRegistry`], so clients survive
//! server restarts. `nfsserve` itself works with 64-bit file IDs; an ID is
//! the first 8 bytes of its handle, which keeps IDs stable across restarts
//! too.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use gitree_core::path::{join, split_parent};
use gitree_core::{
    DirEntry, Error, FileCursor, Handle, HandleRegistry, NodeKind, ReadOnlyFilesystem,
};
use nfsserve::nfs::{
    fattr3, fileid3, filename3, ftype3, nfs_fh3, nfspath3, nfsstat3, nfsstring, nfstime3, sattr3,
    specdata3,
};
use nfsserve::vfs::{self, NFSFileSystem, ReadDirResult, VFSCapabilities};
use parking_lot::Mutex;

/// Default number of open cursors kept between reads.
pub const DEFAULT_OPEN_FILES: usize = 64;

/// A path with an issued handle.
#[derive(Debug, Clone)]
struct Known {
    path: String,
    handle: Handle,
}

/// Small most-recently-used cache of open cursors, keyed by file ID.
struct OpenFiles<C> {
    capacity: usize,
    entries: Mutex<VecDeque<(fileid3, Arc<C>)>>,
}

impl<C> OpenFiles<C> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    fn get(&self, id: fileid3) -> Option<Arc<C>> {
        let mut entries = self.entries.lock();
        let index = entries.iter().position(|(key, _)| *key == id)?;
        let entry = entries.remove(index)?;
        let cursor = Arc::clone(&entry.1);
        entries.push_front(entry);
        Some(cursor)
    }

    fn insert(&self, id: fileid3, cursor: Arc<C>) -> Vec<Arc<C>> {
        let mut entries = self.entries.lock();
        entries.retain(|(key, _)| *key != id);
        entries.push_front((id, cursor));
        let mut evicted = Vec::new();
        while entries.len() > self.capacity {
            if let Some((_, cursor)) = entries.pop_back() {
                evicted.push(cursor);
            }
        }
        evicted
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// NFSv3 front-end.
pub struct NfsAdapter<F: ReadOnlyFilesystem> {
    fs: F,
    handles: Arc<HandleRegistry>,
    known: DashMap<fileid3, Known>,
    /// Reverse of `known`, so repeated listings skip the handle store.
    ids: DashMap<String, fileid3>,
    open_files: OpenFiles<F::File>,
    root_id: fileid3,
}

impl<F: ReadOnlyFilesystem> std::fmt::Debug for NfsAdapter<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NfsAdapter")
            .field("handles", &self.handles)
            .field("known", &self.known.len())
            .field("open_files", &self.open_files.len())
            .field("root_id", &self.root_id)
            .finish()
    }
}

impl<F> NfsAdapter<F>
where
    F: ReadOnlyFilesystem + 'static,
    F::File: 'static,
{
    pub fn new(fs: F, handles: Arc<HandleRegistry>, open_files: usize) -> gitree_core::Result<Self> {
        let root = handles.to_handle("")?;
        let root_id = root.file_id();
        let known = DashMap::new();
        known.insert(
            root_id,
            Known {
                path: String::new(),
                handle: root,
            },
        );
        let ids = DashMap::new();
        ids.insert(String::new(), root_id);
        Ok(Self {
            fs,
            handles,
            known,
            ids,
            open_files: OpenFiles::new(open_files),
            root_id,
        })
    }

    fn path_of(&self, id: fileid3) -> Result<String, nfsstat3> {
        self.known
            .get(&id)
            .map(|known| known.path.clone())
            .ok_or(nfsstat3::NFS3ERR_STALE)
    }

    fn remember(&self, path: String, handle: Handle) -> fileid3 {
        let id = handle.file_id();
        if let Some(existing) = self.known.get(&id) {
            if existing.handle != handle {
                tracing::error!(fileid = id, path, other = %existing.path, "file id collision");
            }
        }
        self.ids.insert(path.clone(), id);
        self.known.insert(id, Known { path, handle });
        id
    }

    fn cached_id(&self, path: &str) -> Option<fileid3> {
        self.ids.get(path).map(|id| *id)
    }

    /// File ID for `path`, issuing a persistent handle if needed.
    async fn register(&self, path: String) -> Result<fileid3, nfsstat3> {
        if let Some(id) = self.cached_id(&path) {
            return Ok(id);
        }
        let handles = Arc::clone(&self.handles);
        let key = path.clone();
        let handle = tokio::task::spawn_blocking(move || handles.to_handle(&key))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "handle registration task failed");
                nfsstat3::NFS3ERR_IO
            })?
            .map_err(|e| status(&e, &path, nfsstat3::NFS3ERR_IO))?;
        Ok(self.remember(path, handle))
    }

    /// File IDs for `paths`; paths not seen before share one store
    /// transaction.
    async fn register_all(&self, paths: &[String]) -> Result<Vec<fileid3>, nfsstat3> {
        let unseen: Vec<String> = paths
            .iter()
            .filter(|path| self.cached_id(path).is_none())
            .cloned()
            .collect();
        if !unseen.is_empty() {
            let handles = Arc::clone(&self.handles);
            let keys = unseen.clone();
            let issued = tokio::task::spawn_blocking(move || handles.to_handles(&keys))
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "handle registration task failed");
                    nfsstat3::NFS3ERR_IO
                })?
                .map_err(|e| status(&e, "<listing>", nfsstat3::NFS3ERR_IO))?;
            for (path, handle) in unseen.into_iter().zip(issued) {
                self.remember(path, handle);
            }
        }
        paths
            .iter()
            .map(|path| self.cached_id(path).ok_or(nfsstat3::NFS3ERR_IO))
            .collect()
    }

    async fn stat(&self, path: &str) -> Result<DirEntry, nfsstat3> {
        self.fs
            .stat(&absolute(path))
            .await
            .map_err(|e| status(&e, path, nfsstat3::NFS3ERR_INVAL))
    }

    async fn cursor(&self, id: fileid3) -> Result<Arc<F::File>, nfsstat3> {
        if let Some(cursor) = self.open_files.get(id) {
            return Ok(cursor);
        }
        let path = self.path_of(id)?;
        let cursor = self
            .fs
            .open(&absolute(&path))
            .await
            .map_err(|e| status(&e, &path, nfsstat3::NFS3ERR_ISDIR))?;
        let cursor = Arc::new(cursor);
        // Evicted cursors may still be mid-read elsewhere; dropping the last
        // reference releases them.
        let evicted = self.open_files.insert(id, Arc::clone(&cursor));
        if !evicted.is_empty() {
            tracing::trace!(count = evicted.len(), "evicted open files");
        }
        Ok(cursor)
    }
}

#[async_trait]
impl<F> NFSFileSystem for NfsAdapter<F>
where
    F: ReadOnlyFilesystem + 'static,
    F::File: 'static,
{
    fn capabilities(&self) -> VFSCapabilities {
        VFSCapabilities::ReadOnly
    }

    fn root_dir(&self) -> fileid3 {
        self.root_id
    }

    async fn lookup(&self, dirid: fileid3, filename: &filename3) -> Result<fileid3, nfsstat3> {
        let dir = self.path_of(dirid)?;
        let name = std::str::from_utf8(&filename.0).map_err(|_| nfsstat3::NFS3ERR_NOENT)?;
        let path = match name {
            "" | "." => return Ok(dirid),
            ".." => split_parent(&dir).0.to_string(),
            _ => join(&dir, name),
        };
        let dir_entry = self.stat(&dir).await?;
        if !dir_entry.is_dir() {
            return Err(nfsstat3::NFS3ERR_NOTDIR);
        }
        self.stat(&path).await?;
        self.register(path).await
    }

    async fn getattr(&self, id: fileid3) -> Result<fattr3, nfsstat3> {
        let path = self.path_of(id)?;
        let entry = self.stat(&path).await?;
        Ok(fattr(id, &entry))
    }

    async fn setattr(&self, _id: fileid3, _setattr: sattr3) -> Result<fattr3, nfsstat3> {
        Err(nfsstat3::NFS3ERR_ROFS)
    }

    async fn read(
        &self,
        id: fileid3,
        offset: u64,
        count: u32,
    ) -> Result<(Vec<u8>, bool), nfsstat3> {
        let cursor = self.cursor(id).await?;
        let mut buf = vec![0u8; count as usize];
        let n = cursor
            .read_at(&mut buf, offset)
            .await
            .map_err(|e| status(&e, cursor.name(), nfsstat3::NFS3ERR_INVAL))?;
        buf.truncate(n);
        let eof = offset.saturating_add(n as u64) >= cursor.size();
        Ok((buf, eof))
    }

    async fn write(&self, _id: fileid3, _offset: u64, _data: &[u8]) -> Result<fattr3, nfsstat3> {
        Err(nfsstat3::NFS3ERR_ROFS)
    }

    async fn create(
        &self,
        _dirid: fileid3,
        _filename: &filename3,
        _attr: sattr3,
    ) -> Result<(fileid3, fattr3), nfsstat3> {
        Err(nfsstat3::NFS3ERR_ROFS)
    }

    async fn create_exclusive(
        &self,
        _dirid: fileid3,
        _filename: &filename3,
    ) -> Result<fileid3, nfsstat3> {
        Err(nfsstat3::NFS3ERR_ROFS)
    }

    async fn mkdir(
        &self,
        _dirid: fileid3,
        _dirname: &filename3,
    ) -> Result<(fileid3, fattr3), nfsstat3> {
        Err(nfsstat3::NFS3ERR_ROFS)
    }

    async fn remove(&self, _dirid: fileid3, _filename: &filename3) -> Result<(), nfsstat3> {
        Err(nfsstat3::NFS3ERR_ROFS)
    }

    async fn rename(
        &self,
        _from_dirid: fileid3,
        _from_filename: &filename3,
        _to_dirid: fileid3,
        _to_filename: &filename3,
    ) -> Result<(), nfsstat3> {
        Err(nfsstat3::NFS3ERR_ROFS)
    }

    async fn readdir(
        &self,
        dirid: fileid3,
        start_after: fileid3,
        max_entries: usize,
    ) -> Result<ReadDirResult, nfsstat3> {
        let dir = self.path_of(dirid)?;
        let children = self
            .fs
            .read_directory(&absolute(&dir))
            .await
            .map_err(|e| status(&e, &dir, nfsstat3::NFS3ERR_NOTDIR))?;

        let paths: Vec<String> = children.iter().map(|child| join(&dir, &child.name)).collect();
        let ids = self.register_all(&paths).await?;
        let listed: Vec<(fileid3, DirEntry)> = ids.into_iter().zip(children).collect();

        let start = if start_after == 0 {
            0
        } else {
            listed
                .iter()
                .position(|(id, _)| *id == start_after)
                .map(|index| index + 1)
                .ok_or(nfsstat3::NFS3ERR_BAD_COOKIE)?
        };

        let remaining = listed.len().saturating_sub(start);
        let entries: Vec<vfs::DirEntry> = listed
            .into_iter()
            .skip(start)
            .take(max_entries)
            .map(|(id, child)| vfs::DirEntry {
                fileid: id,
                name: nfsstring(child.name.clone().into_bytes()),
                attr: fattr(id, &child),
            })
            .collect();
        let end = entries.len() >= remaining;
        Ok(ReadDirResult { entries, end })
    }

    async fn symlink(
        &self,
        _dirid: fileid3,
        _linkname: &filename3,
        _symlink: &nfspath3,
        _attr: &sattr3,
    ) -> Result<(fileid3, fattr3), nfsstat3> {
        Err(nfsstat3::NFS3ERR_ROFS)
    }

    async fn readlink(&self, _id: fileid3) -> Result<nfspath3, nfsstat3> {
        // Symlinks are never materialized.
        Err(nfsstat3::NFS3ERR_INVAL)
    }

    fn id_to_fh(&self, id: fileid3) -> nfs_fh3 {
        match self.known.get(&id) {
            Some(known) => nfs_fh3 {
                data: known.handle.as_bytes().to_vec(),
            },
            None => {
                tracing::error!(fileid = id, "file id without a handle");
                nfs_fh3 { data: Vec::new() }
            }
        }
    }

    fn fh_to_id(&self, fh: &nfs_fh3) -> Result<fileid3, nfsstat3> {
        let handle = Handle::from_slice(&fh.data).map_err(|_| nfsstat3::NFS3ERR_STALE)?;
        let id = handle.file_id();
        if self.known.get(&id).is_some_and(|known| known.handle == handle) {
            return Ok(id);
        }
        let path = match self.handles.from_handle(handle.as_bytes()) {
            Ok(path) => path,
            Err(Error::StaleHandle) => return Err(nfsstat3::NFS3ERR_STALE),
            Err(e) => return Err(status(&e, "<handle>", nfsstat3::NFS3ERR_STALE)),
        };
        Ok(self.remember(path, handle))
    }
}

fn absolute(path: &str) -> std::path::PathBuf {
    Path::new("/").join(path)
}

/// Map a core error to an NFS status. `invalid` is what an
/// [`Error::InvalidArgument`] means at the call site (wrong node kind).
fn status(error: &Error, path: &str, invalid: nfsstat3) -> nfsstat3 {
    if error.is_expected() {
        tracing::debug!(path, %error, "not found");
    } else {
        tracing::error!(path, %error, "nfs request failed");
    }
    match error {
        Error::NotFound(_) | Error::InvalidRevision(_) => nfsstat3::NFS3ERR_NOENT,
        Error::StaleHandle => nfsstat3::NFS3ERR_STALE,
        Error::TooLarge { .. } => nfsstat3::NFS3ERR_FBIG,
        Error::InvalidArgument(_) => invalid,
        Error::ClosedResource | Error::Internal(_) => nfsstat3::NFS3ERR_IO,
    }
}

fn nfs_time(time: SystemTime) -> nfstime3 {
    let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
    nfstime3 {
        seconds: u32::try_from(since_epoch.as_secs()).unwrap_or(u32::MAX),
        nseconds: since_epoch.subsec_nanos(),
    }
}

fn fattr(id: fileid3, entry: &DirEntry) -> fattr3 {
    let time = nfs_time(entry.modified);
    let (uid, gid) = owner();
    fattr3 {
        ftype: match entry.kind {
            NodeKind::File => ftype3::NF3REG,
            NodeKind::Directory => ftype3::NF3DIR,
        },
        mode: entry.permissions,
        nlink: 1,
        uid,
        gid,
        size: entry.size,
        used: entry.size,
        rdev: specdata3 {
            specdata1: 0,
            specdata2: 0,
        },
        fsid: 0,
        fileid: id,
        atime: time,
        mtime: time,
        ctime: time,
    }
}

fn owner() -> (u32, u32) {
    let attributes = gitree_core::Attributes::directory();
    (attributes.uid, attributes.gid)
}
