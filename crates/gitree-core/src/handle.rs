//! Persistent path ↔ handle registry for the network protocol.
//!
//! Network clients hold on to opaque handles across server restarts, so the
//! mapping lives in an LMDB environment on disk. The two directions are two
//! named databases: paths are UTF-8 keys, handles are fixed 16-byte keys,
//! and neither keyspace can be mistaken for the other.

use std::fmt;
use std::path::{Path, PathBuf};

use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};

use crate::error::{Error, Result};

/// Length of every issued handle.
pub const HANDLE_LEN: usize = 16;

/// Stored key for the empty (root) path, which LMDB cannot use as a key.
const ROOT_PLACEHOLDER: &str = "/";

const PATH_TO_HANDLE: &str = "path-to-handle";
const HANDLE_TO_PATH: &str = "handle-to-path";

/// Upper bound for the map size; LMDB only reserves address space.
const MAP_SIZE: usize = 1024 * 1024 * 1024;

/// Largest handle count that can be advertised to clients.
pub const MAX_HANDLE_LIMIT: u64 = i32::MAX as u64;

/// Opaque identifier standing in for a path.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle([u8; HANDLE_LEN]);

impl Handle {
    fn generate() -> Self {
        Self(*uuid::Uuid::new_v4().as_bytes())
    }

    /// Parse wire bytes. Anything other than exactly [`HANDLE_LEN`] bytes
    /// can never have been issued, so it is stale.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; HANDLE_LEN] = bytes.try_into().map_err(|_| Error::StaleHandle)?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; HANDLE_LEN] {
        &self.0
    }

    /// Numeric identity derived from the handle, stable across restarts.
    pub fn file_id(&self) -> u64 {
        let mut head = [0u8; 8];
        head.copy_from_slice(&self.0[..8]);
        u64::from_be_bytes(head)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", uuid::Uuid::from_bytes(self.0))
    }
}

/// Durable bidirectional path ↔ handle map.
pub struct HandleRegistry {
    env: Env,
    path_to_handle: Database<Str, Bytes>,
    handle_to_path: Database<Bytes, Str>,
    location: PathBuf,
    handle_limit: u64,
}

impl fmt::Debug for HandleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleRegistry")
            .field("location", &self.location)
            .field("handle_limit", &self.handle_limit)
            .finish()
    }
}

impl HandleRegistry {
    /// Open (or create) the store in `dir`.
    ///
    /// `handle_limit` is clamped to [`MAX_HANDLE_LIMIT`].
    pub fn open(dir: impl AsRef<Path>, handle_limit: u64) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        // SAFETY: the environment is opened once per directory by this
        // process and the files are not modified by anything else.
        #[allow(unsafe_code)]
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(MAP_SIZE)
                .max_dbs(2)
                .open(dir)?
        };

        let mut wtxn = env.write_txn()?;
        let path_to_handle = env.create_database(&mut wtxn, Some(PATH_TO_HANDLE))?;
        let handle_to_path = env.create_database(&mut wtxn, Some(HANDLE_TO_PATH))?;
        wtxn.commit()?;

        let registry = Self {
            env,
            path_to_handle,
            handle_to_path,
            location: dir.to_path_buf(),
            handle_limit: handle_limit.min(MAX_HANDLE_LIMIT),
        };
        tracing::info!(
            path = %dir.display(),
            handles = registry.issued().unwrap_or(0),
            "opened handle store"
        );
        Ok(registry)
    }

    /// Configured handle count, clamped. The NFSv3 server never asks for
    /// it; it is reported at startup only.
    pub fn handle_limit(&self) -> u64 {
        self.handle_limit
    }

    /// Handle for `path`, issuing and persisting a new one on first use.
    ///
    /// Both directions are written in one transaction.
    pub fn to_handle(&self, path: &str) -> Result<Handle> {
        let key = storage_key(path);
        {
            let rtxn = self.env.read_txn()?;
            if let Some(bytes) = self.path_to_handle.get(&rtxn, key)? {
                return Handle::from_slice(bytes).map_err(|_| corrupt(key));
            }
        }

        // LMDB allows one writer at a time; re-check under it.
        let mut wtxn = self.env.write_txn()?;
        if let Some(bytes) = self.path_to_handle.get(&wtxn, key)? {
            return Handle::from_slice(bytes).map_err(|_| corrupt(key));
        }
        let handle = Handle::generate();
        self.path_to_handle.put(&mut wtxn, key, handle.as_bytes())?;
        self.handle_to_path.put(&mut wtxn, handle.as_bytes(), key)?;
        wtxn.commit()?;

        tracing::debug!(path = key, handle = ?handle, "issued handle");
        Ok(handle)
    }

    /// Path for a handle previously issued by [`to_handle`](Self::to_handle).
    ///
    /// Never-issued or malformed handles fail with [`Error::StaleHandle`].
    pub fn from_handle(&self, bytes: &[u8]) -> Result<String> {
        let handle = Handle::from_slice(bytes)?;
        let rtxn = self.env.read_txn()?;
        match self.handle_to_path.get(&rtxn, handle.as_bytes())? {
            Some(ROOT_PLACEHOLDER) => Ok(String::new()),
            Some(path) => Ok(path.to_string()),
            None => Err(Error::StaleHandle),
        }
    }

    /// Number of issued handles.
    pub fn issued(&self) -> Result<u64> {
        let rtxn = self.env.read_txn()?;
        Ok(self.handle_to_path.len(&rtxn)?)
    }

    /// Handles for several paths, issuing the missing ones in a single
    /// write transaction. The result is in the order of `paths`.
    pub fn to_handles<S: AsRef<str>>(&self, paths: &[S]) -> Result<Vec<Handle>> {
        let mut handles = Vec::with_capacity(paths.len());
        let mut missing = Vec::new();
        {
            let rtxn = self.env.read_txn()?;
            for (index, path) in paths.iter().enumerate() {
                let key = storage_key(path.as_ref());
                match self.path_to_handle.get(&rtxn, key)? {
                    Some(bytes) => {
                        handles.push(Some(Handle::from_slice(bytes).map_err(|_| corrupt(key))?));
                    }
                    None => {
                        handles.push(None);
                        missing.push(index);
                    }
                }
            }
        }

        if !missing.is_empty() {
            let mut wtxn = self.env.write_txn()?;
            for &index in &missing {
                let key = storage_key(paths[index].as_ref());
                let existing = match self.path_to_handle.get(&wtxn, key)? {
                    Some(bytes) => Some(Handle::from_slice(bytes).map_err(|_| corrupt(key))?),
                    None => None,
                };
                let handle = match existing {
                    Some(handle) => handle,
                    None => {
                        let handle = Handle::generate();
                        self.path_to_handle.put(&mut wtxn, key, handle.as_bytes())?;
                        self.handle_to_path.put(&mut wtxn, handle.as_bytes(), key)?;
                        handle
                    }
                };
                handles[index] = Some(handle);
            }
            wtxn.commit()?;
            tracing::debug!(issued = missing.len(), "issued handles");
        }

        handles
            .into_iter()
            .map(|handle| handle.ok_or_else(|| Error::internal("handle batch left a gap")))
            .collect()
    }
}

fn storage_key(path: &str) -> &str {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        ROOT_PLACEHOLDER
    } else {
        trimmed
    }
}

fn corrupt(path: &str) -> Error {
    Error::internal(format!("handle store holds a malformed handle for '{path}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn open(dir: &tempfile::TempDir) -> HandleRegistry {
        HandleRegistry::open(dir.path(), 1_000).unwrap()
    }

    #[test]
    fn round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let registry = open(&dir);
        let handle = registry.to_handle("demo/main/src/a.txt").unwrap();
        assert_eq!(
            registry.from_handle(handle.as_bytes()).unwrap(),
            "demo/main/src/a.txt"
        );
    }

    #[test]
    fn same_path_same_handle() {
        let dir = tempfile::tempdir().unwrap();
        let registry = open(&dir);
        let first = registry.to_handle("demo/main").unwrap();
        let second = registry.to_handle("demo/main").unwrap();
        assert_eq!(first, second);
        assert_ne!(first, registry.to_handle("demo/other").unwrap());
        assert_eq!(registry.issued().unwrap(), 2);
    }

    #[rstest]
    #[case::never_issued(&[7u8; HANDLE_LEN])]
    #[case::short(&[1, 2, 3])]
    #[case::empty(&[])]
    fn unknown_handles_are_stale(#[case] bytes: &[u8]) {
        let dir = tempfile::tempdir().unwrap();
        let registry = open(&dir);
        assert_eq!(registry.from_handle(bytes), Err(Error::StaleHandle));
    }

    #[rstest]
    #[case("")]
    #[case("/")]
    fn root_uses_placeholder(#[case] path: &str) {
        let dir = tempfile::tempdir().unwrap();
        let registry = open(&dir);
        let handle = registry.to_handle(path).unwrap();
        assert_eq!(registry.from_handle(handle.as_bytes()).unwrap(), "");
        assert_eq!(registry.to_handle("").unwrap(), handle);
    }

    #[test]
    fn handles_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let handle = {
            let registry = open(&dir);
            registry.to_handle("demo/v1.0/README.md").unwrap()
        };
        let registry = open(&dir);
        assert_eq!(
            registry.from_handle(handle.as_bytes()).unwrap(),
            "demo/v1.0/README.md"
        );
        assert_eq!(registry.to_handle("demo/v1.0/README.md").unwrap(), handle);
    }

    #[test]
    fn batch_issues_once_and_matches_single_lookups() {
        let dir = tempfile::tempdir().unwrap();
        let registry = open(&dir);
        let known = registry.to_handle("demo/main/README.md").unwrap();

        let paths = ["demo/main/README.md", "demo/main/src", "demo/main/src"];
        let batch = registry.to_handles(&paths).unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0], known);
        assert_eq!(batch[1], batch[2]);
        assert_eq!(registry.issued().unwrap(), 2);

        assert_eq!(registry.to_handle("demo/main/src").unwrap(), batch[1]);
        assert_eq!(registry.from_handle(batch[1].as_bytes()).unwrap(), "demo/main/src");
        assert!(registry.to_handles::<&str>(&[]).unwrap().is_empty());
    }

    #[test]
    fn handle_limit_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let registry = HandleRegistry::open(dir.path(), u64::MAX).unwrap();
        assert_eq!(registry.handle_limit(), i32::MAX as u64);
    }

    #[test]
    fn file_id_comes_from_handle_bytes() {
        let mut bytes = [0u8; HANDLE_LEN];
        bytes[7] = 5;
        let handle = Handle::from_slice(&bytes).unwrap();
        assert_eq!(handle.file_id(), 5);
    }
}
