//! `fuser::Filesystem` glue.
//!
//! Each request is handed to a blocking worker of the tokio runtime, so a
//! slow tree listing only holds up the requests that need that tree.

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEntry, ReplyOpen,
    ReplyStatfs, Request,
};
use gitree_core::{Attributes, NodeKind};
use tokio::runtime::Handle;

use crate::adapter::{KernelAdapter, KernelError};

/// How long the kernel may cache entries and attributes.
const TTL: Duration = Duration::from_secs(1);

/// Generation number for every entry; IDs are never reused.
const GENERATION: u64 = 0;

/// The mounted filesystem.
pub struct GitreeFs {
    adapter: Arc<KernelAdapter>,
    runtime: Handle,
}

impl GitreeFs {
    pub fn new(adapter: Arc<KernelAdapter>, runtime: Handle) -> Self {
        Self { adapter, runtime }
    }

    fn dispatch<F>(&self, f: F)
    where
        F: FnOnce(&KernelAdapter) + Send + 'static,
    {
        let adapter = Arc::clone(&self.adapter);
        self.runtime.spawn_blocking(move || f(&adapter));
    }
}

impl Filesystem for GitreeFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str().map(str::to_owned) else {
            reply.error(libc::ENOENT);
            return;
        };
        self.dispatch(move |adapter| match adapter.lookup(parent, &name) {
            Ok((id, attributes)) => reply.entry(&TTL, &file_attr(id, &attributes), GENERATION),
            Err(e) => reply.error(e.errno()),
        });
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        self.dispatch(move |adapter| match adapter.attributes(ino) {
            Ok(attributes) => reply.attr(&TTL, &file_attr(ino, &attributes)),
            Err(e) => reply.error(e.errno()),
        });
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.adapter.open_file(ino) {
            Ok(()) => reply.opened(0, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        self.dispatch(move |adapter| match adapter.read_file(ino, offset, size as usize) {
            Ok(bytes) => reply.data(&bytes),
            Err(e) => reply.error(e.errno()),
        });
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.adapter.open_directory(ino) {
            Ok(()) => reply.opened(0, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        self.dispatch(move |adapter| match adapter.read_directory(ino, offset) {
            Ok(entries) => {
                for entry in entries {
                    let next = i64::try_from(entry.next_offset).unwrap_or(i64::MAX);
                    if reply.add(entry.id, next, file_type(entry.kind), &entry.name) {
                        break;
                    }
                }
                reply.ok();
            }
            // The kernel keeps asking until it gets an empty page.
            Err(KernelError::OffsetOutOfRange) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        });
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let stats = self.adapter.statfs();
        reply.statfs(0, 0, 0, stats.inodes, 0, stats.block_size, stats.name_max, stats.block_size);
    }
}

fn file_type(kind: NodeKind) -> FileType {
    match kind {
        NodeKind::File => FileType::RegularFile,
        NodeKind::Directory => FileType::Directory,
    }
}

pub(crate) fn file_attr(ino: u64, attributes: &Attributes) -> FileAttr {
    let time: SystemTime = attributes.time;
    FileAttr {
        ino,
        size: attributes.size,
        blocks: attributes.blocks(),
        atime: time,
        mtime: time,
        ctime: time,
        crtime: time,
        kind: file_type(attributes.kind),
        perm: attributes.permissions,
        nlink: attributes.nlink,
        uid: attributes.uid,
        gid: attributes.gid,
        rdev: 0,
        blksize: gitree_core::attr::BLOCK_SIZE,
        flags: 0,
    }
}
