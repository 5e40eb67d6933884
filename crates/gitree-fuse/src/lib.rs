//! gitree-fuse: git clones mounted through the kernel.
//!
//! - **adapter**: lookup/getattr/readdir/read over numeric node IDs, with
//!   no FUSE types involved
//! - **fuse**: the `fuser::Filesystem` implementation on top
//! - **options**: command line, config merging, mount options

pub mod adapter;
pub mod fuse;
pub mod options;

pub use adapter::{DirectoryEntry, KernelAdapter, KernelError, KernelResult};
pub use fuse::GitreeFs;
pub use options::{Options, Settings};
