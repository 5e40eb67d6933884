//! gitree-nfs: git clones exported over NFSv3.
//!
//! - **adapter**: `nfsserve::vfs::NFSFileSystem` over any
//!   [`ReadOnlyFilesystem`](gitree_core::ReadOnlyFilesystem), with
//!   persistent file handles
//! - **options**: command line and config merging

pub mod adapter;
pub mod options;

pub use adapter::{DEFAULT_OPEN_FILES, NfsAdapter};
pub use options::{Options, Settings};
