//! Read-only virtual filesystem over the node cache.
//!
//! - **ReadOnlyFilesystem**: the capability set network front-ends consume
//! - **GitFileSystem**: path-addressed implementation over [`Root`](crate::Root)
//!
//! Paths follow `/<repository>/<commitish>/<subpath...>`. The root and a
//! bare repository are synthetic directories that list as empty.

mod gitfs;
mod traits;

pub use gitfs::{GitFile, GitFileSystem};
pub use traits::{DirEntry, FileCursor, ReadOnlyFilesystem};
