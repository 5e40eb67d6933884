//! Error taxonomy shared by the node cache, the registries and both adapters.

use std::io;

/// Errors surfaced by the virtual tree engine.
///
/// The type is `Clone` so that one failed tree materialization can be
/// reported to every caller that waited on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Repository, commitish or path does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The provider could not resolve (or could not disambiguate) a commitish.
    #[error("cannot resolve revision '{0}'")]
    InvalidRevision(String),

    /// The file is at or above [`MAX_FILE_SIZE`](crate::MAX_FILE_SIZE).
    #[error("file is too large to load into memory: {path} is {size} bytes")]
    TooLarge { path: String, size: u64 },

    /// A network handle the registry has never issued.
    #[error("stale file handle")]
    StaleHandle,

    /// Operation on a file cursor that was already closed.
    #[error("file is already closed")]
    ClosedResource,

    /// Caller passed an argument that cannot be honoured (e.g. a negative seek).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Provider or storage failure not otherwise classified.
    #[error("{0}")]
    Internal(String),
}

/// Result type for gitree operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Error::NotFound(what.to_string())
    }

    pub fn internal(what: impl std::fmt::Display) -> Self {
        Error::Internal(what.to_string())
    }

    /// True for benign absence (`NotFound`, `InvalidRevision`).
    ///
    /// These are part of normal traffic (shells probe for `.git`, editors
    /// probe for dotfiles) and are logged at debug level only.
    pub fn is_expected(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::InvalidRevision(_))
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => Error::NotFound(e.to_string()),
            _ => Error::Internal(e.to_string()),
        }
    }
}

impl From<heed::Error> for Error {
    fn from(e: heed::Error) -> Self {
        Error::Internal(format!("handle store: {e}"))
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        let kind = match &e {
            Error::NotFound(_) | Error::InvalidRevision(_) => io::ErrorKind::NotFound,
            Error::TooLarge { .. } => io::ErrorKind::FileTooLarge,
            Error::StaleHandle => io::ErrorKind::StaleNetworkFileHandle,
            Error::ClosedResource => io::ErrorKind::BrokenPipe,
            Error::InvalidArgument(_) => io::ErrorKind::InvalidInput,
            Error::Internal(_) => io::ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}
