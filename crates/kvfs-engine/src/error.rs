//! POSIX-style error taxonomy for engine operations.

use thiserror::Error;

/// Errors returned by the filesystem facade, file handles and the stores below them.
///
/// Everything except [`FsError::Io`] and [`FsError::Store`] is an expected
/// control-flow outcome; those two surface as `EIO`.
#[derive(Debug, Error)]
pub enum FsError {
    /// Path or a required parent does not exist.
    #[error("no such file or directory: {path}")]
    NotFound {
        /// Offending path
        path: String,
    },

    /// Exclusive create target already exists.
    #[error("file exists: {path}")]
    AlreadyExists {
        /// Offending path
        path: String,
    },

    /// Expected a directory, found another node type.
    #[error("not a directory: {path}")]
    NotADirectory {
        /// Offending path
        path: String,
    },

    /// File-only operation attempted on a directory.
    #[error("is a directory: {path}")]
    IsADirectory {
        /// Offending path
        path: String,
    },

    /// Remove or rename-overwrite of a directory that still has children.
    #[error("directory not empty: {path}")]
    NotEmpty {
        /// Offending path
        path: String,
    },

    /// Invalid argument (bad seek position, readlink on a non-symlink, ...).
    #[error("invalid argument: {msg}")]
    InvalidArgument {
        /// Description of what was wrong
        msg: String,
    },

    /// Operation on a closed handle, or a handle lacking the needed access mode.
    #[error("bad file descriptor: {path}")]
    BadDescriptor {
        /// Path the handle was opened on
        path: String,
    },

    /// Symlink resolution revisited a path already in its own chain.
    #[error("too many levels of symbolic links: {path}")]
    Loop {
        /// Path seen twice during resolution
        path: String,
    },

    /// Lower-level I/O failure in the durable store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing store failed a read or transaction unexpectedly.
    #[error("store error: {0}")]
    Store(String),
}

/// Result alias used across the engine.
pub type Result<T> = std::result::Result<T, FsError>;

impl FsError {
    /// Maps the error onto the matching libc errno value.
    pub fn errno(&self) -> i32 {
        use libc::*;
        match self {
            FsError::NotFound { .. } => ENOENT,
            FsError::AlreadyExists { .. } => EEXIST,
            FsError::NotADirectory { .. } => ENOTDIR,
            FsError::IsADirectory { .. } => EISDIR,
            FsError::NotEmpty { .. } => ENOTEMPTY,
            FsError::InvalidArgument { .. } => EINVAL,
            FsError::BadDescriptor { .. } => EBADF,
            FsError::Loop { .. } => ELOOP,
            FsError::Io(_) => EIO,
            FsError::Store(_) => EIO,
        }
    }

    /// Symbolic POSIX name of the error code, e.g. `"ENOENT"`.
    pub fn code(&self) -> &'static str {
        match self {
            FsError::NotFound { .. } => "ENOENT",
            FsError::AlreadyExists { .. } => "EEXIST",
            FsError::NotADirectory { .. } => "ENOTDIR",
            FsError::IsADirectory { .. } => "EISDIR",
            FsError::NotEmpty { .. } => "ENOTEMPTY",
            FsError::InvalidArgument { .. } => "EINVAL",
            FsError::BadDescriptor { .. } => "EBADF",
            FsError::Loop { .. } => "ELOOP",
            FsError::Io(_) | FsError::Store(_) => "EIO",
        }
    }

    pub(crate) fn not_found(path: &str) -> Self {
        FsError::NotFound {
            path: path.to_string(),
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        FsError::InvalidArgument { msg: msg.into() }
    }
}

impl From<bincode::Error> for FsError {
    fn from(e: bincode::Error) -> Self {
        FsError::Store(format!("codec: {}", e))
    }
}
