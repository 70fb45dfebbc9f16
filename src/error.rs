use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// The primary error type for all operations in the `tarchive` crate.
#[derive(Debug, Error)]
pub enum ArchiverError {
    /// The path does not exist.
    #[error("'{}' does not exist", .path.display())]
    NotFound { path: PathBuf },

    /// The path exists but cannot be read or written by this process.
    #[error("access to '{}' denied", .path.display())]
    AccessDenied { path: PathBuf },

    /// A path that must be a directory is something else.
    #[error("'{}' is not a directory", .path.display())]
    NotADirectory { path: PathBuf },

    /// An I/O error occurred while opening, reading, writing or creating a path.
    #[error("I/O error on path '{}': {}", .path.display(), .source)]
    Io { source: io::Error, path: PathBuf },

    /// A header record could not be decoded.
    #[error("format error: {0}")]
    Format(String),

    /// The type flag of a header record does not name a known entry kind.
    #[error("unknown type flag {:?}", flag_char(.0))]
    UnknownTypeFlag(u8),

    /// An entry index outside of `0..len`.
    #[error("index {index} does not exist (archive has {len} entries)")]
    Index { index: usize, len: usize },

    /// A filesystem object that is none of the seven archivable kinds.
    #[error("'{}' has a file type that cannot be archived", .path.display())]
    UnknownType { path: PathBuf },

    /// `save` was called without a path and no path was remembered.
    #[error("a file name is required to save a new archive")]
    MissingPath,
}

impl ArchiverError {
    /// Wraps an I/O error, keeping the not-found and permission cases distinguishable.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        match source.kind() {
            io::ErrorKind::NotFound => ArchiverError::NotFound { path },
            io::ErrorKind::PermissionDenied => ArchiverError::AccessDenied { path },
            _ => ArchiverError::Io { source, path },
        }
    }
}

// Generic IO error conversion that doesn't require a path
impl From<io::Error> for ArchiverError {
    fn from(err: io::Error) -> Self {
        ArchiverError::Io { source: err, path: PathBuf::new() }
    }
}

fn flag_char(flag: &u8) -> char {
    char::from(*flag)
}

pub type Result<T> = std::result::Result<T, ArchiverError>;
