//! Error types for catalog archive parsing and emission.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed catalog line {line_no} in {path}: {detail}")]
    MalformedLine {
        path: PathBuf,
        line_no: usize,
        detail: String,
    },

    #[error("path {path} not found in catalog {cat_path}")]
    PathNotFound { cat_path: PathBuf, path: String },

    #[error(
        "checksum mismatch for {path}: expected {expected}, computed {actual}"
    )]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("entry for {path} spans beyond the end of {dat_path} (offset {offset}, length {length}, file size {size})")]
    OutOfBounds {
        dat_path: PathBuf,
        path: String,
        offset: u64,
        length: u64,
        size: u64,
    },
}

pub type Result<T> = std::result::Result<T, CatalogError>;

pub(crate) trait IoContext<T> {
    fn with_path(self, path: &std::path::Path) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn with_path(self, path: &std::path::Path) -> Result<T> {
        self.map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
