//! Error types for extension manifest parsing and discovery.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtmanError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed manifest {path}: {detail}")]
    ManifestParseError { path: PathBuf, detail: String },

    #[error("user directory {path} is missing uidata.xml and strict validation was requested")]
    UserDirInvalid { path: PathBuf },

    #[error("dependency cycle detected among extensions: {}", .members.join(" -> "))]
    DependencyCycle { members: Vec<String> },
}

pub type Result<T> = std::result::Result<T, ExtmanError>;

pub(crate) trait IoContext<T> {
    fn with_path(self, path: &std::path::Path) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn with_path(self, path: &std::path::Path) -> Result<T> {
        self.map_err(|source| ExtmanError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
