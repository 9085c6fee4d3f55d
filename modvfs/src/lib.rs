//! Layered virtual file system over a game installation and its enabled
//! extensions: resolves per-path overlays (full replacements and XML
//! patches), tracks provenance for output generation, and checks an
//! extension's patches against alternative load orders.

pub mod checker;
pub mod config;
pub mod driver;
pub mod error;
pub mod manifest_gen;
pub mod runlog;
pub mod source;
pub mod vfs;

pub use checker::{check_extension, CheckReport, OrderFailure, OrderKind};
pub use config::{EngineConfig, EngineConfigBuilder};
pub use driver::{RenderMode, RenderedError};
pub use error::{ModVfsError, Result};
pub use manifest_gen::{finalize, GeneratedOutput};
pub use runlog::{log_path_for, RunLog, RunLogEntry};
pub use source::SourceLocation;
pub use vfs::{CancelToken, Discriminator, FileEntry, SourceKind, VirtualFileSystem};
