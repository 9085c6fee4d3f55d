//! Extension manifest parsing and discovery (C4/C5): reading a single
//! extension's `content.xml`, and scanning, filtering, and ordering the
//! full extension set for a game/user directory pair.

pub mod discovery;
pub mod error;
pub mod manifest;

pub use discovery::{discover, resolve_load_order, DiscoveryFilter, ExtensionRecord};
pub use error::{ExtmanError, Result};
pub use manifest::{Dependency, Manifest, UserConfig};
