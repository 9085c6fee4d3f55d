//! Aggregated error type for the virtual file system and everything built
//! on top of it (§7's taxonomy, closed with the two ambient variants
//! `UserDirInvalid`/`ConfigValidation` that SPEC_FULL.md adds).

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModVfsError {
    #[error("path not found in any source: {path}")]
    PathMissing { path: String },

    #[error("catalog error: {0}")]
    Catalog(#[from] catalog::CatalogError),

    #[error("xml patch error: {0}")]
    XmlPatch(#[from] xmlpatch::XmlPatchError),

    #[error("extension manifest error: {0}")]
    Extman(#[from] extman::ExtmanError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("diff synthesis failed for {path} even after escalation to a whole-document replace: {detail}")]
    DiffSynthesisFailure { path: String, detail: String },

    #[error("output path {path} collides with an existing file from a different source")]
    OutputPathCollision { path: PathBuf },

    #[error("engine configuration is invalid: {detail}")]
    ConfigValidation { detail: String },

    #[error("requested path {path} is not an xml file")]
    NotXml { path: String },
}

pub type Result<T> = std::result::Result<T, ModVfsError>;

impl ModVfsError {
    /// Render the way §7's "developer mode vs summarised" distinction
    /// requires: full `{:?}` debug context, or just the `Display` message.
    pub fn render(&self, developer_mode: bool) -> String {
        if developer_mode {
            format!("{self:?}")
        } else {
            format!("{self}")
        }
    }
}
