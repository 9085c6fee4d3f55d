//! Error types for the XML diff applier and synthesiser.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum XmlPatchError {
    #[error("XML parse error: {0}")]
    Parse(#[from] quick_xml::Error),

    #[error("XML I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid XPath selector {sel:?}: {detail}")]
    InvalidXPath { sel: String, detail: String },

    #[error("patch op {op_index} (sel={sel:?}) failed: {message}")]
    Apply {
        op_index: usize,
        sel: String,
        message: String,
    },

    #[error("diff synthesis could not reproduce the modified document even after escalating to a whole-document replace")]
    SynthesisFailure,

    #[error("malformed patch document: {0}")]
    MalformedPatch(String),
}

pub type Result<T> = std::result::Result<T, XmlPatchError>;

/// One failed operation surfaced by the applier's soft mode (§4.6, §7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchFailure {
    pub op_index: usize,
    pub sel: String,
    pub message: String,
}
