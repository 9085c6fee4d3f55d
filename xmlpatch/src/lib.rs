//! XPath-targeted XML diff application and synthesis (C7/C8): applying a
//! `<diff>` patch document to a base tree, and synthesising a minimal patch
//! document from a base/modified tree pair.

pub mod apply;
pub mod error;
pub mod patchdoc;
pub mod synth;
pub mod tree;
pub mod xpath;

pub use apply::apply;
pub use error::{PatchFailure, Result, XmlPatchError};
pub use patchdoc::{AddPayload, AddPos, PatchDocument, PatchOp, ReplacePayload};
pub use synth::{synthesize, SynthOptions, DEFAULT_IDENTIFYING_ATTRIBUTES};
pub use tree::{Document, Fragment, Node, NodeId, NodeKind};
pub use xpath::{parse_xpath, select, select_elements, Axis, NodeTest, Predicate, Step, Target, XPath};
