//! The diff applier (§4.6): walks a [`PatchDocument`]'s operations in
//! document order and mutates a [`Document`] in place.
//!
//! Every operation resolves its `sel` to exactly one node (or exactly one
//! attribute); zero or multiple matches is a failure. In strict mode (used
//! during normal extension load) the first failure aborts the whole patch.
//! In soft mode (used by the checker) failures are collected and the
//! remaining operations still run against whatever state the tree is in.

use tracing::{debug, warn};

use crate::error::{PatchFailure, Result, XmlPatchError};
use crate::patchdoc::{AddPayload, AddPos, PatchDocument, PatchOp, ReplacePayload};
use crate::tree::{Document, Fragment, NodeId};
use crate::xpath::{self, Target};

/// Apply every operation in `patch` to `doc`.
///
/// `strict == true` aborts and returns `Err` on the first failing operation.
/// `strict == false` records each failure and keeps applying the rest,
/// returning the accumulated list.
pub fn apply(doc: &mut Document, patch: &PatchDocument, strict: bool) -> Result<Vec<PatchFailure>> {
    let mut failures = Vec::new();

    for (op_index, op) in patch.ops.iter().enumerate() {
        match apply_one(doc, op) {
            Ok(()) => debug!(op_index, sel = op.sel(), "patch op applied"),
            Err(message) => {
                if strict {
                    return Err(XmlPatchError::Apply {
                        op_index,
                        sel: op.sel().to_string(),
                        message,
                    });
                }
                warn!(op_index, sel = op.sel(), %message, "patch op failed, continuing");
                failures.push(PatchFailure {
                    op_index,
                    sel: op.sel().to_string(),
                    message,
                });
            }
        }
    }

    Ok(failures)
}

fn apply_one(doc: &mut Document, op: &PatchOp) -> std::result::Result<(), String> {
    match op {
        PatchOp::Remove { sel } => apply_remove(doc, sel),
        PatchOp::Replace { sel, payload } => apply_replace(doc, sel, payload),
        PatchOp::Add { sel, pos, payload } => apply_add(doc, sel, *pos, payload),
    }
}

fn apply_remove(doc: &mut Document, sel: &str) -> std::result::Result<(), String> {
    let xpath = xpath::parse_xpath(sel).map_err(|e| e.to_string())?;

    if let Some(attr) = &xpath.attribute {
        let targets = xpath::select_elements(doc, &xpath);
        let node = single_match(&targets, sel)?;
        return match doc.remove_attribute(node, attr) {
            None => Err(format!("attribute {attr:?} is namespaced and cannot be removed")),
            Some(false) => Err(format!("attribute {attr:?} is not present on the matched element")),
            Some(true) => Ok(()),
        };
    }

    let node = match xpath::select(doc, &xpath) {
        Target::Elements(els) => single_match(&els, sel)?,
        Target::TextNodes(texts) => single_match(&texts, sel)?,
    };
    doc.remove_node(node);
    Ok(())
}

fn apply_replace(
    doc: &mut Document,
    sel: &str,
    payload: &ReplacePayload,
) -> std::result::Result<(), String> {
    let xpath = xpath::parse_xpath(sel).map_err(|e| e.to_string())?;

    match payload {
        ReplacePayload::AttributeValue(value) => {
            let attr = xpath
                .attribute
                .as_ref()
                .ok_or_else(|| format!("replace of an attribute value needs a /@name sel, got {sel:?}"))?;
            let targets = xpath::select_elements(doc, &xpath);
            let node = single_match(&targets, sel)?;
            if !doc.set_attribute(node, attr, value) {
                return Err(format!("attribute {attr:?} is namespaced and cannot be replaced"));
            }
            Ok(())
        }
        ReplacePayload::Fragment(fragment) => {
            let node = match xpath::select(doc, &xpath) {
                Target::Elements(els) => single_match(&els, sel)?,
                Target::TextNodes(texts) => single_match(&texts, sel)?,
            };
            doc.replace_node(node, fragment);
            Ok(())
        }
    }
}

fn apply_add(
    doc: &mut Document,
    sel: &str,
    pos: AddPos,
    payload: &AddPayload,
) -> std::result::Result<(), String> {
    let xpath = xpath::parse_xpath(sel).map_err(|e| e.to_string())?;

    match payload {
        AddPayload::Attribute { name, value } => {
            let targets = xpath::select_elements(doc, &xpath);
            let node = single_match(&targets, sel)?;
            // Namespaced attribute adds are silently ignored, matching the
            // game engine (§4.6) — not reported as a patch failure.
            doc.set_attribute(node, name, value);
            Ok(())
        }
        AddPayload::Fragment(fragments) => match xpath::select(doc, &xpath) {
            Target::Elements(els) => {
                let node = single_match(&els, sel)?;
                match pos {
                    AddPos::Append => doc.append_children(node, fragments),
                    AddPos::Prepend => doc.prepend_children(node, fragments),
                    AddPos::Before => doc.insert_before(node, fragments),
                    AddPos::After => doc.insert_after(node, fragments),
                }
                Ok(())
            }
            Target::TextNodes(texts) => {
                let node = single_match(&texts, sel)?;
                match pos {
                    AddPos::Before => doc.insert_before(node, fragments),
                    AddPos::After => doc.insert_after(node, fragments),
                    AddPos::Prepend | AddPos::Append => {
                        return Err(format!(
                            "add pos prepend/append is not meaningful when sel {sel:?} targets a text node"
                        ))
                    }
                }
                Ok(())
            }
        },
    }
}

fn single_match(nodes: &[NodeId], sel: &str) -> std::result::Result<NodeId, String> {
    match nodes.len() {
        1 => Ok(nodes[0]),
        0 => Err(format!("sel {sel:?} matched no nodes")),
        n => Err(format!("sel {sel:?} matched {n} nodes, expected exactly one")),
    }
}
