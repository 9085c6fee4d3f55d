//! Parsing of the patch document format (§3 "Patch Document", §4.6, §6).

use crate::error::{Result, XmlPatchError};
use crate::tree::{Document, Fragment, NodeId, NodeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddPos {
    Before,
    After,
    Prepend,
    Append,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddPayload {
    Attribute { name: String, value: String },
    Fragment(Vec<Fragment>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplacePayload {
    AttributeValue(String),
    Fragment(Fragment),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOp {
    Add {
        sel: String,
        pos: AddPos,
        payload: AddPayload,
    },
    Remove {
        sel: String,
    },
    Replace {
        sel: String,
        payload: ReplacePayload,
    },
}

impl PatchOp {
    pub fn sel(&self) -> &str {
        match self {
            PatchOp::Add { sel, .. } | PatchOp::Remove { sel } | PatchOp::Replace { sel, .. } => {
                sel
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchDocument {
    pub ops: Vec<PatchOp>,
}

impl PatchDocument {
    pub fn parse(xml_text: &str) -> Result<Self> {
        let doc = Document::parse(xml_text)?;
        let root = doc.document_element();
        if doc.element_name(root) != Some("diff") {
            return Err(XmlPatchError::MalformedPatch(format!(
                "patch document root must be <diff>, found <{}>",
                doc.element_name(root).unwrap_or("?")
            )));
        }

        let mut ops = Vec::new();
        for child in doc.children_elements(root) {
            ops.push(parse_op(&doc, child)?);
        }
        Ok(Self { ops })
    }
}

fn parse_op(doc: &Document, node: NodeId) -> Result<PatchOp> {
    let name = doc.element_name(node).unwrap_or_default();
    let sel = doc
        .get_attribute(node, "sel")
        .ok_or_else(|| XmlPatchError::MalformedPatch(format!("<{name}> is missing sel")))?
        .to_string();

    match name {
        "add" => parse_add(doc, node, sel),
        "remove" => Ok(PatchOp::Remove { sel }),
        "replace" => parse_replace(doc, node, sel),
        other => Err(XmlPatchError::MalformedPatch(format!(
            "unknown patch operation <{other}>"
        ))),
    }
}

fn parse_add(doc: &Document, node: NodeId, sel: String) -> Result<PatchOp> {
    if let Some(type_attr) = doc.get_attribute(node, "type") {
        let attr_name = type_attr.strip_prefix('@').ok_or_else(|| {
            XmlPatchError::MalformedPatch(format!(
                "<add type={type_attr:?}> must use the @name form to add an attribute"
            ))
        })?;
        let value = text_content(doc, node);
        return Ok(PatchOp::Add {
            sel,
            pos: AddPos::Append,
            payload: AddPayload::Attribute {
                name: attr_name.to_string(),
                value,
            },
        });
    }

    let pos = match doc.get_attribute(node, "pos") {
        None | Some("append") => AddPos::Append,
        Some("before") => AddPos::Before,
        Some("after") => AddPos::After,
        Some("prepend") => AddPos::Prepend,
        Some(other) => {
            return Err(XmlPatchError::MalformedPatch(format!(
                "unsupported add pos {other:?}"
            )))
        }
    };

    let fragments: Vec<Fragment> = doc
        .children(node)
        .iter()
        .map(|&c| doc.to_fragment(c))
        .filter(|f| !is_blank_fragment(f))
        .collect();

    Ok(PatchOp::Add {
        sel,
        pos,
        payload: AddPayload::Fragment(fragments),
    })
}

fn parse_replace(doc: &Document, node: NodeId, sel: String) -> Result<PatchOp> {
    if sel_targets_attribute(&sel) {
        return Ok(PatchOp::Replace {
            sel,
            payload: ReplacePayload::AttributeValue(text_content(doc, node)),
        });
    }

    let element_children: Vec<NodeId> = doc
        .children(node)
        .iter()
        .copied()
        .filter(|&c| matches!(doc.get(c).kind, NodeKind::Element { .. }))
        .collect();

    let fragment = match element_children.as_slice() {
        [only] => doc.to_fragment(*only),
        [] => {
            return Err(XmlPatchError::MalformedPatch(
                "<replace> targeting an element needs exactly one replacement element"
                    .to_string(),
            ))
        }
        _ => {
            return Err(XmlPatchError::MalformedPatch(
                "<replace> targeting an element accepts exactly one replacement element"
                    .to_string(),
            ))
        }
    };

    Ok(PatchOp::Replace {
        sel,
        payload: ReplacePayload::Fragment(fragment),
    })
}

fn text_content(doc: &Document, node: NodeId) -> String {
    doc.children(node)
        .iter()
        .filter_map(|&c| match &doc.get(c).kind {
            NodeKind::Text(t) => Some(t.as_str()),
            NodeKind::Element { .. } => None,
            NodeKind::Document => None,
        })
        .collect::<Vec<_>>()
        .join("")
        .trim()
        .to_string()
}

fn is_blank_fragment(f: &Fragment) -> bool {
    matches!(f, Fragment::Text(t) if t.trim().is_empty())
}

/// Mirrors `xpath::parse_xpath`'s attribute-target detection without
/// pulling in the full parser: the selector targets an attribute iff its
/// final `/`-delimited segment begins with `@`.
pub fn sel_targets_attribute(sel: &str) -> bool {
    sel.rsplit('/').next().is_some_and(|seg| seg.starts_with('@'))
}
