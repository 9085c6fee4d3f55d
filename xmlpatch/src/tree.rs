//! A mutable, arena-indexed XML tree.
//!
//! Node identity is a plain array index (`NodeId`), not a reference-counted
//! pointer, so parent links are stored directly on each node without
//! forming the kind of owner/parent pointer cycle that a `Rc<RefCell<_>>`
//! tree would; see the design note on parent maps. Diff synthesis (`synth`)
//! additionally builds its own short-lived correspondence map alongside
//! this tree rather than mutating it, per the same note.

use std::collections::VecDeque;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;

use crate::error::{Result, XmlPatchError};

pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// The virtual node above the document element — matches real XPath
    /// semantics, where `/` addresses the document node and the first
    /// named step in an absolute selector addresses its element child.
    Document,
    Element {
        name: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub parent: Option<NodeId>,
    pub kind: NodeKind,
    pub children: Vec<NodeId>,
}

/// A detached subtree, not yet attached to any [`Document`]'s arena — the
/// payload carried by `add`/`replace` patch operations before they are
/// grafted in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Element {
        name: String,
        attrs: Vec<(String, String)>,
        children: Vec<Fragment>,
    },
    Text(String),
}

/// An XML document as a mutable arena of [`Node`]s.
#[derive(Debug, Clone)]
pub struct Document {
    arena: Vec<Node>,
    root: NodeId,
}

impl Document {
    pub fn parse(xml_text: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml_text);
        reader.config_mut().trim_text(false);

        let doc_root: NodeId = 0;
        let mut arena: Vec<Node> = vec![Node {
            parent: None,
            kind: NodeKind::Document,
            children: Vec::new(),
        }];
        let mut stack: Vec<NodeId> = vec![doc_root];

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    let parent = *stack.last().expect("stack always holds the document node");
                    let id = push_element(&mut arena, &e, Some(parent))?;
                    arena[parent].children.push(id);
                    stack.push(id);
                }
                Event::Empty(e) => {
                    let parent = *stack.last().expect("stack always holds the document node");
                    let id = push_element(&mut arena, &e, Some(parent))?;
                    arena[parent].children.push(id);
                }
                Event::End(_) => {
                    stack.pop();
                }
                Event::Text(t) => {
                    let text = t.unescape()?.into_owned();
                    let parent = *stack.last().expect("stack always holds the document node");
                    let id = arena.len();
                    arena.push(Node {
                        parent: Some(parent),
                        kind: NodeKind::Text(text),
                        children: Vec::new(),
                    });
                    arena[parent].children.push(id);
                }
                Event::CData(t) => {
                    let text = String::from_utf8_lossy(t.into_inner().as_ref()).into_owned();
                    let parent = *stack.last().expect("stack always holds the document node");
                    let id = arena.len();
                    arena.push(Node {
                        parent: Some(parent),
                        kind: NodeKind::Text(text),
                        children: Vec::new(),
                    });
                    arena[parent].children.push(id);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        let has_document_element = arena[doc_root]
            .children
            .iter()
            .any(|&c| matches!(arena[c].kind, NodeKind::Element { .. }));
        if !has_document_element {
            return Err(XmlPatchError::MalformedPatch(
                "document does not contain a root element".to_string(),
            ));
        }

        Ok(Self {
            arena,
            root: doc_root,
        })
    }

    /// The virtual document node. Absolute selectors (`/name/...`) resolve
    /// their first step as a child-axis test against this node, exactly as
    /// they would against a real document node.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The actual top-level element (the document node's sole element
    /// child) — what callers usually mean by "the root" outside of XPath
    /// resolution.
    pub fn document_element(&self) -> NodeId {
        self.arena[self.root]
            .children
            .iter()
            .copied()
            .find(|&c| matches!(self.arena[c].kind, NodeKind::Element { .. }))
            .expect("Document::parse guarantees a root element")
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.arena[id]
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.arena[id].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.arena[id].children
    }

    pub fn children_elements(&self, id: NodeId) -> Vec<NodeId> {
        self.arena[id]
            .children
            .iter()
            .copied()
            .filter(|&c| matches!(self.arena[c].kind, NodeKind::Element { .. }))
            .collect()
    }

    pub fn element_name(&self, id: NodeId) -> Option<&str> {
        match &self.arena[id].kind {
            NodeKind::Element { name, .. } => Some(name),
            NodeKind::Document | NodeKind::Text(_) => None,
        }
    }

    pub fn attributes(&self, id: NodeId) -> &[(String, String)] {
        match &self.arena[id].kind {
            NodeKind::Element { attrs, .. } => attrs,
            NodeKind::Document | NodeKind::Text(_) => &[],
        }
    }

    pub fn get_attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.attributes(id)
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Descendants of `id`, in document (pre-)order, including `id` itself
    /// if it is an element — the node set `//name` searches over.
    pub fn descendants_or_self_elements(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(id);
        while let Some(n) = queue.pop_front() {
            if matches!(self.arena[n].kind, NodeKind::Element { .. }) {
                out.push(n);
            }
            for &c in &self.arena[n].children {
                queue.push_back(c);
            }
        }
        out
    }

    /// Attribute setter. Namespace-prefixed attribute names (`xmlns:*`, or
    /// any `prefix:local` setter) are silently ignored, matching the game
    /// engine's own behaviour (§4.6); returns `false` when ignored.
    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> bool {
        if is_namespaced(name) {
            return false;
        }
        if let NodeKind::Element { attrs, .. } = &mut self.arena[id].kind {
            if let Some(slot) = attrs.iter_mut().find(|(k, _)| k == name) {
                slot.1 = value.to_string();
            } else {
                attrs.push((name.to_string(), value.to_string()));
            }
        }
        true
    }

    /// Returns `Some(true)` if removed, `Some(false)` if the attribute did
    /// not exist, `None` if the name is namespaced and silently ignored.
    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> Option<bool> {
        if is_namespaced(name) {
            return None;
        }
        if let NodeKind::Element { attrs, .. } = &mut self.arena[id].kind {
            let before = attrs.len();
            attrs.retain(|(k, _)| k != name);
            Some(attrs.len() != before)
        } else {
            Some(false)
        }
    }

    fn alloc_fragment(&mut self, fragment: &Fragment, parent: NodeId) -> NodeId {
        match fragment {
            Fragment::Element {
                name,
                attrs,
                children,
            } => {
                let id = self.arena.len();
                self.arena.push(Node {
                    parent: Some(parent),
                    kind: NodeKind::Element {
                        name: name.clone(),
                        attrs: attrs.clone(),
                    },
                    children: Vec::new(),
                });
                for child in children {
                    let cid = self.alloc_fragment(child, id);
                    self.arena[id].children.push(cid);
                }
                id
            }
            Fragment::Text(text) => {
                let id = self.arena.len();
                self.arena.push(Node {
                    parent: Some(parent),
                    kind: NodeKind::Text(text.clone()),
                    children: Vec::new(),
                });
                id
            }
        }
    }

    fn detach_from_parent(&mut self, id: NodeId) {
        if let Some(parent) = self.arena[id].parent {
            self.arena[parent].children.retain(|&c| c != id);
        }
    }

    /// Remove `id` (and its subtree) from the tree entirely.
    pub fn remove_node(&mut self, id: NodeId) {
        self.detach_from_parent(id);
        self.arena[id].parent = None;
    }

    /// Replace `id` in its parent's child list with the root of `fragment`,
    /// preserving sibling order. Only the document node itself has no
    /// parent, and it is never a replace target.
    pub fn replace_node(&mut self, id: NodeId, fragment: &Fragment) -> NodeId {
        let parent = self.arena[id]
            .parent
            .expect("replace_node target must not be the document node");
        let new_id = self.alloc_fragment(fragment, parent);
        let slot = self.arena[parent]
            .children
            .iter_mut()
            .find(|c| **c == id)
            .expect("id must be a child of its recorded parent");
        *slot = new_id;
        self.arena[id].parent = None;
        new_id
    }

    fn insert_fragment_nodes(&mut self, parent: NodeId, index: usize, fragments: &[Fragment]) {
        let new_ids: Vec<NodeId> = fragments
            .iter()
            .map(|f| self.alloc_fragment(f, parent))
            .collect();
        for (offset, id) in new_ids.into_iter().enumerate() {
            self.arena[parent].children.insert(index + offset, id);
        }
    }

    pub fn prepend_children(&mut self, parent: NodeId, fragments: &[Fragment]) {
        self.insert_fragment_nodes(parent, 0, fragments);
    }

    pub fn append_children(&mut self, parent: NodeId, fragments: &[Fragment]) {
        let index = self.arena[parent].children.len();
        self.insert_fragment_nodes(parent, index, fragments);
    }

    pub fn insert_before(&mut self, anchor: NodeId, fragments: &[Fragment]) {
        let parent = self.arena[anchor]
            .parent
            .expect("insert_before requires a non-root anchor");
        let index = self.arena[parent]
            .children
            .iter()
            .position(|&c| c == anchor)
            .expect("anchor must be a child of its recorded parent");
        self.insert_fragment_nodes(parent, index, fragments);
    }

    pub fn insert_after(&mut self, anchor: NodeId, fragments: &[Fragment]) {
        let parent = self.arena[anchor]
            .parent
            .expect("insert_after requires a non-root anchor");
        let index = self.arena[parent]
            .children
            .iter()
            .position(|&c| c == anchor)
            .expect("anchor must be a child of its recorded parent");
        self.insert_fragment_nodes(parent, index + 1, fragments);
    }

    /// Deep-copy `id`'s subtree into a detached [`Fragment`].
    pub fn to_fragment(&self, id: NodeId) -> Fragment {
        match &self.arena[id].kind {
            NodeKind::Document => unreachable!("the document node is never copied into a fragment"),
            NodeKind::Text(t) => Fragment::Text(t.clone()),
            NodeKind::Element { name, attrs } => Fragment::Element {
                name: name.clone(),
                attrs: attrs.clone(),
                children: self.arena[id]
                    .children
                    .iter()
                    .map(|&c| self.to_fragment(c))
                    .collect(),
            },
        }
    }

    /// Serialise to XML text.
    pub fn to_xml_string(&self) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        for &child in &self.arena[self.root].children {
            self.write_node(&mut writer, child)?;
        }
        Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
    }

    /// Serialise after dropping whitespace-only text nodes, for the
    /// "modulo insignificant whitespace" comparisons the synthesiser's
    /// verification pass and the round-trip property rely on (§4.7, §8).
    pub fn to_canonical_string(&self) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        for &child in &self.arena[self.root].children {
            if !is_blank_text(&self.arena[child].kind) {
                self.write_node_canonical(&mut writer, child)?;
            }
        }
        Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
    }

    fn write_node(&self, writer: &mut Writer<Vec<u8>>, id: NodeId) -> Result<()> {
        match &self.arena[id].kind {
            NodeKind::Document => unreachable!("the document node is never serialised directly"),
            NodeKind::Text(t) => {
                writer.write_event(Event::Text(quick_xml::events::BytesText::new(t)))?;
            }
            NodeKind::Element { name, attrs } => {
                let mut start = BytesStart::new(name.clone());
                for (k, v) in attrs {
                    start.push_attribute((k.as_str(), v.as_str()));
                }
                if self.arena[id].children.is_empty() {
                    writer.write_event(Event::Empty(start))?;
                } else {
                    writer.write_event(Event::Start(start))?;
                    for &c in &self.arena[id].children {
                        self.write_node(writer, c)?;
                    }
                    writer.write_event(Event::End(quick_xml::events::BytesEnd::new(
                        name.clone(),
                    )))?;
                }
            }
        }
        Ok(())
    }

    fn write_node_canonical(&self, writer: &mut Writer<Vec<u8>>, id: NodeId) -> Result<()> {
        match &self.arena[id].kind {
            NodeKind::Document => unreachable!("the document node is never serialised directly"),
            NodeKind::Text(t) => {
                if !t.trim().is_empty() {
                    writer.write_event(Event::Text(quick_xml::events::BytesText::new(t.trim())))?;
                }
            }
            NodeKind::Element { name, attrs } => {
                let mut start = BytesStart::new(name.clone());
                for (k, v) in attrs {
                    start.push_attribute((k.as_str(), v.as_str()));
                }
                let meaningful_children: Vec<NodeId> = self.arena[id]
                    .children
                    .iter()
                    .copied()
                    .filter(|&c| !is_blank_text(&self.arena[c].kind))
                    .collect();
                if meaningful_children.is_empty() {
                    writer.write_event(Event::Empty(start))?;
                } else {
                    writer.write_event(Event::Start(start))?;
                    for c in meaningful_children {
                        self.write_node_canonical(writer, c)?;
                    }
                    writer.write_event(Event::End(quick_xml::events::BytesEnd::new(
                        name.clone(),
                    )))?;
                }
            }
        }
        Ok(())
    }
}

fn is_blank_text(kind: &NodeKind) -> bool {
    matches!(kind, NodeKind::Text(t) if t.trim().is_empty())
}

fn is_namespaced(name: &str) -> bool {
    name.contains(':')
}

fn push_element(
    arena: &mut Vec<Node>,
    e: &BytesStart,
    parent: Option<NodeId>,
) -> Result<NodeId> {
    let name = qname_to_string(e.name());
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| XmlPatchError::Parse(quick_xml::Error::InvalidAttr(err)))?;
        let key = qname_to_string(attr.key);
        let value = attr.unescape_value()?.into_owned();
        attrs.push((key, value));
    }
    let id = arena.len();
    arena.push(Node {
        parent,
        kind: NodeKind::Element { name, attrs },
        children: Vec::new(),
    });
    Ok(id)
}

fn qname_to_string(name: QName) -> String {
    String::from_utf8_lossy(name.as_ref()).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_reserialises_a_simple_document() {
        let doc = Document::parse("<jobs><job id=\"a\" quota=\"10\"/></jobs>").unwrap();
        assert_eq!(doc.element_name(doc.document_element()), Some("jobs"));
        let job = doc.children_elements(doc.document_element())[0];
        assert_eq!(doc.element_name(job), Some("job"));
        assert_eq!(doc.get_attribute(job, "quota"), Some("10"));
    }

    #[test]
    fn set_attribute_is_idempotent_on_value() {
        let mut doc = Document::parse("<jobs><job id=\"a\" quota=\"10\"/></jobs>").unwrap();
        let job = doc.children_elements(doc.document_element())[0];
        assert!(doc.set_attribute(job, "quota", "20"));
        assert_eq!(doc.get_attribute(job, "quota"), Some("20"));
    }

    #[test]
    fn namespaced_attribute_changes_are_ignored() {
        let mut doc = Document::parse("<jobs/>").unwrap();
        let root = doc.document_element();
        assert!(!doc.set_attribute(root, "xmlns:foo", "bar"));
        assert!(doc.get_attribute(root, "xmlns:foo").is_none());
    }
}
