//! A minimal XPath 1.0 subset: axis steps, element name tests, attribute
//! tests, positional predicates, and attribute-equality predicates — the
//! subset §4.6/§6 call out as everything the engine's `sel` attribute ever
//! needs.

use crate::error::{Result, XmlPatchError};
use crate::tree::{Document, NodeId, NodeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Child,
    DescendantOrSelf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTest {
    Name(String),
    Wildcard,
    TextNode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Index(usize),
    AttrEq(String, String),
    HasAttr(String),
}

#[derive(Debug, Clone)]
pub struct Step {
    pub axis: Axis,
    pub test: NodeTest,
    pub predicates: Vec<Predicate>,
}

#[derive(Debug, Clone)]
pub struct XPath {
    pub steps: Vec<Step>,
    /// Set when the selector ends in `/@name`: the final target is an
    /// attribute of the last matched element rather than the element
    /// itself.
    pub attribute: Option<String>,
}

const DESCENDANT_MARKER: char = '\u{1}';

pub fn parse_xpath(sel: &str) -> Result<XPath> {
    if !sel.starts_with('/') {
        return Err(XmlPatchError::InvalidXPath {
            sel: sel.to_string(),
            detail: "selectors must be rooted (start with / or //)".to_string(),
        });
    }

    let rewritten = rewrite_descendant_markers(sel);
    let mut tokens: Vec<&str> = rewritten.split('/').collect();
    // The leading "/" produces an empty first token; drop it.
    if tokens.first() == Some(&"") {
        tokens.remove(0);
    }
    if tokens.is_empty() {
        return Err(XmlPatchError::InvalidXPath {
            sel: sel.to_string(),
            detail: "empty selector".to_string(),
        });
    }

    let mut attribute = None;
    if let Some(last) = tokens.last() {
        if let Some(name) = last.strip_prefix('@') {
            attribute = Some(name.to_string());
            tokens.pop();
        }
    }

    let mut steps = Vec::with_capacity(tokens.len());
    for token in tokens {
        steps.push(parse_step(sel, token)?);
    }

    Ok(XPath { steps, attribute })
}

fn rewrite_descendant_markers(sel: &str) -> String {
    sel.replace("//", &format!("/{DESCENDANT_MARKER}"))
}

fn parse_step(sel: &str, token: &str) -> Result<Step> {
    let (axis, token) = if let Some(rest) = token.strip_prefix(DESCENDANT_MARKER) {
        (Axis::DescendantOrSelf, rest)
    } else {
        (Axis::Child, token)
    };

    let bracket_start = token.find('[');
    let (name_part, mut rest) = match bracket_start {
        Some(i) => (&token[..i], &token[i..]),
        None => (token, ""),
    };

    if name_part.is_empty() {
        return Err(XmlPatchError::InvalidXPath {
            sel: sel.to_string(),
            detail: format!("empty step in selector near {token:?}"),
        });
    }

    let test = if name_part == "*" {
        NodeTest::Wildcard
    } else if name_part == "text()" {
        NodeTest::TextNode
    } else {
        NodeTest::Name(name_part.to_string())
    };

    let mut predicates = Vec::new();
    while !rest.is_empty() {
        if !rest.starts_with('[') {
            return Err(XmlPatchError::InvalidXPath {
                sel: sel.to_string(),
                detail: format!("expected `[` near {rest:?}"),
            });
        }
        let end = rest.find(']').ok_or_else(|| XmlPatchError::InvalidXPath {
            sel: sel.to_string(),
            detail: "unterminated predicate".to_string(),
        })?;
        let body = &rest[1..end];
        predicates.push(parse_predicate(sel, body)?);
        rest = &rest[end + 1..];
    }

    Ok(Step {
        axis,
        test,
        predicates,
    })
}

fn parse_predicate(sel: &str, body: &str) -> Result<Predicate> {
    let body = body.trim();
    if let Ok(idx) = body.parse::<usize>() {
        return Ok(Predicate::Index(idx));
    }
    if let Some(attr_expr) = body.strip_prefix('@') {
        if let Some(eq) = attr_expr.find('=') {
            let name = attr_expr[..eq].trim().to_string();
            let raw_value = attr_expr[eq + 1..].trim();
            let value = raw_value
                .trim_matches(|c| c == '\'' || c == '"')
                .to_string();
            return Ok(Predicate::AttrEq(name, value));
        }
        return Ok(Predicate::HasAttr(attr_expr.trim().to_string()));
    }
    Err(XmlPatchError::InvalidXPath {
        sel: sel.to_string(),
        detail: format!("unsupported predicate {body:?}"),
    })
}

/// The node set a selector ultimately identifies: either elements (the
/// common case) or, when the final step is `text()`, the text-node
/// children of the elements matched by the steps before it.
#[derive(Debug, Clone)]
pub enum Target {
    Elements(Vec<NodeId>),
    TextNodes(Vec<NodeId>),
}

/// Evaluate `xpath` against `doc`, returning the matched element node ids
/// (in document order, de-duplicated).
pub fn select_elements(doc: &Document, xpath: &XPath) -> Vec<NodeId> {
    run_steps(doc, &xpath.steps)
}

/// Evaluate `xpath` against `doc`, resolving text-node targets (`sel`
/// ending in a `text()` step) distinctly from element targets.
pub fn select(doc: &Document, xpath: &XPath) -> Target {
    if let Some((last, context_steps)) = xpath.steps.split_last() {
        if last.test == NodeTest::TextNode {
            let parents = run_steps(doc, context_steps);
            let mut texts = Vec::new();
            for parent in parents {
                let text_children: Vec<NodeId> = doc
                    .children(parent)
                    .iter()
                    .copied()
                    .filter(|&c| matches!(doc.get(c).kind, NodeKind::Text(_)))
                    .collect();
                texts.extend(apply_predicates(doc, &text_children, &last.predicates));
            }
            return Target::TextNodes(texts);
        }
    }
    Target::Elements(run_steps(doc, &xpath.steps))
}

fn run_steps(doc: &Document, steps: &[Step]) -> Vec<NodeId> {
    let mut context = vec![doc.root()];

    for step in steps {
        let mut candidates: Vec<NodeId> = Vec::new();
        for &ctx in &context {
            let raw = match step.axis {
                Axis::Child => doc.children_elements(ctx),
                Axis::DescendantOrSelf => doc.descendants_or_self_elements(ctx),
            };
            for node in raw {
                if node_test_matches(doc, node, &step.test) {
                    candidates.push(node);
                }
            }
        }
        candidates.dedup();
        context = apply_predicates(doc, &candidates, &step.predicates);
    }

    context
}

fn node_test_matches(doc: &Document, node: NodeId, test: &NodeTest) -> bool {
    match test {
        NodeTest::Wildcard => doc.element_name(node).is_some(),
        NodeTest::Name(name) => doc.element_name(node) == Some(name.as_str()),
        NodeTest::TextNode => matches!(doc.get(node).kind, NodeKind::Text(_)),
    }
}

fn apply_predicates(doc: &Document, candidates: &[NodeId], predicates: &[Predicate]) -> Vec<NodeId> {
    if predicates.is_empty() {
        return candidates.to_vec();
    }

    candidates
        .iter()
        .copied()
        .filter(|&node| predicates.iter().all(|p| predicate_matches(doc, node, candidates, p)))
        .collect()
}

fn predicate_matches(doc: &Document, node: NodeId, siblings_in_test: &[NodeId], predicate: &Predicate) -> bool {
    match predicate {
        Predicate::AttrEq(name, value) => doc.get_attribute(node, name) == Some(value.as_str()),
        Predicate::HasAttr(name) => doc.get_attribute(node, name).is_some(),
        Predicate::Index(target) => {
            // Position among same-parent siblings that passed the node
            // test for this step, 1-based, in document order.
            let parent = doc.parent(node);
            let mut position = 0usize;
            for &candidate in siblings_in_test {
                if doc.parent(candidate) == parent {
                    position += 1;
                    if candidate == node {
                        return position == *target;
                    }
                }
            }
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_by_attribute_predicate() {
        let doc = Document::parse(
            "<jobs><job id=\"a\" quota=\"10\"/><job id=\"b\" quota=\"5\"/></jobs>",
        )
        .unwrap();
        let xpath = parse_xpath("//job[@id='b']").unwrap();
        let matches = select_elements(&doc, &xpath);
        assert_eq!(matches.len(), 1);
        assert_eq!(doc.get_attribute(matches[0], "quota"), Some("5"));
    }

    #[test]
    fn selects_attribute_target() {
        let doc = Document::parse("<jobs><job id=\"a\" quota=\"10\"/></jobs>").unwrap();
        let xpath = parse_xpath("//job[@id='a']/@quota").unwrap();
        assert_eq!(xpath.attribute.as_deref(), Some("quota"));
        let matches = select_elements(&doc, &xpath);
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn positional_predicate_picks_nth_sibling() {
        let doc = Document::parse(
            "<root><a v=\"1\"/><a v=\"2\"/><a v=\"3\"/></root>",
        )
        .unwrap();
        let xpath = parse_xpath("/root/a[2]").unwrap();
        let matches = select_elements(&doc, &xpath);
        assert_eq!(matches.len(), 1);
        assert_eq!(doc.get_attribute(matches[0], "v"), Some("2"));
    }

    #[test]
    fn absolute_path_requires_matching_root_name() {
        let doc = Document::parse("<jobs><job id=\"a\"/></jobs>").unwrap();
        let xpath = parse_xpath("/wares/job").unwrap();
        assert!(select_elements(&doc, &xpath).is_empty());
    }
}
