//! The diff synthesiser (§4.7): produces a patch document that turns `base`
//! into `modified`.
//!
//! The algorithm is a correspondence pass (match children by an identifying
//! attribute, falling back to same-tag position), an edit-script emission
//! pass that turns the mismatches into `add`/`remove`/`replace` ops with
//! XPath selectors built from `base`'s own structure, and a verification
//! pass that re-applies the result and escalates to a whole-document
//! replace if the output doesn't match byte-for-byte.

use tracing::warn;

use crate::apply;
use crate::error::{Result, XmlPatchError};
use crate::patchdoc::{AddPayload, AddPos, PatchDocument, PatchOp, ReplacePayload};
use crate::tree::{Document, Fragment, NodeId, NodeKind};

/// The identifying attributes §4.7 uses by default to correspond elements
/// across base and modified trees, in priority order.
pub const DEFAULT_IDENTIFYING_ATTRIBUTES: &[&str] = &["id", "name", "macro", "ref", "sinfactor"];

#[derive(Debug, Clone)]
pub struct SynthOptions {
    /// Attribute names (highest priority first) used to correspond elements
    /// across base and modified independent of sibling position. Extends
    /// (not replaces) the built-in default set via `forced_xpath_attributes`.
    pub identifying_attributes: Vec<String>,
    /// Bypass correspondence/edit-script/XPath generation entirely and emit
    /// a single whole-document `replace` — for debugging (§4.7).
    pub make_maximal_diffs: bool,
}

impl Default for SynthOptions {
    fn default() -> Self {
        Self {
            identifying_attributes: DEFAULT_IDENTIFYING_ATTRIBUTES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            make_maximal_diffs: false,
        }
    }
}

impl SynthOptions {
    pub fn with_forced_attributes(mut self, extra: impl IntoIterator<Item = String>) -> Self {
        self.identifying_attributes.extend(extra);
        self
    }
}

/// Produce a patch document such that `apply(synthesize(base, modified), base)`
/// reproduces `modified` modulo insignificant whitespace.
pub fn synthesize(base: &Document, modified: &Document, opts: &SynthOptions) -> Result<PatchDocument> {
    if opts.make_maximal_diffs {
        return Ok(maximal_diff(base, modified, opts));
    }

    let base_root = base.document_element();
    let mod_root = modified.document_element();

    let patch = if base.element_name(base_root) != modified.element_name(mod_root) {
        maximal_diff(base, modified, opts)
    } else {
        let mut ops = Vec::new();
        diff_node(base, base_root, modified, mod_root, opts, &mut ops);
        PatchDocument { ops }
    };

    verify_or_escalate(base, modified, patch, opts)
}

fn maximal_diff(base: &Document, modified: &Document, opts: &SynthOptions) -> PatchDocument {
    let mod_root = modified.document_element();
    PatchDocument {
        ops: vec![PatchOp::Replace {
            sel: build_sel(base, base.document_element(), opts),
            payload: ReplacePayload::Fragment(modified.to_fragment(mod_root)),
        }],
    }
}

fn verify_or_escalate(base: &Document, modified: &Document, patch: PatchDocument, opts: &SynthOptions) -> Result<PatchDocument> {
    if verifies(base, modified, &patch) {
        return Ok(patch);
    }

    warn!("synthesised patch failed verification, escalating to a whole-document replace");
    let fallback = maximal_diff(base, modified, opts);
    if verifies(base, modified, &fallback) {
        return Ok(fallback);
    }

    Err(XmlPatchError::SynthesisFailure)
}

fn verifies(base: &Document, modified: &Document, patch: &PatchDocument) -> bool {
    let mut working = base.clone();
    let applied = apply::apply(&mut working, patch, true);
    match applied {
        Ok(_) => match (working.to_canonical_string(), modified.to_canonical_string()) {
            (Ok(got), Ok(want)) => got == want,
            _ => false,
        },
        Err(_) => false,
    }
}

fn diff_node(
    base: &Document,
    base_id: NodeId,
    modified: &Document,
    mod_id: NodeId,
    opts: &SynthOptions,
    ops: &mut Vec<PatchOp>,
) {
    diff_attributes(base, base_id, modified, mod_id, opts, ops);
    diff_text(base, base_id, modified, mod_id, opts, ops);

    let base_children = element_children(base, base_id);
    let mod_children = element_children(modified, mod_id);

    let base_keys = node_keys(base, &base_children, opts);
    let mod_keys = node_keys(modified, &mod_children, opts);
    let matches = lcs(&base_keys, &mod_keys);

    let mut mod_to_base: Vec<Option<usize>> = vec![None; mod_children.len()];
    let mut base_matched = vec![false; base_children.len()];
    for &(bi, mi) in &matches {
        mod_to_base[mi] = Some(bi);
        base_matched[bi] = true;
    }

    for (bi, &base_child) in base_children.iter().enumerate() {
        if let Some(mi) = matches.iter().find(|&&(b, _)| b == bi).map(|&(_, m)| m) {
            diff_node(base, base_child, modified, mod_children[mi], opts, ops);
        }
    }

    for (bi, &base_child) in base_children.iter().enumerate() {
        if !base_matched[bi] {
            ops.push(PatchOp::Remove {
                sel: build_sel(base, base_child, opts),
            });
        }
    }

    emit_inserts(base, base_id, &base_children, modified, &mod_children, &mod_to_base, opts, ops);
}

fn diff_attributes(base: &Document, base_id: NodeId, modified: &Document, mod_id: NodeId, opts: &SynthOptions, ops: &mut Vec<PatchOp>) {
    let base_attrs = base.attributes(base_id);
    let mod_attrs = modified.attributes(mod_id);

    for (name, value) in mod_attrs {
        match base.get_attribute(base_id, name) {
            None => ops.push(PatchOp::Add {
                sel: build_sel(base, base_id, opts),
                pos: AddPos::Append,
                payload: AddPayload::Attribute {
                    name: name.clone(),
                    value: value.clone(),
                },
            }),
            Some(existing) if existing != value => ops.push(PatchOp::Replace {
                sel: format!("{}/@{name}", build_sel(base, base_id, opts)),
                payload: ReplacePayload::AttributeValue(value.clone()),
            }),
            Some(_) => {}
        }
    }

    for (name, _) in base_attrs {
        if modified.get_attribute(mod_id, name).is_none() {
            ops.push(PatchOp::Remove {
                sel: format!("{}/@{name}", build_sel(base, base_id, opts)),
            });
        }
    }
}

fn diff_text(base: &Document, base_id: NodeId, modified: &Document, mod_id: NodeId, opts: &SynthOptions, ops: &mut Vec<PatchOp>) {
    let base_text = direct_text(base, base_id);
    let mod_text = direct_text(modified, mod_id);

    if base_text == mod_text {
        return;
    }

    match (base_text, mod_text) {
        (Some(_), Some(new_text)) => ops.push(PatchOp::Replace {
            sel: format!("{}/text()", build_sel(base, base_id, opts)),
            payload: ReplacePayload::Fragment(Fragment::Text(new_text)),
        }),
        (None, Some(new_text)) => ops.push(PatchOp::Add {
            sel: build_sel(base, base_id, opts),
            pos: AddPos::Append,
            payload: AddPayload::Fragment(vec![Fragment::Text(new_text)]),
        }),
        (Some(_), None) => ops.push(PatchOp::Remove {
            sel: format!("{}/text()", build_sel(base, base_id, opts)),
        }),
        (None, None) => unreachable!("equal case handled above"),
    }
}

/// The element's direct, trimmed text content, when it has exactly one
/// significant text child (the common leaf-value shape). `None` when there
/// is no text or the mix is too complex to target with a single `text()`.
fn direct_text(doc: &Document, id: NodeId) -> Option<String> {
    let text_children: Vec<&str> = doc
        .children(id)
        .iter()
        .filter_map(|&c| match &doc.get(c).kind {
            NodeKind::Text(t) if !t.trim().is_empty() => Some(t.trim()),
            _ => None,
        })
        .collect();
    match text_children.as_slice() {
        [] => None,
        [one] => Some((*one).to_string()),
        many => Some(many.join(" ")),
    }
}

fn element_children(doc: &Document, id: NodeId) -> Vec<NodeId> {
    doc.children_elements(id)
}

fn node_keys(doc: &Document, children: &[NodeId], opts: &SynthOptions) -> Vec<String> {
    let mut seen_unidentified: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    children
        .iter()
        .map(|&id| {
            let name = doc.element_name(id).unwrap_or("?");
            for attr in &opts.identifying_attributes {
                if let Some(value) = doc.get_attribute(id, attr) {
                    return format!("{name}\u{0}{attr}\u{0}{value}");
                }
            }
            let occurrence = seen_unidentified.entry(name.to_string()).or_insert(0);
            let key = format!("{name}\u{0}#{occurrence}");
            *occurrence += 1;
            key
        })
        .collect()
}

/// Longest common subsequence of equal keys, returned as (base_index, mod_index)
/// pairs in increasing order of both indices.
fn lcs(base_keys: &[String], mod_keys: &[String]) -> Vec<(usize, usize)> {
    let n = base_keys.len();
    let m = mod_keys.len();
    let mut dp = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            dp[i][j] = if base_keys[i] == mod_keys[j] {
                dp[i + 1][j + 1] + 1
            } else {
                dp[i + 1][j].max(dp[i][j + 1])
            };
        }
    }

    let mut result = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if base_keys[i] == mod_keys[j] {
            result.push((i, j));
            i += 1;
            j += 1;
        } else if dp[i + 1][j] >= dp[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    result
}

fn emit_inserts(
    base: &Document,
    base_parent: NodeId,
    base_children: &[NodeId],
    modified: &Document,
    mod_children: &[NodeId],
    mod_to_base: &[Option<usize>],
    opts: &SynthOptions,
    ops: &mut Vec<PatchOp>,
) {
    let mut i = 0;
    while i < mod_children.len() {
        if mod_to_base[i].is_some() {
            i += 1;
            continue;
        }
        let run_start = i;
        while i < mod_children.len() && mod_to_base[i].is_none() {
            i += 1;
        }
        let run_end = i;

        let fragments: Vec<Fragment> = mod_children[run_start..run_end]
            .iter()
            .map(|&id| modified.to_fragment(id))
            .collect();

        let preceding = (0..run_start).rev().find_map(|k| mod_to_base[k]);
        let following = (run_end..mod_children.len()).find_map(|k| mod_to_base[k]);

        let (sel, pos) = if let Some(bi) = preceding {
            (build_sel(base, base_children[bi], opts), AddPos::After)
        } else if let Some(bi) = following {
            (build_sel(base, base_children[bi], opts), AddPos::Before)
        } else {
            (build_sel(base, base_parent, opts), AddPos::Append)
        };

        ops.push(PatchOp::Add {
            sel,
            pos,
            payload: AddPayload::Fragment(fragments),
        });
    }
}

/// The shortest selector that is unique for `id` within `base`, built by
/// walking up to the document node and, at each level, preferring an
/// identifying-attribute predicate over a positional index (§4.7 step 3).
fn build_sel(doc: &Document, id: NodeId, opts: &SynthOptions) -> String {
    let mut chain = Vec::new();
    let mut cur = Some(id);
    while let Some(n) = cur {
        chain.push(n);
        cur = doc.parent(n);
    }
    chain.reverse();

    let mut sel = String::new();
    for &node in &chain {
        let Some(name) = doc.element_name(node) else {
            continue;
        };
        sel.push('/');
        sel.push_str(name);
        if let Some(predicate) = discriminating_predicate(doc, node, opts) {
            sel.push_str(&predicate);
        }
    }
    sel
}

fn discriminating_predicate(doc: &Document, node: NodeId, opts: &SynthOptions) -> Option<String> {
    let parent = doc.parent(node)?;
    let name = doc.element_name(node)?;
    let siblings: Vec<NodeId> = doc
        .children_elements(parent)
        .into_iter()
        .filter(|&s| doc.element_name(s) == Some(name))
        .collect();
    if siblings.len() <= 1 {
        return None;
    }

    for attr in &opts.identifying_attributes {
        if let Some(value) = doc.get_attribute(node, attr) {
            let occurrences = siblings
                .iter()
                .filter(|&&s| doc.get_attribute(s, attr) == Some(value))
                .count();
            if occurrences == 1 {
                return Some(format!("[@{attr}='{value}']"));
            }
        }
    }

    let index = siblings.iter().position(|&s| s == node)? + 1;
    Some(format!("[{index}]"))
}
