//! Content manifest generator (C10): drains the VFS's modified-file set,
//! synthesises XML patches (or emits raw replacements for binary files),
//! and regenerates `content.xml`.

use std::collections::HashSet;
use std::path::Path;

use catalog::{CatalogSourceFile, CatalogWriter};
use extman::Manifest;
use tracing::warn;
use xmlpatch::{synthesize, Document, SynthOptions};

use crate::error::{ModVfsError, Result};
use crate::runlog::{log_path_for, RunLog};
use crate::vfs::{Discriminator, FileEntry, VirtualFileSystem};

/// Result of a finalisation pass: the rendered `content.xml` body and the
/// set of relative output paths actually written this run.
#[derive(Debug, Clone)]
pub struct GeneratedOutput {
    pub content_xml: String,
    pub written_relative_paths: Vec<String>,
}

/// Emit every modified file from `vfs` under `output_root`, regenerate
/// `content.xml`, and clean up anything a previous run wrote that this run
/// no longer produces.
pub fn finalize(vfs: &mut VirtualFileSystem, output_root: &Path) -> Result<GeneratedOutput> {
    std::fs::create_dir_all(output_root)?;

    let config = vfs.config.clone();
    let opts = SynthOptions::default().with_forced_attributes(config.forced_xpath_attributes.clone());

    let mut loose_files: Vec<(String, Vec<u8>)> = Vec::new();
    let mut dependency_ids: HashSet<String> = HashSet::new();

    let paths: Vec<String> = vfs.modified_files().map(|e| e.path.as_str().to_string()).collect();
    // §5's per-file-parallel diff synthesis pass: one worker per modified
    // file, since `render_xml_output` only reads `vfs` (the seed/base
    // snapshot is already resolved and cached by this point).
    let vfs_ref: &VirtualFileSystem = vfs;
    let opts_ref: &SynthOptions = &opts;
    let outputs: Vec<Result<Option<(String, Vec<u8>, HashSet<String>)>>> = std::thread::scope(|scope| {
        let handles: Vec<_> = paths
            .iter()
            .map(|path| scope.spawn(move || process_one_file(vfs_ref, opts_ref, path)))
            .collect();
        handles.into_iter().map(|h| h.join().expect("diff synthesis worker panicked")).collect()
    });

    for output in outputs {
        let Some((path, payload, originating)) = output? else {
            continue;
        };
        dependency_ids.extend(originating);
        loose_files.push((path, payload));
    }

    let mut run_log = RunLog::new();
    for (path, bytes) in &loose_files {
        run_log.record(path.clone(), bytes, 0);
    }

    let log_path = log_path_for(output_root);
    let previous = RunLog::read(&log_path)?;
    let stale = run_log.stale_paths(&previous);
    RunLog::clean_stale(output_root, &stale)?;

    let mut written_relative_paths = Vec::with_capacity(loose_files.len());
    if config.output_to_catalog {
        write_to_catalog_stack(output_root, &loose_files)?;
    } else {
        for (path, bytes) in &loose_files {
            let full = output_root.join(path.replace('/', std::path::MAIN_SEPARATOR_STR));
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&full, bytes)?;
            written_relative_paths.push(path.clone());
        }
    }

    run_log.write(&log_path)?;

    let existing_manifest = Manifest::read(output_root).ok();
    let content_xml = render_content_xml(&config, existing_manifest, &dependency_ids);
    std::fs::write(output_root.join("content.xml"), &content_xml)?;

    Ok(GeneratedOutput {
        content_xml,
        written_relative_paths,
    })
}

/// One worker's unit of work in the parallel synthesis pass: render a single
/// modified file's output payload and the extension ids it originated from,
/// or `None` if it's flagged `skip_content`.
fn process_one_file(vfs: &VirtualFileSystem, opts: &SynthOptions, path: &str) -> Result<Option<(String, Vec<u8>, HashSet<String>)>> {
    let entry = vfs.cached_entry(path).expect("modified path was just listed from the cache");
    if entry.skip_content {
        return Ok(None);
    }
    let payload = match entry.discriminator {
        Discriminator::Xml => render_xml_output(vfs, entry, opts, path)?,
        Discriminator::Binary => entry.bytes().to_vec(),
    };
    Ok(Some((path.to_string(), payload, entry.originating_extension_set.clone())))
}

fn render_xml_output(
    vfs: &VirtualFileSystem,
    entry: &FileEntry,
    opts: &SynthOptions,
    path: &str,
) -> Result<Vec<u8>> {
    let modified_text = std::str::from_utf8(entry.bytes()).map_err(|_| ModVfsError::NotXml { path: path.to_string() })?;
    let modified = Document::parse(modified_text)?;

    let Some(base_text) = vfs.patched_base_snapshot(path) else {
        return Ok(entry.bytes().to_vec());
    };
    let base = Document::parse(base_text)?;

    match synthesize(&base, &modified, opts) {
        Ok(patch) => Ok(patch_to_xml(&patch)?.into_bytes()),
        Err(err) => {
            warn!(path, error = %err, "diff synthesis failed, falling back to a maximal (whole-document) diff");
            let maximal_opts = SynthOptions {
                make_maximal_diffs: true,
                ..opts.clone()
            };
            match synthesize(&base, &modified, &maximal_opts) {
                Ok(patch) => Ok(patch_to_xml(&patch)?.into_bytes()),
                Err(err) => Err(ModVfsError::DiffSynthesisFailure {
                    path: path.to_string(),
                    detail: err.to_string(),
                }),
            }
        }
    }
}

/// Render a [`xmlpatch::PatchDocument`] back to `<diff>` XML text. The
/// synthesiser only produces ops it can already express as fragments/values,
/// so this is a direct, lossless re-serialisation.
fn patch_to_xml(patch: &xmlpatch::PatchDocument) -> Result<String> {
    use std::fmt::Write as _;
    use xmlpatch::{AddPayload, AddPos, PatchOp, ReplacePayload};

    let mut out = String::from("<diff>");
    for op in &patch.ops {
        match op {
            PatchOp::Add { sel, pos, payload } => {
                let pos_str = match pos {
                    AddPos::Before => "before",
                    AddPos::After => "after",
                    AddPos::Prepend => "prepend",
                    AddPos::Append => "append",
                };
                match payload {
                    AddPayload::Attribute { name, value } => {
                        let _ = write!(out, "<add sel=\"{sel}\" type=\"@{name}\">{value}</add>");
                    }
                    AddPayload::Fragment(fragments) => {
                        let _ = write!(out, "<add sel=\"{sel}\" pos=\"{pos_str}\">");
                        for fragment in fragments {
                            out.push_str(&fragment_to_xml(fragment));
                        }
                        out.push_str("</add>");
                    }
                }
            }
            PatchOp::Remove { sel } => {
                let _ = write!(out, "<remove sel=\"{sel}\"/>");
            }
            PatchOp::Replace { sel, payload } => match payload {
                ReplacePayload::AttributeValue(value) => {
                    let _ = write!(out, "<replace sel=\"{sel}\">{value}</replace>");
                }
                ReplacePayload::Fragment(fragment) => {
                    let _ = write!(out, "<replace sel=\"{sel}\">{}</replace>", fragment_to_xml(fragment));
                }
            },
        }
    }
    out.push_str("</diff>");
    Ok(out)
}

fn fragment_to_xml(fragment: &xmlpatch::Fragment) -> String {
    match fragment {
        xmlpatch::Fragment::Text(text) => text.clone(),
        xmlpatch::Fragment::Element { name, attrs, children } => {
            let mut out = format!("<{name}");
            for (key, value) in attrs {
                out.push_str(&format!(" {key}=\"{value}\""));
            }
            if children.is_empty() {
                out.push_str("/>");
            } else {
                out.push('>');
                for child in children {
                    out.push_str(&fragment_to_xml(child));
                }
                out.push_str(&format!("</{name}>"));
            }
            out
        }
    }
}

fn write_to_catalog_stack(output_root: &Path, loose_files: &[(String, Vec<u8>)]) -> Result<()> {
    let mut ext_files = Vec::new();
    let mut subst_files = Vec::new();

    for (path, bytes) in loose_files {
        let source = CatalogSourceFile {
            virtual_path: path.clone(),
            bytes: bytes.clone(),
            timestamp: 0,
        };
        if is_subst_target(path) {
            subst_files.push(source);
        } else {
            ext_files.push(source);
        }
    }

    if !ext_files.is_empty() {
        CatalogWriter::write(output_root.join("ext_01.cat"), output_root.join("ext_01.dat"), &ext_files)?;
    }
    if !subst_files.is_empty() {
        CatalogWriter::write(output_root.join("subst_01.cat"), output_root.join("subst_01.dat"), &subst_files)?;
    }
    Ok(())
}

/// §4.9's "replace existing" grouping is underspecified beyond "shader
/// files always go subst"; this treats any XML data file (the common case
/// of patching an existing game table) and shader assets as replacements,
/// everything else as additive.
fn is_subst_target(path: &str) -> bool {
    path.ends_with(".xml") || path.contains("/shader") || matches!(Path::new(path).extension().and_then(|e| e.to_str()), Some("ogl" | "frag" | "vert" | "fx"))
}

fn render_content_xml(config: &crate::config::EngineConfig, existing: Option<Manifest>, dependency_ids: &HashSet<String>) -> String {
    let mut merged: Vec<(String, Option<String>, bool)> = Vec::new();
    let mut seen = HashSet::new();

    if let Some(manifest) = &existing {
        for dep in &manifest.dependencies {
            if seen.insert(dep.id.clone()) {
                merged.push((dep.id.clone(), dep.version.clone(), dep.optional));
            }
        }
    }
    let mut new_ids: Vec<&String> = dependency_ids.iter().collect();
    new_ids.sort();
    for id in new_ids {
        if seen.insert(id.clone()) {
            merged.push((id.clone(), None, false));
        }
    }

    let name = existing.as_ref().map(|m| m.name.clone()).unwrap_or_else(|| config.output_extension_id.clone());
    let version = existing.as_ref().map(|m| m.version.clone()).unwrap_or_else(|| "1".to_string());

    let mut out = format!(
        "<content id=\"{}\" name=\"{}\" version=\"{}\" save=\"true\">",
        config.output_extension_id, name, version
    );
    for (id, version, optional) in merged {
        out.push_str(&format!(
            "<dependency id=\"{id}\" optional=\"{}\"{}/>",
            optional,
            version.map(|v| format!(" version=\"{v}\"")).unwrap_or_default()
        ));
    }
    out.push_str("</content>");
    out
}
