//! Integration coverage for the synthesiser/applier properties (spec §4.7,
//! §8): round-trip, idempotence, and stability across randomly generated
//! attribute trees.

use proptest::collection::vec as prop_vec;
use proptest::prelude::*;
use xmlpatch::{apply, synthesize, Document, SynthOptions};

fn build_tree(ids: &[(&str, &str)]) -> String {
    let jobs: String = ids
        .iter()
        .map(|(id, quota)| format!("<job id=\"{id}\" quota=\"{quota}\"/>"))
        .collect();
    format!("<jobs>{jobs}</jobs>")
}

#[test]
fn worked_example_replace_single_attribute() {
    let base = Document::parse("<r><a id='1' v='x'/><a id='2' v='y'/></r>").unwrap();
    let modified = Document::parse("<r><a id='1' v='x'/><a id='2' v='z'/></r>").unwrap();
    let patch = synthesize(&base, &modified, &SynthOptions::default()).unwrap();
    assert_eq!(patch.ops.len(), 1);

    let mut working = base.clone();
    apply(&mut working, &patch, true).unwrap();
    assert_eq!(
        working.to_canonical_string().unwrap(),
        modified.to_canonical_string().unwrap()
    );
}

fn arb_id() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,4}".prop_map(String::from)
}

fn arb_quota() -> impl Strategy<Value = String> {
    (0u32..1000).prop_map(|n| n.to_string())
}

fn arb_jobs() -> impl Strategy<Value = Vec<(String, String)>> {
    prop_vec((arb_id(), arb_quota()), 0..6).prop_map(|pairs| {
        let mut seen = std::collections::HashSet::new();
        pairs.into_iter().filter(|(id, _)| seen.insert(id.clone())).collect()
    })
}

proptest! {
    #[test]
    fn synthesis_round_trips(base_jobs in arb_jobs(), mod_jobs in arb_jobs()) {
        let base_refs: Vec<(&str, &str)> = base_jobs.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
        let mod_refs: Vec<(&str, &str)> = mod_jobs.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();

        let base = Document::parse(&build_tree(&base_refs)).unwrap();
        let modified = Document::parse(&build_tree(&mod_refs)).unwrap();

        let patch = synthesize(&base, &modified, &SynthOptions::default()).unwrap();

        let mut working = base.clone();
        apply(&mut working, &patch, true).unwrap();
        prop_assert_eq!(
            working.to_canonical_string().unwrap(),
            modified.to_canonical_string().unwrap()
        );
    }

    #[test]
    fn synthesis_is_idempotent_on_equal_trees(jobs in arb_jobs()) {
        let refs: Vec<(&str, &str)> = jobs.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
        let doc = Document::parse(&build_tree(&refs)).unwrap();
        let patch = synthesize(&doc, &doc, &SynthOptions::default()).unwrap();
        prop_assert!(patch.ops.is_empty());
    }

    #[test]
    fn synthesis_is_stable(base_jobs in arb_jobs(), mod_jobs in arb_jobs()) {
        let base_refs: Vec<(&str, &str)> = base_jobs.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
        let mod_refs: Vec<(&str, &str)> = mod_jobs.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();

        let base = Document::parse(&build_tree(&base_refs)).unwrap();
        let modified = Document::parse(&build_tree(&mod_refs)).unwrap();

        let first = synthesize(&base, &modified, &SynthOptions::default()).unwrap();
        let second = synthesize(&base, &modified, &SynthOptions::default()).unwrap();
        prop_assert_eq!(format!("{first:?}"), format!("{second:?}"));
    }
}
