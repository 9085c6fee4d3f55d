//! End-to-end coverage for discovery + load-order resolution against real
//! directory layouts (spec §4.4, §8 load-order determinism property).

use extman::{discover, resolve_load_order, DiscoveryFilter};

#[test]
fn load_order_is_deterministic_across_two_independent_scans() {
    let dir = tempfile::tempdir().unwrap();
    let extensions = dir.path().join("extensions");

    let a = test_support::content_xml("mod_a", "Mod A", "1", &[("mod_b", false)]);
    test_support::write_extension(&extensions, "mod_a", &a, &[]);
    let b = test_support::content_xml("mod_b", "Mod B", "1", &[]);
    test_support::write_extension(&extensions, "mod_b", &b, &[]);
    let c = test_support::content_xml("mod_c", "Mod C", "1", &[("mod_b", true), ("missing_dep", true)]);
    test_support::write_extension(&extensions, "mod_c", &c, &[]);

    let first = resolve_load_order(&discover(dir.path(), None, &DiscoveryFilter::default(), "output", false).unwrap());
    let second = resolve_load_order(&discover(dir.path(), None, &DiscoveryFilter::default(), "output", false).unwrap());

    let first_ids: Vec<&str> = first.iter().map(|r| r.id.as_str()).collect();
    let second_ids: Vec<&str> = second.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(first_ids, second_ids);

    let b_pos = first_ids.iter().position(|&id| id == "mod_b").unwrap();
    let a_pos = first_ids.iter().position(|&id| id == "mod_a").unwrap();
    assert!(b_pos < a_pos, "mod_b (hard dependency) must precede mod_a");
}

#[test]
fn whitelist_narrows_the_candidate_set_before_enablement() {
    let dir = tempfile::tempdir().unwrap();
    let extensions = dir.path().join("extensions");
    let a = test_support::content_xml("keep_me", "Keep", "1", &[]);
    test_support::write_extension(&extensions, "keep_me", &a, &[]);
    let b = test_support::content_xml("drop_me", "Drop", "1", &[]);
    test_support::write_extension(&extensions, "drop_me", &b, &[]);

    let mut filter = DiscoveryFilter::default();
    filter.whitelist = Some(["keep_me".to_string()].into_iter().collect());

    let records = discover(dir.path(), None, &filter, "output", false).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "keep_me");
}
