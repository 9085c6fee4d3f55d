//! End-to-end scenarios exercising the full base → extension layering →
//! patch → checker pipeline across real filesystem fixtures.

use modvfs::{check_extension, EngineConfigBuilder, VirtualFileSystem};
use xmlpatch::{parse_xpath, select_elements};

#[test]
fn base_only_read_is_case_and_separator_insensitive() {
    let dir = tempfile::tempdir().unwrap();
    test_support::write_loose_files(dir.path(), &[("libraries/jobs.xml", b"<jobs/>")]);

    let config = EngineConfigBuilder::new().game_root(dir.path()).output_extension_id("out").build().unwrap();
    let mut vfs = VirtualFileSystem::new(config).unwrap();

    let entry = vfs.load_file("libraries/JOBS.xml").unwrap();
    assert_eq!(entry.bytes(), b"<jobs/>");
}

#[test]
fn extension_patch_is_applied_and_tracked_as_origin() {
    let dir = tempfile::tempdir().unwrap();
    test_support::write_loose_files(dir.path(), &[("libraries/jobs.xml", br#"<jobs><job id="a" quota="10"/></jobs>"#)]);

    let extensions = dir.path().join("extensions");
    test_support::write_extension(
        &extensions,
        "x",
        &test_support::content_xml("x", "X", "1", &[]),
        &[(
            "libraries/jobs.xml",
            br#"<diff><replace sel="//job[@id='a']/@quota">20</replace></diff>"#,
        )],
    );

    let config = EngineConfigBuilder::new().game_root(dir.path()).output_extension_id("out").build().unwrap();
    let mut vfs = VirtualFileSystem::new(config).unwrap();

    let root = vfs.get_root("libraries/jobs.xml").unwrap();
    let xpath = parse_xpath("//job[@id='a']").unwrap();
    let job = select_elements(root, &xpath).into_iter().next().unwrap();
    assert_eq!(root.get_attribute(job, "quota"), Some("20"));

    let entry = vfs.cached_entry("libraries/jobs.xml").unwrap();
    assert!(entry.originating_extension_set.contains("x"));
}

#[test]
fn dependency_ordered_extensions_apply_later_patch_last() {
    let dir = tempfile::tempdir().unwrap();
    test_support::write_loose_files(dir.path(), &[("libraries/jobs.xml", br#"<jobs><job id="a" quota="10"/></jobs>"#)]);

    let extensions = dir.path().join("extensions");
    test_support::write_extension(
        &extensions,
        "y",
        &test_support::content_xml("y", "Y", "1", &[]),
        &[(
            "libraries/jobs.xml",
            br#"<diff><replace sel="//job[@id='a']/@quota">15</replace></diff>"#,
        )],
    );
    test_support::write_extension(
        &extensions,
        "x",
        &test_support::content_xml("x", "X", "1", &[("y", false)]),
        &[(
            "libraries/jobs.xml",
            br#"<diff><replace sel="//job[@id='a']/@quota">20</replace></diff>"#,
        )],
    );

    let config = EngineConfigBuilder::new().game_root(dir.path()).output_extension_id("out").build().unwrap();
    let mut vfs = VirtualFileSystem::new(config).unwrap();

    assert_eq!(vfs.extension_load_order(), vec!["y", "x"]);

    let root = vfs.get_root("libraries/jobs.xml").unwrap();
    let xpath = parse_xpath("//job[@id='a']").unwrap();
    let job = select_elements(root, &xpath).into_iter().next().unwrap();
    assert_eq!(root.get_attribute(job, "quota"), Some("20"));
}

#[test]
fn checker_catches_an_undeclared_order_dependency() {
    let dir = tempfile::tempdir().unwrap();
    test_support::write_loose_files(dir.path(), &[("libraries/jobs.xml", b"<jobs/>")]);

    let extensions = dir.path().join("extensions");
    // b inserts the node that a's patch depends on, but a declares no
    // dependency on b — alphabetically a (< b) loads first and fails.
    test_support::write_extension(
        &extensions,
        "b",
        &test_support::content_xml("b", "B", "1", &[]),
        &[("libraries/jobs.xml", br#"<diff><add sel="/jobs" pos="append"><job id="shared"/></add></diff>"#)],
    );
    test_support::write_extension(
        &extensions,
        "a",
        &test_support::content_xml("a", "A", "1", &[]),
        &[(
            "libraries/jobs.xml",
            br#"<diff><add sel="//job[@id='shared']" type="@quota">5</add></diff>"#,
        )],
    );

    let config = EngineConfigBuilder::new().game_root(dir.path()).output_extension_id("out").build().unwrap();
    let report = check_extension(&config, "a").unwrap();

    assert!(!report.is_clean());
    assert!(report
        .failures
        .iter()
        .any(|f| f.order == modvfs::OrderKind::Alphabetical && f.sel.contains("shared")));
}
