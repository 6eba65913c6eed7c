//! End-to-end apply/rebuild scenarios over on-disk projects.
//!
//! Each test builds a throwaway project with an upstream directory served by
//! `DirVcs`, writes patch files, and drives the orchestrator the way the CLI
//! does.

use weft_build::{FailureKind, ModuleOutcome};
use weft_cache::ModuleState;
use weft_conformance::Workspace;

const CONFIG: &str = r#"
[project]
name = "folia"
version = "1.0.0"
group = "dev.folia"

[upstream]
ref = "main"
repository = "upstream"
release = "1.20.4"

[modules.server]
base = { upstream = "server" }
patch_dir = "patches/server"
output_dir = "Folia-Server"
"#;

fn workspace() -> Workspace {
    Workspace::new(CONFIG, &[("upstream/server/A.txt", "hello\n")])
}

fn all() -> Vec<String> {
    Vec::new()
}

// ---------------------------------------------------------------------------
// Rebuild attributes edits to the last patch that touched the file
// ---------------------------------------------------------------------------

#[test]
fn hello_world_rebuild_updates_only_last_patch() {
    let ws = workspace();
    ws.write_patch("server", "0001-World.patch", "A.txt", "hello\n", "hello world\n");
    ws.write_patch("server", "0002-Bang.patch", "A.txt", "hello world\n", "hello world!!\n");
    let o = ws.orchestrator();

    let report = o.apply(&all()).unwrap();
    assert!(report.is_success(), "{report:?}");
    assert_eq!(ws.read("Folia-Server/A.txt"), "hello world!!\n");

    let p1_before = ws.patch_bytes("server", "0001-World.patch");
    let p2_before = ws.patch_bytes("server", "0002-Bang.patch");

    ws.write("Folia-Server/A.txt", "hello there world!!\n");
    let summaries = o.rebuild(&["server".to_string()], false).unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].changed, vec!["0002-Bang.patch"]);
    assert_eq!(summaries[0].patches, 2);

    assert_eq!(ws.patch_bytes("server", "0001-World.patch"), p1_before);
    let p2_after = ws.patch_bytes("server", "0002-Bang.patch");
    assert_ne!(p2_after, p2_before);
    let p2_text = String::from_utf8(p2_after).unwrap();
    assert!(p2_text.contains("-hello world\n"));
    assert!(p2_text.contains("+hello there world!!\n"));
}

#[test]
fn rebuilt_stack_reproduces_edit_from_scratch() {
    let mut ws = workspace();
    ws.write_patch("server", "0001-World.patch", "A.txt", "hello\n", "hello world\n");
    ws.write_patch("server", "0002-Bang.patch", "A.txt", "hello world\n", "hello world!!\n");
    {
        let o = ws.orchestrator();
        o.apply(&all()).unwrap();
        ws.write("Folia-Server/A.txt", "hello there world!!\n");
        o.rebuild(&all(), false).unwrap();
    }

    // Throw away the output and the cache, then apply again.
    std::fs::remove_dir_all(ws.path("Folia-Server")).unwrap();
    std::fs::remove_dir_all(&ws.project.cache_dir).unwrap();
    ws.reopen();

    let report = ws.orchestrator().apply(&all()).unwrap();
    assert!(report.is_success(), "{report:?}");
    assert_eq!(ws.read("Folia-Server/A.txt"), "hello there world!!\n");
}

#[test]
fn rebuild_with_no_patches_creates_initial_patch() {
    let ws = workspace();
    let o = ws.orchestrator();
    o.apply(&all()).unwrap();
    ws.write("Folia-Server/B.txt", "new file\n");

    let summaries = o.rebuild(&all(), false).unwrap();
    assert_eq!(summaries[0].changed, vec!["0001-Initial-changes.patch"]);
    let text = String::from_utf8(ws.patch_bytes("server", "0001-Initial-changes.patch")).unwrap();
    assert!(text.contains("B.txt"));
    assert!(text.contains("+new file"));
}

#[test]
fn rebuild_without_edits_changes_nothing() {
    let ws = workspace();
    ws.write_patch("server", "0001-World.patch", "A.txt", "hello\n", "hello world\n");
    let o = ws.orchestrator();
    o.apply(&all()).unwrap();
    let before = ws.patch_bytes("server", "0001-World.patch");

    let summaries = o.rebuild(&all(), false).unwrap();
    assert!(summaries[0].changed.is_empty());
    assert_eq!(ws.patch_bytes("server", "0001-World.patch"), before);
}

// ---------------------------------------------------------------------------
// Noise filtering
// ---------------------------------------------------------------------------

#[test]
fn filter_fuzz_reverts_whitespace_only_edits() {
    let ws = workspace();
    ws.write_patch("server", "0001-World.patch", "A.txt", "hello\n", "hello world\n");
    let o = ws.orchestrator();
    o.apply(&all()).unwrap();
    let before = ws.patch_bytes("server", "0001-World.patch");

    ws.write("Folia-Server/A.txt", "hello world   \r\n");
    let summaries = o.rebuild(&all(), true).unwrap();
    assert!(summaries[0].changed.is_empty(), "{:?}", summaries[0]);
    assert_eq!(summaries[0].reverted, vec!["A.txt"]);
    assert_eq!(ws.patch_bytes("server", "0001-World.patch"), before);
    assert_eq!(ws.read("Folia-Server/A.txt"), "hello world\n");
}

#[test]
fn without_filter_whitespace_edits_are_kept() {
    let ws = workspace();
    ws.write_patch("server", "0001-World.patch", "A.txt", "hello\n", "hello world\n");
    let o = ws.orchestrator();
    o.apply(&all()).unwrap();

    ws.write("Folia-Server/A.txt", "hello world   \n");
    let summaries = o.rebuild(&all(), false).unwrap();
    assert_eq!(summaries[0].changed, vec!["0001-World.patch"]);
    assert!(summaries[0].reverted.is_empty());
}

// ---------------------------------------------------------------------------
// Stack prefix property
// ---------------------------------------------------------------------------

#[test]
fn applying_one_more_patch_matches_applying_all_at_once() {
    let incremental = workspace();
    incremental.write_patch("server", "0001-World.patch", "A.txt", "hello\n", "hello world\n");
    incremental.orchestrator().apply(&all()).unwrap();
    incremental.write_patch(
        "server",
        "0002-Bang.patch",
        "A.txt",
        "hello world\n",
        "hello world!!\n",
    );
    let report = incremental.orchestrator().apply(&all()).unwrap();
    assert!(matches!(
        report.outcome("server"),
        Some(ModuleOutcome::Applied { patches: 2, .. })
    ));

    let at_once = workspace();
    at_once.write_patch("server", "0001-World.patch", "A.txt", "hello\n", "hello world\n");
    at_once.write_patch("server", "0002-Bang.patch", "A.txt", "hello world\n", "hello world!!\n");
    at_once.orchestrator().apply(&all()).unwrap();

    let a = incremental.cache.module("server").unwrap();
    let b = at_once.cache.module("server").unwrap();
    assert_eq!(a.output_hash, b.output_hash);
    assert_eq!(a.boundary_hashes, b.boundary_hashes);
    assert_eq!(
        incremental.read("Folia-Server/A.txt"),
        at_once.read("Folia-Server/A.txt")
    );
}

// ---------------------------------------------------------------------------
// Staleness and conflicts
// ---------------------------------------------------------------------------

#[test]
fn patch_edited_after_apply_makes_rebuild_stale() {
    let ws = workspace();
    ws.write_patch("server", "0001-World.patch", "A.txt", "hello\n", "hello world\n");
    let o = ws.orchestrator();
    o.apply(&all()).unwrap();

    ws.write_patch("server", "0001-World.patch", "A.txt", "hello\n", "hello moon\n");
    ws.write("Folia-Server/A.txt", "hello there world\n");
    let err = o.rebuild(&all(), false).unwrap_err();
    assert_eq!(err.kind(), FailureKind::StaleRebuild);
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn conflict_leaves_previous_output_and_records_summary() {
    let ws = workspace();
    ws.write_patch("server", "0001-World.patch", "A.txt", "hello\n", "hello world\n");
    let o = ws.orchestrator();
    o.apply(&all()).unwrap();

    ws.write_patch("server", "0002-Bad.patch", "A.txt", "goodbye\n", "farewell\n");
    let report = o.apply(&all()).unwrap();
    match report.outcome("server") {
        Some(ModuleOutcome::Failed(f)) => {
            assert_eq!(f.kind, FailureKind::Conflict);
            assert!(f.details.is_some());
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(report.exit_code(), 2);

    let record = ws.cache.module("server").unwrap();
    assert_eq!(record.state, ModuleState::Conflict);
    let conflict = record.conflict.expect("conflict summary");
    assert_eq!(conflict.patch_index, 2);
    assert_eq!(conflict.patch_name, "0002-Bad.patch");
    assert_eq!(conflict.path, "A.txt");
    assert_eq!(ws.read("Folia-Server/A.txt"), "hello world\n");
}
