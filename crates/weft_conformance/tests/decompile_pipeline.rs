//! Modules based on the decompiled upstream binary.
//!
//! The remapper and decompiler are `FakeTool`s; the binary and mapping are
//! served from a local artifact repository inside the project.

use std::sync::atomic::Ordering;

use weft_build::{FailureKind, ModuleOutcome};
use weft_conformance::{FakeFailure, FakeTool, Workspace};

const CONFIG: &str = r#"
[project]
name = "folia"
version = "1.0.0"
group = "dev.folia"

[upstream]
ref = "main"
repository = "upstream"
release = "1.20.4"

[artifact]
repository = "repo"
binary = "com.example:server"
mapping = "com.example:server-mappings"

[tools]
timeout_secs = 30
[tools.remapper]
program = "remap"
version = "1.0"
[tools.decompiler]
program = "decompile"
version = "1.0"

[modules.vanilla]
base = { decompiled = "net" }
patch_dir = "patches/vanilla"
output_dir = "Vanilla"
"#;

const BINARY_PATH: &str = "com/example/server/1.20.4/server-1.20.4.jar";
const MAPPING_PATH: &str = "com/example/server-mappings/1.20.4/server-mappings-1.20.4.txt";
const BINARY: &str = "net/a.java\tclass a {\\n    b world;\\n}\\n\nnet/b.java\tclass b {\\n}\\n\n";
const MAPPING: &str = "weft-mapping v1 1.20.4\na\tServer\nb\tWorld\n";

fn workspace() -> Workspace {
    let ws = Workspace::new(CONFIG, &[("upstream/README", "upstream\n")]);
    ws.publish("repo", BINARY_PATH, BINARY.as_bytes());
    ws.publish("repo", MAPPING_PATH, MAPPING.as_bytes());
    ws
}

#[test]
fn decompiled_base_is_remapped_source() {
    let ws = workspace();
    let report = ws.orchestrator().apply(&[]).unwrap();
    assert!(report.is_success(), "{report:?}");
    assert_eq!(
        ws.read("Vanilla/Server.java"),
        "class Server {\n    World world;\n}\n"
    );
    assert_eq!(ws.read("Vanilla/World.java"), "class World {\n}\n");
}

#[test]
fn patches_apply_on_top_of_decompiled_tree() {
    let ws = workspace();
    ws.write_patch(
        "vanilla",
        "0001-Fix.patch",
        "World.java",
        "class World {\n}\n",
        "class World {\n    int seed;\n}\n",
    );
    let report = ws.orchestrator().apply(&[]).unwrap();
    assert!(report.is_success(), "{report:?}");
    assert_eq!(
        ws.read("Vanilla/World.java"),
        "class World {\n    int seed;\n}\n"
    );
}

#[test]
fn decompile_is_deterministic_across_projects() {
    let a = workspace();
    let b = workspace();
    a.orchestrator().apply(&[]).unwrap();
    b.orchestrator().apply(&[]).unwrap();
    let ha = a.cache.module("vanilla").unwrap().output_hash;
    let hb = b.cache.module("vanilla").unwrap().output_hash;
    assert!(ha.is_some());
    assert_eq!(ha, hb);
}

#[test]
fn tools_run_once_per_input() {
    let mut ws = workspace();
    let (remap, decomp) = (FakeTool::new("remapper"), FakeTool::new("decompiler"));
    let (remap_runs, decomp_runs) = (remap.counter(), decomp.counter());
    ws.set_tools(remap, decomp);

    ws.orchestrator().apply(&[]).unwrap();
    ws.orchestrator().apply(&[]).unwrap();
    assert_eq!(remap_runs.load(Ordering::SeqCst), 1);
    assert_eq!(decomp_runs.load(Ordering::SeqCst), 1);

    // A fresh process reuses the cached tree too.
    ws.reopen();
    let (remap, decomp) = (FakeTool::new("remapper"), FakeTool::new("decompiler"));
    let decomp_runs = decomp.counter();
    ws.set_tools(remap, decomp);
    let report = ws.orchestrator().apply(&[]).unwrap();
    assert_eq!(decomp_runs.load(Ordering::SeqCst), 0);
    assert!(matches!(
        report.outcome("vanilla"),
        Some(ModuleOutcome::UpToDate { .. })
    ));
}

#[test]
fn new_decompiler_version_reruns_decompile() {
    let mut ws = workspace();
    ws.orchestrator().apply(&[]).unwrap();

    let decomp = FakeTool::new("decompiler").with_version("2.0");
    let runs = decomp.counter();
    ws.set_tools(FakeTool::new("remapper"), decomp);
    ws.orchestrator().apply(&[]).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

fn failure_kind(ws: &Workspace) -> (FailureKind, i32) {
    let report = ws.orchestrator().apply(&[]).unwrap();
    match report.outcome("vanilla") {
        Some(ModuleOutcome::Failed(f)) => (f.kind, report.exit_code()),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[test]
fn decompiler_failure_is_tool_error() {
    let mut ws = workspace();
    ws.set_tools(
        FakeTool::new("remapper"),
        FakeTool::new("decompiler").failing(FakeFailure::Exit),
    );
    assert_eq!(failure_kind(&ws), (FailureKind::DecompileFailed, 3));
    assert!(!ws.path("Vanilla").exists());
}

#[test]
fn remapper_failure_is_remap_failed() {
    let mut ws = workspace();
    ws.set_tools(
        FakeTool::new("remapper").failing(FakeFailure::Exit),
        FakeTool::new("decompiler"),
    );
    assert_eq!(failure_kind(&ws), (FailureKind::RemapFailed, 3));
}

#[test]
fn tool_timeout_is_stage_timeout() {
    let mut ws = workspace();
    ws.set_tools(
        FakeTool::new("remapper"),
        FakeTool::new("decompiler").failing(FakeFailure::Timeout),
    );
    assert_eq!(failure_kind(&ws), (FailureKind::StageTimeout, 3));
}

#[test]
fn mapping_for_other_release_is_artifact_mismatch() {
    let ws = workspace();
    ws.publish("repo", MAPPING_PATH, b"weft-mapping v1 1.19.2\na\tServer\n");
    assert_eq!(failure_kind(&ws), (FailureKind::ArtifactMismatch, 4));
}

#[test]
fn published_checksum_must_match() {
    let ws = workspace();
    ws.publish("repo", &format!("{BINARY_PATH}.sha256"), b"0000");
    assert_eq!(failure_kind(&ws), (FailureKind::ArtifactMismatch, 4));
}

#[test]
fn missing_binary_is_artifact_mismatch() {
    let ws = Workspace::new(CONFIG, &[("upstream/README", "upstream\n")]);
    ws.publish("repo", MAPPING_PATH, MAPPING.as_bytes());
    assert_eq!(failure_kind(&ws), (FailureKind::ArtifactMismatch, 4));
}
