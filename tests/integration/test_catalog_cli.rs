//! Test: CLI build, search and stats against an isolated data directory
//!
//! Runs the compiled binary with an explicit settings file so no workspace
//! configuration leaks into the test.

use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn run_cli(workspace: &Path, args: &[&str]) -> (i32, String, String) {
    let config = workspace.join("settings.toml");
    let output = Command::new(env!("CARGO_BIN_EXE_ivfdb"))
        .arg("--config")
        .arg(&config)
        .args(args)
        .current_dir(workspace)
        .output()
        .expect("run ivfdb CLI");

    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (code, stdout, stderr)
}

fn prepare_workspace(workspace: &Path) {
    let data_dir = workspace.join("data");
    let settings = format!(
        r#"
data_dir = "{}"

[index]
dimension = 2
level1_clusters = 2
level2_clusters = 3
probe_width = 2
seed = 9

[storage]
block_size = 1024
cache_pages = 64
"#,
        data_dir.display()
    );
    std::fs::write(workspace.join("settings.toml"), settings).expect("write settings");

    let mut vectors = String::from("# x, y\n");
    for i in 0..40 {
        let (x, y) = if i < 20 {
            (i as f32 * 0.1, 0.0)
        } else {
            (100.0 + i as f32 * 0.1, 50.0)
        };
        vectors.push_str(&format!("{x}, {y}\n"));
    }
    std::fs::write(workspace.join("vectors.txt"), vectors).expect("write vectors");
}

#[test]
fn test_build_then_search_json() {
    let workspace = TempDir::new().expect("Failed to create temp dir");
    prepare_workspace(workspace.path());

    let (code, stdout, stderr) = run_cli(workspace.path(), &["build", "vectors.txt"]);
    assert_eq!(code, 0, "build failed: {stderr}");
    assert!(stdout.contains("over 40 vectors"), "unexpected output: {stdout}");

    // Row 25 is (102.5, 50.0)
    let (code, stdout, stderr) =
        run_cli(workspace.path(), &["search", "102.5", "50.0", "--k", "3", "--json"]);
    assert_eq!(code, 0, "search failed: {stderr}");

    let json: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON output");
    assert_eq!(json["index"], "vectors_embedding_ivf");
    assert_eq!(json["mode"], "scan");
    let results = json["results"].as_array().expect("results array");
    assert!(!results.is_empty());
    assert_eq!(results[0]["payload"]["block"], 25);
    assert_eq!(results[0]["distance"], 0.0);
}

#[test]
fn test_stats_and_preload_after_build() {
    let workspace = TempDir::new().expect("Failed to create temp dir");
    prepare_workspace(workspace.path());

    let (code, _, stderr) = run_cli(workspace.path(), &["build", "vectors.txt"]);
    assert_eq!(code, 0, "build failed: {stderr}");

    let (code, stdout, _) = run_cli(workspace.path(), &["stats"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("vectors_embedding_ivf on vectors.embedding"));
    assert!(stdout.contains("40 records"));

    let (code, stdout, _) = run_cli(workspace.path(), &["preload"]);
    assert_eq!(code, 0);
    assert!(stdout.starts_with("Pinned"), "unexpected output: {stdout}");
}

#[test]
fn test_search_without_index_fails() {
    let workspace = TempDir::new().expect("Failed to create temp dir");
    prepare_workspace(workspace.path());

    let (code, _, stderr) = run_cli(workspace.path(), &["search", "1.0", "2.0"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("No index on vectors.embedding"), "stderr: {stderr}");
}

#[test]
fn test_build_rejects_wrong_dimension() {
    let workspace = TempDir::new().expect("Failed to create temp dir");
    prepare_workspace(workspace.path());
    std::fs::write(workspace.path().join("bad.txt"), "1.0 2.0 3.0\n").expect("write input");

    let (code, _, stderr) = run_cli(workspace.path(), &["build", "bad.txt"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("expected 2 components"), "stderr: {stderr}");
}

#[test]
fn test_failed_rebuild_keeps_serving_previous_index() {
    let workspace = TempDir::new().expect("Failed to create temp dir");
    prepare_workspace(workspace.path());
    std::fs::write(workspace.path().join("one.txt"), "1.0, 2.0\n").expect("write input");

    let (code, _, stderr) = run_cli(workspace.path(), &["build", "vectors.txt"]);
    assert_eq!(code, 0, "build failed: {stderr}");

    // One row cannot seed two level-1 clusters
    let (code, _, stderr) = run_cli(workspace.path(), &["build", "one.txt"]);
    assert_eq!(code, 1, "single-row build should fail");
    assert!(!stderr.is_empty());

    let (code, stdout, stderr) =
        run_cli(workspace.path(), &["search", "102.5", "50.0", "--k", "1", "--json"]);
    assert_eq!(code, 0, "search after failed rebuild: {stderr}");
    let json: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON output");
    assert_eq!(json["results"][0]["payload"]["block"], 25);

    let (code, stdout, stderr) = run_cli(workspace.path(), &["build", "vectors.txt"]);
    assert_eq!(code, 0, "rebuild failed: {stderr}");
    assert!(stdout.contains("generation: 2"), "unexpected output: {stdout}");
}
