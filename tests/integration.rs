use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn slab_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("slab");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let cards_dir = root.join("cards");
    fs::create_dir_all(&cards_dir).unwrap();
    fs::write(cards_dir.join("lebron.jpg"), [0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3]).unwrap();
    fs::write(cards_dir.join("notes.txt"), "not an image").unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/slab.sqlite"

[storage]
image_dir = "{root}/data/images"

[retrieval]
default_top_k = 5

[server]
bind = "127.0.0.1:7340"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("slab.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_slab(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = slab_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run slab binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn card_path(config_path: &Path, name: &str) -> String {
    config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("cards")
        .join(name)
        .display()
        .to_string()
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_slab(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/slab.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, first) = run_slab(&config_path, &["init"]);
    let (_, stderr, second) = run_slab(&config_path, &["init"]);
    assert!(first);
    assert!(second, "second init failed: {}", stderr);
}

#[test]
fn test_list_empty() {
    let (_tmp, config_path) = setup_test_env();
    run_slab(&config_path, &["init"]);

    let (stdout, stderr, success) = run_slab(&config_path, &["list"]);
    assert!(success, "list failed: {}", stderr);
    assert!(stdout.contains("No cards stored."));
}

#[test]
fn test_get_missing_card() {
    let (_tmp, config_path) = setup_test_env();
    run_slab(&config_path, &["init"]);

    let (_, stderr, success) = run_slab(&config_path, &["get", "99999999"]);
    assert!(!success);
    assert!(stderr.contains("card not found"));
}

#[test]
fn test_delete_missing_card() {
    let (_tmp, config_path) = setup_test_env();
    run_slab(&config_path, &["init"]);

    let (_, stderr, success) = run_slab(&config_path, &["delete", "99999999"]);
    assert!(!success);
    assert!(stderr.contains("card not found"));
}

#[test]
fn test_process_with_disabled_extractor_is_rejected() {
    let (_tmp, config_path) = setup_test_env();
    run_slab(&config_path, &["init"]);

    let image = card_path(&config_path, "lebron.jpg");
    let (stdout, stderr, success) = run_slab(&config_path, &["process", &image]);
    assert!(!success);
    assert!(stdout.contains("ingest -> extract"), "stdout={}", stdout);
    assert!(stderr.contains("extraction_rejected"), "stderr={}", stderr);
}

#[test]
fn test_process_unsupported_content_type() {
    let (_tmp, config_path) = setup_test_env();
    run_slab(&config_path, &["init"]);

    let notes = card_path(&config_path, "notes.txt");
    let (_, stderr, success) =
        run_slab(&config_path, &["process", &notes, "--content-type", "text/plain"]);
    assert!(!success);
    assert!(stderr.contains("ingest_failed"), "stderr={}", stderr);
}

#[test]
fn test_process_unknown_extension_needs_content_type() {
    let (_tmp, config_path) = setup_test_env();
    run_slab(&config_path, &["init"]);

    let notes = card_path(&config_path, "notes.txt");
    let (_, stderr, success) = run_slab(&config_path, &["process", &notes]);
    assert!(!success);
    assert!(stderr.contains("--content-type"));
}

#[test]
fn test_search_without_query_errors() {
    let (_tmp, config_path) = setup_test_env();
    run_slab(&config_path, &["init"]);

    let (_, stderr, success) = run_slab(&config_path, &["search"]);
    assert!(!success);
    assert!(stderr.contains("search needs query text"));
}

#[test]
fn test_search_with_disabled_embedding_errors() {
    let (_tmp, config_path) = setup_test_env();
    run_slab(&config_path, &["init"]);

    let (_, stderr, success) = run_slab(&config_path, &["search", "--text", "lebron rookie"]);
    assert!(!success);
    assert!(stderr.to_lowercase().contains("disabled"), "stderr={}", stderr);
}

#[test]
fn test_missing_config_errors() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_slab(&tmp.path().join("nope.toml"), &["list"]);
    assert!(!success);
    assert!(stderr.contains("nope.toml"));
}
