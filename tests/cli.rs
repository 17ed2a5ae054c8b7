use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

fn dumpster_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("dumpster");
    path
}

fn write_export(path: &Path) {
    let conversations = serde_json::json!([
        {
            "title": "Trip planning",
            "create_time": 1709294400.0,
            "update_time": 1709294400.0,
            "mapping": {"root": {"message": {"content": {"parts": [
                {"content_type": "image_asset_pointer", "asset_pointer": "file-service://file-map"}
            ]}}}}
        },
        {
            "title": "Recipes",
            "create_time": 1704067200.0,
            "update_time": 1704067200.0,
            "mapping": {"root": {"message": {"content": {"parts": ["no media here"]}}}}
        }
    ]);

    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    zip.start_file("conversations.json", options).unwrap();
    zip.write_all(conversations.to_string().as_bytes()).unwrap();
    zip.start_file("file-map-route.png", options).unwrap();
    zip.write_all(&[9u8; 40]).unwrap();
    let bytes = zip.finish().unwrap().into_inner();
    fs::write(path, bytes).unwrap();
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[dumpster]
root = "{root}/dumpsters"
scratch_root = "{root}/scratch"

[assets]
cache_capacity = 64
"#,
        root = root.display()
    );
    let config_path = config_dir.join("dumpster.toml");
    fs::write(&config_path, config_content).unwrap();

    write_export(&root.join("export.zip"));
    (tmp, config_path)
}

fn run_dumpster(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = dumpster_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("--progress")
        .arg("off")
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run dumpster binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn archive_arg(tmp: &TempDir) -> String {
    tmp.path().join("export.zip").to_string_lossy().to_string()
}

#[test]
fn test_ingest_prints_summary() {
    let (tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_dumpster(
        &config,
        &["ingest", &archive_arg(&tmp), "--name", "trip"],
    );
    assert!(success, "ingest failed: {}", stderr);
    assert!(stdout.contains("ingest trip"));
    assert!(stdout.contains("chats: 2"));
    assert!(stdout.contains("media files: 1"));
    assert!(stdout.contains("ok"));

    let dir = tmp.path().join("dumpsters/trip");
    assert!(dir.join("chats/2024-03-01_Trip_planning.json").is_file());
    assert!(dir.join("chats/2024-01-01_Recipes.json").is_file());
    assert!(dir.join("media/file-map-route.png").is_file());
}

#[test]
fn test_ingest_json_output() {
    let (tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_dumpster(
        &config,
        &["ingest", &archive_arg(&tmp), "--name", "json", "--json"],
    );
    assert!(success, "ingest failed: {}", stderr);

    let result: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(result["success"], true);
    assert_eq!(result["stats"]["chats"], 2);
    assert_eq!(result["stats"]["assets"], 1);
    assert_eq!(result["missingAssets"].as_array().unwrap().len(), 0);
}

#[test]
fn test_ingest_name_defaults_to_archive_stem() {
    let (tmp, config) = setup_test_env();
    let (_, stderr, success) = run_dumpster(&config, &["ingest", &archive_arg(&tmp)]);
    assert!(success, "ingest failed: {}", stderr);
    assert!(tmp.path().join("dumpsters/export/assets.json").is_file());
}

#[test]
fn test_second_ingest_requires_overwrite() {
    let (tmp, config) = setup_test_env();
    let archive = archive_arg(&tmp);
    let (_, _, success) = run_dumpster(&config, &["ingest", &archive, "--name", "dup"]);
    assert!(success);

    let (_, stderr, success) = run_dumpster(&config, &["ingest", &archive, "--name", "dup"]);
    assert!(!success);
    assert!(stderr.contains("already exists"));

    let (_, stderr, success) = run_dumpster(
        &config,
        &["ingest", &archive, "--name", "dup", "--overwrite"],
    );
    assert!(success, "overwrite ingest failed: {}", stderr);
    let chats = fs::read_dir(tmp.path().join("dumpsters/dup/chats"))
        .unwrap()
        .count();
    assert_eq!(chats, 2);
}

#[test]
fn test_invalid_archive_fails() {
    let (tmp, config) = setup_test_env();
    let bogus = tmp.path().join("bogus.zip");
    fs::write(&bogus, "this is not a zip file").unwrap();

    let (_, stderr, success) = run_dumpster(
        &config,
        &["ingest", bogus.to_str().unwrap(), "--name", "bogus"],
    );
    assert!(!success);
    assert!(stderr.contains("not a ZIP archive"));
    assert!(!tmp.path().join("dumpsters/bogus").exists());
}

#[test]
fn test_validate_and_stats() {
    let (tmp, config) = setup_test_env();
    let (_, _, success) = run_dumpster(&config, &["ingest", &archive_arg(&tmp), "--name", "v"]);
    assert!(success);

    let (stdout, _, success) = run_dumpster(&config, &["validate", "v"]);
    assert!(success);
    assert!(stdout.contains("ok"));

    let (stdout, _, success) = run_dumpster(&config, &["stats", "v"]);
    assert!(success);
    assert!(stdout.contains("Chats:       2"));
    assert!(stdout.contains("Assets:      1"));
    assert!(stdout.contains("40 B"));

    fs::write(tmp.path().join("dumpsters/v/assets.json"), "{broken").unwrap();
    let (stdout, _, success) = run_dumpster(&config, &["validate", "v"]);
    assert!(!success);
    assert!(stdout.contains("error:"));
}

#[test]
fn test_validate_unknown_dumpster_fails() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_dumpster(&config, &["validate", "nope"]);
    assert!(!success);
    assert!(stderr.contains("no dumpster named"));
}

#[test]
fn test_resolve_pointer() {
    let (tmp, config) = setup_test_env();
    let (_, _, success) = run_dumpster(&config, &["ingest", &archive_arg(&tmp), "--name", "r"]);
    assert!(success);

    let (stdout, stderr, success) = run_dumpster(&config, &["resolve", "r", "file-service://file-map"]);
    assert!(success, "resolve failed: {}", stderr);
    assert!(stdout.trim().ends_with("file-map-route.png"));

    let (_, _, success) = run_dumpster(&config, &["resolve", "r", "file-service://file-none"]);
    assert!(!success);

    let (_, stderr, success) = run_dumpster(&config, &["resolve", "r", "https://example.com/x"]);
    assert!(!success);
    assert!(stderr.contains("not an asset pointer"));
}

#[test]
fn test_dump_command() {
    let (tmp, config) = setup_test_env();
    let source = tmp.path().join("conversations.json");
    fs::write(
        &source,
        r#"[
            {"title": "One", "create_time": 1709294400, "mapping": {"a": {}}},
            {"title": "One", "create_time": 1709294400, "mapping": {"b": {}}}
        ]"#,
    )
    .unwrap();
    let out = tmp.path().join("out");

    let (stdout, stderr, success) = run_dumpster(
        &config,
        &["dump", source.to_str().unwrap(), out.to_str().unwrap()],
    );
    assert!(success, "dump failed: {}", stderr);
    assert!(stdout.contains("written: 2"));
    assert!(stdout.contains("collisions resolved: 1"));
    assert!(out.join("2024-03-01_One.json").is_file());
    assert!(out.join("2024-03-01_One_1.json").is_file());
    assert!(source.is_file());

    let (stdout, _, success) = run_dumpster(
        &config,
        &[
            "dump",
            source.to_str().unwrap(),
            out.to_str().unwrap(),
            "--remove-original",
        ],
    );
    assert!(success);
    assert!(stdout.contains("duplicates skipped: 2"));
    // nothing new was written, so the source stays
    assert!(source.is_file());
}

#[test]
fn test_missing_config_uses_defaults() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");
    let (stdout, _, success) = run_dumpster(&missing, &["--help"]);
    assert!(success);
    assert!(stdout.contains("ingest"));
}
