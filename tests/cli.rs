use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use tempfile::TempDir;

fn write_config(dir: &Path, span_type: &str) -> PathBuf {
    let path = dir.join("shardex.json");
    let config = json!({
        "connection": {
            "current": "local",
            "local": {"client": "http://127.0.0.1:9", "usr": ["elastic", "changeme"]}
        },
        "prefix": "ta",
        "source": "src",
        "indexes": {
            "customers": {"stub": "cst", "span_type": span_type, "date_field": "created"}
        }
    });
    fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
    path
}

fn shardex(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("shardex").unwrap();
    cmd.current_dir(home)
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env("TZ", "UTC")
        .env_remove("SHARDEX_CONFIG")
        .env_remove("SHARDEX_INDEX")
        .env_remove("SHARDEX_SOURCE")
        .env_remove("SHARDEX_URL")
        .env_remove("SHARDEX_CONNECTION")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn index_name_routes_epoch_to_monthly_span() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path(), "m");
    shardex(tmp.path())
        .args(["index", "name", "--epoch", "1678792737", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout("ta-cst-src-2023-03\n");
}

#[test]
fn index_name_without_epoch_is_the_pattern() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path(), "m");
    shardex(tmp.path())
        .args(["index", "name", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout("ta-cst-src-*\n");
}

#[test]
fn source_flag_overrides_configured_source() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path(), "y");
    shardex(tmp.path())
        .args(["index", "name", "--epoch", "1678792737", "--source", "crm", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout("ta-cst-crm-2023\n");
}

#[test]
fn index_bounds_reports_span_range() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path(), "m");
    let output = shardex(tmp.path())
        .args(["index", "bounds", "2023-03", "--json", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["start"], 1677628800);
    assert_eq!(value["end"], 1680307200);
}

#[test]
fn index_bounds_rejects_mismatched_label() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path(), "m");
    shardex(tmp.path())
        .args(["index", "bounds", "2023", "--config"])
        .arg(&config)
        .assert()
        .failure();
}

#[test]
fn unknown_span_type_fails() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path(), "w");
    shardex(tmp.path())
        .args(["index", "name", "--config"])
        .arg(&config)
        .assert()
        .failure();
}

#[test]
fn missing_config_file_fails() {
    let tmp = TempDir::new().unwrap();
    shardex(tmp.path())
        .args(["index", "name", "--config", "does-not-exist.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn config_show_redacts_passwords() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path(), "m");
    let output = shardex(tmp.path())
        .args(["config", "show", "--json", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["config"]["prefix"], "ta");
    assert_eq!(
        value["config"]["connection"]["local"]["usr"],
        json!(["elastic", "********"])
    );
    assert_eq!(value["sources"].as_array().map(Vec::len), Some(1));
}
