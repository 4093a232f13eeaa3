#![allow(missing_docs)]

#[path = "../common/mod.rs"]
mod common;

use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

const MOVIE_READ: &str = r#"{"operation": "read", "type": "Movie", "where": {"title": "Heat"}, "selection": ["title"]}"#;

fn workspace() -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    fs::write(dir.path().join("request.json"), MOVIE_READ).expect("write request");
    dir
}

#[test]
fn translate_prints_cypher_and_params() {
    let dir = workspace();
    let output = cargo_bin_cmd!("gqlcypher")
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .arg("translate")
        .arg("--schema")
        .arg(common::fixture_path("movies.json"))
        .arg("--request")
        .arg(dir.path().join("request.json"))
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8(output).expect("utf8");
    assert!(stdout.starts_with(
        "MATCH (this:Movie)\nWHERE this.title = $param\nRETURN this { .title } AS this\n\nParams:\n"
    ));
    assert!(stdout.contains("\"param\": \"Heat\""));
}

#[test]
fn json_output_carries_a_fingerprint() {
    let dir = workspace();
    let output = cargo_bin_cmd!("gqlcypher")
        .args(["--format", "json", "--config"])
        .arg(dir.path().join("absent.toml"))
        .arg("translate")
        .arg("--schema")
        .arg(common::fixture_path("movies.json"))
        .args(["--request", "-"])
        .write_stdin(MOVIE_READ)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let payload: Value = serde_json::from_slice(&output).expect("json output");
    assert_eq!(payload["params"]["param"], "Heat");
    assert_eq!(payload["fingerprint"].as_str().map(str::len), Some(16));
    assert!(payload["cypher"].as_str().unwrap().starts_with("MATCH (this:Movie)"));
}

#[test]
fn claims_and_config_shape_guards() {
    let dir = workspace();
    let request = dir.path().join("account.json");
    fs::write(&request, r#"{"operation": "delete", "type": "Account"}"#).unwrap();
    let claims = dir.path().join("claims.json");
    fs::write(&claims, r#"{"sub": "u1", "roles": ["admin"]}"#).unwrap();
    let config = dir.path().join("config.toml");
    fs::write(&config, "[translate]\nerror_namespace = \"@acme\"\n").unwrap();

    let output = cargo_bin_cmd!("gqlcypher")
        .args(["--format", "json", "--config"])
        .arg(&config)
        .arg("translate")
        .arg("--schema")
        .arg(common::fixture_path("movies.json"))
        .arg("--request")
        .arg(&request)
        .arg("--claims")
        .arg(&claims)
        .arg("--authenticated")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let payload: Value = serde_json::from_slice(&output).expect("json output");
    assert!(payload["cypher"].as_str().unwrap().contains("\"@acme/FORBIDDEN\""));
    assert_eq!(payload["params"]["isAuthenticated"], true);
    assert_eq!(payload["params"]["jwt"]["sub"], "u1");
}

#[test]
fn translation_errors_exit_nonzero_with_code() {
    let dir = workspace();
    let request = dir.path().join("bad.json");
    fs::write(&request, r#"{"operation": "read", "type": "Movie", "selection": ["budget"]}"#).unwrap();
    let output = cargo_bin_cmd!("gqlcypher")
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .arg("translate")
        .arg("--schema")
        .arg(common::fixture_path("movies.json"))
        .arg("--request")
        .arg(&request)
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8(output).expect("utf8");
    assert!(stderr.contains("error: [UnknownField]"), "{stderr}");
}

#[test]
fn check_schema_reports_counts() {
    let output = cargo_bin_cmd!("gqlcypher")
        .args(["--format", "json", "check-schema", "--schema"])
        .arg(common::fixture_path("movies.json"))
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let report: Value = serde_json::from_slice(&output).expect("json output");
    assert_eq!(report["ok"], true);
    assert_eq!(report["entities"], 9);
    assert_eq!(report["relationships"], 7);
}

#[test]
fn broken_schemas_fail_the_check() {
    let dir = TempDir::new().unwrap();
    let schema = dir.path().join("schema.json");
    fs::write(&schema, r#"{"entities": [{"name": "A", "relationships": [{"field": "b", "type": "R", "direction": "out", "target": "Missing"}]}]}"#).unwrap();
    cargo_bin_cmd!("gqlcypher")
        .arg("check-schema")
        .arg("--schema")
        .arg(&schema)
        .assert()
        .failure();
}
