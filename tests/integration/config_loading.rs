#![allow(missing_docs)]

use std::fs;

use gqlcypher::{ConfigError, TranslatorConfig};
use tempfile::TempDir;

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let config = TranslatorConfig::load(Some(dir.path().join("nope.toml"))).unwrap();
    assert_eq!(config, TranslatorConfig::default());
}

#[test]
fn partial_files_override_only_given_keys() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[translate]\nbatch_creates = false\n\n[limits]\nmax_filter_depth = 8\n").unwrap();
    let config = TranslatorConfig::load(Some(path)).unwrap();
    assert!(!config.batch_creates);
    assert_eq!(config.max_filter_depth, 8);
    assert_eq!(config.max_filter_nodes, TranslatorConfig::default().max_filter_nodes);
    assert_eq!(config.forbidden_message(), "@gqlcypher/FORBIDDEN");
}

#[test]
fn namespace_changes_every_message() {
    let config = TranslatorConfig::from_toml_str("[translate]\nerror_namespace = \"@acme\"").unwrap();
    assert_eq!(config.forbidden_message(), "@acme/FORBIDDEN");
    assert_eq!(config.cardinality_message(), "@acme/CARDINALITY_VIOLATION: %s");
}

#[test]
fn invalid_files_report_their_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[limits\nmax_filter_depth = ").unwrap();
    let err = TranslatorConfig::from_file(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains("broken.toml"));

    fs::write(&path, "[limits]\nmax_filter_nodes = 0\n").unwrap();
    let err = TranslatorConfig::from_file(&path).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { key: "limits.max_filter_nodes", .. }));
}
