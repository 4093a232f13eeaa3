#![forbid(unsafe_code)]

//! Translator configuration.
//!
//! Values come from [`TranslatorConfig::default`] and may be overridden by a
//! TOML file. Lookup order for the file is an explicit path, then
//! `$XDG_CONFIG_HOME/gqlcypher/config.toml` (or the platform equivalent).
//!
//! ```toml
//! [translate]
//! batch_creates = true
//! error_namespace = "@gqlcypher"
//!
//! [limits]
//! max_filter_depth = 64
//! max_filter_nodes = 10000
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Code appended to the namespace when an authorization guard fails.
pub const FORBIDDEN_CODE: &str = "FORBIDDEN";
/// Code appended to the namespace when a cardinality check fails.
pub const CARDINALITY_CODE: &str = "CARDINALITY_VIOLATION";

const DEFAULT_MAX_FILTER_DEPTH: usize = 64;
const DEFAULT_MAX_FILTER_NODES: usize = 10_000;

/// Knobs that change the shape of compiled queries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranslatorConfig {
    /// Emit `UNWIND`-batched fragments for homogeneous create inputs.
    pub batch_creates: bool,
    /// Prefix of every runtime validation message.
    pub error_namespace: String,
    /// Maximum nesting depth of a single filter tree.
    pub max_filter_depth: usize,
    /// Maximum node count of a single filter tree.
    pub max_filter_nodes: usize,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            batch_creates: true,
            error_namespace: "@gqlcypher".to_owned(),
            max_filter_depth: DEFAULT_MAX_FILTER_DEPTH,
            max_filter_nodes: DEFAULT_MAX_FILTER_NODES,
        }
    }
}

impl TranslatorConfig {
    /// Loads the config from `explicit`, or from the default location when it
    /// exists. Missing files fall back to defaults.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = explicit.or_else(default_config_path);
        match path {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Reads and validates a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        raw.into_config()
    }

    /// Parses a TOML document without touching the filesystem.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(contents).map_err(|source| ConfigError::Parse {
                path: PathBuf::from("<inline>"),
                source,
            })?;
        raw.into_config()
    }

    /// Message raised by failed authorization validations.
    pub fn forbidden_message(&self) -> String {
        format!("{}/{}", self.error_namespace, FORBIDDEN_CODE)
    }

    /// Message template raised by failed cardinality validations. `%s` is
    /// filled with the violated relationship.
    pub fn cardinality_message(&self) -> String {
        format!("{}/{}: %s", self.error_namespace, CARDINALITY_CODE)
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct RawConfig {
    #[serde(default)]
    translate: TranslateSection,
    #[serde(default)]
    limits: LimitsSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct TranslateSection {
    batch_creates: Option<bool>,
    error_namespace: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct LimitsSection {
    max_filter_depth: Option<usize>,
    max_filter_nodes: Option<usize>,
}

impl RawConfig {
    fn into_config(self) -> Result<TranslatorConfig, ConfigError> {
        let defaults = TranslatorConfig::default();
        let error_namespace = self
            .translate
            .error_namespace
            .unwrap_or(defaults.error_namespace);
        if error_namespace.trim().is_empty() || error_namespace.contains('"') {
            return Err(ConfigError::InvalidValue {
                key: "translate.error_namespace",
                value: error_namespace,
            });
        }
        let max_filter_depth = self
            .limits
            .max_filter_depth
            .unwrap_or(defaults.max_filter_depth);
        if max_filter_depth == 0 {
            return Err(ConfigError::InvalidValue {
                key: "limits.max_filter_depth",
                value: max_filter_depth.to_string(),
            });
        }
        let max_filter_nodes = self
            .limits
            .max_filter_nodes
            .unwrap_or(defaults.max_filter_nodes);
        if max_filter_nodes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "limits.max_filter_nodes",
                value: max_filter_nodes.to_string(),
            });
        }
        Ok(TranslatorConfig {
            batch_creates: self.translate.batch_creates.unwrap_or(defaults.batch_creates),
            error_namespace,
            max_filter_depth,
            max_filter_nodes,
        })
    }
}

/// Failures while loading a translator config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File exists but could not be read.
    #[error("failed to read translator config {path}: {source}")]
    Read {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// File is not valid TOML for this schema.
    #[error("failed to parse translator config {path}: {source}")]
    Parse {
        /// Path that failed.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
    /// A value is syntactically valid but unusable.
    #[error("config value {key} = '{value}' is invalid")]
    InvalidValue {
        /// Dotted key of the offending value.
        key: &'static str,
        /// Offending value.
        value: String,
    },
}

/// Platform config location, e.g. `~/.config/gqlcypher/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("gqlcypher").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = TranslatorConfig::from_toml_str("").unwrap();
        assert_eq!(config, TranslatorConfig::default());
        assert_eq!(config.forbidden_message(), "@gqlcypher/FORBIDDEN");
    }

    #[test]
    fn sections_override_defaults() {
        let config = TranslatorConfig::from_toml_str(
            r#"
            [translate]
            batch_creates = false
            error_namespace = "@acme"

            [limits]
            max_filter_depth = 8
            "#,
        )
        .unwrap();
        assert!(!config.batch_creates);
        assert_eq!(config.cardinality_message(), "@acme/CARDINALITY_VIOLATION: %s");
        assert_eq!(config.max_filter_depth, 8);
        assert_eq!(config.max_filter_nodes, DEFAULT_MAX_FILTER_NODES);
    }

    #[test]
    fn rejects_unusable_values() {
        let err = TranslatorConfig::from_toml_str("[limits]\nmax_filter_nodes = 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "limits.max_filter_nodes",
                ..
            }
        ));
        let err = TranslatorConfig::from_toml_str("[translate]\nbatch_creates = \"yes\"\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
