//! gqlcypher compiles typed graph-query requests into a single
//! parameterized Cypher query.
//!
//! A request tree (fields, nested relationship selections, filters,
//! aggregations, sorting and pagination, or a nested mutation) is compiled
//! against a [`Schema`] and the caller's [`AuthContext`]. Authorization
//! rules declared in the schema are injected automatically.
//!
//! ```no_run
//! use std::sync::Arc;
//! use gqlcypher::{AuthContext, Schema, Translator};
//!
//! let schema = Schema::from_json_str(&std::fs::read_to_string("schema.json")?)?;
//! let translator = Translator::new(Arc::new(schema));
//! let translation = translator.translate_json(
//!     r#"{"operation": "read", "type": "Movie", "selection": ["title"]}"#,
//!     &AuthContext::anonymous(),
//! )?;
//! println!("{}", translation.cypher);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod cypher;
pub mod error;
pub mod query;
pub mod schema;
pub mod translate;
pub mod types;

pub use config::{ConfigError, TranslatorConfig};
pub use cypher::Translation;
pub use error::{ErrorKind, ExecutionFailure, Result, TranslateError};
pub use query::Request;
pub use schema::{AuthContext, Schema, SchemaDef, SchemaError};
pub use translate::Translator;
