#![forbid(unsafe_code)]

//! Request compilation.
//!
//! [`Translator`] is the entry point: it owns a shared [`Schema`] and a
//! [`TranslatorConfig`], and turns one [`Request`] plus the caller's
//! [`AuthContext`] into a [`Translation`]. Every call gets its own
//! [`scope::CompilationScope`], so a translator can serve concurrent
//! requests without locking.

pub mod auth;
pub mod literal;
pub mod plan;
pub mod predicate;
pub mod projection;
pub mod scope;

mod mutation;
mod read;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::config::TranslatorConfig;
use crate::cypher::{render, Translation};
use crate::error::{Result, TranslateError};
use crate::query::request::Request;
use crate::schema::{AuthContext, Schema};

pub use mutation::{Assignment, AssignmentValue, MathOp, MutationOperation, NestedOp, NodeCreate, NodeUpdate, Stage};

use self::scope::CompilationScope;

/// Compiles requests against one schema.
#[derive(Clone, Debug)]
pub struct Translator {
    schema: Arc<Schema>,
    config: TranslatorConfig,
}

impl Translator {
    /// Translator with default settings.
    pub fn new(schema: Arc<Schema>) -> Self {
        Self::with_config(schema, TranslatorConfig::default())
    }

    /// Translator with explicit settings.
    pub fn with_config(schema: Arc<Schema>, config: TranslatorConfig) -> Self {
        Self { schema, config }
    }

    /// Schema the translator compiles against.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Active settings.
    pub fn config(&self) -> &TranslatorConfig {
        &self.config
    }

    /// Compiles `request` for the caller described by `auth`.
    ///
    /// The same request, schema and claims always yield byte-identical text
    /// and parameters.
    pub fn translate(&self, request: &Request, auth: &AuthContext) -> Result<Translation> {
        let started = Instant::now();
        debug!(
            operation = request.operation_name(),
            target = request.target(),
            authenticated = auth.authenticated,
            "translate.start"
        );
        let mut scope = CompilationScope::new(&self.schema, &self.config, auth);
        let compiled = match request {
            Request::Read(read) => read::compile_read(read, &mut scope),
            Request::Aggregate(aggregate) => read::compile_aggregate(aggregate, &mut scope),
            Request::Create(create) => mutation::compile_create(create, &mut scope),
            Request::Update(update) => mutation::compile_update(update, &mut scope),
            Request::Delete(delete) => mutation::compile_delete(delete, &mut scope),
        };
        let clauses = match compiled {
            Ok(clauses) => clauses,
            Err(err) => {
                warn!(
                    operation = request.operation_name(),
                    target = request.target(),
                    code = err.code(),
                    error = %err,
                    "translate.failed"
                );
                return Err(err);
            }
        };
        let translation = Translation {
            cypher: render(&clauses),
            params: scope.into_params(),
        };
        debug!(
            operation = request.operation_name(),
            params = translation.params.len(),
            bytes = translation.cypher.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "translate.done"
        );
        Ok(translation)
    }

    /// Parses a JSON request tree and compiles it.
    pub fn translate_json(&self, request: &str, auth: &AuthContext) -> Result<Translation> {
        let request: Request = serde_json::from_str(request)
            .map_err(|err| TranslateError::invalid_input("request", err.to_string()))?;
        self.translate(&request, auth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::value::Value;
    use std::collections::BTreeMap;

    fn translator() -> Translator {
        Translator::new(Arc::new(testing::movie_schema()))
    }

    #[test]
    fn translator_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Translator>();
    }

    #[test]
    fn post_read_has_no_parameters() {
        let translation = translator()
            .translate_json(
                r#"{"operation": "read", "type": "Post", "selection": ["content"]}"#,
                &AuthContext::anonymous(),
            )
            .unwrap();
        assert_eq!(translation.cypher, "MATCH (this:Post)\nRETURN this { .content } AS this");
        assert!(translation.params.is_empty());
    }

    #[test]
    fn repeated_translation_is_identical() {
        let translator = translator();
        let auth = AuthContext::with_claims(BTreeMap::from([("sub".to_owned(), Value::from("u1"))]));
        let request = r#"{"operation": "read", "type": "Account", "where": {"name_STARTS_WITH": "a"},
                          "selection": ["name"]}"#;
        let first = translator.translate_json(request, &auth).unwrap();
        let second = translator.translate_json(request, &auth).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn malformed_requests_are_invalid_input() {
        let err = translator()
            .translate_json(r#"{"operation": "explode"}"#, &AuthContext::anonymous())
            .unwrap_err();
        assert_eq!(err.code(), "InvalidInput");
    }

    #[test]
    fn unknown_types_are_reported() {
        let err = translator()
            .translate_json(r#"{"operation": "read", "type": "Nope"}"#, &AuthContext::anonymous())
            .unwrap_err();
        assert_eq!(err.code(), "UnknownType");
    }
}
