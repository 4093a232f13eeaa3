#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use gqlcypher::query::Value;
use gqlcypher::{AuthContext, Request, Schema, Translation, Translator, TranslatorConfig};
use serde_json::Value as JsonValue;
use tracing_subscriber::EnvFilter;

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

/// Installs a test subscriber once; `RUST_LOG=gqlcypher=trace` shows
/// compiler events.
pub fn init_tracing() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("off"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}

pub fn movie_schema() -> Arc<Schema> {
    static SCHEMA: OnceLock<Arc<Schema>> = OnceLock::new();
    SCHEMA
        .get_or_init(|| {
            let json = std::fs::read_to_string(fixture_path("movies.json")).expect("read fixture");
            Arc::new(Schema::from_json_str(&json).expect("fixture schema"))
        })
        .clone()
}

pub fn translator() -> Translator {
    init_tracing();
    Translator::new(movie_schema())
}

pub fn translator_with(config: TranslatorConfig) -> Translator {
    init_tracing();
    Translator::with_config(movie_schema(), config)
}

pub fn request(json: JsonValue) -> Request {
    serde_json::from_value(json).expect("request tree")
}

pub fn translate(json: JsonValue) -> Translation {
    translate_as(json, &AuthContext::anonymous())
}

pub fn translate_as(json: JsonValue, auth: &AuthContext) -> Translation {
    translator().translate(&request(json), auth).expect("translation")
}

pub fn error_code(json: JsonValue) -> &'static str {
    translator()
        .translate(&request(json), &AuthContext::anonymous())
        .expect_err("translation should fail")
        .code()
}

pub fn user(sub: &str) -> AuthContext {
    AuthContext::with_claims(BTreeMap::from([("sub".to_owned(), Value::from(sub))]))
}
