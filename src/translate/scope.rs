//! Per-compilation naming and parameter state.

use std::collections::BTreeMap;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use crate::config::TranslatorConfig;
use crate::error::{Result, TranslateError};
use crate::query::value::Value;
use crate::schema::{AuthContext, Schema};

/// Parameter holding the caller claims.
pub const CLAIMS_PARAM: &str = "jwt";
/// Parameter holding the authentication flag.
pub const AUTHENTICATED_PARAM: &str = "isAuthenticated";

/// Hands out `prefix`, `prefix0`, `prefix1`, ... and never repeats a name.
#[derive(Debug, Default)]
pub struct NameAllocator {
    counters: FxHashMap<String, u32>,
    issued: FxHashSet<String>,
}

impl NameAllocator {
    /// Empty allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `name` as taken without issuing it.
    pub fn reserve(&mut self, name: &str) {
        self.issued.insert(name.to_owned());
    }

    /// Issues the next free name for `prefix`.
    pub fn allocate(&mut self, prefix: &str) -> Result<String> {
        if !self.counters.contains_key(prefix) {
            self.counters.insert(prefix.to_owned(), 0);
            if self.issued.insert(prefix.to_owned()) {
                return Ok(prefix.to_owned());
            }
        }
        loop {
            let counter = self
                .counters
                .get_mut(prefix)
                .ok_or(TranslateError::Internal("allocator counter missing"))?;
            let n = *counter;
            *counter = n.checked_add(1).ok_or_else(|| TranslateError::AllocationExhausted {
                prefix: prefix.to_owned(),
            })?;
            let candidate = format!("{prefix}{n}");
            if self.issued.insert(candidate.clone()) {
                return Ok(candidate);
            }
        }
    }
}

/// Live state of one compile call. Never shared between calls.
pub struct CompilationScope<'a> {
    /// Schema being compiled against.
    pub schema: &'a Schema,
    /// Translator settings.
    pub config: &'a TranslatorConfig,
    auth: &'a AuthContext,
    vars: NameAllocator,
    param_names: NameAllocator,
    params: BTreeMap<String, Value>,
}

impl<'a> CompilationScope<'a> {
    /// Fresh scope with the reserved parameter names blocked.
    pub fn new(schema: &'a Schema, config: &'a TranslatorConfig, auth: &'a AuthContext) -> Self {
        let mut param_names = NameAllocator::new();
        param_names.reserve(CLAIMS_PARAM);
        param_names.reserve(AUTHENTICATED_PARAM);
        Self {
            schema,
            config,
            auth,
            vars: NameAllocator::new(),
            param_names,
            params: BTreeMap::new(),
        }
    }

    /// Allocates a query variable.
    pub fn allocate(&mut self, prefix: &str) -> Result<String> {
        let name = self.vars.allocate(prefix)?;
        trace!(prefix, name = name.as_str(), "scope.allocate");
        Ok(name)
    }

    /// Allocates a parameter name without binding a value.
    pub fn allocate_param(&mut self, prefix: &str) -> Result<String> {
        self.param_names.allocate(prefix)
    }

    /// Binds `value` to a fresh parameter and returns its `$name` reference.
    pub fn param(&mut self, prefix: &str, value: Value) -> Result<String> {
        let name = self.allocate_param(prefix)?;
        let reference = format!("${name}");
        self.params.insert(name, value);
        Ok(reference)
    }

    /// Names of the parameters bound so far.
    pub(crate) fn param_mark(&self) -> FxHashSet<String> {
        self.params.keys().cloned().collect()
    }

    /// Unbinds every parameter added after `mark` was taken. Their names
    /// stay issued.
    pub(crate) fn discard_params_since(&mut self, mark: &FxHashSet<String>) {
        self.params.retain(|name, _| mark.contains(name));
    }

    /// Reference to a claim path, registering the claims parameter.
    pub fn claim(&mut self, path: &[String]) -> String {
        self.params
            .entry(CLAIMS_PARAM.to_owned())
            .or_insert_with(|| Value::Map(self.auth.claims.clone()));
        let mut reference = format!("${CLAIMS_PARAM}");
        for segment in path {
            reference.push('.');
            reference.push_str(&crate::cypher::pattern::escape(segment));
        }
        reference
    }

    /// `$isAuthenticated = true`, registering the flag parameter.
    pub fn authenticated_check(&mut self) -> String {
        self.params
            .entry(AUTHENTICATED_PARAM.to_owned())
            .or_insert(Value::Bool(self.auth.authenticated));
        format!("${AUTHENTICATED_PARAM} = true")
    }

    /// Number of bound parameters.
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// Consumes the scope, yielding the parameter map.
    pub fn into_params(self) -> BTreeMap<String, Value> {
        self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_name_is_the_bare_prefix() {
        let mut names = NameAllocator::new();
        assert_eq!(names.allocate("this").unwrap(), "this");
        assert_eq!(names.allocate("this").unwrap(), "this0");
        assert_eq!(names.allocate("this").unwrap(), "this1");
        assert_eq!(names.allocate("var").unwrap(), "var");
    }

    #[test]
    fn suffixed_prefixes_never_collide() {
        let mut names = NameAllocator::new();
        assert_eq!(names.allocate("this").unwrap(), "this");
        assert_eq!(names.allocate("this0").unwrap(), "this0");
        assert_eq!(names.allocate("this").unwrap(), "this1", "this0 already issued");
        assert_eq!(names.allocate("this0").unwrap(), "this00");
    }

    #[test]
    fn reserved_names_are_skipped() {
        let mut names = NameAllocator::new();
        names.reserve("jwt");
        assert_eq!(names.allocate("jwt").unwrap(), "jwt0");
    }

    #[test]
    fn exhaustion_is_reported() {
        let mut names = NameAllocator::new();
        names.counters.insert("x".into(), u32::MAX);
        names.issued.insert("x".into());
        let err = names.allocate("x").unwrap_err();
        assert_eq!(err.code(), "AllocationExhausted");
    }

    #[test]
    fn guard_parameters_are_added_on_demand() {
        let schema = Schema::default();
        let config = TranslatorConfig::default();
        let auth = AuthContext::anonymous();
        let mut scope = CompilationScope::new(&schema, &config, &auth);
        assert_eq!(scope.param("param", Value::Int(1)).unwrap(), "$param");
        assert_eq!(scope.param_count(), 1);
        assert_eq!(scope.claim(&["sub".to_owned()]), "$jwt.sub");
        assert_eq!(scope.authenticated_check(), "$isAuthenticated = true");
        let params = scope.into_params();
        assert_eq!(params.get("isAuthenticated"), Some(&Value::Bool(false)));
        assert_eq!(params.get("jwt"), Some(&Value::Map(BTreeMap::new())));
    }
}
