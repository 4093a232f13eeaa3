#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

/// Result alias for compile calls.
pub type Result<T> = std::result::Result<T, TranslateError>;

/// Coarse taxonomy of compile-time failures.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request references something the schema does not permit.
    SchemaMismatch,
    /// Naming or scope corruption. Always a defect in the translator.
    Internal,
}

/// Errors returned by a compile call.
///
/// Authorization and cardinality failures are not listed here: they are
/// embedded into the compiled query and surface at execution time (see
/// [`ExecutionFailure`]).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TranslateError {
    /// Requested type is neither an entity nor an interface/union.
    #[error("unknown type '{name}'")]
    UnknownType { name: String },
    /// Field is not an attribute or relationship of the owner.
    #[error("'{owner}' has no field '{field}'")]
    UnknownField { owner: String, field: String },
    /// Where-input key could not be split into a field and operator.
    #[error("'{owner}' has no filter '{key}'")]
    UnknownOperator { owner: String, key: String },
    /// Operator exists but is not valid for the attribute's kind.
    #[error("operator {operator} is not supported on {owner}.{field}")]
    OperatorNotSupported {
        owner: String,
        field: String,
        operator: &'static str,
    },
    /// Literal does not match the attribute's kind.
    #[error("{owner}.{field} expects {expected}, got {found}")]
    ValueTypeMismatch {
        owner: String,
        field: String,
        expected: &'static str,
        found: &'static str,
    },
    /// Temporal literal failed to parse.
    #[error("{owner}.{field}: '{value}' is not a valid temporal literal")]
    InvalidTemporal {
        owner: String,
        field: String,
        value: String,
    },
    /// Claims operands are reserved for authorization rules.
    #[error("claims references are not allowed in caller filters on '{owner}'")]
    ClaimsNotAllowed { owner: String },
    /// Computed attributes cannot be filtered or sorted on.
    #[error("{owner}.{field} is computed and cannot be used in filters or sorting")]
    NotFilterable { owner: String, field: String },
    /// Computed and generated attributes cannot be assigned.
    #[error("{owner}.{field} is read-only")]
    ReadOnlyField { owner: String, field: String },
    /// Create payload omitted a non-nullable attribute without default.
    #[error("{owner}.{field} is required")]
    MissingAttribute { owner: String, field: String },
    /// connectOrCreate must be keyed by unique attributes.
    #[error("{owner}.{field} is not unique and cannot key connectOrCreate")]
    NotUniqueKey { owner: String, field: String },
    /// Request tree has a malformed shape.
    #[error("invalid {context}: {message}")]
    InvalidInput {
        context: &'static str,
        message: String,
    },
    /// Filter nesting exceeds the configured depth.
    #[error("filter exceeds depth {max} (got {depth})")]
    FilterTooDeep { depth: usize, max: usize },
    /// Filter has more nodes than allowed.
    #[error("filter exceeds {max} nodes (got {nodes})")]
    FilterTooLarge { nodes: usize, max: usize },
    /// Name counter overflowed for a prefix.
    #[error("identifier space exhausted for prefix '{prefix}'")]
    AllocationExhausted { prefix: String },
    /// Compiler invariant was violated.
    #[error("internal error: {0}")]
    Internal(&'static str),
}

impl TranslateError {
    /// Builds an [`TranslateError::UnknownField`].
    pub fn unknown_field(owner: impl Into<String>, field: impl Into<String>) -> Self {
        TranslateError::UnknownField {
            owner: owner.into(),
            field: field.into(),
        }
    }

    /// Builds an [`TranslateError::InvalidInput`] for a specific context.
    pub fn invalid_input(context: &'static str, message: impl Into<String>) -> Self {
        TranslateError::InvalidInput {
            context,
            message: message.into(),
        }
    }

    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TranslateError::AllocationExhausted { .. } | TranslateError::Internal(_) => {
                ErrorKind::Internal
            }
            _ => ErrorKind::SchemaMismatch,
        }
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            TranslateError::UnknownType { .. } => "UnknownType",
            TranslateError::UnknownField { .. } => "UnknownField",
            TranslateError::UnknownOperator { .. } => "UnknownOperator",
            TranslateError::OperatorNotSupported { .. } => "OperatorNotSupported",
            TranslateError::ValueTypeMismatch { .. } => "TypeMismatch",
            TranslateError::InvalidTemporal { .. } => "TypeMismatch",
            TranslateError::ClaimsNotAllowed { .. } => "ClaimsNotAllowed",
            TranslateError::NotFilterable { .. } => "NotFilterable",
            TranslateError::ReadOnlyField { .. } => "ReadOnlyField",
            TranslateError::MissingAttribute { .. } => "MissingAttribute",
            TranslateError::NotUniqueKey { .. } => "NotUniqueKey",
            TranslateError::InvalidInput { .. } => "InvalidInput",
            TranslateError::FilterTooDeep { .. } => "FilterTooDeep",
            TranslateError::FilterTooLarge { .. } => "FilterTooLarge",
            TranslateError::AllocationExhausted { .. } => "AllocationExhausted",
            TranslateError::Internal(_) => "Internal",
        }
    }
}

/// Formats a translate error together with its code.
pub struct TranslateErrorWithCode<'a>(pub &'a TranslateError);

impl fmt::Display for TranslateErrorWithCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.0.code(), self.0)
    }
}

/// Execution-time failures raised by validations embedded in a compiled query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutionFailure {
    /// An authorization guard evaluated false.
    Forbidden,
    /// A relationship cardinality check failed after a write.
    CardinalityViolation {
        /// Which relationship was violated, e.g. `Movie.director required exactly once`.
        detail: String,
    },
}

impl ExecutionFailure {
    /// Maps a database error message back onto the failure taxonomy.
    ///
    /// `namespace` is the configured error namespace (default `@gqlcypher`).
    /// Returns `None` for messages that did not originate from an embedded
    /// validation.
    pub fn classify(namespace: &str, message: &str) -> Option<Self> {
        let start = message.find(namespace)?;
        let rest = message[start + namespace.len()..].strip_prefix('/')?;
        if rest.starts_with(crate::config::FORBIDDEN_CODE) {
            return Some(ExecutionFailure::Forbidden);
        }
        let detail = rest.strip_prefix(crate::config::CARDINALITY_CODE)?;
        let detail = detail.trim_start_matches(':').trim();
        Some(ExecutionFailure::CardinalityViolation {
            detail: detail.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_split_internal_from_schema_errors() {
        let err = TranslateError::AllocationExhausted {
            prefix: "this".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.code(), "AllocationExhausted");
        let err = TranslateError::unknown_field("Movie", "budget");
        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
        assert_eq!(
            TranslateErrorWithCode(&err).to_string(),
            "[UnknownField] 'Movie' has no field 'budget'"
        );
    }

    #[test]
    fn classifies_embedded_failures() {
        let forbidden = "Failed to invoke procedure: @gqlcypher/FORBIDDEN";
        assert_eq!(
            ExecutionFailure::classify("@gqlcypher", forbidden),
            Some(ExecutionFailure::Forbidden)
        );
        let violation =
            "Failed: @gqlcypher/CARDINALITY_VIOLATION: Movie.director required exactly once";
        assert_eq!(
            ExecutionFailure::classify("@gqlcypher", violation),
            Some(ExecutionFailure::CardinalityViolation {
                detail: "Movie.director required exactly once".into()
            })
        );
        assert_eq!(ExecutionFailure::classify("@gqlcypher", "syntax error"), None);
        assert_eq!(
            ExecutionFailure::classify("@other", forbidden),
            None,
            "namespace must match"
        );
    }
}
