//! Authorization rules attached to entities and the caller's claims context.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::query::filter::FilterTree;
use crate::query::value::Value;

/// Operation kinds a rule can govern.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Reads and nested relationship selections.
    Read,
    /// Aggregate selections and root aggregate queries.
    Aggregate,
    /// Node creation.
    Create,
    /// Attribute updates.
    Update,
    /// Node deletion.
    Delete,
    /// Edge creation between existing nodes.
    Connect,
    /// Edge removal.
    Disconnect,
}

impl Operation {
    /// Lowercase name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Aggregate => "aggregate",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Connect => "connect",
            Operation::Disconnect => "disconnect",
        }
    }
}

/// How a rule is enforced.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Rows failing the predicate are silently dropped after the match.
    Filter,
    /// Aborts with `FORBIDDEN` right after the node is bound.
    ValidateBefore,
    /// Aborts with `FORBIDDEN` after the effect, just before projection.
    ValidateAfter,
}

/// Evaluation phase relative to the operation's effect.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GuardPhase {
    /// Immediately after the bound node is introduced.
    Before,
    /// After the effect, ahead of projection.
    After,
}

impl RuleKind {
    /// Phase the rule is compiled in.
    pub fn phase(self) -> GuardPhase {
        match self {
            RuleKind::ValidateBefore => GuardPhase::Before,
            RuleKind::Filter | RuleKind::ValidateAfter => GuardPhase::After,
        }
    }
}

/// Entity-scoped policy injected into every compile that touches the entity.
#[derive(Clone, Debug, PartialEq)]
pub struct AuthorizationRule {
    /// Operations the rule governs.
    pub operations: Vec<Operation>,
    /// Enforcement kind.
    pub kind: RuleKind,
    /// Caller must be authenticated.
    pub requires_authentication: bool,
    /// Predicate over the node, its relationships and the caller claims.
    pub predicate: Option<FilterTree>,
}

impl AuthorizationRule {
    /// Whether the rule governs `operation`.
    pub fn applies_to(&self, operation: Operation) -> bool {
        self.operations.contains(&operation)
    }
}

/// Claims of the calling principal.
///
/// Missing claims never raise errors: predicates referencing them evaluate
/// to "not satisfied".
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthContext {
    /// Whether the caller presented valid credentials.
    #[serde(default)]
    pub authenticated: bool,
    /// Decoded token claims.
    #[serde(default)]
    pub claims: BTreeMap<String, Value>,
}

impl AuthContext {
    /// Unauthenticated caller without claims.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Authenticated caller with the given claims.
    pub fn with_claims(claims: BTreeMap<String, Value>) -> Self {
        Self {
            authenticated: true,
            claims,
        }
    }
}
