//! Serializable schema definition (JSON or TOML).
//!
//! ```json
//! {
//!   "entities": [{
//!     "name": "Movie",
//!     "attributes": [{"name": "title", "kind": "String", "nullable": false}],
//!     "relationships": [{"field": "actors", "type": "ACTED_IN",
//!                        "direction": "in", "target": "Actor"}],
//!     "rules": [{"operations": ["update"], "kind": "validate_before",
//!                "where": {"ownerId": "$jwt.sub"}}]
//!   }]
//! }
//! ```

use serde::{Deserialize, Serialize};

use super::auth::{Operation, RuleKind};
use super::model::{Cardinality, Direction, Generated, ScalarKind};

/// Root of a schema definition document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDef {
    /// Concrete node types.
    #[serde(default)]
    pub entities: Vec<EntityDef>,
    /// Interfaces; members are the entities listing them in `implements`.
    #[serde(default)]
    pub interfaces: Vec<InterfaceDef>,
    /// Unions with explicit members.
    #[serde(default)]
    pub unions: Vec<UnionDef>,
}

/// Concrete node type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityDef {
    /// Type name.
    pub name: String,
    /// Storage labels; defaults to `[name]`.
    #[serde(default)]
    pub labels: Option<Vec<String>>,
    /// Attributes in projection order.
    #[serde(default)]
    pub attributes: Vec<AttributeDef>,
    /// Relationship fields.
    #[serde(default)]
    pub relationships: Vec<RelationshipDef>,
    /// Authorization rules.
    #[serde(default)]
    pub rules: Vec<RuleDef>,
    /// Implemented interfaces.
    #[serde(default)]
    pub implements: Vec<String>,
    /// Read limits.
    #[serde(default)]
    pub limit: Option<LimitDef>,
}

/// Attribute of an entity, interface or edge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeDef {
    /// Exposed name.
    pub name: String,
    /// Scalar kind.
    pub kind: ScalarKind,
    /// Storage property when it differs from `name`.
    #[serde(default)]
    pub property: Option<String>,
    /// List of `kind`.
    #[serde(default)]
    pub list: bool,
    /// Whether the attribute may be absent.
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Backed by a uniqueness constraint.
    #[serde(default)]
    pub unique: bool,
    /// Value written on create when omitted.
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    /// Database-generated value.
    #[serde(default)]
    pub generated: Option<Generated>,
    /// Computed definition.
    #[serde(default)]
    pub computed: Option<ComputedDef>,
}

fn default_nullable() -> bool {
    true
}

fn default_column() -> String {
    "this".to_owned()
}

/// Computed attribute definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComputedDef {
    /// Cypher statement run with `this` bound to the node.
    pub statement: String,
    /// Returned column holding the value.
    #[serde(default = "default_column")]
    pub column: String,
    /// Default argument values.
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

/// Relationship field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelationshipDef {
    /// Field name.
    pub field: String,
    /// Cypher relationship type.
    #[serde(rename = "type")]
    pub rel_type: String,
    /// Direction from the owning entity.
    pub direction: Direction,
    /// Entity, interface or union name.
    pub target: String,
    /// One or many.
    #[serde(default)]
    pub cardinality: Cardinality,
    /// Exactly one related node must exist (`one` only).
    #[serde(default)]
    pub required: bool,
    /// Edge properties.
    #[serde(default)]
    pub properties: Vec<AttributeDef>,
    /// At most one edge per node pair.
    #[serde(default)]
    pub unique_pairs: bool,
}

/// Authorization rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleDef {
    /// Governed operations.
    pub operations: Vec<Operation>,
    /// Enforcement kind.
    pub kind: RuleKind,
    /// Caller must be authenticated.
    #[serde(default)]
    pub requires_authentication: bool,
    /// Where-input predicate; `"$jwt.<path>"` strings reference claims.
    #[serde(default, rename = "where")]
    pub predicate: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Interface with shared attributes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceDef {
    /// Type name.
    pub name: String,
    /// Attributes every member must declare.
    #[serde(default)]
    pub attributes: Vec<AttributeDef>,
}

/// Union of entities.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UnionDef {
    /// Type name.
    pub name: String,
    /// Member entity names.
    pub members: Vec<String>,
}

/// Default/maximum read limits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitDef {
    /// Limit applied when the request has none.
    #[serde(default)]
    pub default: Option<i64>,
    /// Upper bound for explicit limits.
    #[serde(default)]
    pub max: Option<i64>,
}
