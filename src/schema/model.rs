//! Resolved schema objects stored in the [`Schema`](super::Schema) arena.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::auth::AuthorizationRule;
use crate::query::value::Value;
use crate::types::{AbstractId, EntityId, RelationshipId};

/// Scalar kind of an attribute.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    /// UTF-8 string.
    String,
    /// Opaque identifier; accepts strings and integers.
    #[serde(rename = "ID")]
    Id,
    /// 64-bit integer.
    Int,
    /// 64-bit float.
    Float,
    /// Boolean flag.
    Boolean,
    /// Zoned date-time.
    DateTime,
    /// Calendar date.
    Date,
    /// Date-time without zone.
    LocalDateTime,
    /// Zoned time of day.
    Time,
    /// Time of day without zone.
    LocalTime,
    /// ISO-8601 duration.
    Duration,
    /// WGS-84 point.
    Point,
    /// Cartesian point.
    CartesianPoint,
}

impl ScalarKind {
    /// Display name used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::String => "String",
            ScalarKind::Id => "ID",
            ScalarKind::Int => "Int",
            ScalarKind::Float => "Float",
            ScalarKind::Boolean => "Boolean",
            ScalarKind::DateTime => "DateTime",
            ScalarKind::Date => "Date",
            ScalarKind::LocalDateTime => "LocalDateTime",
            ScalarKind::Time => "Time",
            ScalarKind::LocalTime => "LocalTime",
            ScalarKind::Duration => "Duration",
            ScalarKind::Point => "Point",
            ScalarKind::CartesianPoint => "CartesianPoint",
        }
    }

    /// Cypher function that turns a string parameter into this kind.
    pub fn temporal_constructor(self) -> Option<&'static str> {
        match self {
            ScalarKind::DateTime => Some("datetime"),
            ScalarKind::Date => Some("date"),
            ScalarKind::LocalDateTime => Some("localdatetime"),
            ScalarKind::Time => Some("time"),
            ScalarKind::LocalTime => Some("localtime"),
            ScalarKind::Duration => Some("duration"),
            _ => None,
        }
    }

    /// `true` for the date/time kinds.
    pub fn is_temporal(self) -> bool {
        self.temporal_constructor().is_some()
    }

    /// `true` for points.
    pub fn is_spatial(self) -> bool {
        matches!(self, ScalarKind::Point | ScalarKind::CartesianPoint)
    }

    /// `true` for integers and floats.
    pub fn is_numeric(self) -> bool {
        matches!(self, ScalarKind::Int | ScalarKind::Float)
    }

    /// `true` for kinds that support substring operators.
    pub fn is_textual(self) -> bool {
        matches!(self, ScalarKind::String | ScalarKind::Id)
    }
}

/// Value the compiler fills in on write.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Generated {
    /// `randomUUID()` on create.
    Id,
    /// `datetime()` on create.
    CreatedAt,
    /// `datetime()` on update.
    UpdatedAt,
    /// `datetime()` on create and update.
    Timestamp,
}

impl Generated {
    /// Whether the value is written by create operations.
    pub fn on_create(self) -> bool {
        !matches!(self, Generated::UpdatedAt)
    }

    /// Whether the value is written by update operations.
    pub fn on_update(self) -> bool {
        matches!(self, Generated::UpdatedAt | Generated::Timestamp)
    }

    /// Cypher expression producing the value.
    pub fn expression(self) -> &'static str {
        match self {
            Generated::Id => "randomUUID()",
            _ => "datetime()",
        }
    }
}

/// Attribute backed by a Cypher statement instead of a stored property.
///
/// The statement runs with `this` bound to the owning node; `$name`
/// references in the statement are replaced by parameters built from the
/// selection arguments, falling back to `arguments` defaults.
#[derive(Clone, Debug, PartialEq)]
pub struct ComputedField {
    /// Cypher fragment ending in a `RETURN`.
    pub statement: String,
    /// Column of the statement's `RETURN` that holds the value.
    pub column: String,
    /// Default argument values.
    pub arguments: BTreeMap<String, Value>,
}

/// Typed attribute of an entity, interface or relationship edge.
#[derive(Clone, Debug, PartialEq)]
pub struct Attribute {
    /// Name exposed to callers.
    pub name: String,
    /// Storage property name.
    pub property: String,
    /// Scalar kind.
    pub kind: ScalarKind,
    /// List of `kind` values.
    pub list: bool,
    /// Whether the attribute may be absent.
    pub nullable: bool,
    /// Backed by a uniqueness constraint.
    pub unique: bool,
    /// Value written on create when the payload omits the attribute.
    pub default: Option<Value>,
    /// Value generated by the database on write.
    pub generated: Option<Generated>,
    /// Computed definition replacing property access.
    pub computed: Option<ComputedField>,
}

impl Attribute {
    /// Nullable, stored attribute whose property matches its name.
    pub fn new(name: impl Into<String>, kind: ScalarKind) -> Self {
        let name = name.into();
        Self {
            property: name.clone(),
            name,
            kind,
            list: false,
            nullable: true,
            unique: false,
            default: None,
            generated: None,
            computed: None,
        }
    }

    /// Attributes the compiler may write from caller payloads.
    pub fn is_writable(&self) -> bool {
        self.computed.is_none() && self.generated.is_none()
    }

    /// Whether a create payload must supply this attribute.
    pub fn is_required_on_create(&self) -> bool {
        !self.nullable && self.default.is_none() && self.is_writable()
    }
}

/// Traversal direction relative to the owning entity.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// `(source)-[:T]->(target)`
    Out,
    /// `(source)<-[:T]-(target)`
    In,
}

/// How many related nodes a relationship field holds.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    /// Single related node.
    One,
    /// List of related nodes.
    #[default]
    Many,
}

/// Target of a relationship or a root request.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum NodeTarget {
    /// Concrete entity.
    Entity(EntityId),
    /// Interface or union.
    Abstract(AbstractId),
}

/// Directed, typed edge field declared on an entity.
#[derive(Clone, Debug, PartialEq)]
pub struct Relationship {
    /// Arena id.
    pub id: RelationshipId,
    /// Field name on the source entity.
    pub field: String,
    /// Cypher relationship type.
    pub rel_type: String,
    /// Direction seen from the source.
    pub direction: Direction,
    /// Owning entity.
    pub source: EntityId,
    /// Related node type.
    pub target: NodeTarget,
    /// One or many.
    pub cardinality: Cardinality,
    /// For `One` relationships: exactly one related node must exist.
    pub required: bool,
    /// Edge properties.
    pub properties: Vec<Attribute>,
    /// At most one edge between a given pair of nodes.
    pub unique_pairs: bool,
}

impl Relationship {
    /// Edge property by exposed name.
    pub fn property(&self, name: &str) -> Option<&Attribute> {
        self.properties.iter().find(|attr| attr.name == name)
    }

    /// Whether connecting the same pair twice must not add a second edge.
    pub fn connects_idempotently(&self) -> bool {
        self.unique_pairs || self.cardinality == Cardinality::One
    }
}

/// Default and maximum `limit` applied to reads of an entity.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryLimit {
    /// Limit used when the request gives none.
    pub default: Option<i64>,
    /// Upper bound for explicit limits.
    pub max: Option<i64>,
}

impl QueryLimit {
    /// Applies the default and clamps to the maximum.
    pub fn effective(&self, requested: Option<i64>) -> Option<i64> {
        let limit = requested.or(self.default)?;
        Some(match self.max {
            Some(max) => limit.min(max),
            None => limit,
        })
    }

    /// The smaller of each bound; an absent bound never wins.
    pub fn tighten(self, other: QueryLimit) -> QueryLimit {
        let min = |a: Option<i64>, b: Option<i64>| match (a, b) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        QueryLimit {
            default: min(self.default, other.default),
            max: min(self.max, other.max),
        }
    }
}

/// Node kind.
#[derive(Clone, Debug, PartialEq)]
pub struct Entity {
    /// Arena id.
    pub id: EntityId,
    /// Type name.
    pub name: String,
    /// Storage labels, never empty.
    pub labels: SmallVec<[String; 2]>,
    /// Attributes in declaration order.
    pub attributes: Vec<Attribute>,
    /// Relationship fields in declaration order.
    pub relationships: Vec<RelationshipId>,
    /// Authorization rules.
    pub rules: Vec<AuthorizationRule>,
    /// Implemented interfaces.
    pub interfaces: Vec<AbstractId>,
    /// Read limits.
    pub limit: QueryLimit,
}

impl Entity {
    /// Attribute by exposed name.
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|attr| attr.name == name)
    }
}

/// Interface or union.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbstractKind {
    /// Members share the declared attributes.
    Interface,
    /// Members share nothing.
    Union,
}

/// Abstract type resolving to a set of concrete entities.
#[derive(Clone, Debug, PartialEq)]
pub struct AbstractType {
    /// Arena id.
    pub id: AbstractId,
    /// Type name.
    pub name: String,
    /// Interface or union.
    pub kind: AbstractKind,
    /// Concrete members in declaration order.
    pub members: Vec<EntityId>,
    /// Shared attributes (interfaces only).
    pub attributes: Vec<Attribute>,
}

impl AbstractType {
    /// Shared attribute by exposed name.
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|attr| attr.name == name)
    }
}
