#![forbid(unsafe_code)]

//! Immutable schema model.
//!
//! Entities, relationships and abstract types live in flat arenas addressed
//! by [`EntityId`], [`RelationshipId`] and [`AbstractId`]. A [`Schema`] is
//! built once from a [`SchemaDef`] and shared behind an `Arc` by every
//! compilation.

pub mod auth;
pub mod def;
pub mod model;

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use thiserror::Error;
use tracing::debug;

pub use auth::{AuthContext, AuthorizationRule, GuardPhase, Operation, RuleKind};
pub use def::SchemaDef;
pub use model::{
    AbstractKind, AbstractType, Attribute, Cardinality, ComputedField, Direction, Entity,
    Generated, NodeTarget, QueryLimit, Relationship, ScalarKind,
};

use crate::error::TranslateError;
use crate::query::value::Value;
use crate::query::where_input::{self, WhereOptions};
use crate::types::{AbstractId, EntityId, RelationshipId};

/// Invalid schema definitions.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Two types share a name.
    #[error("type '{name}' is defined more than once")]
    DuplicateType { name: String },
    /// Two fields of one type share an exposed name or storage property.
    #[error("'{owner}' declares '{field}' more than once")]
    DuplicateField { owner: String, field: String },
    /// Entity declared an empty label list.
    #[error("entity '{entity}' must have at least one label")]
    EmptyLabels { entity: String },
    /// Relationship target does not exist.
    #[error("{entity}.{field} targets unknown type '{target}'")]
    UnknownTarget {
        entity: String,
        field: String,
        target: String,
    },
    /// Entity implements an undefined interface.
    #[error("entity '{entity}' implements unknown interface '{interface}'")]
    UnknownInterface { entity: String, interface: String },
    /// Union lists something that is not an entity.
    #[error("union '{union}' lists unknown entity '{member}'")]
    UnknownMember { union: String, member: String },
    /// Member is missing an attribute its interface declares.
    #[error("entity '{entity}' must declare '{attribute}' from interface '{interface}'")]
    InterfaceAttributeMissing {
        entity: String,
        interface: String,
        attribute: String,
    },
    /// Relationship flags are contradictory.
    #[error("{entity}.{field}: {message}")]
    InvalidRelationship {
        entity: String,
        field: String,
        message: &'static str,
    },
    /// Rule kind cannot govern the operation.
    #[error("entity '{entity}': {kind:?} rules cannot govern {operation:?}")]
    RulePhase {
        entity: String,
        operation: Operation,
        kind: RuleKind,
    },
    /// Rule predicate failed to resolve.
    #[error("entity '{entity}' rule predicate: {source}")]
    InvalidPredicate {
        entity: String,
        source: TranslateError,
    },
    /// Limit values are negative or inverted.
    #[error("entity '{entity}' has invalid limits")]
    InvalidLimit { entity: String },
    /// Computed statement does not return its declared column.
    #[error("{owner}.{field}: computed statement must RETURN column '{column}'")]
    ComputedColumn {
        owner: String,
        field: String,
        column: String,
    },
    /// JSON definition failed to parse.
    #[error("invalid schema JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// TOML definition failed to parse.
    #[error("invalid schema TOML: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Named type resolution result.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TypeRef {
    /// Concrete entity.
    Entity(EntityId),
    /// Interface or union.
    Abstract(AbstractId),
}

/// Resolved schema arena.
#[derive(Debug, Default)]
pub struct Schema {
    entities: Vec<Entity>,
    relationships: Vec<Relationship>,
    abstracts: Vec<AbstractType>,
    names: FxHashMap<String, TypeRef>,
}

impl Schema {
    /// Parses and validates a JSON definition.
    pub fn from_json_str(json: &str) -> Result<Self, SchemaError> {
        let def: SchemaDef = serde_json::from_str(json)?;
        Self::from_def(&def)
    }

    /// Parses and validates a TOML definition.
    pub fn from_toml_str(contents: &str) -> Result<Self, SchemaError> {
        let def: SchemaDef = toml::from_str(contents)?;
        Self::from_def(&def)
    }

    /// Validates a definition and resolves every name into arena ids.
    pub fn from_def(def: &SchemaDef) -> Result<Self, SchemaError> {
        let mut schema = Schema::default();
        schema.register_names(def)?;
        for (index, entity_def) in def.entities.iter().enumerate() {
            let entity = build_entity(EntityId(index as u32), entity_def)?;
            schema.entities.push(entity);
        }
        schema.build_abstracts(def)?;
        schema.build_relationships(def)?;
        schema.build_rules(def)?;
        debug!(
            entities = schema.entities.len(),
            relationships = schema.relationships.len(),
            abstracts = schema.abstracts.len(),
            "schema.build"
        );
        Ok(schema)
    }

    fn register_names(&mut self, def: &SchemaDef) -> Result<(), SchemaError> {
        let entities = def
            .entities
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name.as_str(), TypeRef::Entity(EntityId(i as u32))));
        let abstracts = def
            .interfaces
            .iter()
            .map(|i| i.name.as_str())
            .chain(def.unions.iter().map(|u| u.name.as_str()))
            .enumerate()
            .map(|(i, name)| (name, TypeRef::Abstract(AbstractId(i as u32))));
        for (name, type_ref) in entities.chain(abstracts) {
            if self.names.insert(name.to_owned(), type_ref).is_some() {
                return Err(SchemaError::DuplicateType {
                    name: name.to_owned(),
                });
            }
        }
        Ok(())
    }

    fn build_abstracts(&mut self, def: &SchemaDef) -> Result<(), SchemaError> {
        for (index, iface) in def.interfaces.iter().enumerate() {
            let id = AbstractId(index as u32);
            let attributes = build_attributes(&iface.name, &iface.attributes)?;
            self.abstracts.push(AbstractType {
                id,
                name: iface.name.clone(),
                kind: AbstractKind::Interface,
                members: Vec::new(),
                attributes,
            });
        }
        for (index, entity_def) in def.entities.iter().enumerate() {
            for iface in &entity_def.implements {
                let abstract_id = match self.names.get(iface) {
                    Some(TypeRef::Abstract(id)) if id.index() < def.interfaces.len() => *id,
                    _ => {
                        return Err(SchemaError::UnknownInterface {
                            entity: entity_def.name.clone(),
                            interface: iface.clone(),
                        })
                    }
                };
                let entity = &mut self.entities[index];
                let abstract_type = &mut self.abstracts[abstract_id.index()];
                for shared in &abstract_type.attributes {
                    if entity.attribute(&shared.name).is_none() {
                        return Err(SchemaError::InterfaceAttributeMissing {
                            entity: entity.name.clone(),
                            interface: abstract_type.name.clone(),
                            attribute: shared.name.clone(),
                        });
                    }
                }
                abstract_type.members.push(entity.id);
                entity.interfaces.push(abstract_id);
            }
        }
        let offset = def.interfaces.len();
        for (index, union) in def.unions.iter().enumerate() {
            let mut members = Vec::with_capacity(union.members.len());
            for member in &union.members {
                match self.names.get(member) {
                    Some(TypeRef::Entity(id)) => members.push(*id),
                    _ => {
                        return Err(SchemaError::UnknownMember {
                            union: union.name.clone(),
                            member: member.clone(),
                        })
                    }
                }
            }
            self.abstracts.push(AbstractType {
                id: AbstractId((offset + index) as u32),
                name: union.name.clone(),
                kind: AbstractKind::Union,
                members,
                attributes: Vec::new(),
            });
        }
        Ok(())
    }

    fn build_relationships(&mut self, def: &SchemaDef) -> Result<(), SchemaError> {
        for (index, entity_def) in def.entities.iter().enumerate() {
            let source = EntityId(index as u32);
            for rel in &entity_def.relationships {
                let target = match self.names.get(&rel.target) {
                    Some(TypeRef::Entity(id)) => NodeTarget::Entity(*id),
                    Some(TypeRef::Abstract(id)) => NodeTarget::Abstract(*id),
                    None => {
                        return Err(SchemaError::UnknownTarget {
                            entity: entity_def.name.clone(),
                            field: rel.field.clone(),
                            target: rel.target.clone(),
                        })
                    }
                };
                if rel.required && rel.cardinality == Cardinality::Many {
                    return Err(SchemaError::InvalidRelationship {
                        entity: entity_def.name.clone(),
                        field: rel.field.clone(),
                        message: "only one-cardinality relationships can be required",
                    });
                }
                let entity = &self.entities[index];
                let clashes_attribute = entity.attribute(&rel.field).is_some();
                let clashes_relationship = entity
                    .relationships
                    .iter()
                    .any(|id| self.relationships[id.index()].field == rel.field);
                if clashes_attribute || clashes_relationship {
                    return Err(SchemaError::DuplicateField {
                        owner: entity_def.name.clone(),
                        field: rel.field.clone(),
                    });
                }
                let owner = format!("{}.{}", entity_def.name, rel.field);
                let properties = build_attributes(&owner, &rel.properties)?;
                let id = RelationshipId(self.relationships.len() as u32);
                self.relationships.push(Relationship {
                    id,
                    field: rel.field.clone(),
                    rel_type: rel.rel_type.clone(),
                    direction: rel.direction,
                    source,
                    target,
                    cardinality: rel.cardinality,
                    required: rel.required,
                    properties,
                    unique_pairs: rel.unique_pairs,
                });
                self.entities[index].relationships.push(id);
            }
        }
        Ok(())
    }

    fn build_rules(&mut self, def: &SchemaDef) -> Result<(), SchemaError> {
        let mut resolved = Vec::with_capacity(def.entities.len());
        for (index, entity_def) in def.entities.iter().enumerate() {
            let id = EntityId(index as u32);
            let mut rules = Vec::with_capacity(entity_def.rules.len());
            for rule in &entity_def.rules {
                for operation in &rule.operations {
                    let invalid = matches!(
                        (rule.kind, operation),
                        (RuleKind::ValidateAfter, Operation::Delete)
                            | (RuleKind::Filter, Operation::Create)
                    );
                    if invalid {
                        return Err(SchemaError::RulePhase {
                            entity: entity_def.name.clone(),
                            operation: *operation,
                            kind: rule.kind,
                        });
                    }
                }
                let predicate = match &rule.predicate {
                    Some(input) => where_input::resolve_where(
                        self,
                        NodeTarget::Entity(id),
                        input,
                        WhereOptions { allow_claims: true },
                    )
                    .map_err(|source| SchemaError::InvalidPredicate {
                        entity: entity_def.name.clone(),
                        source,
                    })?,
                    None => None,
                };
                rules.push(AuthorizationRule {
                    operations: rule.operations.clone(),
                    kind: rule.kind,
                    requires_authentication: rule.requires_authentication,
                    predicate,
                });
            }
            resolved.push(rules);
        }
        for (entity, rules) in self.entities.iter_mut().zip(resolved) {
            entity.rules = rules;
        }
        Ok(())
    }

    /// Entity by id.
    ///
    /// # Panics
    /// Ids are only minted by this schema, so an out-of-range id is a bug.
    pub fn entity(&self, id: EntityId) -> &Entity {
        &self.entities[id.index()]
    }

    /// Relationship by id.
    pub fn relationship(&self, id: RelationshipId) -> &Relationship {
        &self.relationships[id.index()]
    }

    /// Interface or union by id.
    pub fn abstract_type(&self, id: AbstractId) -> &AbstractType {
        &self.abstracts[id.index()]
    }

    /// All entities in declaration order.
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Resolves a type name.
    pub fn lookup(&self, name: &str) -> Option<TypeRef> {
        self.names.get(name).copied()
    }

    /// Resolves a type name into a node target, failing on unknown names.
    pub fn node_target(&self, name: &str) -> Result<NodeTarget, TranslateError> {
        match self.lookup(name) {
            Some(TypeRef::Entity(id)) => Ok(NodeTarget::Entity(id)),
            Some(TypeRef::Abstract(id)) => Ok(NodeTarget::Abstract(id)),
            None => Err(TranslateError::UnknownType {
                name: name.to_owned(),
            }),
        }
    }

    /// Entity by name.
    pub fn entity_by_name(&self, name: &str) -> Option<&Entity> {
        match self.lookup(name)? {
            TypeRef::Entity(id) => Some(self.entity(id)),
            TypeRef::Abstract(_) => None,
        }
    }

    /// Relationship field declared on an entity.
    pub fn relationship_field(&self, entity: EntityId, field: &str) -> Option<&Relationship> {
        self.entity(entity)
            .relationships
            .iter()
            .map(|id| self.relationship(*id))
            .find(|rel| rel.field == field)
    }

    /// Type name of a node target.
    pub fn target_name(&self, target: NodeTarget) -> &str {
        match target {
            NodeTarget::Entity(id) => &self.entity(id).name,
            NodeTarget::Abstract(id) => &self.abstract_type(id).name,
        }
    }

    /// Concrete entities a target resolves to.
    pub fn members(&self, target: NodeTarget) -> SmallVec<[EntityId; 4]> {
        match target {
            NodeTarget::Entity(id) => SmallVec::from_slice(&[id]),
            NodeTarget::Abstract(id) => SmallVec::from_slice(&self.abstract_type(id).members),
        }
    }

    /// Read limits of a target. Abstract targets take the tightest default
    /// and maximum among their members.
    pub fn target_limit(&self, target: NodeTarget) -> QueryLimit {
        self.members(target)
            .iter()
            .map(|id| self.entity(*id).limit)
            .fold(QueryLimit::default(), QueryLimit::tighten)
    }

    /// Attribute visible on a target: entity attributes or shared interface
    /// attributes.
    pub fn target_attribute(&self, target: NodeTarget, name: &str) -> Option<&Attribute> {
        match target {
            NodeTarget::Entity(id) => self.entity(id).attribute(name),
            NodeTarget::Abstract(id) => self.abstract_type(id).attribute(name),
        }
    }

    /// Whether `entity` is `name` or implements/belongs to `name`.
    pub fn entity_matches_type(&self, entity: EntityId, name: &str) -> bool {
        match self.lookup(name) {
            Some(TypeRef::Entity(id)) => id == entity,
            Some(TypeRef::Abstract(id)) => self.abstract_type(id).members.contains(&entity),
            None => false,
        }
    }
}

fn build_entity(id: EntityId, def: &def::EntityDef) -> Result<Entity, SchemaError> {
    let labels: SmallVec<[String; 2]> = match &def.labels {
        Some(labels) if labels.is_empty() => {
            return Err(SchemaError::EmptyLabels {
                entity: def.name.clone(),
            })
        }
        Some(labels) => labels.iter().cloned().collect(),
        None => SmallVec::from_elem(def.name.clone(), 1),
    };
    let limit = match def.limit {
        Some(limit) => {
            let negative = limit.default.is_some_and(|v| v < 0) || limit.max.is_some_and(|v| v < 0);
            let inverted = matches!((limit.default, limit.max), (Some(d), Some(m)) if d > m);
            if negative || inverted {
                return Err(SchemaError::InvalidLimit {
                    entity: def.name.clone(),
                });
            }
            QueryLimit {
                default: limit.default,
                max: limit.max,
            }
        }
        None => QueryLimit::default(),
    };
    Ok(Entity {
        id,
        name: def.name.clone(),
        labels,
        attributes: build_attributes(&def.name, &def.attributes)?,
        relationships: Vec::new(),
        rules: Vec::new(),
        interfaces: Vec::new(),
        limit,
    })
}

fn build_attributes(owner: &str, defs: &[def::AttributeDef]) -> Result<Vec<Attribute>, SchemaError> {
    let mut attributes: Vec<Attribute> = Vec::with_capacity(defs.len());
    for def in defs {
        let property = def.property.clone().unwrap_or_else(|| def.name.clone());
        let duplicate = attributes
            .iter()
            .any(|a| a.name == def.name || (a.computed.is_none() && a.property == property));
        if duplicate {
            return Err(SchemaError::DuplicateField {
                owner: owner.to_owned(),
                field: def.name.clone(),
            });
        }
        let computed = match &def.computed {
            Some(computed) => {
                if !returns_column(&computed.statement, &computed.column) {
                    return Err(SchemaError::ComputedColumn {
                        owner: owner.to_owned(),
                        field: def.name.clone(),
                        column: computed.column.clone(),
                    });
                }
                Some(ComputedField {
                    statement: computed.statement.trim().to_owned(),
                    column: computed.column.clone(),
                    arguments: computed
                        .arguments
                        .iter()
                        .map(|(k, v)| (k.clone(), Value::from(v)))
                        .collect::<BTreeMap<_, _>>(),
                })
            }
            None => None,
        };
        attributes.push(Attribute {
            name: def.name.clone(),
            property,
            kind: def.kind,
            list: def.list,
            nullable: def.nullable,
            unique: def.unique,
            default: def.default.as_ref().map(Value::from),
            generated: def.generated,
            computed,
        });
    }
    Ok(attributes)
}

fn returns_column(statement: &str, column: &str) -> bool {
    let upper = statement.to_ascii_uppercase();
    let Some(pos) = upper.rfind("RETURN") else {
        return false;
    };
    statement[pos + "RETURN".len()..]
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .any(|token| token == column)
}
