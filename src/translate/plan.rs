//! Selection planning.
//!
//! Resolves caller selection sets against the schema into [`Branch`]es:
//! one per concrete entity the selected node can be. Entity targets have a
//! single branch; interface and union targets have one branch per member.

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use crate::error::{Result, TranslateError};
use crate::query::filter::FilterTree;
use crate::query::request::{FieldSelection, InputObject, SelectionInput, SortInput};
use crate::query::value::Value;
use crate::query::where_input::{resolve_connection_where, resolve_where, WhereOptions};
use crate::schema::{AbstractKind, Attribute, Entity, NodeTarget, Relationship, Schema};

/// Field name of the type discriminator.
pub const TYPENAME: &str = "__typename";

/// Whether a sort key reads the node or the connection edge.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SortSubject {
    /// Related node attribute.
    Node,
    /// Edge property.
    Edge,
}

/// One resolved sort key.
#[derive(Clone, Debug, PartialEq)]
pub struct SortKey<'s> {
    /// Sorted attribute.
    pub attribute: &'s Attribute,
    /// `DESC` instead of `ASC`.
    pub descending: bool,
    /// Node or edge.
    pub subject: SortSubject,
}

/// Projection of one concrete entity.
#[derive(Clone, Debug, PartialEq)]
pub struct Branch<'s> {
    /// Entity the branch matches.
    pub entity: &'s Entity,
    /// Items in requested order.
    pub plan: SelectionPlan<'s>,
}

/// Ordered projection items.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SelectionPlan<'s> {
    /// Items in requested order.
    pub items: Vec<PlanItem<'s>>,
}

impl SelectionPlan<'_> {
    fn has_key(&self, key: &str) -> bool {
        self.items.iter().any(|item| item.key() == key)
    }
}

/// Resolved projection item.
#[derive(Clone, Debug, PartialEq)]
pub enum PlanItem<'s> {
    /// `__typename`.
    Typename {
        /// Output key.
        key: String,
    },
    /// Stored attribute.
    Attribute {
        /// Output key.
        key: String,
        /// Attribute.
        attribute: &'s Attribute,
    },
    /// Computed attribute with its arguments.
    Computed {
        /// Output key.
        key: String,
        /// Attribute.
        attribute: &'s Attribute,
        /// Defaults merged with caller arguments.
        arguments: BTreeMap<String, Value>,
    },
    /// Related nodes.
    Relationship(Box<RelationshipPlan<'s>>),
    /// Relay-style connection.
    Connection(Box<ConnectionPlan<'s>>),
    /// Aggregation over related nodes.
    Aggregation(Box<AggregationPlan<'s>>),
}

impl PlanItem<'_> {
    /// Output key.
    pub fn key(&self) -> &str {
        match self {
            PlanItem::Typename { key } | PlanItem::Attribute { key, .. } | PlanItem::Computed { key, .. } => key,
            PlanItem::Relationship(plan) => &plan.key,
            PlanItem::Connection(plan) => &plan.key,
            PlanItem::Aggregation(plan) => &plan.key,
        }
    }
}

/// Nested relationship selection.
#[derive(Clone, Debug, PartialEq)]
pub struct RelationshipPlan<'s> {
    /// Output key.
    pub key: String,
    /// Traversed relationship.
    pub relationship: &'s Relationship,
    /// Caller filter, resolved against the relationship target.
    pub filter: Option<FilterTree>,
    /// Sort keys.
    pub sort: Vec<SortKey<'s>>,
    /// Effective limit.
    pub limit: Option<i64>,
    /// Offset.
    pub offset: Option<i64>,
    /// One branch per concrete target.
    pub branches: Vec<Branch<'s>>,
}

/// Connection selection.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionPlan<'s> {
    /// Output key.
    pub key: String,
    /// Traversed relationship.
    pub relationship: &'s Relationship,
    /// Connection filter (node and edge conditions).
    pub filter: Option<FilterTree>,
    /// Sort keys over node and edge.
    pub sort: Vec<SortKey<'s>>,
    /// Maximum number of edges.
    pub first: Option<i64>,
    /// Selected connection fields.
    pub items: Vec<ConnectionItem<'s>>,
}

/// Field of a connection.
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionItem<'s> {
    /// Number of matching edges.
    TotalCount {
        /// Output key.
        key: String,
    },
    /// Edge list.
    Edges {
        /// Output key.
        key: String,
        /// Selected edge fields.
        items: Vec<EdgeItem<'s>>,
    },
}

/// Field of a connection edge.
#[derive(Clone, Debug, PartialEq)]
pub enum EdgeItem<'s> {
    /// Related node.
    Node {
        /// Output key.
        key: String,
        /// One branch per concrete target.
        branches: Vec<Branch<'s>>,
    },
    /// Edge properties.
    Properties {
        /// Output key.
        key: String,
        /// `(output key, property)` pairs.
        attributes: Vec<(String, &'s Attribute)>,
    },
}

/// Aggregate function selectable per attribute.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AggregateSelection {
    /// Smallest value.
    Min,
    /// Largest value.
    Max,
    /// Mean value.
    Average,
    /// Sum.
    Sum,
    /// Shortest string.
    Shortest,
    /// Longest string.
    Longest,
}

impl AggregateSelection {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "min" => AggregateSelection::Min,
            "max" => AggregateSelection::Max,
            "average" => AggregateSelection::Average,
            "sum" => AggregateSelection::Sum,
            "shortest" => AggregateSelection::Shortest,
            "longest" => AggregateSelection::Longest,
            _ => return None,
        })
    }

    fn supports(self, attribute: &Attribute) -> bool {
        if attribute.list || attribute.computed.is_some() {
            return false;
        }
        let kind = attribute.kind;
        match self {
            AggregateSelection::Shortest | AggregateSelection::Longest => kind.is_textual(),
            AggregateSelection::Min | AggregateSelection::Max => kind.is_numeric() || kind.is_temporal(),
            AggregateSelection::Average | AggregateSelection::Sum => kind.is_numeric(),
        }
    }
}

/// Aggregates selected for one attribute.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldAggregate<'s> {
    /// Output key.
    pub key: String,
    /// Aggregated attribute.
    pub attribute: &'s Attribute,
    /// `(output key, function)` pairs.
    pub selections: Vec<(String, AggregateSelection)>,
}

/// Item of an aggregation selection.
#[derive(Clone, Debug, PartialEq)]
pub enum AggregateItem<'s> {
    /// Number of matches.
    Count {
        /// Output key.
        key: String,
    },
    /// Attribute aggregate of a root aggregate query.
    Field(FieldAggregate<'s>),
    /// Aggregates over related node attributes.
    Node {
        /// Output key.
        key: String,
        /// Per-attribute aggregates.
        fields: Vec<FieldAggregate<'s>>,
    },
    /// Aggregates over edge properties.
    Edge {
        /// Output key.
        key: String,
        /// Per-property aggregates.
        fields: Vec<FieldAggregate<'s>>,
    },
}

/// Aggregation over related nodes.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregationPlan<'s> {
    /// Output key.
    pub key: String,
    /// Traversed relationship.
    pub relationship: &'s Relationship,
    /// Filter on related nodes.
    pub filter: Option<FilterTree>,
    /// Selected aggregates.
    pub items: Vec<AggregateItem<'s>>,
}

/// Resolves selections against a schema.
pub struct Planner<'s> {
    schema: &'s Schema,
}

impl<'s> Planner<'s> {
    /// Planner over `schema`.
    pub fn new(schema: &'s Schema) -> Self {
        Self { schema }
    }

    /// Plans `items` for every concrete entity of `target`.
    pub fn branches(&self, target: NodeTarget, items: &[SelectionInput]) -> Result<Vec<Branch<'s>>> {
        if let NodeTarget::Abstract(id) = target {
            let abstract_type = self.schema.abstract_type(id);
            for item in items {
                let name = match item {
                    SelectionInput::Field(name) => name.as_str(),
                    SelectionInput::Nested(nested) => nested.field.as_str(),
                    SelectionInput::Fragment(_) => continue,
                };
                let shared = name == TYPENAME
                    || (abstract_type.kind == AbstractKind::Interface && abstract_type.attribute(name).is_some());
                if !shared {
                    return Err(TranslateError::unknown_field(abstract_type.name.clone(), name));
                }
            }
        }
        let members = self.schema.members(target);
        let mut branches = Vec::with_capacity(members.len());
        for id in members {
            let entity = self.schema.entity(id);
            let mut plan = SelectionPlan::default();
            self.plan_into(entity, items, &mut plan)?;
            branches.push(Branch { entity, plan });
        }
        Ok(branches)
    }

    fn plan_into(&self, entity: &'s Entity, items: &[SelectionInput], plan: &mut SelectionPlan<'s>) -> Result<()> {
        for item in items {
            match item {
                SelectionInput::Fragment(fragment) => {
                    if self.schema.lookup(&fragment.on).is_none() {
                        return Err(TranslateError::UnknownType {
                            name: fragment.on.clone(),
                        });
                    }
                    if self.schema.entity_matches_type(entity.id, &fragment.on) {
                        self.plan_into(entity, &fragment.selection, plan)?;
                    }
                }
                SelectionInput::Field(name) => {
                    let nested = FieldSelection {
                        field: name.clone(),
                        ..FieldSelection::default()
                    };
                    self.push_item(entity, &nested, plan)?;
                }
                SelectionInput::Nested(nested) => self.push_item(entity, nested, plan)?,
            }
        }
        Ok(())
    }

    fn push_item(&self, entity: &'s Entity, input: &FieldSelection, plan: &mut SelectionPlan<'s>) -> Result<()> {
        if plan.has_key(input.key()) {
            return Ok(());
        }
        let item = self.field(entity, input)?;
        plan.items.push(item);
        Ok(())
    }

    fn field(&self, entity: &'s Entity, input: &FieldSelection) -> Result<PlanItem<'s>> {
        let key = input.key().to_owned();
        let name = input.field.as_str();
        if name == TYPENAME {
            return Ok(PlanItem::Typename { key });
        }
        if let Some(attribute) = entity.attribute(name) {
            return Ok(match &attribute.computed {
                Some(computed) => {
                    let mut arguments = computed.arguments.clone();
                    for (arg, value) in &input.arguments {
                        if !arguments.contains_key(arg) {
                            return Err(TranslateError::invalid_input(
                                "arguments",
                                format!("{}.{name} has no argument '{arg}'", entity.name),
                            ));
                        }
                        arguments.insert(arg.clone(), Value::from(value));
                    }
                    PlanItem::Computed {
                        key,
                        attribute,
                        arguments,
                    }
                }
                None => PlanItem::Attribute { key, attribute },
            });
        }
        if let Some(rel) = self.schema.relationship_field(entity.id, name) {
            return self.relationship(key, rel, input).map(|p| PlanItem::Relationship(Box::new(p)));
        }
        if let Some(rel) = name
            .strip_suffix("Connection")
            .and_then(|field| self.schema.relationship_field(entity.id, field))
        {
            return self.connection(key, rel, input).map(|p| PlanItem::Connection(Box::new(p)));
        }
        if let Some(rel) = name
            .strip_suffix("Aggregate")
            .and_then(|field| self.schema.relationship_field(entity.id, field))
        {
            return self.aggregation(key, rel, input).map(|p| PlanItem::Aggregation(Box::new(p)));
        }
        Err(TranslateError::unknown_field(entity.name.clone(), name))
    }

    fn relationship(&self, key: String, rel: &'s Relationship, input: &FieldSelection) -> Result<RelationshipPlan<'s>> {
        let filter = self.filter(rel.target, input.filter.as_ref())?;
        let sort = self.sort(rel.target, None, &input.sort)?;
        let limit = non_negative("limit", input.limit)?;
        let limit = self.schema.target_limit(rel.target).effective(limit);
        Ok(RelationshipPlan {
            key,
            relationship: rel,
            filter,
            sort,
            limit,
            offset: non_negative("offset", input.offset)?,
            branches: self.branches(rel.target, &input.selection)?,
        })
    }

    fn connection(&self, key: String, rel: &'s Relationship, input: &FieldSelection) -> Result<ConnectionPlan<'s>> {
        let filter = match &input.filter {
            Some(object) => resolve_connection_where(self.schema, rel, object, WhereOptions::default())?,
            None => None,
        };
        let mut sort = Vec::new();
        for entry in &input.sort {
            for (subject, keys) in entry {
                let keys = keys
                    .as_object()
                    .ok_or_else(|| TranslateError::invalid_input("sort", "expected {node: ...} or {edge: ...}"))?;
                match subject.as_str() {
                    "node" => sort.extend(self.sort(rel.target, None, std::slice::from_ref(keys))?),
                    "edge" => sort.extend(self.sort(rel.target, Some(rel), std::slice::from_ref(keys))?),
                    other => {
                        return Err(TranslateError::invalid_input(
                            "sort",
                            format!("connections sort by node or edge, got '{other}'"),
                        ))
                    }
                }
            }
        }
        let owner = format!("{}Connection", rel.field);
        let mut items = Vec::new();
        for item in &input.selection {
            let nested = as_field(item, &owner)?;
            match nested.field.as_str() {
                "totalCount" => items.push(ConnectionItem::TotalCount {
                    key: nested.key().to_owned(),
                }),
                "edges" => items.push(ConnectionItem::Edges {
                    key: nested.key().to_owned(),
                    items: self.edge_items(rel, &nested.selection)?,
                }),
                other => return Err(TranslateError::unknown_field(owner, other)),
            }
        }
        Ok(ConnectionPlan {
            key,
            relationship: rel,
            filter,
            sort,
            first: non_negative("first", input.first)?,
            items,
        })
    }

    fn edge_items(&self, rel: &'s Relationship, selection: &[SelectionInput]) -> Result<Vec<EdgeItem<'s>>> {
        let owner = format!("{}Connection.edges", rel.field);
        let mut items = Vec::new();
        for item in selection {
            let nested = as_field(item, &owner)?;
            match nested.field.as_str() {
                "node" => items.push(EdgeItem::Node {
                    key: nested.key().to_owned(),
                    branches: self.branches(rel.target, &nested.selection)?,
                }),
                "properties" => {
                    let edge_owner = format!("{}.{}", self.schema.entity(rel.source).name, rel.field);
                    let mut attributes = Vec::new();
                    for property in &nested.selection {
                        let property = as_field(property, &edge_owner)?;
                        let attribute = rel
                            .property(&property.field)
                            .ok_or_else(|| TranslateError::unknown_field(edge_owner.clone(), property.field.clone()))?;
                        attributes.push((property.key().to_owned(), attribute));
                    }
                    items.push(EdgeItem::Properties {
                        key: nested.key().to_owned(),
                        attributes,
                    });
                }
                other => return Err(TranslateError::unknown_field(owner, other)),
            }
        }
        Ok(items)
    }

    fn aggregation(&self, key: String, rel: &'s Relationship, input: &FieldSelection) -> Result<AggregationPlan<'s>> {
        let owner = format!("{}Aggregate", rel.field);
        let mut items = Vec::new();
        for item in &input.selection {
            let nested = as_field(item, &owner)?;
            let item_key = nested.key().to_owned();
            match nested.field.as_str() {
                "count" => items.push(AggregateItem::Count { key: item_key }),
                "node" => {
                    let mut fields = Vec::new();
                    for field in &nested.selection {
                        let field = as_field(field, &owner)?;
                        let attribute = self
                            .schema
                            .target_attribute(rel.target, &field.field)
                            .ok_or_else(|| TranslateError::unknown_field(self.schema.target_name(rel.target), field.field.clone()))?;
                        fields.push(field_aggregate(self.schema.target_name(rel.target), attribute, &field)?);
                    }
                    items.push(AggregateItem::Node { key: item_key, fields });
                }
                "edge" => {
                    let edge_owner = format!("{}.{}", self.schema.entity(rel.source).name, rel.field);
                    let mut fields = Vec::new();
                    for field in &nested.selection {
                        let field = as_field(field, &owner)?;
                        let attribute = rel
                            .property(&field.field)
                            .ok_or_else(|| TranslateError::unknown_field(edge_owner.clone(), field.field.clone()))?;
                        fields.push(field_aggregate(&edge_owner, attribute, &field)?);
                    }
                    items.push(AggregateItem::Edge { key: item_key, fields });
                }
                other => return Err(TranslateError::unknown_field(owner, other)),
            }
        }
        Ok(AggregationPlan {
            key,
            relationship: rel,
            filter: self.filter(rel.target, input.filter.as_ref())?,
            items,
        })
    }

    /// Plans a root aggregate selection: `count` and attribute aggregates.
    pub fn root_aggregate(&self, entity: &'s Entity, selection: &[SelectionInput]) -> Result<Vec<AggregateItem<'s>>> {
        let mut items = Vec::new();
        for item in selection {
            let nested = as_field(item, &entity.name)?;
            if nested.field == "count" {
                items.push(AggregateItem::Count {
                    key: nested.key().to_owned(),
                });
                continue;
            }
            let attribute = entity
                .attribute(&nested.field)
                .ok_or_else(|| TranslateError::unknown_field(entity.name.clone(), nested.field.clone()))?;
            items.push(AggregateItem::Field(field_aggregate(&entity.name, attribute, &nested)?));
        }
        Ok(items)
    }

    /// Resolves an optional `where` object against `target`.
    pub fn filter(&self, target: NodeTarget, input: Option<&InputObject>) -> Result<Option<FilterTree>> {
        match input {
            Some(object) => resolve_where(self.schema, target, object, WhereOptions::default()),
            None => Ok(None),
        }
    }

    /// Resolves sort keys against `target`, or against the edge properties
    /// of `edge` when given.
    pub fn sort(
        &self,
        target: NodeTarget,
        edge: Option<&'s Relationship>,
        input: &[SortInput],
    ) -> Result<Vec<SortKey<'s>>> {
        let mut keys = Vec::new();
        for entry in input {
            for (field, direction) in entry {
                let (owner, attribute, subject) = match edge {
                    Some(rel) => (
                        format!("{}.{}", self.schema.entity(rel.source).name, rel.field),
                        rel.property(field),
                        SortSubject::Edge,
                    ),
                    None => (
                        self.schema.target_name(target).to_owned(),
                        self.schema.target_attribute(target, field),
                        SortSubject::Node,
                    ),
                };
                let attribute = attribute.ok_or_else(|| TranslateError::unknown_field(owner.clone(), field.clone()))?;
                if attribute.computed.is_some() {
                    return Err(TranslateError::NotFilterable {
                        owner,
                        field: field.clone(),
                    });
                }
                let descending = match direction.as_str() {
                    Some("ASC") => false,
                    Some("DESC") => true,
                    _ => {
                        return Err(TranslateError::invalid_input(
                            "sort",
                            format!("direction of '{field}' must be ASC or DESC, got {direction}"),
                        ))
                    }
                };
                keys.push(SortKey {
                    attribute,
                    descending,
                    subject,
                });
            }
        }
        Ok(keys)
    }
}

fn field_aggregate<'s>(owner: &str, attribute: &'s Attribute, input: &FieldSelection) -> Result<FieldAggregate<'s>> {
    let mut selections = Vec::new();
    for item in &input.selection {
        let function = as_field(item, owner)?;
        let selection = AggregateSelection::parse(&function.field)
            .ok_or_else(|| TranslateError::unknown_field(format!("{owner}.{}", attribute.name), function.field.clone()))?;
        if !selection.supports(attribute) {
            return Err(TranslateError::OperatorNotSupported {
                owner: owner.to_owned(),
                field: attribute.name.clone(),
                operator: aggregate_name(selection),
            });
        }
        selections.push((function.key().to_owned(), selection));
    }
    Ok(FieldAggregate {
        key: input.key().to_owned(),
        attribute,
        selections,
    })
}

fn aggregate_name(selection: AggregateSelection) -> &'static str {
    match selection {
        AggregateSelection::Min => "min",
        AggregateSelection::Max => "max",
        AggregateSelection::Average => "average",
        AggregateSelection::Sum => "sum",
        AggregateSelection::Shortest => "shortest",
        AggregateSelection::Longest => "longest",
    }
}

fn as_field(item: &SelectionInput, owner: &str) -> Result<FieldSelection> {
    match item {
        SelectionInput::Field(name) => Ok(FieldSelection {
            field: name.clone(),
            ..FieldSelection::default()
        }),
        SelectionInput::Nested(nested) => Ok(nested.clone()),
        SelectionInput::Fragment(fragment) => Err(TranslateError::invalid_input(
            "selection",
            format!("fragment on '{}' is not allowed inside {owner}", fragment.on),
        )),
    }
}

fn non_negative(context: &'static str, value: Option<i64>) -> Result<Option<i64>> {
    match value {
        Some(v) if v < 0 => Err(TranslateError::invalid_input(context, format!("must not be negative, got {v}"))),
        other => Ok(other),
    }
}

/// Parses a JSON selection list; used by tests and the CLI.
pub fn selection_from_json(value: &JsonValue) -> Result<Vec<SelectionInput>> {
    serde_json::from_value(value.clone()).map_err(|e| TranslateError::invalid_input("selection", e.to_string()))
}
