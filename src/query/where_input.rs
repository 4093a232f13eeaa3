//! Resolution of JSON `where` inputs into [`FilterTree`]s.
//!
//! Keys follow the GraphQL input conventions: `title`, `title_CONTAINS`,
//! `actors_SOME`, `actors: null`, `actorsConnection_ALL`, `actorsAggregate`,
//! explicit `AND`/`OR`/`NOT`, member-keyed objects on abstract targets and
//! `$jwt` claim objects inside authorization rules.
//!
//! At one nesting level, implicit keys are ANDed together first and the
//! result is then ANDed with the explicit combinators of the same level.

use serde_json::{Map, Value as JsonValue};

use crate::error::{Result, TranslateError};
use crate::query::filter::{
    AggregateCondition, AggregateFilter, AggregateFunction, AttributeAggregate, ClaimCondition,
    Comparator, FilterTree, Operand, Quantifier, RelationshipCondition, ScalarCondition, ScalarOp,
};
use crate::query::value::Value;
use crate::schema::{NodeTarget, Relationship, Schema};

/// Where-input key introducing claims conditions.
pub const CLAIMS_KEY: &str = "$jwt";
const CLAIM_PREFIX: &str = "$jwt.";
const QUANTIFIERS: [Quantifier; 4] = [
    Quantifier::Some,
    Quantifier::None,
    Quantifier::Single,
    Quantifier::All,
];
const AGGREGATE_INFIXES: [(&str, AggregateFunction); 9] = [
    ("_SHORTEST_LENGTH", AggregateFunction::ShortestLength),
    ("_LONGEST_LENGTH", AggregateFunction::LongestLength),
    ("_AVERAGE_LENGTH", AggregateFunction::AverageLength),
    ("_SHORTEST", AggregateFunction::ShortestLength),
    ("_LONGEST", AggregateFunction::LongestLength),
    ("_AVERAGE", AggregateFunction::Average),
    ("_MIN", AggregateFunction::Min),
    ("_MAX", AggregateFunction::Max),
    ("_SUM", AggregateFunction::Sum),
];

/// Resolution switches.
#[derive(Copy, Clone, Debug, Default)]
pub struct WhereOptions {
    /// Whether `$jwt` operands and claim objects are accepted.
    pub allow_claims: bool,
}

/// Where the scalar keys of an input object are looked up.
#[derive(Copy, Clone)]
enum FieldSource<'s> {
    Node(NodeTarget),
    Edge(&'s Relationship),
}

struct Resolver<'s> {
    schema: &'s Schema,
    options: WhereOptions,
}

/// Resolves a node `where` object against `target`.
///
/// Returns `None` when the object holds no conditions.
pub fn resolve_where(
    schema: &Schema,
    target: NodeTarget,
    input: &Map<String, JsonValue>,
    options: WhereOptions,
) -> Result<Option<FilterTree>> {
    Resolver { schema, options }.object(FieldSource::Node(target), input)
}

/// Resolves a connection `where` object (`{ node, edge, AND, OR, NOT }`)
/// for a relationship.
pub fn resolve_connection_where(
    schema: &Schema,
    relationship: &Relationship,
    input: &Map<String, JsonValue>,
    options: WhereOptions,
) -> Result<Option<FilterTree>> {
    Resolver { schema, options }.connection(relationship, input)
}

fn as_object<'a>(context: &'static str, value: &'a JsonValue) -> Result<&'a Map<String, JsonValue>> {
    value
        .as_object()
        .ok_or_else(|| TranslateError::invalid_input(context, format!("expected an object, got {value}")))
}

fn as_list<'a>(context: &'static str, value: &'a JsonValue) -> Result<Vec<&'a Map<String, JsonValue>>> {
    match value {
        JsonValue::Array(items) => items.iter().map(|item| as_object(context, item)).collect(),
        JsonValue::Object(map) => Ok(vec![map]),
        other => Err(TranslateError::invalid_input(
            context,
            format!("expected a list of objects, got {other}"),
        )),
    }
}

fn combine(implicit: Vec<FilterTree>, explicit: Vec<FilterTree>) -> Option<FilterTree> {
    let parts = [FilterTree::all(implicit), FilterTree::all(explicit)]
        .into_iter()
        .flatten()
        .collect();
    FilterTree::all(parts)
}

impl<'s> Resolver<'s> {
    fn owner(&self, source: FieldSource<'_>) -> String {
        match source {
            FieldSource::Node(target) => self.schema.target_name(target).to_owned(),
            FieldSource::Edge(rel) => format!("{}.{}", self.schema.entity(rel.source).name, rel.field),
        }
    }

    fn object(
        &self,
        source: FieldSource<'s>,
        input: &Map<String, JsonValue>,
    ) -> Result<Option<FilterTree>> {
        let mut implicit = Vec::new();
        let mut explicit = Vec::new();
        let mut members = Vec::new();
        for (key, value) in input {
            match key.as_str() {
                "AND" | "OR" => {
                    let mut children = Vec::new();
                    for child in as_list("where AND/OR", value)? {
                        let tree = self.object(source, child)?;
                        children.push(tree.unwrap_or(FilterTree::And(Vec::new())));
                    }
                    explicit.push(if key == "AND" {
                        FilterTree::And(children)
                    } else {
                        FilterTree::Or(children)
                    });
                }
                "NOT" => {
                    let child = self.object(source, as_object("where NOT", value)?)?;
                    let child = child.unwrap_or(FilterTree::And(Vec::new()));
                    explicit.push(FilterTree::Not(Box::new(child)));
                }
                CLAIMS_KEY => implicit.extend(self.claims(source, value)?),
                "typename_IN" => implicit.push(self.typename_in(source, value)?),
                _ => match self.member(source, key) {
                    Some(entity) => {
                        let filter = self
                            .object(FieldSource::Node(entity), as_object("member where", value)?)?
                            .map(Box::new);
                        members.push(FilterTree::OfType {
                            entity: key.clone(),
                            filter,
                        });
                    }
                    None => implicit.push(self.key(source, key, value)?),
                },
            }
        }
        match members.len() {
            0 => {}
            1 => implicit.extend(members),
            _ => implicit.push(FilterTree::Or(members)),
        }
        Ok(combine(implicit, explicit))
    }

    fn member(&self, source: FieldSource<'_>, key: &str) -> Option<NodeTarget> {
        let FieldSource::Node(target @ NodeTarget::Abstract(_)) = source else {
            return None;
        };
        let entity = self.schema.entity_by_name(key)?;
        self.schema
            .members(target)
            .contains(&entity.id)
            .then_some(NodeTarget::Entity(entity.id))
    }

    fn typename_in(&self, source: FieldSource<'_>, value: &JsonValue) -> Result<FilterTree> {
        let FieldSource::Node(target @ NodeTarget::Abstract(_)) = source else {
            return Err(TranslateError::UnknownOperator {
                owner: self.owner(source),
                key: "typename_IN".to_owned(),
            });
        };
        let names = value.as_array().ok_or_else(|| {
            TranslateError::invalid_input("typename_IN", "expected a list of type names")
        })?;
        let mut options = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_str().unwrap_or_default();
            let known = self
                .schema
                .entity_by_name(name)
                .is_some_and(|e| self.schema.members(target).contains(&e.id));
            if !known {
                return Err(TranslateError::UnknownType {
                    name: name.to_owned(),
                });
            }
            options.push(FilterTree::OfType {
                entity: name.to_owned(),
                filter: None,
            });
        }
        Ok(FilterTree::Or(options))
    }

    fn key(&self, source: FieldSource<'s>, key: &str, value: &JsonValue) -> Result<FilterTree> {
        let attribute_exists = |name: &str| match source {
            FieldSource::Node(target) => self.schema.target_attribute(target, name).is_some(),
            FieldSource::Edge(rel) => rel.property(name).is_some(),
        };
        if attribute_exists(key) {
            return self.scalar(source, key, ScalarOp::Eq, value);
        }
        if let FieldSource::Node(NodeTarget::Entity(entity)) = source {
            if let Some(tree) = self.relationship_key(entity, key, value)? {
                return Ok(tree);
            }
        }
        for op in ScalarOp::PARSE_ORDER {
            if let Some(field) = key.strip_suffix(op.suffix()) {
                if attribute_exists(field) {
                    return self.scalar(source, field, op, value);
                }
            }
        }
        Err(TranslateError::UnknownOperator {
            owner: self.owner(source),
            key: key.to_owned(),
        })
    }

    fn scalar(
        &self,
        source: FieldSource<'_>,
        field: &str,
        op: ScalarOp,
        value: &JsonValue,
    ) -> Result<FilterTree> {
        let operand = match value.as_str().and_then(|s| s.strip_prefix(CLAIM_PREFIX)) {
            Some(path) if self.options.allow_claims => {
                Operand::Claim(path.split('.').map(str::to_owned).collect())
            }
            _ => Operand::Value(Value::from(value)),
        };
        if matches!(operand, Operand::Value(_)) && value.is_null() && !matches!(op, ScalarOp::Eq | ScalarOp::NotEq) {
            return Err(TranslateError::ValueTypeMismatch {
                owner: self.owner(source),
                field: field.to_owned(),
                expected: "non-null literal",
                found: "null",
            });
        }
        Ok(FilterTree::Scalar(ScalarCondition {
            field: field.to_owned(),
            op,
            operand,
        }))
    }

    fn relationship_key(
        &self,
        entity: crate::types::EntityId,
        key: &str,
        value: &JsonValue,
    ) -> Result<Option<FilterTree>> {
        let schema = self.schema;
        if let Some(rel) = schema.relationship_field(entity, key) {
            return Ok(Some(match value {
                JsonValue::Null => FilterTree::Exists {
                    field: rel.field.clone(),
                    exists: false,
                },
                other => self.quantified(rel, Quantifier::Some, other, false)?,
            }));
        }
        if let Some(field) = key.strip_suffix("_NOT") {
            if let Some(rel) = schema.relationship_field(entity, field) {
                if value.is_null() {
                    return Ok(Some(FilterTree::Exists {
                        field: rel.field.clone(),
                        exists: true,
                    }));
                }
                let inner = self.quantified(rel, Quantifier::Some, value, false)?;
                return Ok(Some(FilterTree::Not(Box::new(inner))));
            }
        }
        for quantifier in QUANTIFIERS {
            let Some(stem) = key.strip_suffix(quantifier.suffix()) else {
                continue;
            };
            if let Some(rel) = schema.relationship_field(entity, stem) {
                return self.quantified(rel, quantifier, value, false).map(Some);
            }
            if let Some(field) = stem.strip_suffix("Connection") {
                if let Some(rel) = schema.relationship_field(entity, field) {
                    return self.quantified(rel, quantifier, value, true).map(Some);
                }
            }
        }
        if let Some(field) = key.strip_suffix("Connection") {
            if let Some(rel) = schema.relationship_field(entity, field) {
                return self.quantified(rel, Quantifier::Some, value, true).map(Some);
            }
        }
        if let Some(field) = key.strip_suffix("Aggregate") {
            if let Some(rel) = schema.relationship_field(entity, field) {
                let filter = self.aggregate(rel, as_object("aggregate where", value)?)?;
                return Ok(Some(FilterTree::Aggregate(AggregateCondition {
                    field: rel.field.clone(),
                    filter,
                })));
            }
        }
        Ok(None)
    }

    fn quantified(
        &self,
        rel: &'s Relationship,
        quantifier: Quantifier,
        value: &JsonValue,
        connection: bool,
    ) -> Result<FilterTree> {
        let input = as_object("relationship where", value)?;
        let filter = if connection {
            self.connection(rel, input)?
        } else {
            self.object(FieldSource::Node(rel.target), input)?
        };
        Ok(FilterTree::Relationship(RelationshipCondition {
            field: rel.field.clone(),
            quantifier,
            filter: filter.map(Box::new),
        }))
    }

    fn connection(
        &self,
        rel: &'s Relationship,
        input: &Map<String, JsonValue>,
    ) -> Result<Option<FilterTree>> {
        let mut implicit = Vec::new();
        let mut explicit = Vec::new();
        for (key, value) in input {
            match key.as_str() {
                "node" | "node_NOT" => {
                    let tree = self.object(FieldSource::Node(rel.target), as_object("node where", value)?)?;
                    if let Some(tree) = tree {
                        implicit.push(if key == "node" { tree } else { FilterTree::Not(Box::new(tree)) });
                    }
                }
                "edge" | "edge_NOT" => {
                    let tree = self.object(FieldSource::Edge(rel), as_object("edge where", value)?)?;
                    if let Some(tree) = tree {
                        let edge = FilterTree::Edge(Box::new(tree));
                        implicit.push(if key == "edge" { edge } else { FilterTree::Not(Box::new(edge)) });
                    }
                }
                "AND" | "OR" => {
                    let mut children = Vec::new();
                    for child in as_list("connection AND/OR", value)? {
                        children.push(self.connection(rel, child)?.unwrap_or(FilterTree::And(Vec::new())));
                    }
                    explicit.push(if key == "AND" {
                        FilterTree::And(children)
                    } else {
                        FilterTree::Or(children)
                    });
                }
                "NOT" => {
                    let child = self
                        .connection(rel, as_object("connection NOT", value)?)?
                        .unwrap_or(FilterTree::And(Vec::new()));
                    explicit.push(FilterTree::Not(Box::new(child)));
                }
                other => {
                    return Err(TranslateError::UnknownOperator {
                        owner: format!("{}Connection", rel.field),
                        key: other.to_owned(),
                    })
                }
            }
        }
        Ok(combine(implicit, explicit))
    }

    fn claims(&self, source: FieldSource<'_>, value: &JsonValue) -> Result<Vec<FilterTree>> {
        if !self.options.allow_claims {
            return Err(TranslateError::ClaimsNotAllowed {
                owner: self.owner(source),
            });
        }
        let input = as_object("claims where", value)?;
        let mut conditions = Vec::with_capacity(input.len());
        for (key, value) in input {
            let (path, op) = ScalarOp::PARSE_ORDER
                .iter()
                .find_map(|op| key.strip_suffix(op.suffix()).map(|path| (path, *op)))
                .unwrap_or((key.as_str(), ScalarOp::Eq));
            conditions.push(FilterTree::Claim(ClaimCondition {
                path: path.split('.').map(str::to_owned).collect(),
                op,
                value: Value::from(value),
            }));
        }
        Ok(conditions)
    }

    fn aggregate(&self, rel: &'s Relationship, input: &Map<String, JsonValue>) -> Result<AggregateFilter> {
        let mut implicit = Vec::new();
        let mut explicit = Vec::new();
        for (key, value) in input {
            match key.as_str() {
                "node" => implicit.push(self.aggregate_fields(FieldSource::Node(rel.target), rel, as_object("aggregate node", value)?)?),
                "edge" => implicit.push(self.aggregate_fields(FieldSource::Edge(rel), rel, as_object("aggregate edge", value)?)?),
                "AND" | "OR" => {
                    let children = as_list("aggregate AND/OR", value)?
                        .into_iter()
                        .map(|child| self.aggregate(rel, child))
                        .collect::<Result<Vec<_>>>()?;
                    explicit.push(if key == "AND" {
                        AggregateFilter::And(children)
                    } else {
                        AggregateFilter::Or(children)
                    });
                }
                "NOT" => {
                    let child = self.aggregate(rel, as_object("aggregate NOT", value)?)?;
                    explicit.push(AggregateFilter::Not(Box::new(child)));
                }
                other => {
                    let comparator = if other == "count" {
                        Some(Comparator::Eq)
                    } else {
                        other.strip_prefix("count").and_then(|suffix| {
                            Comparator::PARSE_ORDER.into_iter().find(|c| c.suffix() == suffix)
                        })
                    };
                    let Some(comparator) = comparator else {
                        return Err(TranslateError::UnknownOperator {
                            owner: format!("{}Aggregate", rel.field),
                            key: other.to_owned(),
                        });
                    };
                    if !value.is_i64() {
                        return Err(TranslateError::ValueTypeMismatch {
                            owner: format!("{}Aggregate", rel.field),
                            field: "count".to_owned(),
                            expected: "integer",
                            found: Value::from(value).kind_name(),
                        });
                    }
                    implicit.push(AggregateFilter::Count {
                        comparator,
                        value: Value::from(value),
                    });
                }
            }
        }
        Ok(combine_aggregate(implicit, explicit))
    }

    fn aggregate_fields(
        &self,
        source: FieldSource<'s>,
        rel: &'s Relationship,
        input: &Map<String, JsonValue>,
    ) -> Result<AggregateFilter> {
        let mut implicit = Vec::new();
        let mut explicit = Vec::new();
        for (key, value) in input {
            match key.as_str() {
                "AND" | "OR" => {
                    let children = as_list("aggregate AND/OR", value)?
                        .into_iter()
                        .map(|child| self.aggregate_fields(source, rel, child))
                        .collect::<Result<Vec<_>>>()?;
                    explicit.push(if key == "AND" {
                        AggregateFilter::And(children)
                    } else {
                        AggregateFilter::Or(children)
                    });
                }
                "NOT" => {
                    let child = self.aggregate_fields(source, rel, as_object("aggregate NOT", value)?)?;
                    explicit.push(AggregateFilter::Not(Box::new(child)));
                }
                other => implicit.push(self.aggregate_leaf(source, other, value)?),
            }
        }
        Ok(combine_aggregate(implicit, explicit))
    }

    fn aggregate_leaf(&self, source: FieldSource<'_>, key: &str, value: &JsonValue) -> Result<AggregateFilter> {
        let unknown = || TranslateError::UnknownOperator {
            owner: self.owner(source),
            key: key.to_owned(),
        };
        let (rest, comparator) = Comparator::PARSE_ORDER
            .into_iter()
            .find_map(|c| key.strip_suffix(c.suffix()).map(|rest| (rest, c)))
            .ok_or_else(unknown)?;
        let (field, function) = AGGREGATE_INFIXES
            .iter()
            .find_map(|(infix, f)| rest.strip_suffix(infix).map(|field| (field, *f)))
            .ok_or_else(unknown)?;
        let attribute = match source {
            FieldSource::Node(target) => self.schema.target_attribute(target, field),
            FieldSource::Edge(rel) => rel.property(field),
        }
        .ok_or_else(unknown)?;
        let length = function.is_length();
        let valid_kind = if length {
            attribute.kind.is_textual()
        } else {
            attribute.kind.is_numeric()
                || (attribute.kind.is_temporal()
                    && matches!(function, AggregateFunction::Min | AggregateFunction::Max))
        };
        if !valid_kind || attribute.list {
            return Err(TranslateError::OperatorNotSupported {
                owner: self.owner(source),
                field: field.to_owned(),
                operator: function.infix().trim_start_matches('_'),
            });
        }
        let value = Value::from(value);
        let numeric_ok = value.is_number() || (attribute.kind.is_temporal() && value.as_str().is_some());
        if !numeric_ok {
            return Err(TranslateError::ValueTypeMismatch {
                owner: self.owner(source),
                field: field.to_owned(),
                expected: "number",
                found: value.kind_name(),
            });
        }
        let leaf = AttributeAggregate {
            field: field.to_owned(),
            function,
            comparator,
            value,
        };
        Ok(match source {
            FieldSource::Node(_) => AggregateFilter::Node(leaf),
            FieldSource::Edge(_) => AggregateFilter::Edge(leaf),
        })
    }
}

fn combine_aggregate(mut implicit: Vec<AggregateFilter>, mut explicit: Vec<AggregateFilter>) -> AggregateFilter {
    let collapse = |parts: &mut Vec<AggregateFilter>| match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(AggregateFilter::And(std::mem::take(parts))),
    };
    let mut parts: Vec<AggregateFilter> = [collapse(&mut implicit), collapse(&mut explicit)]
        .into_iter()
        .flatten()
        .collect();
    match parts.len() {
        1 => parts.pop().unwrap_or(AggregateFilter::And(Vec::new())),
        _ => AggregateFilter::And(parts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::from_json_str(
            r#"{
            "entities": [
                {"name": "Movie", "implements": ["Production"],
                 "attributes": [
                    {"name": "title", "kind": "String"},
                    {"name": "released", "kind": "Int"},
                    {"name": "tags", "kind": "String", "list": true}
                 ],
                 "relationships": [
                    {"field": "actors", "type": "ACTED_IN", "direction": "in", "target": "Actor",
                     "properties": [{"name": "screenTime", "kind": "Int"}]}
                 ]},
                {"name": "Series", "implements": ["Production"],
                 "attributes": [{"name": "title", "kind": "String"}]},
                {"name": "Actor", "attributes": [{"name": "name", "kind": "String"}],
                 "relationships": [
                    {"field": "actedIn", "type": "ACTED_IN", "direction": "out", "target": "Production"}
                 ]}
            ],
            "interfaces": [{"name": "Production", "attributes": [{"name": "title", "kind": "String"}]}]
        }"#,
        )
        .unwrap()
    }

    fn resolve(schema: &Schema, target: &str, input: JsonValue) -> Result<Option<FilterTree>> {
        let target = schema.node_target(target).unwrap();
        resolve_where(schema, target, input.as_object().unwrap(), WhereOptions::default())
    }

    #[test]
    fn implicit_keys_and_before_explicit_combinators() {
        let schema = schema();
        let tree = resolve(
            &schema,
            "Movie",
            json!({"title": "a", "released_GT": 1990, "OR": [{"title": "b"}, {"title": "c"}]}),
        )
        .unwrap()
        .unwrap();
        let FilterTree::And(parts) = tree else {
            panic!("expected AND");
        };
        assert_eq!(parts.len(), 2);
        assert!(matches!(&parts[0], FilterTree::And(implicit) if implicit.len() == 2));
        assert!(matches!(&parts[1], FilterTree::Or(options) if options.len() == 2));
    }

    #[test]
    fn operator_suffixes_resolve_against_attributes() {
        let schema = schema();
        let tree = resolve(&schema, "Movie", json!({"tags_NOT_INCLUDES": "x"})).unwrap();
        assert_eq!(tree, Some(FilterTree::scalar("tags", ScalarOp::NotIncludes, "x")));
        let err = resolve(&schema, "Movie", json!({"budget_GT": 1})).unwrap_err();
        assert_eq!(err.code(), "UnknownOperator");
    }

    #[test]
    fn relationship_keys_produce_quantified_conditions() {
        let schema = schema();
        let tree = resolve(&schema, "Movie", json!({"actors_ALL": {"name": "x"}}))
            .unwrap()
            .unwrap();
        assert!(matches!(
            tree,
            FilterTree::Relationship(RelationshipCondition { quantifier: Quantifier::All, .. })
        ));
        let tree = resolve(&schema, "Movie", json!({"actors": null})).unwrap().unwrap();
        assert_eq!(
            tree,
            FilterTree::Exists {
                field: "actors".into(),
                exists: false
            }
        );
        let tree = resolve(
            &schema,
            "Movie",
            json!({"actorsConnection_SOME": {"edge": {"screenTime_GT": 10}}}),
        )
        .unwrap()
        .unwrap();
        let FilterTree::Relationship(cond) = tree else {
            panic!("expected relationship condition");
        };
        assert!(matches!(cond.filter.as_deref(), Some(FilterTree::Edge(_))));
    }

    #[test]
    fn aggregate_keys_split_function_and_comparator() {
        let schema = schema();
        let tree = resolve(
            &schema,
            "Movie",
            json!({"actorsAggregate": {"count_GT": 1, "node": {"name_SHORTEST_LENGTH_LT": 4}}}),
        )
        .unwrap()
        .unwrap();
        let FilterTree::Aggregate(cond) = tree else {
            panic!("expected aggregate");
        };
        let AggregateFilter::And(parts) = cond.filter else {
            panic!("expected conjunction");
        };
        assert!(matches!(parts[0], AggregateFilter::Count { comparator: Comparator::Gt, .. }));
        assert!(matches!(
            &parts[1],
            AggregateFilter::Node(AttributeAggregate {
                function: AggregateFunction::ShortestLength,
                comparator: Comparator::Lt,
                ..
            })
        ));
        let err = resolve(
            &schema,
            "Movie",
            json!({"actorsAggregate": {"node": {"name_SUM_GT": 4}}}),
        )
        .unwrap_err();
        assert_eq!(err.code(), "OperatorNotSupported");
    }

    #[test]
    fn member_keys_restrict_abstract_targets() {
        let schema = schema();
        let tree = resolve(
            &schema,
            "Actor",
            json!({"actedIn_SOME": {"Movie": {"released": 2000}, "title": "x"}}),
        )
        .unwrap()
        .unwrap();
        let FilterTree::Relationship(cond) = tree else {
            panic!("expected relationship condition");
        };
        let Some(FilterTree::And(parts)) = cond.filter.as_deref() else {
            panic!("expected implicit conjunction");
        };
        assert_eq!(parts[0], FilterTree::eq("title", "x"));
        assert!(matches!(&parts[1], FilterTree::OfType { entity, .. } if entity == "Movie"));
    }

    #[test]
    fn claims_are_rejected_in_caller_filters() {
        let schema = schema();
        let err = resolve(&schema, "Movie", json!({"$jwt": {"roles_INCLUDES": "admin"}})).unwrap_err();
        assert_eq!(err.code(), "ClaimsNotAllowed");
        let tree = resolve(&schema, "Movie", json!({"title": "$jwt.sub"})).unwrap().unwrap();
        assert_eq!(tree, FilterTree::eq("title", "$jwt.sub"), "caller strings stay literals");

        let movie = schema.node_target("Movie").unwrap();
        let tree = resolve_where(
            &schema,
            movie,
            json!({"title": "$jwt.sub", "$jwt": {"roles_INCLUDES": "admin"}})
                .as_object()
                .unwrap(),
            WhereOptions { allow_claims: true },
        )
        .unwrap()
        .unwrap();
        let FilterTree::And(parts) = tree else {
            panic!("expected conjunction");
        };
        assert!(matches!(
            &parts[0],
            FilterTree::Scalar(ScalarCondition { operand: Operand::Claim(path), .. }) if path == &["sub"]
        ));
        assert!(matches!(&parts[1], FilterTree::Claim(c) if c.op == ScalarOp::Includes));
    }
}
