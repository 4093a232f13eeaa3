//! Mutation payload resolution.
//!
//! Relationship fields hold operation objects (`create`, `connect`,
//! `connectOrCreate`, `update`, `delete`, `disconnect`). Fields pointing at
//! an interface or union are keyed by member entity first:
//!
//! ```json
//! {"actedIn": {"Movie": {"connect": [{"where": {"node": {"title": "Heat"}}}]}}}
//! ```

use serde_json::{Map, Value as JsonValue};

use crate::error::{Result, TranslateError};
use crate::query::filter::FilterTree;
use crate::query::request::InputObject;
use crate::query::value::Value;
use crate::query::where_input::{resolve_connection_where, resolve_where, WhereOptions};
use crate::schema::{Attribute, Entity, Generated, NodeTarget, Relationship, ScalarKind, Schema};
use crate::translate::literal;

use super::{Assignment, AssignmentValue, MathOp, MutationOperation, NestedOp, NodeCreate, NodeUpdate};

/// Operation keys accepted in a given position.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Context {
    /// Nested in a create payload.
    Create,
    /// Nested in an update payload.
    Update,
    /// Below a connect.
    Connect,
    /// Below a disconnect.
    Disconnect,
    /// Below a delete (or a root delete).
    Delete,
}

impl Context {
    fn allows(self, key: &str) -> bool {
        match self {
            Context::Create => matches!(key, "create" | "connect" | "connectOrCreate"),
            Context::Update => matches!(
                key,
                "create" | "connect" | "connectOrCreate" | "update" | "delete" | "disconnect"
            ),
            Context::Connect => key == "connect",
            Context::Disconnect => key == "disconnect",
            Context::Delete => key == "delete",
        }
    }
}

fn as_object<'v>(context: &'static str, value: &'v JsonValue) -> Result<&'v InputObject> {
    value
        .as_object()
        .ok_or_else(|| TranslateError::invalid_input(context, format!("expected an object, got {value}")))
}

fn as_list<'v>(context: &'static str, value: &'v JsonValue) -> Result<Vec<&'v InputObject>> {
    match value {
        JsonValue::Array(items) => items.iter().map(|item| as_object(context, item)).collect(),
        JsonValue::Object(map) => Ok(vec![map]),
        other => Err(TranslateError::invalid_input(context, format!("expected objects, got {other}"))),
    }
}

fn empty() -> &'static InputObject {
    static EMPTY: std::sync::OnceLock<InputObject> = std::sync::OnceLock::new();
    EMPTY.get_or_init(Map::new)
}

/// Resolves JSON payloads into typed mutation trees.
pub(crate) struct InputResolver<'s> {
    schema: &'s Schema,
}

impl<'s> InputResolver<'s> {
    pub(crate) fn new(schema: &'s Schema) -> Self {
        Self { schema }
    }

    /// Create payload for `entity`, with defaults and generated values
    /// filled in.
    pub(crate) fn create(&self, entity: &'s Entity, input: &InputObject) -> Result<NodeCreate<'s>> {
        let mut assignments = Vec::new();
        let mut nested = Vec::new();
        for (key, value) in input {
            if let Some(attribute) = entity.attribute(key) {
                assignments.push(literal_assignment(&entity.name, attribute, value)?);
            } else if let Some(rel) = self.schema.relationship_field(entity.id, key) {
                self.nested(entity, rel, value, Context::Create, &mut nested)?;
            } else {
                return Err(TranslateError::unknown_field(entity.name.clone(), key.clone()));
            }
        }
        complete_create(&entity.name, &entity.attributes, input, &mut assignments)?;
        Ok(NodeCreate {
            entity,
            assignments,
            nested,
        })
    }

    /// Update payload for `entity`.
    pub(crate) fn update(&self, entity: &'s Entity, input: &InputObject) -> Result<NodeUpdate<'s>> {
        let mut assignments = Vec::new();
        let mut nested = Vec::new();
        for (key, value) in input {
            if let Some(attribute) = entity.attribute(key) {
                assignments.push(literal_assignment(&entity.name, attribute, value)?);
            } else if let Some(rel) = self.schema.relationship_field(entity.id, key) {
                self.nested(entity, rel, value, Context::Update, &mut nested)?;
            } else if let Some(assignment) = operator_assignment(entity, key, value)? {
                assignments.push(assignment);
            } else {
                return Err(TranslateError::unknown_field(entity.name.clone(), key.clone()));
            }
        }
        if !assignments.is_empty() {
            for attribute in &entity.attributes {
                if let Some(generated) = attribute.generated.filter(|g| g.on_update()) {
                    assignments.push(Assignment {
                        attribute,
                        value: AssignmentValue::Generated(generated),
                    });
                }
            }
        }
        Ok(NodeUpdate { assignments, nested })
    }

    /// Root delete payload: `{ field: [{ where, delete }] }`.
    pub(crate) fn delete(&self, entity: &'s Entity, input: &InputObject) -> Result<Vec<NestedOp<'s>>> {
        self.children(entity, input, Context::Delete)
    }

    /// `{ field: ops }` below a connect, disconnect or delete.
    fn children(&self, entity: &'s Entity, input: &InputObject, context: Context) -> Result<Vec<NestedOp<'s>>> {
        let mut nested = Vec::new();
        for (key, value) in input {
            let rel = self
                .schema
                .relationship_field(entity.id, key)
                .ok_or_else(|| TranslateError::unknown_field(entity.name.clone(), key.clone()))?;
            let wrap = |ops: &JsonValue| -> JsonValue {
                JsonValue::Object([(op_key(context).to_owned(), ops.clone())].into_iter().collect())
            };
            let wrapped = match rel.target {
                NodeTarget::Entity(_) => wrap(value),
                NodeTarget::Abstract(_) => JsonValue::Object(
                    as_object("relationship input", value)?
                        .iter()
                        .map(|(member, ops)| (member.clone(), wrap(ops)))
                        .collect(),
                ),
            };
            self.nested(entity, rel, &wrapped, context, &mut nested)?;
        }
        Ok(nested)
    }

    fn nested(
        &self,
        owner: &Entity,
        rel: &'s Relationship,
        value: &JsonValue,
        context: Context,
        out: &mut Vec<NestedOp<'s>>,
    ) -> Result<()> {
        match rel.target {
            NodeTarget::Entity(id) => {
                let target = self.schema.entity(id);
                for ops in as_list("relationship input", value)? {
                    self.operations(owner, rel, target, ops, context, out)?;
                }
            }
            NodeTarget::Abstract(_) => {
                for (member, ops) in as_object("relationship input", value)? {
                    let target = self
                        .schema
                        .entity_by_name(member)
                        .filter(|entity| self.schema.members(rel.target).contains(&entity.id))
                        .ok_or_else(|| TranslateError::unknown_field(self.schema.target_name(rel.target), member.clone()))?;
                    for ops in as_list("relationship input", ops)? {
                        self.operations(owner, rel, target, ops, context, out)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn operations(
        &self,
        owner: &Entity,
        rel: &'s Relationship,
        target: &'s Entity,
        ops: &InputObject,
        context: Context,
        out: &mut Vec<NestedOp<'s>>,
    ) -> Result<()> {
        let edge_owner = format!("{}.{}", owner.name, rel.field);
        for (key, value) in ops {
            if !context.allows(key) {
                return Err(TranslateError::invalid_input(
                    "mutation",
                    format!("'{key}' is not allowed on {edge_owner} here"),
                ));
            }
            for item in as_list("mutation", value)? {
                let operation = match key.as_str() {
                    "create" => MutationOperation::Create {
                        node: self.create(target, object_field(item, "node")?)?,
                        edge: self.edge_create(&edge_owner, rel, object_field(item, "edge")?)?,
                    },
                    "connect" => MutationOperation::Connect {
                        filter: self.node_where(target, item)?,
                        edge: self.edge_create(&edge_owner, rel, object_field(item, "edge")?)?,
                        nested: self.children(target, object_field(item, "connect")?, Context::Connect)?,
                    },
                    "connectOrCreate" => self.connect_or_create(&edge_owner, rel, target, item)?,
                    "update" => MutationOperation::Update {
                        filter: self.connection_where(rel, item)?,
                        node: self.update(target, object_field(item, "node")?)?,
                        edge: self.edge_update(&edge_owner, rel, object_field(item, "edge")?)?,
                    },
                    "delete" => MutationOperation::Delete {
                        filter: self.connection_where(rel, item)?,
                        nested: self.children(target, object_field(item, "delete")?, Context::Delete)?,
                    },
                    "disconnect" => MutationOperation::Disconnect {
                        filter: self.connection_where(rel, item)?,
                        nested: self.children(target, object_field(item, "disconnect")?, Context::Disconnect)?,
                    },
                    other => {
                        return Err(TranslateError::invalid_input(
                            "mutation",
                            format!("unknown nested operation '{other}'"),
                        ))
                    }
                };
                out.push(NestedOp {
                    relationship: rel,
                    target,
                    operation,
                });
            }
        }
        Ok(())
    }

    fn connect_or_create(
        &self,
        edge_owner: &str,
        rel: &'s Relationship,
        target: &'s Entity,
        item: &InputObject,
    ) -> Result<MutationOperation<'s>> {
        let key_input = object_field(object_field(item, "where")?, "node")?;
        if key_input.is_empty() {
            return Err(TranslateError::invalid_input(
                "connectOrCreate",
                format!("{edge_owner} needs a unique key in where.node"),
            ));
        }
        let mut key = Vec::with_capacity(key_input.len());
        for (field, value) in key_input {
            let attribute = target
                .attribute(field)
                .ok_or_else(|| TranslateError::unknown_field(target.name.clone(), field.clone()))?;
            if !attribute.unique && attribute.generated != Some(Generated::Id) {
                return Err(TranslateError::NotUniqueKey {
                    owner: target.name.clone(),
                    field: field.clone(),
                });
            }
            key.push(key_assignment(&target.name, attribute, value)?);
        }
        let on_create_input = object_field(item, "onCreate")?;
        let node_input = object_field(on_create_input, "node")?;
        let mut on_create = Vec::new();
        for (field, value) in node_input {
            let attribute = target
                .attribute(field)
                .ok_or_else(|| TranslateError::unknown_field(target.name.clone(), field.clone()))?;
            if key_input.contains_key(field) {
                continue;
            }
            on_create.push(literal_assignment(&target.name, attribute, value)?);
        }
        let mut provided = node_input.clone();
        provided.extend(key_input.iter().map(|(k, v)| (k.clone(), v.clone())));
        complete_create(&target.name, &target.attributes, &provided, &mut on_create)?;
        Ok(MutationOperation::ConnectOrCreate {
            key,
            on_create,
            edge: self.edge_create(edge_owner, rel, object_field(on_create_input, "edge")?)?,
        })
    }

    /// `where.node` of a connect, resolved against the concrete target.
    fn node_where(&self, target: &Entity, item: &InputObject) -> Result<Option<FilterTree>> {
        let node = object_field(object_field(item, "where")?, "node")?;
        resolve_where(self.schema, NodeTarget::Entity(target.id), node, WhereOptions::default())
    }

    /// `where` of an update, delete or disconnect: node and edge conditions.
    fn connection_where(&self, rel: &Relationship, item: &InputObject) -> Result<Option<FilterTree>> {
        resolve_connection_where(self.schema, rel, object_field(item, "where")?, WhereOptions::default())
    }

    fn edge_create(&self, owner: &str, rel: &'s Relationship, input: &InputObject) -> Result<Vec<Assignment<'s>>> {
        let mut assignments = self.edge_update(owner, rel, input)?;
        complete_create(owner, &rel.properties, input, &mut assignments)?;
        Ok(assignments)
    }

    fn edge_update(&self, owner: &str, rel: &'s Relationship, input: &InputObject) -> Result<Vec<Assignment<'s>>> {
        input
            .iter()
            .map(|(key, value)| {
                let attribute = rel
                    .property(key)
                    .ok_or_else(|| TranslateError::unknown_field(owner, key.clone()))?;
                literal_assignment(owner, attribute, value)
            })
            .collect()
    }
}

fn op_key(context: Context) -> &'static str {
    match context {
        Context::Connect => "connect",
        Context::Disconnect => "disconnect",
        Context::Delete => "delete",
        Context::Create | Context::Update => "create",
    }
}

/// Optional object-valued field; absent and `null` read as empty.
fn object_field<'v>(item: &'v InputObject, key: &'static str) -> Result<&'v InputObject> {
    match item.get(key) {
        None | Some(JsonValue::Null) => Ok(empty()),
        Some(value) => as_object(key, value),
    }
}

fn literal_assignment<'s>(owner: &str, attribute: &'s Attribute, value: &JsonValue) -> Result<Assignment<'s>> {
    if !attribute.is_writable() {
        return Err(TranslateError::ReadOnlyField {
            owner: owner.to_owned(),
            field: attribute.name.clone(),
        });
    }
    let value = Value::from(value);
    if value.is_null() && !attribute.nullable {
        return Err(TranslateError::MissingAttribute {
            owner: owner.to_owned(),
            field: attribute.name.clone(),
        });
    }
    literal::check_value(owner, attribute, &value)?;
    Ok(Assignment {
        attribute,
        value: AssignmentValue::Literal(value),
    })
}

/// A match key may name a generated attribute; only stored values qualify.
fn key_assignment<'s>(owner: &str, attribute: &'s Attribute, value: &JsonValue) -> Result<Assignment<'s>> {
    if attribute.computed.is_some() {
        return Err(TranslateError::ReadOnlyField {
            owner: owner.to_owned(),
            field: attribute.name.clone(),
        });
    }
    let value = Value::from(value);
    if value.is_null() {
        return Err(TranslateError::invalid_input(
            "connectOrCreate",
            format!("{owner}.{} cannot match on null", attribute.name),
        ));
    }
    literal::check_value(owner, attribute, &value)?;
    Ok(Assignment {
        attribute,
        value: AssignmentValue::Literal(value),
    })
}

/// Adds defaults and create-time generated values for attributes the
/// payload left out, and rejects missing required ones.
fn complete_create<'s>(
    owner: &str,
    attributes: &'s [Attribute],
    provided: &InputObject,
    assignments: &mut Vec<Assignment<'s>>,
) -> Result<()> {
    for attribute in attributes {
        if provided.contains_key(&attribute.name) || attribute.computed.is_some() {
            continue;
        }
        if let Some(generated) = attribute.generated.filter(|g| g.on_create()) {
            assignments.push(Assignment {
                attribute,
                value: AssignmentValue::Generated(generated),
            });
        } else if let Some(default) = &attribute.default {
            assignments.push(Assignment {
                attribute,
                value: AssignmentValue::Literal(default.clone()),
            });
        } else if attribute.is_required_on_create() {
            return Err(TranslateError::MissingAttribute {
                owner: owner.to_owned(),
                field: attribute.name.clone(),
            });
        }
    }
    Ok(())
}

/// `<field>_<OP>` update keys.
fn operator_assignment<'s>(entity: &'s Entity, key: &str, value: &JsonValue) -> Result<Option<Assignment<'s>>> {
    let owner = entity.name.as_str();
    let value = Value::from(value);
    let mismatch = |attribute: &Attribute, expected: &'static str, value: &Value| TranslateError::ValueTypeMismatch {
        owner: owner.to_owned(),
        field: attribute.name.clone(),
        expected,
        found: value.kind_name(),
    };
    let unsupported = |attribute: &Attribute, operator: &'static str| TranslateError::OperatorNotSupported {
        owner: owner.to_owned(),
        field: attribute.name.clone(),
        operator,
    };
    for (suffix, op) in MathOp::SUFFIXES {
        let Some(attribute) = key.strip_suffix(suffix).and_then(|field| entity.attribute(field)) else {
            continue;
        };
        if !attribute.is_writable() {
            return Err(TranslateError::ReadOnlyField {
                owner: owner.to_owned(),
                field: attribute.name.clone(),
            });
        }
        let integer_op = matches!(op, MathOp::Increment | MathOp::Decrement);
        let supported = !attribute.list
            && match attribute.kind {
                ScalarKind::Int => integer_op,
                ScalarKind::Float => !integer_op,
                _ => false,
            };
        if !supported {
            return Err(unsupported(attribute, &suffix[1..]));
        }
        let ok = if integer_op {
            matches!(value, Value::Int(_))
        } else {
            value.is_number()
        };
        if !ok {
            return Err(mismatch(attribute, if integer_op { "Int" } else { "Float" }, &value));
        }
        return Ok(Some(Assignment {
            attribute,
            value: AssignmentValue::Math(op, value),
        }));
    }
    if let Some(attribute) = key.strip_suffix("_PUSH").and_then(|field| entity.attribute(field)) {
        if !attribute.list || !attribute.is_writable() {
            return Err(unsupported(attribute, "PUSH"));
        }
        match &value {
            Value::List(items) => items.iter().try_for_each(|item| literal::check_item(owner, attribute, item))?,
            item => literal::check_item(owner, attribute, item)?,
        }
        return Ok(Some(Assignment {
            attribute,
            value: AssignmentValue::Push(value),
        }));
    }
    if let Some(attribute) = key.strip_suffix("_POP").and_then(|field| entity.attribute(field)) {
        if !attribute.list || !attribute.is_writable() {
            return Err(unsupported(attribute, "POP"));
        }
        let Value::Int(count) = &value else {
            return Err(mismatch(attribute, "Int", &value));
        };
        let count = *count;
        if count < 0 {
            return Err(TranslateError::invalid_input("update", format!("{key} must not be negative")));
        }
        return Ok(Some(Assignment {
            attribute,
            value: AssignmentValue::Pop(count),
        }));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::testing::movie_schema;
    use serde_json::json;

    fn object(value: JsonValue) -> InputObject {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn create_fills_generated_values_and_checks_required() {
        let schema = movie_schema();
        let resolver = InputResolver::new(&schema);
        let post = schema.entity_by_name("Post").unwrap();
        let create = resolver.create(post, &object(json!({"content": "hi"}))).unwrap();
        let names: Vec<&str> = create.assignments.iter().map(|a| a.attribute.name.as_str()).collect();
        assert_eq!(names, ["content", "id", "createdAt"]);
        assert_eq!(create.assignments[1].value, AssignmentValue::Generated(Generated::Id));

        let actor = schema.entity_by_name("Actor").unwrap();
        let err = resolver.create(actor, &object(json!({"born": 1964}))).unwrap_err();
        assert_eq!(err.code(), "MissingAttribute");
        let err = resolver.create(post, &object(json!({"id": "p1"}))).unwrap_err();
        assert_eq!(err.code(), "ReadOnlyField");
        let err = resolver.create(post, &object(json!({"nope": 1}))).unwrap_err();
        assert_eq!(err.code(), "UnknownField");
    }

    #[test]
    fn update_operators_and_nested_operations() {
        let schema = movie_schema();
        let resolver = InputResolver::new(&schema);
        let movie = schema.entity_by_name("Movie").unwrap();
        let update = resolver
            .update(
                movie,
                &object(json!({
                    "released_INCREMENT": 1,
                    "tags_PUSH": ["noir"],
                    "actors": [
                        {"connect": [{"where": {"node": {"name": "Keanu"}}, "edge": {"role": "Neo"}}]},
                        {"disconnect": {"where": {"node": {"name": "Carrie"}}}}
                    ]
                })),
            )
            .unwrap();
        assert_eq!(update.assignments.len(), 2);
        let kinds: Vec<&str> = update.nested.iter().map(|op| op.operation.name()).collect();
        assert_eq!(kinds, ["connect", "disconnect"]);
        let err = resolver.update(movie, &object(json!({"title_INCREMENT": 1}))).unwrap_err();
        assert_eq!(err.code(), "OperatorNotSupported");
        let err = resolver.update(movie, &object(json!({"rating_ADD": "x"}))).unwrap_err();
        assert_eq!(err.code(), "TypeMismatch");
    }

    #[test]
    fn abstract_relationships_are_keyed_by_member() {
        let schema = movie_schema();
        let resolver = InputResolver::new(&schema);
        let actor = schema.entity_by_name("Actor").unwrap();
        let update = resolver
            .update(
                actor,
                &object(json!({"actedIn": {"Series": {"create": {"node": {"title": "Dark"}}}}})),
            )
            .unwrap();
        assert_eq!(update.nested[0].target.name, "Series");
        let err = resolver
            .update(actor, &object(json!({"actedIn": {"Genre": {"create": {"node": {"name": "x"}}}}})))
            .unwrap_err();
        assert_eq!(err.code(), "UnknownField");
    }

    #[test]
    fn connect_or_create_needs_unique_keys() {
        let schema = movie_schema();
        let resolver = InputResolver::new(&schema);
        let movie = schema.entity_by_name("Movie").unwrap();
        let ok = resolver.update(
            movie,
            &object(json!({"genres": {"connectOrCreate": {"where": {"node": {"name": "Noir"}}}}})),
        );
        assert!(ok.is_ok());
        let err = resolver
            .update(
                movie,
                &object(json!({"actors": {"connectOrCreate": {"where": {"node": {"name": "Keanu"}}}}})),
            )
            .unwrap_err();
        assert_eq!(err.code(), "NotUniqueKey");
        let err = resolver
            .create(movie, &object(json!({"actors": {"delete": {"where": {}}}})))
            .unwrap_err();
        assert_eq!(err.code(), "InvalidInput");
    }
}
