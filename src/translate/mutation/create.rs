//! Create mutations.
//!
//! Contiguous runs of payloads with the same shape compile to one
//! `UNWIND $create_param` block; everything else gets a `CALL { CREATE }`
//! per item. Runs keep input order.

use std::collections::BTreeMap;

use tracing::debug;

use crate::cypher::{pattern, Block, Clause};
use crate::error::{Result, TranslateError};
use crate::query::request::CreateRequest;
use crate::query::value::Value;
use crate::schema::{Entity, GuardPhase, NodeTarget, Operation, Relationship};
use crate::translate::auth::{guards_for, push_validation};
use crate::translate::literal;
use crate::translate::plan::Planner;
use crate::translate::predicate::{CompiledPredicate, NodeBinding};
use crate::translate::projection::Projector;
use crate::translate::scope::CompilationScope;
use crate::types::{EntityId, RelationshipId};

use super::{
    touched_relationships, Assignment, AssignmentValue, InputResolver, MutationOperation, NestedOp, NodeCreate,
    Stage, StageTracker, Writer,
};

/// Structure two payloads must share to be batched together.
#[derive(Clone, Debug, PartialEq, Eq)]
struct BatchShape {
    /// `(attribute, generated)` in write order.
    attributes: Vec<(String, bool)>,
    nested: Vec<NestedShape>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct NestedShape {
    relationship: RelationshipId,
    target: EntityId,
    node: BatchShape,
    edge: Vec<(String, bool)>,
}

/// Nested creates of one payload grouped by relationship and target.
struct CreateGroup<'n, 's> {
    relationship: &'s Relationship,
    target: &'s Entity,
    items: Vec<(&'n NodeCreate<'s>, &'n [Assignment<'s>])>,
}

impl CreateGroup<'_, '_> {
    /// Key of the group's list inside the batched payload record.
    fn payload_key(&self) -> String {
        match self.relationship.target {
            NodeTarget::Entity(_) => self.relationship.field.clone(),
            NodeTarget::Abstract(_) => format!("{}_{}", self.relationship.field, self.target.name),
        }
    }
}

fn groups<'n, 's>(nested: &'n [NestedOp<'s>]) -> Option<Vec<CreateGroup<'n, 's>>> {
    let mut groups: Vec<CreateGroup<'n, 's>> = Vec::new();
    for op in nested {
        let MutationOperation::Create { node, edge } = &op.operation else {
            return None;
        };
        match groups
            .iter_mut()
            .find(|g| g.relationship.id == op.relationship.id && g.target.id == op.target.id)
        {
            Some(group) => group.items.push((node, edge.as_slice())),
            None => groups.push(CreateGroup {
                relationship: op.relationship,
                target: op.target,
                items: vec![(node, edge.as_slice())],
            }),
        }
    }
    Some(groups)
}

fn assignment_shape(assignments: &[Assignment<'_>]) -> Vec<(String, bool)> {
    assignments
        .iter()
        .map(|a| (a.attribute.name.clone(), matches!(a.value, AssignmentValue::Generated(_))))
        .collect()
}

/// `None` when the payload cannot be batched: a nested operation other
/// than create, or nested creates of diverging shapes.
fn batch_shape(create: &NodeCreate<'_>) -> Option<BatchShape> {
    let mut nested = Vec::new();
    for group in groups(&create.nested)? {
        let mut shapes = group
            .items
            .iter()
            .map(|(node, edge)| Some((batch_shape(node)?, assignment_shape(edge))));
        let (node, edge) = shapes.next()??;
        for shape in shapes {
            if shape? != (node.clone(), edge.clone()) {
                return None;
            }
        }
        nested.push(NestedShape {
            relationship: group.relationship.id,
            target: group.target.id,
            node,
            edge,
        });
    }
    Some(BatchShape {
        attributes: assignment_shape(&create.assignments),
        nested,
    })
}

fn literal_record(assignments: &[Assignment<'_>]) -> BTreeMap<String, Value> {
    assignments
        .iter()
        .filter_map(|a| match &a.value {
            AssignmentValue::Literal(value) => Some((a.attribute.name.clone(), value.clone())),
            _ => None,
        })
        .collect()
}

/// Payload record of a batched item.
fn payload(create: &NodeCreate<'_>) -> Value {
    let mut record = literal_record(&create.assignments);
    for group in groups(&create.nested).unwrap_or_default() {
        let items = group
            .items
            .iter()
            .map(|(node, edge)| {
                Value::Map(BTreeMap::from([
                    ("node".to_owned(), payload(node)),
                    ("edge".to_owned(), Value::Map(literal_record(edge))),
                ]))
            })
            .collect();
        record.insert(group.payload_key(), Value::List(items));
    }
    Value::Map(record)
}

enum Run<'n, 's> {
    Batch(Vec<&'n NodeCreate<'s>>),
    Single(&'n NodeCreate<'s>),
}

fn runs<'n, 's>(creates: &'n [NodeCreate<'s>], batching: bool) -> Vec<Run<'n, 's>> {
    let mut runs = Vec::new();
    let mut current: Option<(BatchShape, Vec<&'n NodeCreate<'s>>)> = None;
    for create in creates {
        let shape = if batching { batch_shape(create) } else { None };
        if let (Some(shape), Some((open, items))) = (&shape, current.as_mut()) {
            if *shape == *open {
                items.push(create);
                continue;
            }
        }
        if let Some((_, items)) = current.take() {
            runs.push(Run::Batch(items));
        }
        match shape {
            Some(shape) => current = Some((shape, vec![create])),
            None => runs.push(Run::Single(create)),
        }
    }
    if let Some((_, items)) = current {
        runs.push(Run::Batch(items));
    }
    runs
}

/// Compiles a root create mutation.
pub(crate) fn compile_create(request: &CreateRequest, scope: &mut CompilationScope<'_>) -> Result<Vec<Clause>> {
    let schema = scope.schema;
    let NodeTarget::Entity(id) = schema.node_target(&request.target)? else {
        return Err(TranslateError::invalid_input(
            "type",
            format!("cannot create abstract type '{}'", request.target),
        ));
    };
    let entity = schema.entity(id);
    if request.input.is_empty() {
        return Err(TranslateError::invalid_input("input", "create needs at least one payload"));
    }
    let resolver = InputResolver::new(schema);
    let creates = request
        .input
        .iter()
        .map(|input| resolver.create(entity, input))
        .collect::<Result<Vec<_>>>()?;
    let branches = Planner::new(schema).branches(NodeTarget::Entity(id), &request.selection)?;
    let runs = runs(&creates, scope.config.batch_creates);
    debug!(
        target = entity.name.as_str(),
        items = creates.len(),
        runs = runs.len(),
        batched = runs.iter().filter(|r| matches!(r, Run::Batch(_))).count(),
        "mutation.create"
    );

    let mut block = Block::new();
    let var = match runs.as_slice() {
        [Run::Batch(items)] => Writer::new(scope).batch(&mut block, entity, items)?,
        _ => {
            let var = scope.allocate("this")?;
            let mut parts: Vec<String> = Vec::new();
            let mut singles: Vec<String> = Vec::new();
            for run in &runs {
                match run {
                    Run::Single(create) => {
                        let node = scope.allocate("this")?;
                        let call = Writer::new(scope).single(&node, create)?;
                        block.push(call);
                        singles.push(node);
                    }
                    Run::Batch(items) => {
                        if !singles.is_empty() {
                            parts.push(format!("[{}]", singles.join(", ")));
                            singles.clear();
                        }
                        let list = scope.allocate("list")?;
                        let mut inner = Block::new();
                        let node = Writer::new(scope).batch(&mut inner, entity, items)?;
                        inner.push(Clause::returning([format!("collect({node}) AS {list}")]));
                        block.push(inner.into_call());
                        parts.push(list);
                    }
                }
            }
            if !singles.is_empty() {
                parts.push(format!("[{}]", singles.join(", ")));
            }
            block.push(Clause::Unwind {
                list: parts.join(" + "),
                alias: var.clone(),
            });
            var
        }
    };
    let mut tracker = StageTracker::new("create.projection");
    tracker.advance(Stage::Guarded)?;
    if !request.selection.is_empty() {
        push_validation(&mut block, id, Operation::Read, GuardPhase::Before, &var, scope)?;
    }
    tracker.advance(Stage::Applied)?;
    let expr = match branches.first() {
        Some(branch) => Projector::new(scope).project(branch, &var, false)?.push_into(&mut block),
        None => return Err(TranslateError::Internal("entity projection without a branch")),
    };
    tracker.advance(Stage::Projected)?;
    block.push(Clause::returning([format!("collect({expr}) AS data")]));
    tracker.advance(Stage::Done)?;
    Ok(block.into_clauses())
}

/// Validation of the create rules for a freshly created node; both phases
/// run after the node exists.
fn create_guards(entity: &Entity, var: &str, scope: &mut CompilationScope<'_>) -> Result<Option<CompiledPredicate>> {
    let binding = NodeBinding::new(var, NodeTarget::Entity(entity.id));
    let before = guards_for(entity.id, Operation::Create, GuardPhase::Before, &binding, scope)?;
    let after = guards_for(entity.id, Operation::Create, GuardPhase::After, &binding, scope)?;
    Ok(CompiledPredicate::all(before.validation.into_iter().chain(after.validation)))
}

impl Writer<'_, '_> {
    /// `CALL { CREATE ... RETURN node }` for one payload.
    fn single(&mut self, node: &str, create: &NodeCreate<'_>) -> Result<Clause> {
        let mut tracker = StageTracker::new("create");
        let guard = create_guards(create.entity, node, self.scope)?;
        tracker.advance(Stage::Guarded)?;
        let mut block = Block::new();
        block.push(Clause::Create(pattern::node(node, &create.entity.labels)));
        self.push_set(&mut block, node, &create.assignments)?;
        self.push_all_nested(&mut block, node, create.entity, &create.nested)?;
        tracker.advance(Stage::Applied)?;
        if let Some(guard) = guard {
            guard.push_into(&mut block);
        }
        self.push_cardinality_checks(&mut block, node, create.entity, &touched_relationships(&create.nested))?;
        block.push(Clause::returning([node]));
        tracker.finish()?;
        Ok(block.into_call())
    }

    /// `UNWIND $create_param AS row CALL { ... RETURN node }`; returns the
    /// node variable bound per row.
    fn batch(&mut self, block: &mut Block, entity: &Entity, items: &[&NodeCreate<'_>]) -> Result<String> {
        let Some(template) = items.first() else {
            return Err(TranslateError::Internal("empty create batch"));
        };
        let mut tracker = StageTracker::new("create.batch");
        let records = items.iter().map(|create| payload(create)).collect();
        let param = self.scope.param("create_param", Value::List(records))?;
        let row = self.scope.allocate("create_var")?;
        let node = self.scope.allocate("create_this")?;
        let guard = create_guards(entity, &node, self.scope)?;
        tracker.advance(Stage::Guarded)?;
        debug!(target = entity.name.as_str(), size = items.len(), "mutation.create.batch");
        block.push(Clause::Unwind {
            list: param,
            alias: row.clone(),
        });
        let mut body = Block::new();
        body.push(Clause::with([row.as_str()]));
        self.batched_node(&mut body, template, &row, &row, &node)?;
        tracker.advance(Stage::Applied)?;
        if let Some(guard) = guard {
            guard.push_into(&mut body);
        }
        self.push_cardinality_checks(&mut body, &node, entity, &touched_relationships(&template.nested))?;
        body.push(Clause::returning([node.as_str()]));
        block.push(body.into_call());
        tracker.finish()?;
        Ok(node)
    }

    /// `CREATE` + `SET` reading values from `record` (a path rooted at the
    /// variable `row`), then nested creates as `UNWIND` subqueries.
    fn batched_node(
        &mut self,
        block: &mut Block,
        template: &NodeCreate<'_>,
        row: &str,
        record: &str,
        node: &str,
    ) -> Result<()> {
        block.push(Clause::Create(pattern::node(node, &template.entity.labels)));
        let items = self.record_set_items(node, record, &template.assignments)?;
        if !items.is_empty() {
            block.push(Clause::Set(items));
        }
        for group in groups(&template.nested).unwrap_or_default() {
            let Some((child_template, edge_template)) = group.items.first() else {
                continue;
            };
            let child_row = self.scope.allocate("create_var")?;
            let child = self.scope.allocate("create_this")?;
            let edge = if edge_template.is_empty() {
                String::new()
            } else {
                self.scope.allocate("create_edge")?
            };
            let mut call = Block::new();
            call.push(Clause::with([node, row]));
            call.push(Clause::Unwind {
                list: format!("{record}.{}", pattern::escape(&group.payload_key())),
                alias: child_row.clone(),
            });
            let child_record = format!("{child_row}.node");
            self.batched_node(&mut call, child_template, &child_row, &child_record, &child)?;
            call.push(Clause::Create(pattern::relationship(
                node,
                &edge,
                &group.relationship.rel_type,
                group.relationship.direction,
                &format!("({child})"),
            )));
            let edge_items = self.record_set_items(&edge, &format!("{child_row}.edge"), edge_template)?;
            if !edge_items.is_empty() {
                call.push(Clause::Set(edge_items));
            }
            if let Some(guard) = create_guards(group.target, &child, self.scope)? {
                guard.push_into(&mut call);
            }
            self.push_cardinality_checks(&mut call, &child, group.target, &touched_relationships(&child_template.nested))?;
            let out = self.scope.allocate("var")?;
            call.push(Clause::returning([format!("collect(NULL) AS {out}")]));
            block.push(call.into_call());
        }
        Ok(())
    }

    fn record_set_items(&mut self, var: &str, record: &str, assignments: &[Assignment<'_>]) -> Result<Vec<String>> {
        let mut items = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let attribute = assignment.attribute;
            let rhs = match &assignment.value {
                AssignmentValue::Literal(_) => {
                    let reference = format!("{record}.{}", pattern::escape(&attribute.name));
                    literal::wrap_param(self.scope, attribute.kind, attribute.list, &reference)?
                }
                AssignmentValue::Generated(generated) => generated.expression().to_owned(),
                _ => return Err(TranslateError::Internal("update operator in create payload")),
            };
            items.push(format!("{} = {rhs}", pattern::property(var, &attribute.property)));
        }
        Ok(items)
    }

    /// Nested create below `parent`.
    pub(crate) fn nested_create(
        &mut self,
        parent: &str,
        rel: &Relationship,
        node: &NodeCreate<'_>,
        edge: &[Assignment<'_>],
    ) -> Result<Clause> {
        let mut tracker = StageTracker::new("create.nested");
        let var = self.scope.allocate("this")?;
        let guard = create_guards(node.entity, &var, self.scope)?;
        tracker.advance(Stage::Guarded)?;
        let mut block = Block::new();
        block.push(Clause::with([parent]));
        block.push(Clause::Create(pattern::node(&var, &node.entity.labels)));
        self.push_set(&mut block, &var, &node.assignments)?;
        let edge_var = if edge.is_empty() {
            String::new()
        } else {
            self.scope.allocate("edge")?
        };
        block.push(Clause::Create(pattern::relationship(
            parent,
            &edge_var,
            &rel.rel_type,
            rel.direction,
            &format!("({var})"),
        )));
        self.push_set(&mut block, &edge_var, edge)?;
        self.push_all_nested(&mut block, &var, node.entity, &node.nested)?;
        tracker.advance(Stage::Applied)?;
        if let Some(guard) = guard {
            guard.push_into(&mut block);
        }
        self.push_cardinality_checks(&mut block, &var, node.entity, &touched_relationships(&node.nested))?;
        tracker.finish()?;
        self.close_unit(block)
    }
}
