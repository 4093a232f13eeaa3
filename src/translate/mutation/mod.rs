//! Mutation compiler.
//!
//! Every compiled operation walks `Pending -> Guarded -> Applied ->
//! Projected -> Done`. Nested operations run as unit `CALL` subqueries
//! ending in `RETURN count(*)`, so a nested match that finds nothing never
//! drops the parent row. Guard and cardinality failures raise through
//! `apoc.util.validatePredicate`, aborting the whole statement.

mod connect;
mod create;
mod delete;
mod input;
mod update;

use tracing::trace;

use crate::cypher::{pattern, Block, Clause};
use crate::error::{Result, TranslateError};
use crate::query::filter::FilterTree;
use crate::query::value::Value;
use crate::schema::{Attribute, Cardinality, Entity, Generated, Relationship};
use crate::types::RelationshipId;

use super::literal;
use super::predicate::target_node;
use super::scope::CompilationScope;

pub(crate) use create::compile_create;
pub(crate) use delete::compile_delete;
pub(crate) use input::InputResolver;
pub(crate) use update::compile_update;

/// Lifecycle of one compiled mutation operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// Raw operation, nothing emitted.
    Pending,
    /// Guards resolved and placed.
    Guarded,
    /// Effect compiled.
    Applied,
    /// Return payload compiled (or skipped).
    Projected,
    /// Ready for assembly.
    Done,
}

impl Stage {
    fn next(self) -> Option<Stage> {
        match self {
            Stage::Pending => Some(Stage::Guarded),
            Stage::Guarded => Some(Stage::Applied),
            Stage::Applied => Some(Stage::Projected),
            Stage::Projected => Some(Stage::Done),
            Stage::Done => None,
        }
    }
}

/// Enforces stage order for one operation.
#[derive(Debug)]
pub(crate) struct StageTracker {
    operation: &'static str,
    stage: Stage,
}

impl StageTracker {
    pub(crate) fn new(operation: &'static str) -> Self {
        Self {
            operation,
            stage: Stage::Pending,
        }
    }

    /// Moves to `next`; anything but the immediate successor is a defect.
    pub(crate) fn advance(&mut self, next: Stage) -> Result<()> {
        if self.stage.next() != Some(next) {
            return Err(TranslateError::Internal("mutation stage transition out of order"));
        }
        trace!(operation = self.operation, from = ?self.stage, to = ?next, "mutation.stage");
        self.stage = next;
        Ok(())
    }

    /// Advances through `Projected` and `Done` for operations without a
    /// payload of their own.
    pub(crate) fn finish(&mut self) -> Result<()> {
        if self.stage == Stage::Applied {
            self.advance(Stage::Projected)?;
        }
        self.advance(Stage::Done)
    }

    pub(crate) fn stage(&self) -> Stage {
        self.stage
    }
}

/// Arithmetic update operators.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MathOp {
    /// `_INCREMENT` (integers).
    Increment,
    /// `_DECREMENT` (integers).
    Decrement,
    /// `_ADD` (floats).
    Add,
    /// `_SUBTRACT` (floats).
    Subtract,
    /// `_MULTIPLY` (floats).
    Multiply,
    /// `_DIVIDE` (floats).
    Divide,
}

impl MathOp {
    /// Update-key suffixes, matched longest first.
    pub(crate) const SUFFIXES: [(&'static str, MathOp); 6] = [
        ("_INCREMENT", MathOp::Increment),
        ("_DECREMENT", MathOp::Decrement),
        ("_SUBTRACT", MathOp::Subtract),
        ("_MULTIPLY", MathOp::Multiply),
        ("_DIVIDE", MathOp::Divide),
        ("_ADD", MathOp::Add),
    ];

    fn symbol(self) -> &'static str {
        match self {
            MathOp::Increment | MathOp::Add => "+",
            MathOp::Decrement | MathOp::Subtract => "-",
            MathOp::Multiply => "*",
            MathOp::Divide => "/",
        }
    }
}

/// Right-hand side of a property write.
#[derive(Clone, Debug, PartialEq)]
pub enum AssignmentValue {
    /// Caller literal or schema default.
    Literal(Value),
    /// Value produced by the database.
    Generated(Generated),
    /// `prop = prop <op> value`.
    Math(MathOp, Value),
    /// Appends to a list attribute.
    Push(Value),
    /// Removes the last `n` list elements.
    Pop(i64),
}

/// One property write.
#[derive(Clone, Debug, PartialEq)]
pub struct Assignment<'s> {
    /// Written attribute.
    pub attribute: &'s Attribute,
    /// Written value.
    pub value: AssignmentValue,
}

/// Node to create with its nested operations.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeCreate<'s> {
    /// Created entity.
    pub entity: &'s Entity,
    /// Property writes: caller values in input order, then defaults and
    /// generated values in declaration order.
    pub assignments: Vec<Assignment<'s>>,
    /// Nested operations in input order.
    pub nested: Vec<NestedOp<'s>>,
}

/// Update applied to an already bound node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeUpdate<'s> {
    /// Property writes, `updatedAt` style values last.
    pub assignments: Vec<Assignment<'s>>,
    /// Nested operations in input order.
    pub nested: Vec<NestedOp<'s>>,
}

/// Operation on the far side of a relationship.
#[derive(Clone, Debug, PartialEq)]
pub struct NestedOp<'s> {
    /// Relationship traversed from the parent.
    pub relationship: &'s Relationship,
    /// Concrete entity on the far side.
    pub target: &'s Entity,
    /// What to do there.
    pub operation: MutationOperation<'s>,
}

/// Closed set of nested mutation kinds.
#[derive(Clone, Debug, PartialEq)]
pub enum MutationOperation<'s> {
    /// Create a node and connect it.
    Create {
        /// Node payload.
        node: NodeCreate<'s>,
        /// Edge properties.
        edge: Vec<Assignment<'s>>,
    },
    /// Update related nodes and their edges.
    Update {
        /// Connection filter (node and edge).
        filter: Option<FilterTree>,
        /// Node writes and nested operations.
        node: NodeUpdate<'s>,
        /// Edge property writes.
        edge: Vec<Assignment<'s>>,
    },
    /// Delete related nodes.
    Delete {
        /// Connection filter.
        filter: Option<FilterTree>,
        /// Deletes below the deleted nodes, run first.
        nested: Vec<NestedOp<'s>>,
    },
    /// Connect existing nodes.
    Connect {
        /// Filter on the target entity.
        filter: Option<FilterTree>,
        /// Edge properties.
        edge: Vec<Assignment<'s>>,
        /// Connects from the connected nodes.
        nested: Vec<NestedOp<'s>>,
    },
    /// Remove edges.
    Disconnect {
        /// Connection filter.
        filter: Option<FilterTree>,
        /// Disconnects from the disconnected nodes.
        nested: Vec<NestedOp<'s>>,
    },
    /// Merge a node by unique key and connect it.
    ConnectOrCreate {
        /// Unique key properties.
        key: Vec<Assignment<'s>>,
        /// Writes applied only when the node is created.
        on_create: Vec<Assignment<'s>>,
        /// Edge properties.
        edge: Vec<Assignment<'s>>,
    },
}

impl MutationOperation<'_> {
    /// Lowercase name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            MutationOperation::Create { .. } => "create",
            MutationOperation::Update { .. } => "update",
            MutationOperation::Delete { .. } => "delete",
            MutationOperation::Connect { .. } => "connect",
            MutationOperation::Disconnect { .. } => "disconnect",
            MutationOperation::ConnectOrCreate { .. } => "connectOrCreate",
        }
    }
}

/// Shared emission helpers bound to one scope.
pub(crate) struct Writer<'c, 'a> {
    pub(crate) scope: &'c mut CompilationScope<'a>,
}

impl<'c, 'a> Writer<'c, 'a> {
    pub(crate) fn new(scope: &'c mut CompilationScope<'a>) -> Self {
        Self { scope }
    }

    /// `var.prop = <expr>` for each assignment, with literals bound as
    /// parameters.
    pub(crate) fn set_items(&mut self, var: &str, assignments: &[Assignment<'_>]) -> Result<Vec<String>> {
        let mut items = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let attribute = assignment.attribute;
            let target = pattern::property(var, &attribute.property);
            let rhs = match &assignment.value {
                AssignmentValue::Literal(value) => {
                    let param = self.scope.param("param", value.clone())?;
                    literal::wrap_param(self.scope, attribute.kind, attribute.list, &param)?
                }
                AssignmentValue::Generated(generated) => generated.expression().to_owned(),
                AssignmentValue::Math(op, value) => {
                    let param = self.scope.param("param", value.clone())?;
                    format!("{target} {} {param}", op.symbol())
                }
                AssignmentValue::Push(value) => {
                    let as_list = matches!(value, Value::List(_));
                    let param = self.scope.param("param", value.clone())?;
                    let wrapped = literal::wrap_param(self.scope, attribute.kind, as_list, &param)?;
                    format!("{target} + {wrapped}")
                }
                AssignmentValue::Pop(count) => {
                    let param = self.scope.param("param", Value::Int(*count))?;
                    format!("{target}[0..size({target}) - {param}]")
                }
            };
            items.push(format!("{target} = {rhs}"));
        }
        Ok(items)
    }

    /// Pushes `SET` for the assignments, if any.
    pub(crate) fn push_set(&mut self, block: &mut Block, var: &str, assignments: &[Assignment<'_>]) -> Result<()> {
        let items = self.set_items(var, assignments)?;
        if !items.is_empty() {
            block.push(Clause::Set(items));
        }
        Ok(())
    }

    /// Post-effect edge-count validations for `var` of `entity`.
    ///
    /// Required relationships must have exactly one edge. Single-valued
    /// relationships listed in `touched` may have at most one.
    pub(crate) fn push_cardinality_checks(
        &mut self,
        block: &mut Block,
        var: &str,
        entity: &Entity,
        touched: &[RelationshipId],
    ) -> Result<()> {
        let schema = self.scope.schema;
        for id in &entity.relationships {
            let rel = schema.relationship(*id);
            if rel.cardinality != Cardinality::One {
                continue;
            }
            let (check, message) = if rel.required {
                ("= 1", format!("{}.{} required exactly once", entity.name, rel.field))
            } else if touched.contains(id) {
                ("<= 1", format!("{}.{} allowed at most once", entity.name, rel.field))
            } else {
                continue;
            };
            let edge = self.scope.allocate("edge")?;
            let count = self.scope.allocate("var")?;
            let to = target_node(self.scope, "", rel.target);
            let mut call = Block::new();
            call.push(Clause::with([var]));
            call.push(Clause::matching(pattern::relationship(var, &edge, &rel.rel_type, rel.direction, &to)));
            call.push(Clause::with([format!("count({edge}) AS {count}")]));
            call.push(Clause::Where(format!(
                "apoc.util.validatePredicate(NOT ({count} {check}), {}, [{}])",
                pattern::string_literal(&self.scope.config.cardinality_message()),
                pattern::string_literal(&message),
            )));
            call.push(Clause::returning([format!("{count} AS {count}")]));
            block.push(call.into_call());
        }
        Ok(())
    }

    /// Dispatches one nested operation below `parent`.
    pub(crate) fn push_nested(&mut self, block: &mut Block, parent: &str, parent_entity: &Entity, op: &NestedOp<'_>) -> Result<()> {
        trace!(
            parent = parent_entity.name.as_str(),
            field = op.relationship.field.as_str(),
            operation = op.operation.name(),
            "mutation.nested"
        );
        let call = match &op.operation {
            MutationOperation::Create { node, edge } => self.nested_create(parent, op.relationship, node, edge)?,
            MutationOperation::Update { filter, node, edge } => {
                self.nested_update(parent, op.relationship, op.target, filter.as_ref(), node, edge)?
            }
            MutationOperation::Delete { filter, nested } => {
                self.nested_delete(parent, op.relationship, op.target, filter.as_ref(), nested)?
            }
            MutationOperation::Connect { filter, edge, nested } => {
                self.connect(parent, parent_entity, op.relationship, op.target, filter.as_ref(), edge, nested)?
            }
            MutationOperation::Disconnect { filter, nested } => {
                self.disconnect(parent, parent_entity, op.relationship, op.target, filter.as_ref(), nested)?
            }
            MutationOperation::ConnectOrCreate { key, on_create, edge } => {
                self.connect_or_create(parent, parent_entity, op.relationship, op.target, key, on_create, edge)?
            }
        };
        block.push(call);
        Ok(())
    }

    /// Pushes every nested operation in order.
    pub(crate) fn push_all_nested(
        &mut self,
        block: &mut Block,
        parent: &str,
        parent_entity: &Entity,
        nested: &[NestedOp<'_>],
    ) -> Result<()> {
        for op in nested {
            self.push_nested(block, parent, parent_entity, op)?;
        }
        Ok(())
    }

    /// Closes a nested unit subquery with `RETURN count(*)`.
    pub(crate) fn close_unit(&mut self, mut block: Block) -> Result<Clause> {
        let out = self.scope.allocate("var")?;
        block.push(Clause::returning([format!("count(*) AS {out}")]));
        Ok(block.into_call())
    }
}

/// Single-valued relationships written by `nested`.
pub(crate) fn touched_relationships(nested: &[NestedOp<'_>]) -> Vec<RelationshipId> {
    let mut touched: Vec<RelationshipId> = Vec::new();
    for op in nested {
        let writes = !matches!(
            op.operation,
            MutationOperation::Delete { .. } | MutationOperation::Disconnect { .. } | MutationOperation::Update { .. }
        );
        if writes && op.relationship.cardinality == Cardinality::One && !touched.contains(&op.relationship.id) {
            touched.push(op.relationship.id);
        }
    }
    touched
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_advance_in_order_only() {
        let mut tracker = StageTracker::new("create");
        assert_eq!(tracker.stage(), Stage::Pending);
        let err = tracker.advance(Stage::Applied).unwrap_err();
        assert_eq!(err.code(), "Internal");
        tracker.advance(Stage::Guarded).unwrap();
        tracker.advance(Stage::Applied).unwrap();
        tracker.finish().unwrap();
        assert_eq!(tracker.stage(), Stage::Done);
        assert!(tracker.advance(Stage::Done).is_err());
    }

    #[test]
    fn math_suffixes_prefer_the_longest_match() {
        let key = "rating_SUBTRACT";
        let found = MathOp::SUFFIXES.iter().find(|(suffix, _)| key.ends_with(suffix));
        assert_eq!(found.map(|(_, op)| *op), Some(MathOp::Subtract));
    }
}
