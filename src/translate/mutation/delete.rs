//! Delete mutations. Nested deletes run before the parent is removed.

use tracing::debug;

use crate::cypher::{pattern, Block, Clause};
use crate::error::{Result, TranslateError};
use crate::query::filter::FilterTree;
use crate::query::request::DeleteRequest;
use crate::schema::{Entity, NodeTarget, Operation, Relationship};
use crate::translate::auth::NodeFilters;
use crate::translate::plan::Planner;
use crate::translate::predicate::EdgeBinding;
use crate::translate::scope::CompilationScope;

use super::{InputResolver, NestedOp, Stage, StageTracker, Writer};

/// Compiles a root delete. The query returns no rows; callers read the
/// deletion counters from the result summary.
pub(crate) fn compile_delete(request: &DeleteRequest, scope: &mut CompilationScope<'_>) -> Result<Vec<Clause>> {
    let schema = scope.schema;
    let NodeTarget::Entity(id) = schema.node_target(&request.target)? else {
        return Err(TranslateError::invalid_input(
            "type",
            format!("cannot delete abstract type '{}'", request.target),
        ));
    };
    let entity = schema.entity(id);
    let filter = Planner::new(schema).filter(NodeTarget::Entity(id), request.filter.as_ref())?;
    let nested = InputResolver::new(schema).delete(entity, &request.delete)?;
    debug!(target = entity.name.as_str(), nested = nested.len(), "mutation.delete");

    let mut tracker = StageTracker::new("delete");
    let var = scope.allocate("this")?;
    let mut block = Block::new();
    block.push(Clause::matching(pattern::node(&var, &entity.labels)));
    let after = NodeFilters {
        var: &var,
        filter_target: NodeTarget::Entity(id),
        entity: id,
        edge: None,
        operation: Operation::Delete,
    }
    .push(&mut block, filter.as_ref(), scope)?;
    tracker.advance(Stage::Guarded)?;
    Writer::new(scope).push_all_nested(&mut block, &var, entity, &nested)?;
    if let Some(validation) = after {
        validation.push_into(&mut block);
    }
    block.push(Clause::Delete {
        items: vec![var],
        detach: true,
    });
    tracker.advance(Stage::Applied)?;
    tracker.finish()?;
    Ok(block.into_clauses())
}

impl Writer<'_, '_> {
    /// Deletes the nodes related to `parent` that pass the connection
    /// filter, after their own nested deletes.
    pub(crate) fn nested_delete(
        &mut self,
        parent: &str,
        rel: &Relationship,
        target: &Entity,
        filter: Option<&FilterTree>,
        nested: &[NestedOp<'_>],
    ) -> Result<Clause> {
        let mut tracker = StageTracker::new("delete.nested");
        let var = self.scope.allocate("this")?;
        let edge = match filter {
            Some(_) => Some(EdgeBinding {
                var: self.scope.allocate("edge")?,
                relationship: rel.id,
            }),
            None => None,
        };
        let mut block = Block::new();
        block.push(Clause::with([parent]));
        block.push(Clause::matching(pattern::relationship(
            parent,
            edge.as_ref().map_or("", |e| e.var.as_str()),
            &rel.rel_type,
            rel.direction,
            &pattern::node(&var, &target.labels),
        )));
        let after = NodeFilters {
            var: &var,
            filter_target: rel.target,
            entity: target.id,
            edge,
            operation: Operation::Delete,
        }
        .push(&mut block, filter, self.scope)?;
        tracker.advance(Stage::Guarded)?;
        self.push_all_nested(&mut block, &var, target, nested)?;
        if let Some(validation) = after {
            validation.push_into(&mut block);
        }
        block.push(Clause::With {
            items: vec![var.clone()],
            distinct: true,
        });
        block.push(Clause::Delete {
            items: vec![var],
            detach: true,
        });
        tracker.advance(Stage::Applied)?;
        tracker.finish()?;
        self.close_unit(block)
    }
}
