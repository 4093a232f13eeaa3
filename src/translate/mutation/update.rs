//! Update mutations.

use tracing::debug;

use crate::cypher::{pattern, Block, Clause};
use crate::error::{Result, TranslateError};
use crate::query::filter::FilterTree;
use crate::query::request::UpdateRequest;
use crate::schema::{Entity, GuardPhase, NodeTarget, Operation, Relationship};
use crate::translate::auth::{push_validation, NodeFilters};
use crate::translate::plan::Planner;
use crate::translate::predicate::EdgeBinding;
use crate::translate::projection::Projector;
use crate::translate::scope::CompilationScope;

use super::{touched_relationships, Assignment, InputResolver, NodeUpdate, Stage, StageTracker, Writer};

/// Compiles a root update: match, guard, write, nested operations in input
/// order, post-write validations, then the projection of the updated nodes.
pub(crate) fn compile_update(request: &UpdateRequest, scope: &mut CompilationScope<'_>) -> Result<Vec<Clause>> {
    let schema = scope.schema;
    let NodeTarget::Entity(id) = schema.node_target(&request.target)? else {
        return Err(TranslateError::invalid_input(
            "type",
            format!("cannot update abstract type '{}'", request.target),
        ));
    };
    let entity = schema.entity(id);
    let planner = Planner::new(schema);
    let filter = planner.filter(NodeTarget::Entity(id), request.filter.as_ref())?;
    let update = InputResolver::new(schema).update(entity, &request.update)?;
    let branches = planner.branches(NodeTarget::Entity(id), &request.selection)?;
    debug!(
        target = entity.name.as_str(),
        assignments = update.assignments.len(),
        nested = update.nested.len(),
        "mutation.update"
    );

    let mut tracker = StageTracker::new("update");
    let var = scope.allocate("this")?;
    let mut block = Block::new();
    block.push(Clause::matching(pattern::node(&var, &entity.labels)));
    let after = NodeFilters {
        var: &var,
        filter_target: NodeTarget::Entity(id),
        entity: id,
        edge: None,
        operation: Operation::Update,
    }
    .push(&mut block, filter.as_ref(), scope)?;
    tracker.advance(Stage::Guarded)?;

    let mut writer = Writer::new(scope);
    writer.push_set(&mut block, &var, &update.assignments)?;
    writer.push_all_nested(&mut block, &var, entity, &update.nested)?;
    tracker.advance(Stage::Applied)?;
    if let Some(validation) = after {
        validation.push_into(&mut block);
    }
    writer.push_cardinality_checks(&mut block, &var, entity, &touched_relationships(&update.nested))?;

    if !request.selection.is_empty() {
        push_validation(&mut block, id, Operation::Read, GuardPhase::Before, &var, scope)?;
    }
    let expr = match branches.first() {
        Some(branch) => Projector::new(scope).project(branch, &var, false)?.push_into(&mut block),
        None => return Err(TranslateError::Internal("entity projection without a branch")),
    };
    tracker.advance(Stage::Projected)?;
    block.push(Clause::returning([format!("collect(DISTINCT {expr}) AS data")]));
    tracker.advance(Stage::Done)?;
    Ok(block.into_clauses())
}

impl Writer<'_, '_> {
    /// Updates the nodes related to `parent` through `rel` that pass the
    /// connection filter, along with their edges.
    pub(crate) fn nested_update(
        &mut self,
        parent: &str,
        rel: &Relationship,
        target: &Entity,
        filter: Option<&FilterTree>,
        node: &NodeUpdate<'_>,
        edge: &[Assignment<'_>],
    ) -> Result<Clause> {
        let mut tracker = StageTracker::new("update.nested");
        let var = self.scope.allocate("this")?;
        let edge_var = self.scope.allocate("edge")?;
        let mut block = Block::new();
        block.push(Clause::with([parent]));
        block.push(Clause::matching(pattern::relationship(
            parent,
            &edge_var,
            &rel.rel_type,
            rel.direction,
            &pattern::node(&var, &target.labels),
        )));
        let after = NodeFilters {
            var: &var,
            filter_target: rel.target,
            entity: target.id,
            edge: Some(EdgeBinding {
                var: edge_var.clone(),
                relationship: rel.id,
            }),
            operation: Operation::Update,
        }
        .push(&mut block, filter, self.scope)?;
        tracker.advance(Stage::Guarded)?;
        self.push_set(&mut block, &var, &node.assignments)?;
        self.push_set(&mut block, &edge_var, edge)?;
        self.push_all_nested(&mut block, &var, target, &node.nested)?;
        tracker.advance(Stage::Applied)?;
        if let Some(validation) = after {
            validation.push_into(&mut block);
        }
        self.push_cardinality_checks(&mut block, &var, target, &touched_relationships(&node.nested))?;
        tracker.finish()?;
        self.close_unit(block)
    }
}
