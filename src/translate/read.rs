//! Root read and aggregate queries.

use tracing::debug;

use crate::cypher::{pattern, Block, Clause};
use crate::error::{Result, TranslateError};
use crate::query::request::{AggregateRequest, ReadRequest};
use crate::schema::{NodeTarget, Operation};

use super::auth::NodeFilters;
use super::plan::Planner;
use super::projection::Projector;
use super::scope::CompilationScope;

/// Compiles a list query over an entity, interface or union.
pub(crate) fn compile_read(request: &ReadRequest, scope: &mut CompilationScope<'_>) -> Result<Vec<Clause>> {
    let schema = scope.schema;
    let target = schema.node_target(&request.target)?;
    let planner = Planner::new(schema);
    let filter = planner.filter(target, request.filter.as_ref())?;
    let sort = planner.sort(target, None, &request.sort)?;
    let branches = planner.branches(target, &request.selection)?;
    for (context, value) in [("limit", request.limit), ("offset", request.offset)] {
        if let Some(v) = value.filter(|v| *v < 0) {
            return Err(TranslateError::invalid_input(context, format!("must not be negative, got {v}")));
        }
    }
    let var = scope.allocate("this")?;
    debug!(
        target = request.target.as_str(),
        branches = branches.len(),
        sort = sort.len(),
        "translate.read"
    );
    let mut block = Block::new();
    match (target, branches.as_slice()) {
        (NodeTarget::Entity(id), [branch]) => {
            let entity = schema.entity(id);
            block.push(Clause::matching(pattern::node(&var, &entity.labels)));
            let after = NodeFilters {
                var: &var,
                filter_target: target,
                entity: id,
                edge: None,
                operation: Operation::Read,
            }
            .push(&mut block, filter.as_ref(), scope)?;
            let order = sort
                .iter()
                .map(|key| {
                    let direction = if key.descending { "DESC" } else { "ASC" };
                    format!("{} {direction}", pattern::property(&var, &key.attribute.property))
                })
                .collect();
            let limit = schema.target_limit(target).effective(request.limit);
            page(&mut block, order, request.offset, limit, scope)?;
            let expr = Projector::new(scope).project(branch, &var, false)?.push_into(&mut block);
            if let Some(validation) = after {
                validation.push_into(&mut block);
            }
            block.push(Clause::returning([format!("{expr} AS {var}")]));
        }
        (_, branches) => {
            let columns: Vec<String> = sort
                .iter()
                .map(|_| scope.allocate("sort"))
                .collect::<Result<_>>()?;
            let mut union = Vec::new();
            for (i, branch) in branches.iter().enumerate() {
                if i > 0 {
                    union.push(Clause::Union);
                }
                let node = scope.allocate("this")?;
                let mut body = Block::new();
                body.push(Clause::matching(pattern::node(&node, &branch.entity.labels)));
                let after = NodeFilters {
                    var: &node,
                    filter_target: target,
                    entity: branch.entity.id,
                    edge: None,
                    operation: Operation::Read,
                }
                .push(&mut body, filter.as_ref(), scope)?;
                let expr = Projector::new(scope).project(branch, &node, true)?.push_into(&mut body);
                if let Some(validation) = after {
                    validation.push_into(&mut body);
                }
                let mut items = vec![format!("{expr} AS {var}")];
                let mut names = vec![var.clone()];
                for (column, key) in columns.iter().zip(&sort) {
                    let property = branch
                        .entity
                        .attribute(&key.attribute.name)
                        .map_or(key.attribute.property.as_str(), |a| a.property.as_str());
                    items.push(format!("{} AS {column}", pattern::property(&node, property)));
                    names.push(column.clone());
                }
                body.push(Clause::with(items));
                body.push(Clause::returning(names));
                union.extend(body.into_clauses());
            }
            if union.is_empty() {
                return Err(TranslateError::invalid_input("type", format!("'{}' has no members", request.target)));
            }
            block.push(Clause::Call(union));
            let limit = schema.target_limit(target).effective(request.limit);
            if !columns.is_empty() || request.offset.is_some() || limit.is_some() {
                block.push(Clause::with(std::iter::once(var.clone()).chain(columns.iter().cloned())));
                let order = columns
                    .iter()
                    .zip(&sort)
                    .map(|(column, key)| format!("{column} {}", if key.descending { "DESC" } else { "ASC" }))
                    .collect();
                page(&mut block, order, request.offset, limit, scope)?;
            }
            block.push(Clause::returning([var.as_str()]));
        }
    }
    Ok(block.into_clauses())
}

fn page(
    block: &mut Block,
    order: Vec<String>,
    offset: Option<i64>,
    limit: Option<i64>,
    scope: &mut CompilationScope<'_>,
) -> Result<()> {
    if !order.is_empty() {
        block.push(Clause::OrderBy(order));
    }
    if let Some(offset) = offset {
        block.push(Clause::Skip(scope.param("param", offset.into())?));
    }
    if let Some(limit) = limit {
        block.push(Clause::Limit(scope.param("param", limit.into())?));
    }
    Ok(())
}

/// Compiles a root aggregate query (`count` plus attribute aggregates).
pub(crate) fn compile_aggregate(request: &AggregateRequest, scope: &mut CompilationScope<'_>) -> Result<Vec<Clause>> {
    let schema = scope.schema;
    let NodeTarget::Entity(id) = schema.node_target(&request.target)? else {
        return Err(TranslateError::invalid_input(
            "type",
            format!("aggregate queries need an entity, '{}' is abstract", request.target),
        ));
    };
    let entity = schema.entity(id);
    let planner = Planner::new(schema);
    let filter = planner.filter(NodeTarget::Entity(id), request.filter.as_ref())?;
    let items = planner.root_aggregate(entity, &request.selection)?;
    let var = scope.allocate("this")?;
    debug!(target = entity.name.as_str(), items = items.len(), "translate.aggregate");
    let mut block = Block::new();
    block.push(Clause::matching(pattern::node(&var, &entity.labels)));
    let after = NodeFilters {
        var: &var,
        filter_target: NodeTarget::Entity(id),
        entity: id,
        edge: None,
        operation: Operation::Aggregate,
    }
    .push(&mut block, filter.as_ref(), scope)?;
    if let Some(validation) = after {
        validation.push_into(&mut block);
    }
    let mut projector = Projector::new(scope);
    let mut fields = Vec::with_capacity(items.len());
    for item in &items {
        fields.push(projector.aggregate_item(item, &var, None)?);
    }
    let record = if fields.is_empty() {
        "{ }".to_owned()
    } else {
        format!("{{ {} }}", fields.join(", "))
    };
    block.push(Clause::returning([format!("{record} AS {var}")]));
    Ok(block.into_clauses())
}
