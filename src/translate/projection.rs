//! Projection compiler.
//!
//! Turns a planned [`Branch`] bound to a variable into a map projection
//! plus the `CALL` subqueries it reads from. Nested selections run in
//! their own subquery so their filters, guards and paging never leak into
//! the enclosing row set.

use std::collections::BTreeMap;

use crate::cypher::{pattern, Block, Clause};
use crate::error::{Result, TranslateError};
use crate::query::filter::FilterTree;
use crate::query::value::Value;
use crate::schema::{Attribute, Cardinality, Entity, NodeTarget, Operation, Relationship};

use super::auth::NodeFilters;
use super::plan::{
    AggregateItem, AggregateSelection, AggregationPlan, Branch, ConnectionItem, ConnectionPlan, EdgeItem,
    FieldAggregate, PlanItem, RelationshipPlan, SortKey, SortSubject,
};
use super::predicate::{CompiledPredicate, EdgeBinding};
use super::scope::{CompilationScope, CLAIMS_PARAM};

/// Map projection and the subqueries feeding it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Projection {
    /// `CALL` blocks to run after the node is bound.
    pub subqueries: Vec<Clause>,
    /// `var { ... }` expression.
    pub expr: String,
}

impl Projection {
    /// Pushes the subqueries and returns the expression.
    pub fn push_into(self, block: &mut Block) -> String {
        block.extend(self.subqueries);
        self.expr
    }
}

/// `var { items }`.
pub(crate) fn map_projection(var: &str, items: &[String]) -> String {
    if items.is_empty() {
        format!("{var} {{ }}")
    } else {
        format!("{var} {{ {} }}", items.join(", "))
    }
}

/// `{ items }`.
fn map_literal(items: &[String]) -> String {
    if items.is_empty() {
        "{ }".to_owned()
    } else {
        format!("{{ {} }}", items.join(", "))
    }
}

/// `.name` when the key and storage property agree, `key: var.prop` otherwise.
pub(crate) fn attribute_item(var: &str, key: &str, attribute: &Attribute) -> String {
    if key == attribute.name && attribute.property == attribute.name {
        format!(".{}", pattern::escape(key))
    } else {
        format!("{}: {}", pattern::map_key(key), pattern::property(var, &attribute.property))
    }
}

/// `ASC`/`DESC` item for a sort key.
fn order_item(expr: String, key: &SortKey<'_>) -> String {
    let direction = if key.descending { "DESC" } else { "ASC" };
    format!("{expr} {direction}")
}

fn collector(rel: &Relationship, var: &str) -> String {
    match rel.cardinality {
        Cardinality::One => format!("head(collect({var}))"),
        Cardinality::Many => format!("collect({var})"),
    }
}

/// Stored property of `key` on `entity`; abstract sort keys are declared on
/// the interface and resolved per member.
fn sort_property<'e>(entity: &'e Entity, key: &'e SortKey<'_>) -> &'e str {
    entity
        .attribute(&key.attribute.name)
        .map_or(key.attribute.property.as_str(), |attr| attr.property.as_str())
}

/// Compiles projections against one scope.
pub(crate) struct Projector<'c, 'a> {
    scope: &'c mut CompilationScope<'a>,
}

impl<'c, 'a> Projector<'c, 'a> {
    pub(crate) fn new(scope: &'c mut CompilationScope<'a>) -> Self {
        Self { scope }
    }

    /// Projects `branch` bound to `var`. Tagged branches carry
    /// `__resolveType` for abstract results.
    pub(crate) fn project(&mut self, branch: &Branch<'_>, var: &str, tagged: bool) -> Result<Projection> {
        let mut items = Vec::with_capacity(branch.plan.items.len() + usize::from(tagged));
        let mut subqueries = Vec::new();
        if tagged {
            items.push(format!("__resolveType: {}", pattern::string_literal(&branch.entity.name)));
        }
        for item in &branch.plan.items {
            match item {
                PlanItem::Typename { key } => {
                    items.push(format!(
                        "{}: {}",
                        pattern::map_key(key),
                        pattern::string_literal(&branch.entity.name)
                    ));
                }
                PlanItem::Attribute { key, attribute } => items.push(attribute_item(var, key, attribute)),
                PlanItem::Computed {
                    key,
                    attribute,
                    arguments,
                } => {
                    let (call, out) = self.computed(var, attribute, arguments)?;
                    subqueries.push(call);
                    items.push(format!("{}: {out}", pattern::map_key(key)));
                }
                PlanItem::Relationship(plan) => {
                    let (call, out) = self.relationship(var, plan)?;
                    subqueries.push(call);
                    items.push(format!("{}: {out}", pattern::map_key(&plan.key)));
                }
                PlanItem::Connection(plan) => {
                    let (call, out) = self.connection(var, plan)?;
                    subqueries.push(call);
                    items.push(format!("{}: {out}", pattern::map_key(&plan.key)));
                }
                PlanItem::Aggregation(plan) => {
                    let (call, out) = self.aggregation(var, plan)?;
                    subqueries.push(call);
                    items.push(format!("{}: {out}", pattern::map_key(&plan.key)));
                }
            }
        }
        Ok(Projection {
            subqueries,
            expr: map_projection(var, &items),
        })
    }

    fn computed(
        &mut self,
        var: &str,
        attribute: &Attribute,
        arguments: &BTreeMap<String, Value>,
    ) -> Result<(Clause, String)> {
        let Some(computed) = &attribute.computed else {
            return Err(TranslateError::Internal("computed projection without a statement"));
        };
        let statement = self.bind_statement(&attribute.name, &computed.statement, arguments)?;
        let out = self.scope.allocate("this")?;
        let mut inner = Block::new();
        inner.push(Clause::with([var]));
        if var != "this" {
            inner.push(Clause::with([format!("{var} AS this")]));
        }
        inner.push(Clause::Raw(statement));
        let mut block = Block::new();
        block.push(Clause::with([var]));
        block.push(inner.into_call());
        block.push(Clause::with([format!("{} AS {out}", pattern::escape(&computed.column))]));
        let collect = if attribute.list {
            format!("collect({out})")
        } else {
            format!("head(collect({out}))")
        };
        block.push(Clause::returning([format!("{collect} AS {out}")]));
        Ok((block.into_call(), out))
    }

    /// Replaces `$name` references with fresh parameters; `$jwt` binds the
    /// caller claims. Quoted strings and identifiers are copied verbatim.
    fn bind_statement(&mut self, field: &str, statement: &str, arguments: &BTreeMap<String, Value>) -> Result<String> {
        let mut out = String::with_capacity(statement.len());
        let mut quote = None;
        let mut chars = statement.char_indices();
        while let Some((pos, c)) = chars.next() {
            if let Some(open) = quote {
                out.push(c);
                if c == '\\' && open != '`' {
                    if let Some((_, escaped)) = chars.next() {
                        out.push(escaped);
                    }
                } else if c == open {
                    quote = None;
                }
                continue;
            }
            match c {
                '\'' | '"' | '`' => {
                    quote = Some(c);
                    out.push(c);
                }
                '$' => {
                    let after = &statement[pos + 1..];
                    let len = after
                        .char_indices()
                        .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
                        .map_or(after.len(), |(i, _)| i);
                    let name = &after[..len];
                    if name == CLAIMS_PARAM {
                        out.push_str(&self.scope.claim(&[]));
                    } else if let Some(value) = arguments.get(name) {
                        out.push_str(&self.scope.param("param", value.clone())?);
                    } else {
                        return Err(TranslateError::invalid_input(
                            "computed",
                            format!("statement of '{field}' references unknown parameter '${name}'"),
                        ));
                    }
                    // Names are ASCII, so bytes and chars agree.
                    for _ in 0..len {
                        chars.next();
                    }
                }
                _ => out.push(c),
            }
        }
        Ok(out)
    }

    /// Pushes `MATCH (parent)-[edge:T]-(node:Label)` and the read filters.
    /// Returns the after-validation still to place.
    #[allow(clippy::too_many_arguments)]
    fn match_related(
        &mut self,
        block: &mut Block,
        parent: &str,
        rel: &Relationship,
        entity: &Entity,
        node: &str,
        edge: Option<&str>,
        filter: Option<&FilterTree>,
        operation: Operation,
    ) -> Result<Option<CompiledPredicate>> {
        let to = pattern::node(node, &entity.labels);
        block.push(Clause::matching(pattern::relationship(
            parent,
            edge.unwrap_or(""),
            &rel.rel_type,
            rel.direction,
            &to,
        )));
        let placement = NodeFilters {
            var: node,
            filter_target: rel.target,
            entity: entity.id,
            edge: edge.map(|var| EdgeBinding {
                var: var.to_owned(),
                relationship: rel.id,
            }),
            operation,
        };
        placement.push(block, filter, self.scope)
    }

    fn paginate(&mut self, block: &mut Block, order: Vec<String>, offset: Option<i64>, limit: Option<i64>) -> Result<()> {
        if !order.is_empty() {
            block.push(Clause::OrderBy(order));
        }
        if let Some(offset) = offset {
            let param = self.scope.param("param", Value::Int(offset))?;
            block.push(Clause::Skip(param));
        }
        if let Some(limit) = limit {
            let param = self.scope.param("param", Value::Int(limit))?;
            block.push(Clause::Limit(param));
        }
        Ok(())
    }

    fn relationship(&mut self, parent: &str, plan: &RelationshipPlan<'_>) -> Result<(Clause, String)> {
        let rel = plan.relationship;
        let result = self.scope.allocate("var")?;
        let mut block = Block::new();
        block.push(Clause::with([parent]));
        match (rel.target, plan.branches.as_slice()) {
            (NodeTarget::Entity(_), [branch]) => {
                let node = self.scope.allocate("this")?;
                let after = self.match_related(
                    &mut block,
                    parent,
                    rel,
                    branch.entity,
                    &node,
                    None,
                    plan.filter.as_ref(),
                    Operation::Read,
                )?;
                let order = plan
                    .sort
                    .iter()
                    .map(|key| order_item(pattern::property(&node, &key.attribute.property), key))
                    .collect();
                self.paginate(&mut block, order, plan.offset, plan.limit)?;
                let expr = self.project(branch, &node, false)?.push_into(&mut block);
                if let Some(validation) = after {
                    validation.push_into(&mut block);
                }
                block.push(Clause::with([format!("{expr} AS {node}")]));
                block.push(Clause::returning([format!("{} AS {result}", collector(rel, &node))]));
            }
            (_, branches) => {
                let row = self.scope.allocate("row")?;
                let columns = self.sort_columns(&plan.sort)?;
                let mut union = Vec::new();
                for (i, branch) in branches.iter().enumerate() {
                    if i > 0 {
                        union.push(Clause::Union);
                    }
                    let mut body = Block::new();
                    body.push(Clause::with([parent]));
                    let node = self.scope.allocate("this")?;
                    let after = self.match_related(
                        &mut body,
                        parent,
                        rel,
                        branch.entity,
                        &node,
                        None,
                        plan.filter.as_ref(),
                        Operation::Read,
                    )?;
                    let expr = self.project(branch, &node, true)?.push_into(&mut body);
                    if let Some(validation) = after {
                        validation.push_into(&mut body);
                    }
                    let mut items = vec![format!("{expr} AS {row}")];
                    for (column, key) in &columns {
                        items.push(format!("{} AS {column}", pattern::property(&node, sort_property(branch.entity, key))));
                    }
                    body.push(Clause::with(items));
                    body.push(Clause::returning(row_names(&row, &columns)));
                    union.extend(body.into_clauses());
                }
                if !union.is_empty() {
                    block.push(Clause::Call(union));
                    if !columns.is_empty() || plan.offset.is_some() || plan.limit.is_some() {
                        block.push(Clause::with(row_names(&row, &columns)));
                        let order = columns.iter().map(|(column, key)| order_item(column.clone(), key)).collect();
                        self.paginate(&mut block, order, plan.offset, plan.limit)?;
                    }
                    block.push(Clause::returning([format!("{} AS {result}", collector(rel, &row))]));
                } else {
                    block.push(Clause::returning([format!("[] AS {result}")]));
                }
            }
        }
        Ok((block.into_call(), result))
    }

    fn sort_columns<'k, 's>(&mut self, sort: &'k [SortKey<'s>]) -> Result<Vec<(String, &'k SortKey<'s>)>> {
        sort.iter()
            .map(|key| Ok((self.scope.allocate("sort")?, key)))
            .collect()
    }

    fn connection(&mut self, parent: &str, plan: &ConnectionPlan<'_>) -> Result<(Clause, String)> {
        let rel = plan.relationship;
        let result = self.scope.allocate("var")?;
        let edges = self.scope.allocate("edges")?;
        let total = self.scope.allocate("totalCount")?;
        let edge_items: &[EdgeItem<'_>] = plan
            .items
            .iter()
            .find_map(|item| match item {
                ConnectionItem::Edges { items, .. } => Some(items.as_slice()),
                ConnectionItem::TotalCount { .. } => None,
            })
            .unwrap_or(&[]);
        let mut block = Block::new();
        block.push(Clause::with([parent]));

        let schema = self.scope.schema;
        let members = schema.members(rel.target);
        let mut union = Vec::new();
        let row = self.scope.allocate("row")?;
        for (i, id) in members.iter().enumerate() {
            let entity = schema.entity(*id);
            if i > 0 {
                union.push(Clause::Union);
            }
            let mut body = Block::new();
            body.push(Clause::with([parent]));
            let node = self.scope.allocate("this")?;
            let edge = self.scope.allocate("edge")?;
            let after = self.match_related(
                &mut body,
                parent,
                rel,
                entity,
                &node,
                Some(&edge),
                plan.filter.as_ref(),
                Operation::Read,
            )?;
            let mut fields = Vec::new();
            for item in edge_items {
                match item {
                    EdgeItem::Node { key, branches } => {
                        let Some(branch) = branches.iter().find(|b| b.entity.id == entity.id) else {
                            return Err(TranslateError::Internal("connection branch missing for member"));
                        };
                        let tagged = matches!(rel.target, NodeTarget::Abstract(_));
                        let expr = self.project(branch, &node, tagged)?.push_into(&mut body);
                        fields.push(format!("{}: {expr}", pattern::map_key(key)));
                    }
                    EdgeItem::Properties { key, attributes } => {
                        let items: Vec<String> = attributes
                            .iter()
                            .map(|(out, attribute)| attribute_item(&edge, out, attribute))
                            .collect();
                        fields.push(format!("{}: {}", pattern::map_key(key), map_projection(&edge, &items)));
                    }
                }
            }
            for (i, key) in plan.sort.iter().enumerate() {
                let expr = match key.subject {
                    SortSubject::Node => pattern::property(&node, sort_property(entity, key)),
                    SortSubject::Edge => pattern::property(&edge, &key.attribute.property),
                };
                fields.push(format!("__sort{i}: {expr}"));
            }
            if let Some(validation) = after {
                validation.push_into(&mut body);
            }
            body.push(Clause::with([format!("{} AS {row}", map_literal(&fields))]));
            body.push(Clause::returning([row.as_str()]));
            union.extend(body.into_clauses());
        }
        if union.is_empty() {
            block.push(Clause::with([format!("[] AS {edges}")]));
        } else {
            block.push(Clause::Call(union));
            block.push(Clause::with([format!("collect({row}) AS {edges}")]));
        }
        block.push(Clause::with([edges.clone(), format!("size({edges}) AS {total}")]));

        let mut output = Vec::new();
        for item in &plan.items {
            match item {
                ConnectionItem::TotalCount { key } => output.push(format!("{}: {total}", pattern::map_key(key))),
                ConnectionItem::Edges { key, items } => {
                    let list = self.scope.allocate("var")?;
                    let edge = self.scope.allocate("edge")?;
                    let mut inner = Block::new();
                    inner.push(Clause::with([edges.as_str()]));
                    inner.push(Clause::Unwind {
                        list: edges.clone(),
                        alias: edge.clone(),
                    });
                    inner.push(Clause::with([edge.as_str()]));
                    let order = plan
                        .sort
                        .iter()
                        .enumerate()
                        .map(|(i, key)| order_item(format!("{edge}.__sort{i}"), key))
                        .collect();
                    self.paginate(&mut inner, order, None, plan.first)?;
                    let fields: Vec<String> = items
                        .iter()
                        .map(|item| {
                            let key = match item {
                                EdgeItem::Node { key, .. } | EdgeItem::Properties { key, .. } => pattern::map_key(key),
                            };
                            format!("{key}: {edge}.{key}")
                        })
                        .collect();
                    inner.push(Clause::returning([format!("collect({}) AS {list}", map_literal(&fields))]));
                    block.push(inner.into_call());
                    output.push(format!("{}: {list}", pattern::map_key(key)));
                }
            }
        }
        block.push(Clause::returning([format!("{} AS {result}", map_literal(&output))]));
        Ok((block.into_call(), result))
    }

    fn aggregation(&mut self, parent: &str, plan: &AggregationPlan<'_>) -> Result<(Clause, String)> {
        let rel = plan.relationship;
        let result = self.scope.allocate("var")?;
        let uses_edge = plan.items.iter().any(|item| matches!(item, AggregateItem::Edge { .. }));
        let mut block = Block::new();
        block.push(Clause::with([parent]));
        let schema = self.scope.schema;
        let members = schema.members(rel.target);
        let node_var;
        let edge_var;
        match (rel.target, members.as_slice()) {
            (NodeTarget::Entity(_), [id]) => {
                let entity = schema.entity(*id);
                node_var = self.scope.allocate("this")?;
                edge_var = if uses_edge { Some(self.scope.allocate("edge")?) } else { None };
                let after = self.match_related(
                    &mut block,
                    parent,
                    rel,
                    entity,
                    &node_var,
                    edge_var.as_deref(),
                    plan.filter.as_ref(),
                    Operation::Aggregate,
                )?;
                if let Some(validation) = after {
                    validation.push_into(&mut block);
                }
            }
            (_, members) => {
                node_var = self.scope.allocate("node")?;
                edge_var = if uses_edge { Some(self.scope.allocate("edge")?) } else { None };
                let mut union = Vec::new();
                for (i, id) in members.iter().enumerate() {
                    if i > 0 {
                        union.push(Clause::Union);
                    }
                    let entity = schema.entity(*id);
                    let mut body = Block::new();
                    body.push(Clause::with([parent]));
                    let node = self.scope.allocate("this")?;
                    let edge = if uses_edge { Some(self.scope.allocate("edge")?) } else { None };
                    let after = self.match_related(
                        &mut body,
                        parent,
                        rel,
                        entity,
                        &node,
                        edge.as_deref(),
                        plan.filter.as_ref(),
                        Operation::Aggregate,
                    )?;
                    if let Some(validation) = after {
                        validation.push_into(&mut body);
                    }
                    let mut items = vec![format!("{node} AS {node_var}")];
                    if let (Some(edge), Some(edge_var)) = (&edge, &edge_var) {
                        items.push(format!("{edge} AS {edge_var}"));
                    }
                    body.push(Clause::returning(items));
                    union.extend(body.into_clauses());
                }
                block.push(Clause::Call(union));
            }
        }
        let mut fields = Vec::new();
        for item in &plan.items {
            fields.push(self.aggregate_item(item, &node_var, edge_var.as_deref())?);
        }
        block.push(Clause::returning([format!("{} AS {result}", map_literal(&fields))]));
        Ok((block.into_call(), result))
    }

    /// `key: expr` for one aggregate selection item.
    pub(crate) fn aggregate_item(&mut self, item: &AggregateItem<'_>, node: &str, edge: Option<&str>) -> Result<String> {
        Ok(match item {
            AggregateItem::Count { key } => format!("{}: count({node})", pattern::map_key(key)),
            AggregateItem::Field(field) => self.field_aggregate(field, node)?,
            AggregateItem::Node { key, fields } => {
                let mut items = Vec::with_capacity(fields.len());
                for field in fields {
                    items.push(self.field_aggregate(field, node)?);
                }
                format!("{}: {}", pattern::map_key(key), map_literal(&items))
            }
            AggregateItem::Edge { key, fields } => {
                let Some(edge) = edge else {
                    return Err(TranslateError::Internal("edge aggregate without an edge variable"));
                };
                let mut items = Vec::with_capacity(fields.len());
                for field in fields {
                    items.push(self.field_aggregate(field, edge)?);
                }
                format!("{}: {}", pattern::map_key(key), map_literal(&items))
            }
        })
    }

    fn field_aggregate(&mut self, field: &FieldAggregate<'_>, var: &str) -> Result<String> {
        let value = pattern::property(var, &field.attribute.property);
        let mut items = Vec::with_capacity(field.selections.len());
        for (key, selection) in &field.selections {
            let expr = match selection {
                AggregateSelection::Min => format!("min({value})"),
                AggregateSelection::Max => format!("max({value})"),
                AggregateSelection::Average => format!("avg({value})"),
                AggregateSelection::Sum => format!("sum({value})"),
                AggregateSelection::Shortest => self.extreme_length(&value, "<")?,
                AggregateSelection::Longest => self.extreme_length(&value, ">")?,
            };
            items.push(format!("{}: {expr}", pattern::map_key(key)));
        }
        Ok(format!("{}: {}", pattern::map_key(&field.key), map_literal(&items)))
    }

    fn extreme_length(&mut self, value: &str, cmp: &str) -> Result<String> {
        let acc = self.scope.allocate("acc")?;
        let item = self.scope.allocate("var")?;
        Ok(format!(
            "reduce({acc} = head(collect({value})), {item} IN collect({value}) | \
             CASE WHEN size({item}) {cmp} size({acc}) THEN {item} ELSE {acc} END)"
        ))
    }
}

fn row_names(row: &str, columns: &[(String, &SortKey<'_>)]) -> Vec<String> {
    std::iter::once(row.to_owned())
        .chain(columns.iter().map(|(column, _)| column.clone()))
        .collect()
}
