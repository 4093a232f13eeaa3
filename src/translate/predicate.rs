//! Filter tree compiler.
//!
//! Every literal becomes a fresh parameter. Null comparisons and the
//! authentication flag are the only inline values. Relationship conditions
//! become `EXISTS`/`COUNT` subquery expressions; aggregate conditions add a
//! `CALL` prelude that must run before the `WHERE` using the expression.

use crate::cypher::{self, pattern, Block, Clause};
use crate::error::{Result, TranslateError};
use crate::query::filter::{
    AggregateFilter, AttributeAggregate, ClaimCondition, FilterTree, Operand, Quantifier,
    RelationshipCondition, ScalarCondition, ScalarOp,
};
use crate::query::value::Value;
use crate::schema::{Attribute, NodeTarget, Relationship};
use crate::types::RelationshipId;

use super::literal;
use super::scope::CompilationScope;

/// Boolean expression plus the subqueries it depends on.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledPredicate {
    /// Expression text.
    pub expr: String,
    /// `CALL` blocks that must precede the `WHERE` evaluating `expr`.
    pub preludes: Vec<Clause>,
}

impl CompiledPredicate {
    /// Predicate without preludes.
    pub fn new(expr: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            preludes: Vec::new(),
        }
    }

    /// Conjunction; `None` when there is nothing to check.
    pub fn all(parts: impl IntoIterator<Item = CompiledPredicate>) -> Option<CompiledPredicate> {
        join(parts.into_iter().collect(), "AND")
    }

    /// Negation.
    pub fn negate(self) -> CompiledPredicate {
        CompiledPredicate {
            expr: format!("NOT ({})", self.expr),
            preludes: self.preludes,
        }
    }

    /// Pushes the preludes and a `WHERE` for the expression.
    pub fn push_into(self, block: &mut Block) {
        block.extend(self.preludes);
        block.push(Clause::Where(self.expr));
    }
}

fn join(mut parts: Vec<CompiledPredicate>, op: &str) -> Option<CompiledPredicate> {
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => {
            let mut preludes = Vec::new();
            let mut exprs = Vec::with_capacity(parts.len());
            for part in parts {
                preludes.extend(part.preludes);
                exprs.push(part.expr);
            }
            Some(CompiledPredicate {
                expr: format!("({})", exprs.join(&format!(" {op} "))),
                preludes,
            })
        }
    }
}

/// Variable bound to a node of a known target type.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeBinding {
    /// Query variable.
    pub var: String,
    /// Type of the bound node.
    pub target: NodeTarget,
}

impl NodeBinding {
    /// Binding for `var`.
    pub fn new(var: impl Into<String>, target: NodeTarget) -> Self {
        Self {
            var: var.into(),
            target,
        }
    }
}

/// Variable bound to a relationship edge.
#[derive(Clone, Debug, PartialEq)]
pub struct EdgeBinding {
    /// Query variable.
    pub var: String,
    /// Relationship the edge belongs to.
    pub relationship: RelationshipId,
}

/// Bindings a filter tree is compiled against.
#[derive(Clone, Debug)]
pub struct FilterContext {
    /// Bound node.
    pub node: NodeBinding,
    /// Edge bound by the enclosing relationship, if any.
    pub edge: Option<EdgeBinding>,
    /// Whether claims operands are permitted (authorization rules only).
    pub allow_claims: bool,
}

impl FilterContext {
    /// Caller filter over a node.
    pub fn node(node: NodeBinding) -> Self {
        Self {
            node,
            edge: None,
            allow_claims: false,
        }
    }

    /// Adds the enclosing edge.
    pub fn with_edge(mut self, edge: Option<EdgeBinding>) -> Self {
        self.edge = edge;
        self
    }

    /// Permits claims operands.
    pub fn with_claims(mut self) -> Self {
        self.allow_claims = true;
        self
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum Subject {
    Node,
    Edge,
}

/// Compiles `tree`; `None` means the tree holds no condition.
pub fn compile_filter(
    tree: &FilterTree,
    ctx: &FilterContext,
    scope: &mut CompilationScope<'_>,
) -> Result<Option<CompiledPredicate>> {
    let stats = tree.stats();
    if stats.nodes > scope.config.max_filter_nodes {
        return Err(TranslateError::FilterTooLarge {
            nodes: stats.nodes,
            max: scope.config.max_filter_nodes,
        });
    }
    if stats.depth > scope.config.max_filter_depth {
        return Err(TranslateError::FilterTooDeep {
            depth: stats.depth,
            max: scope.config.max_filter_depth,
        });
    }
    PredicateCompiler { scope }.compile(tree, ctx, Subject::Node)
}

/// Owner name used in errors for the attributes reachable from `target`.
pub(crate) fn owner_name(scope: &CompilationScope<'_>, target: NodeTarget) -> String {
    scope.schema.target_name(target).to_owned()
}

/// `(var:A OR var:B)` for abstract targets; `None` for entities.
pub(crate) fn member_check(
    scope: &CompilationScope<'_>,
    var: &str,
    target: NodeTarget,
) -> Option<CompiledPredicate> {
    let NodeTarget::Abstract(_) = target else {
        return None;
    };
    let checks: Vec<CompiledPredicate> = scope
        .schema
        .members(target)
        .iter()
        .map(|id| {
            let entity = scope.schema.entity(*id);
            CompiledPredicate::new(format!("{var}{}", pattern::labels(&entity.labels)))
        })
        .collect();
    join(checks, "OR").or_else(|| Some(CompiledPredicate::new("false")))
}

/// Node pattern for a relationship target: labelled for entities,
/// unlabelled for abstract targets.
pub(crate) fn target_node(scope: &CompilationScope<'_>, var: &str, target: NodeTarget) -> String {
    match target {
        NodeTarget::Entity(id) => pattern::node(var, &scope.schema.entity(id).labels),
        NodeTarget::Abstract(_) => pattern::node::<&str>(var, &[]),
    }
}

/// `(from)-[edge:T]->(to:Label)` for a relationship.
pub(crate) fn relationship_pattern(
    scope: &CompilationScope<'_>,
    from: &str,
    edge: &str,
    rel: &Relationship,
    to: &str,
) -> String {
    let to = target_node(scope, to, rel.target);
    pattern::relationship(from, edge, &rel.rel_type, rel.direction, &to)
}

struct PredicateCompiler<'c, 'a> {
    scope: &'c mut CompilationScope<'a>,
}

impl<'c, 'a> PredicateCompiler<'c, 'a> {
    fn compile(
        &mut self,
        tree: &FilterTree,
        ctx: &FilterContext,
        subject: Subject,
    ) -> Result<Option<CompiledPredicate>> {
        match tree {
            FilterTree::Scalar(cond) => self.scalar(cond, ctx, subject).map(Some),
            FilterTree::Relationship(cond) => self.relationship(cond, ctx).map(Some),
            FilterTree::Exists { field, exists } => self.exists(field, *exists, ctx).map(Some),
            FilterTree::Aggregate(cond) => self.aggregate(&cond.field, &cond.filter, ctx).map(Some),
            FilterTree::Claim(cond) => self.claim(cond, ctx).map(Some),
            FilterTree::Guard(guard) => Ok(Some(guard.clone())),
            FilterTree::Edge(child) => {
                if ctx.edge.is_none() {
                    return Err(TranslateError::invalid_input(
                        "filter",
                        "edge conditions are only valid inside relationship filters",
                    ));
                }
                self.compile(child, ctx, Subject::Edge)
            }
            FilterTree::OfType { entity, filter } => self.of_type(entity, filter.as_deref(), ctx),
            FilterTree::And(children) => {
                let mut parts = Vec::with_capacity(children.len());
                for child in children {
                    if let Some(part) = self.compile(child, ctx, subject)? {
                        parts.push(part);
                    }
                }
                Ok(join(parts, "AND"))
            }
            FilterTree::Or(children) => {
                if children.is_empty() {
                    return Ok(Some(CompiledPredicate::new("false")));
                }
                let mark = self.scope.param_mark();
                let mut parts = Vec::with_capacity(children.len());
                let mut unconditional = false;
                for child in children {
                    match self.compile(child, ctx, subject)? {
                        Some(part) => parts.push(part),
                        None => unconditional = true,
                    }
                }
                if unconditional {
                    self.scope.discard_params_since(&mark);
                    return Ok(None);
                }
                Ok(join(parts, "OR"))
            }
            FilterTree::Not(child) => Ok(Some(match self.compile(child, ctx, subject)? {
                Some(inner) => inner.negate(),
                None => CompiledPredicate::new("false"),
            })),
        }
    }

    fn scalar(
        &mut self,
        cond: &ScalarCondition,
        ctx: &FilterContext,
        subject: Subject,
    ) -> Result<CompiledPredicate> {
        let schema = self.scope.schema;
        let (owner, var, attribute) = match subject {
            Subject::Node => (
                owner_name(self.scope, ctx.node.target),
                ctx.node.var.as_str(),
                schema.target_attribute(ctx.node.target, &cond.field),
            ),
            Subject::Edge => {
                let edge = ctx
                    .edge
                    .as_ref()
                    .ok_or(TranslateError::Internal("edge subject without edge binding"))?;
                let rel = schema.relationship(edge.relationship);
                let owner = format!("{}.{}", schema.entity(rel.source).name, rel.field);
                (owner, edge.var.as_str(), rel.property(&cond.field))
            }
        };
        let attribute =
            attribute.ok_or_else(|| TranslateError::unknown_field(owner.clone(), cond.field.clone()))?;
        if attribute.computed.is_some() {
            return Err(TranslateError::NotFilterable {
                owner,
                field: cond.field.clone(),
            });
        }
        check_operator(&owner, attribute, cond.op)?;
        let lhs = pattern::property(var, &attribute.property);
        match &cond.operand {
            Operand::Claim(path) => {
                if !ctx.allow_claims {
                    return Err(TranslateError::ClaimsNotAllowed { owner });
                }
                let claim = self.scope.claim(path);
                let expr = comparison(&lhs, cond.op, &claim, attribute);
                Ok(CompiledPredicate::new(format!("({claim} IS NOT NULL AND {expr})")))
            }
            Operand::Value(Value::Null) => match cond.op {
                ScalarOp::Eq => Ok(CompiledPredicate::new(format!("{lhs} IS NULL"))),
                ScalarOp::NotEq => Ok(CompiledPredicate::new(format!("{lhs} IS NOT NULL"))),
                _ => Err(TranslateError::ValueTypeMismatch {
                    owner,
                    field: cond.field.clone(),
                    expected: "non-null literal",
                    found: "null",
                }),
            },
            Operand::Value(value) => {
                check_operand(&owner, attribute, cond.op, value)?;
                let reference = self.scope.param("param", value.clone())?;
                let rhs = self.wrap_operand(attribute, cond.op, &reference)?;
                Ok(CompiledPredicate::new(comparison(&lhs, cond.op, &rhs, attribute)))
            }
        }
    }

    fn wrap_operand(&mut self, attribute: &Attribute, op: ScalarOp, reference: &str) -> Result<String> {
        let base = op.negated_base().unwrap_or(op);
        match base {
            ScalarOp::Lt | ScalarOp::Lte | ScalarOp::Gt | ScalarOp::Gte | ScalarOp::Distance
                if attribute.kind.is_spatial() =>
            {
                Ok(reference.to_owned())
            }
            ScalarOp::Contains | ScalarOp::StartsWith | ScalarOp::EndsWith | ScalarOp::Matches => {
                Ok(reference.to_owned())
            }
            ScalarOp::In => literal::wrap_param(self.scope, attribute.kind, true, reference),
            ScalarOp::Eq if attribute.list => literal::wrap_param(self.scope, attribute.kind, true, reference),
            _ => literal::wrap_param(self.scope, attribute.kind, false, reference),
        }
    }

    fn relationship_of(&self, ctx: &FilterContext, field: &str) -> Result<&'a Relationship> {
        let schema: &'a crate::schema::Schema = self.scope.schema;
        let owner = schema.target_name(ctx.node.target);
        match ctx.node.target {
            NodeTarget::Entity(entity) => schema
                .relationship_field(entity, field)
                .ok_or_else(|| TranslateError::unknown_field(owner, field)),
            NodeTarget::Abstract(_) => Err(TranslateError::unknown_field(owner, field)),
        }
    }

    fn subquery_body(
        &self,
        pattern_text: &str,
        predicate: Option<CompiledPredicate>,
    ) -> Vec<Clause> {
        let mut body = Block::new();
        body.push(Clause::matching(pattern_text));
        if let Some(predicate) = predicate {
            predicate.push_into(&mut body);
        }
        body.into_clauses()
    }

    fn relationship(&mut self, cond: &RelationshipCondition, ctx: &FilterContext) -> Result<CompiledPredicate> {
        let rel = self.relationship_of(ctx, &cond.field)?;
        let target_var = self.scope.allocate("this")?;
        let edge = match &cond.filter {
            Some(filter) if filter.uses_edge() => Some(EdgeBinding {
                var: self.scope.allocate("edge")?,
                relationship: rel.id,
            }),
            _ => None,
        };
        let edge_var = edge.as_ref().map(|e| e.var.as_str()).unwrap_or_default().to_owned();
        let pattern_text = relationship_pattern(self.scope, &ctx.node.var, &edge_var, rel, &target_var);
        let members = member_check(self.scope, &target_var, rel.target);
        let inner_ctx = FilterContext {
            node: NodeBinding::new(target_var, rel.target),
            edge,
            allow_claims: ctx.allow_claims,
        };
        let inner = match &cond.filter {
            Some(filter) => self.compile(filter, &inner_ctx, Subject::Node)?,
            None => None,
        };
        let matching = CompiledPredicate::all(members.clone().into_iter().chain(inner.clone()));
        let expr = match cond.quantifier {
            Quantifier::Some => {
                cypher::subquery_expression("EXISTS", &self.subquery_body(&pattern_text, matching))
            }
            Quantifier::None => format!(
                "NOT ({})",
                cypher::subquery_expression("EXISTS", &self.subquery_body(&pattern_text, matching))
            ),
            Quantifier::Single => format!(
                "{} = 1",
                cypher::subquery_expression("COUNT", &self.subquery_body(&pattern_text, matching))
            ),
            Quantifier::All => {
                let exists =
                    cypher::subquery_expression("EXISTS", &self.subquery_body(&pattern_text, matching));
                match inner {
                    None => exists,
                    Some(inner) => {
                        let violating = CompiledPredicate::all(members.into_iter().chain([inner.negate()]));
                        let violation = cypher::subquery_expression(
                            "EXISTS",
                            &self.subquery_body(&pattern_text, violating),
                        );
                        format!("({exists} AND NOT ({violation}))")
                    }
                }
            }
        };
        Ok(CompiledPredicate::new(expr))
    }

    fn exists(&mut self, field: &str, exists: bool, ctx: &FilterContext) -> Result<CompiledPredicate> {
        let rel = self.relationship_of(ctx, field)?;
        let target_var = self.scope.allocate("this")?;
        let pattern_text = relationship_pattern(self.scope, &ctx.node.var, "", rel, &target_var);
        let members = member_check(self.scope, &target_var, rel.target);
        let expr = cypher::subquery_expression("EXISTS", &self.subquery_body(&pattern_text, members));
        Ok(CompiledPredicate::new(if exists {
            expr
        } else {
            format!("NOT ({expr})")
        }))
    }

    fn aggregate(&mut self, field: &str, filter: &AggregateFilter, ctx: &FilterContext) -> Result<CompiledPredicate> {
        let rel = self.relationship_of(ctx, field)?;
        let target_var = self.scope.allocate("this")?;
        let edge_var = if filter.uses_edge() {
            self.scope.allocate("edge")?
        } else {
            String::new()
        };
        let pattern_text = relationship_pattern(self.scope, &ctx.node.var, &edge_var, rel, &target_var);
        let members = member_check(self.scope, &target_var, rel.target);
        let expr = self.aggregate_expr(filter, rel, &target_var, &edge_var)?;
        let result = self.scope.allocate("var")?;
        let mut body = Block::new();
        body.push(Clause::with([ctx.node.var.as_str()]));
        body.push(Clause::matching(pattern_text));
        if let Some(members) = members {
            members.push_into(&mut body);
        }
        body.push(Clause::returning([format!("{expr} AS {result}")]));
        Ok(CompiledPredicate {
            expr: format!("{result} = true"),
            preludes: vec![body.into_call()],
        })
    }

    fn aggregate_expr(
        &mut self,
        filter: &AggregateFilter,
        rel: &Relationship,
        target_var: &str,
        edge_var: &str,
    ) -> Result<String> {
        Ok(match filter {
            AggregateFilter::Count { comparator, value } => {
                let reference = self.scope.param("param", value.clone())?;
                format!("count({target_var}) {} {reference}", comparator.symbol())
            }
            AggregateFilter::Node(leaf) => {
                let schema = self.scope.schema;
                let owner = owner_name(self.scope, rel.target);
                let attribute = schema
                    .target_attribute(rel.target, &leaf.field)
                    .ok_or_else(|| TranslateError::unknown_field(owner, leaf.field.clone()))?;
                self.attribute_aggregate(leaf, attribute, target_var)?
            }
            AggregateFilter::Edge(leaf) => {
                let owner = format!("{}.{}", self.scope.schema.entity(rel.source).name, rel.field);
                let attribute = rel
                    .property(&leaf.field)
                    .ok_or_else(|| TranslateError::unknown_field(owner, leaf.field.clone()))?;
                self.attribute_aggregate(leaf, attribute, edge_var)?
            }
            AggregateFilter::And(children) | AggregateFilter::Or(children) => {
                let (op, empty) = match filter {
                    AggregateFilter::And(_) => (" AND ", "true"),
                    _ => (" OR ", "false"),
                };
                let mut exprs = Vec::with_capacity(children.len());
                for child in children {
                    exprs.push(self.aggregate_expr(child, rel, target_var, edge_var)?);
                }
                match exprs.len() {
                    0 => empty.to_owned(),
                    1 => exprs.remove(0),
                    _ => format!("({})", exprs.join(op)),
                }
            }
            AggregateFilter::Not(child) => {
                format!("NOT ({})", self.aggregate_expr(child, rel, target_var, edge_var)?)
            }
        })
    }

    fn attribute_aggregate(
        &mut self,
        leaf: &AttributeAggregate,
        attribute: &Attribute,
        var: &str,
    ) -> Result<String> {
        let mut value_expr = pattern::property(var, &attribute.property);
        if leaf.function.is_length() {
            value_expr = format!("size({value_expr})");
        }
        let reference = self.scope.param("param", leaf.value.clone())?;
        let rhs = if attribute.kind.is_temporal() && !leaf.function.is_length() {
            literal::wrap_param(self.scope, attribute.kind, false, &reference)?
        } else {
            reference
        };
        Ok(format!(
            "{}({value_expr}) {} {rhs}",
            leaf.function.cypher(),
            leaf.comparator.symbol()
        ))
    }

    fn claim(&mut self, cond: &ClaimCondition, ctx: &FilterContext) -> Result<CompiledPredicate> {
        if !ctx.allow_claims {
            return Err(TranslateError::ClaimsNotAllowed {
                owner: owner_name(self.scope, ctx.node.target),
            });
        }
        let claim = self.scope.claim(&cond.path);
        if cond.value.is_null() {
            return match cond.op {
                ScalarOp::Eq => Ok(CompiledPredicate::new(format!("{claim} IS NULL"))),
                ScalarOp::NotEq => Ok(CompiledPredicate::new(format!("{claim} IS NOT NULL"))),
                op => Err(TranslateError::OperatorNotSupported {
                    owner: "$jwt".to_owned(),
                    field: cond.path.join("."),
                    operator: op.name(),
                }),
            };
        }
        let base = cond.op.negated_base().unwrap_or(cond.op);
        if base == ScalarOp::Distance {
            return Err(TranslateError::OperatorNotSupported {
                owner: "$jwt".to_owned(),
                field: cond.path.join("."),
                operator: cond.op.name(),
            });
        }
        let rhs = self.scope.param("param", cond.value.clone())?;
        let expr = match base {
            ScalarOp::Includes => format!("{rhs} IN {claim}"),
            other => format!("{claim} {} {rhs}", infix(other)),
        };
        let expr = if base == cond.op {
            expr
        } else {
            format!("NOT ({expr})")
        };
        Ok(CompiledPredicate::new(format!("({claim} IS NOT NULL AND {expr})")))
    }

    fn of_type(
        &mut self,
        entity: &str,
        filter: Option<&FilterTree>,
        ctx: &FilterContext,
    ) -> Result<Option<CompiledPredicate>> {
        let schema = self.scope.schema;
        let member = schema
            .entity_by_name(entity)
            .filter(|e| schema.members(ctx.node.target).contains(&e.id))
            .ok_or_else(|| TranslateError::UnknownType {
                name: entity.to_owned(),
            })?;
        let label = CompiledPredicate::new(format!("{}{}", ctx.node.var, pattern::labels(&member.labels)));
        let inner = match filter {
            Some(filter) => {
                let member_ctx = FilterContext {
                    node: NodeBinding::new(ctx.node.var.clone(), NodeTarget::Entity(member.id)),
                    edge: ctx.edge.clone(),
                    allow_claims: ctx.allow_claims,
                };
                self.compile(filter, &member_ctx, Subject::Node)?
            }
            None => None,
        };
        Ok(CompiledPredicate::all([label].into_iter().chain(inner)))
    }
}

fn infix(op: ScalarOp) -> &'static str {
    match op {
        ScalarOp::Eq | ScalarOp::NotEq => "=",
        ScalarOp::In | ScalarOp::NotIn => "IN",
        ScalarOp::Lt => "<",
        ScalarOp::Lte => "<=",
        ScalarOp::Gt => ">",
        ScalarOp::Gte => ">=",
        ScalarOp::Contains | ScalarOp::NotContains => "CONTAINS",
        ScalarOp::StartsWith | ScalarOp::NotStartsWith => "STARTS WITH",
        ScalarOp::EndsWith | ScalarOp::NotEndsWith => "ENDS WITH",
        ScalarOp::Matches => "=~",
        ScalarOp::Includes | ScalarOp::NotIncludes => "IN",
        ScalarOp::Distance => "=",
    }
}

fn comparison(lhs: &str, op: ScalarOp, rhs: &str, attribute: &Attribute) -> String {
    let base = op.negated_base().unwrap_or(op);
    let positive = match base {
        ScalarOp::Includes => format!("{rhs} IN {lhs}"),
        ScalarOp::Lt | ScalarOp::Lte | ScalarOp::Gt | ScalarOp::Gte | ScalarOp::Distance
            if attribute.kind.is_spatial() =>
        {
            format!("point.distance({lhs}, point({rhs}.point)) {} {rhs}.distance", infix(base))
        }
        other => format!("{lhs} {} {rhs}", infix(other)),
    };
    if base == op {
        positive
    } else {
        format!("NOT ({positive})")
    }
}

fn check_operator(owner: &str, attribute: &Attribute, op: ScalarOp) -> Result<()> {
    let kind = attribute.kind;
    let base = op.negated_base().unwrap_or(op);
    let supported = match base {
        ScalarOp::Eq => true,
        ScalarOp::In => !attribute.list,
        ScalarOp::Lt | ScalarOp::Lte | ScalarOp::Gt | ScalarOp::Gte => {
            !attribute.list && kind != crate::schema::ScalarKind::Boolean
        }
        ScalarOp::Contains | ScalarOp::StartsWith | ScalarOp::EndsWith | ScalarOp::Matches => {
            !attribute.list && kind.is_textual()
        }
        ScalarOp::Includes => attribute.list,
        ScalarOp::Distance => !attribute.list && kind.is_spatial(),
        _ => false,
    };
    if supported {
        Ok(())
    } else {
        Err(TranslateError::OperatorNotSupported {
            owner: owner.to_owned(),
            field: attribute.name.clone(),
            operator: op.name(),
        })
    }
}

fn check_operand(owner: &str, attribute: &Attribute, op: ScalarOp, value: &Value) -> Result<()> {
    let base = op.negated_base().unwrap_or(op);
    match base {
        ScalarOp::In => match value {
            Value::List(items) => items
                .iter()
                .try_for_each(|item| literal::check_item(owner, attribute, item)),
            other => Err(TranslateError::ValueTypeMismatch {
                owner: owner.to_owned(),
                field: attribute.name.clone(),
                expected: "list",
                found: other.kind_name(),
            }),
        },
        ScalarOp::Includes => literal::check_item(owner, attribute, value),
        ScalarOp::Lt | ScalarOp::Lte | ScalarOp::Gt | ScalarOp::Gte | ScalarOp::Distance
            if attribute.kind.is_spatial() =>
        {
            literal::check_distance(owner, attribute, value)
        }
        _ => literal::check_value(owner, attribute, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranslatorConfig;
    use crate::query::filter::{AggregateCondition, AggregateFunction, Comparator};
    use crate::schema::{AuthContext, Schema};
    use crate::translate::testing::movie_schema;

    fn compile_on(
        schema: &Schema,
        entity: &str,
        tree: &FilterTree,
    ) -> (Result<Option<CompiledPredicate>>, std::collections::BTreeMap<String, Value>) {
        let config = TranslatorConfig::default();
        let auth = AuthContext::anonymous();
        let mut scope = CompilationScope::new(schema, &config, &auth);
        let target = schema.node_target(entity).unwrap();
        let ctx = FilterContext::node(NodeBinding::new("this", target));
        let result = compile_filter(tree, &ctx, &mut scope);
        (result, scope.into_params())
    }

    fn expr(schema: &Schema, entity: &str, tree: FilterTree) -> String {
        compile_on(schema, entity, &tree).0.unwrap().unwrap().expr
    }

    #[test]
    fn scalar_operators_render_with_fresh_params() {
        let schema = movie_schema();
        assert_eq!(expr(&schema, "Movie", FilterTree::eq("title", "Matrix")), "this.title = $param");
        assert_eq!(
            expr(&schema, "Movie", FilterTree::scalar("title", ScalarOp::NotContains, "x")),
            "NOT (this.title CONTAINS $param)"
        );
        assert_eq!(
            expr(&schema, "Movie", FilterTree::scalar("tags", ScalarOp::Includes, "x")),
            "$param IN this.tags"
        );
        assert_eq!(
            expr(&schema, "Movie", FilterTree::eq("title", Value::Null)),
            "this.title IS NULL"
        );
        assert_eq!(
            expr(&schema, "Movie", FilterTree::scalar("released", ScalarOp::Gte, 1999_i64)),
            "this.year >= $param"
        );
    }

    #[test]
    fn temporal_and_spatial_literals_are_wrapped() {
        let schema = movie_schema();
        assert_eq!(
            expr(&schema, "Movie", FilterTree::scalar("premiere", ScalarOp::Lt, "2020-01-01T00:00:00Z")),
            "this.premiere < datetime($param)"
        );
        let near = Value::Map(std::collections::BTreeMap::from([
            (
                "point".to_owned(),
                Value::Map(std::collections::BTreeMap::from([
                    ("longitude".to_owned(), Value::Float(1.0)),
                    ("latitude".to_owned(), Value::Float(2.0)),
                ])),
            ),
            ("distance".to_owned(), Value::Int(100)),
        ]));
        assert_eq!(
            expr(&schema, "Cinema", FilterTree::scalar("location", ScalarOp::Lt, near)),
            "point.distance(this.location, point($param.point)) < $param.distance"
        );
        let (err, _) = compile_on(
            &schema,
            "Movie",
            &FilterTree::scalar("premiere", ScalarOp::Eq, "not a date"),
        );
        assert!(matches!(err.unwrap_err(), TranslateError::InvalidTemporal { .. }));
    }

    #[test]
    fn operator_kind_mismatches_are_rejected() {
        let schema = movie_schema();
        let (result, _) = compile_on(&schema, "Movie", &FilterTree::scalar("released", ScalarOp::Contains, "9"));
        assert_eq!(result.unwrap_err().code(), "OperatorNotSupported");
        let (result, _) = compile_on(&schema, "Movie", &FilterTree::eq("released", "1999"));
        assert_eq!(result.unwrap_err().code(), "TypeMismatch");
        let (result, _) = compile_on(&schema, "Movie", &FilterTree::eq("budget", 1_i64));
        assert_eq!(result.unwrap_err().code(), "UnknownField");
    }

    #[test]
    fn combinators_preserve_shape() {
        let schema = movie_schema();
        let tree = FilterTree::Or(vec![
            FilterTree::eq("title", "a"),
            FilterTree::Not(Box::new(FilterTree::And(vec![
                FilterTree::eq("title", "b"),
                FilterTree::eq("released", 1_i64),
            ]))),
        ]);
        let (result, params) = compile_on(&schema, "Movie", &tree);
        assert_eq!(
            result.unwrap().unwrap().expr,
            "(this.title = $param OR NOT ((this.title = $param0 AND this.year = $param1)))"
        );
        assert_eq!(params.len(), 3);
        assert_eq!(expr(&schema, "Movie", FilterTree::Or(Vec::new())), "false");
        let (empty, _) = compile_on(&schema, "Movie", &FilterTree::And(Vec::new()));
        assert!(empty.unwrap().is_none());
    }

    fn actors(quantifier: Quantifier, filter: Option<FilterTree>) -> FilterTree {
        FilterTree::Relationship(RelationshipCondition {
            field: "actors".into(),
            quantifier,
            filter: filter.map(Box::new),
        })
    }

    #[test]
    fn quantifiers_use_existential_subqueries() {
        let schema = movie_schema();
        let named = || Some(FilterTree::eq("name", "Keanu"));
        assert_eq!(
            expr(&schema, "Movie", actors(Quantifier::Some, named())),
            "EXISTS {\n    MATCH (this)<-[:ACTED_IN]-(this0:Actor)\n    WHERE this0.name = $param\n}"
        );
        assert_eq!(
            expr(&schema, "Movie", actors(Quantifier::None, named())),
            "NOT (EXISTS {\n    MATCH (this)<-[:ACTED_IN]-(this0:Actor)\n    WHERE this0.name = $param\n})"
        );
        assert_eq!(
            expr(&schema, "Movie", actors(Quantifier::Single, named())),
            "COUNT {\n    MATCH (this)<-[:ACTED_IN]-(this0:Actor)\n    WHERE this0.name = $param\n} = 1"
        );
    }

    #[test]
    fn all_is_exists_and_no_violation_with_shared_params() {
        let schema = movie_schema();
        let (result, params) = compile_on(
            &schema,
            "Movie",
            &actors(Quantifier::All, Some(FilterTree::eq("name", "Keanu"))),
        );
        assert_eq!(
            result.unwrap().unwrap().expr,
            "(EXISTS {\n    MATCH (this)<-[:ACTED_IN]-(this0:Actor)\n    WHERE this0.name = $param\n} \
             AND NOT (EXISTS {\n    MATCH (this)<-[:ACTED_IN]-(this0:Actor)\n    WHERE NOT (this0.name = $param)\n}))"
        );
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn edge_filters_bind_the_relationship_variable() {
        let schema = movie_schema();
        let tree = actors(
            Quantifier::Some,
            Some(FilterTree::Edge(Box::new(FilterTree::scalar("role", ScalarOp::StartsWith, "Neo")))),
        );
        assert_eq!(
            expr(&schema, "Movie", tree),
            "EXISTS {\n    MATCH (this)<-[edge:ACTED_IN]-(this0:Actor)\n    WHERE edge.role STARTS WITH $param\n}"
        );
    }

    #[test]
    fn aggregate_conditions_add_a_call_prelude() {
        let schema = movie_schema();
        let tree = FilterTree::Aggregate(AggregateCondition {
            field: "actors".into(),
            filter: AggregateFilter::And(vec![
                AggregateFilter::Count {
                    comparator: Comparator::Gt,
                    value: Value::Int(1),
                },
                AggregateFilter::Node(AttributeAggregate {
                    field: "name".into(),
                    function: AggregateFunction::ShortestLength,
                    comparator: Comparator::Lt,
                    value: Value::Int(5),
                }),
            ]),
        });
        let (result, params) = compile_on(&schema, "Movie", &tree);
        let compiled = result.unwrap().unwrap();
        assert_eq!(compiled.expr, "var = true");
        assert_eq!(
            cypher::render(&compiled.preludes),
            "CALL {\n    WITH this\n    MATCH (this)<-[:ACTED_IN]-(this0:Actor)\n    \
             RETURN (count(this0) > $param AND min(size(this0.name)) < $param0) AS var\n}"
        );
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn existence_and_abstract_targets() {
        let schema = movie_schema();
        let tree = FilterTree::Exists {
            field: "actors".into(),
            exists: false,
        };
        assert_eq!(
            expr(&schema, "Movie", tree),
            "NOT (EXISTS {\n    MATCH (this)<-[:ACTED_IN]-(this0:Actor)\n})"
        );
        let tree = FilterTree::Relationship(RelationshipCondition {
            field: "actedIn".into(),
            quantifier: Quantifier::Some,
            filter: Some(Box::new(FilterTree::OfType {
                entity: "Movie".into(),
                filter: Some(Box::new(FilterTree::eq("released", 1999_i64))),
            })),
        });
        assert_eq!(
            expr(&schema, "Actor", tree),
            "EXISTS {\n    MATCH (this)-[:ACTED_IN]->(this0)\n    \
             WHERE ((this0:Movie OR this0:Series) AND (this0:Movie AND this0.year = $param))\n}"
        );
    }

    #[test]
    fn claims_require_rule_context() {
        let schema = movie_schema();
        let tree = FilterTree::Scalar(ScalarCondition {
            field: "title".into(),
            op: ScalarOp::Eq,
            operand: Operand::Claim(vec!["sub".into()]),
        });
        let (result, _) = compile_on(&schema, "Movie", &tree);
        assert_eq!(result.unwrap_err().code(), "ClaimsNotAllowed");

        let config = TranslatorConfig::default();
        let auth = AuthContext::anonymous();
        let mut scope = CompilationScope::new(&schema, &config, &auth);
        let target = schema.node_target("Movie").unwrap();
        let ctx = FilterContext::node(NodeBinding::new("this", target)).with_claims();
        let compiled = compile_filter(&tree, &ctx, &mut scope).unwrap().unwrap();
        assert_eq!(compiled.expr, "($jwt.sub IS NOT NULL AND this.title = $jwt.sub)");
        let params = scope.into_params();
        assert!(params.contains_key("jwt"));
    }

    #[test]
    fn filter_limits_are_enforced() {
        let schema = movie_schema();
        let mut tree = FilterTree::eq("title", "a");
        for _ in 0..80 {
            tree = FilterTree::Not(Box::new(tree));
        }
        let (result, _) = compile_on(&schema, "Movie", &tree);
        assert_eq!(result.unwrap_err().code(), "FilterTooDeep");
    }
}
