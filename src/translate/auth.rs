//! Authorization guard compiler.
//!
//! Rules are entity-scoped and injected automatically. Validation rules
//! become `apoc.util.validatePredicate` calls that abort the whole query
//! with `<namespace>/FORBIDDEN`; filter rules become plain predicates merged
//! with the caller filter.

use tracing::trace;

use crate::cypher::{pattern, Block};
use crate::error::Result;
use crate::query::filter::FilterTree;
use crate::schema::{AuthorizationRule, GuardPhase, NodeTarget, Operation, RuleKind};
use crate::types::EntityId;

use super::predicate::{compile_filter, CompiledPredicate, EdgeBinding, FilterContext, NodeBinding};
use super::scope::CompilationScope;

/// Guards compiled for one entity, operation and phase.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GuardSet {
    /// Filter-rule predicate; rows failing it are dropped.
    pub filter: Option<CompiledPredicate>,
    /// Validation predicate; rows failing it abort the query.
    pub validation: Option<CompiledPredicate>,
}

/// Compiles the rules of `entity` governing `operation` in `phase`, bound
/// to `node`.
///
/// `Before` yields `validate_before` rules. `After` yields `filter` rules
/// (as [`GuardSet::filter`]) and `validate_after` rules.
pub fn guards_for(
    entity: EntityId,
    operation: Operation,
    phase: GuardPhase,
    node: &NodeBinding,
    scope: &mut CompilationScope<'_>,
) -> Result<GuardSet> {
    let schema = scope.schema;
    let rules = &schema.entity(entity).rules;
    let mut filters = Vec::new();
    let mut validations = Vec::new();
    for rule in rules {
        if !rule.applies_to(operation) || rule.kind.phase() != phase {
            continue;
        }
        let Some(predicate) = rule_predicate(rule, node, entity, scope)? else {
            continue;
        };
        match rule.kind {
            RuleKind::Filter => filters.push(predicate),
            RuleKind::ValidateBefore | RuleKind::ValidateAfter => validations.push(predicate),
        }
    }
    trace!(
        entity = schema.entity(entity).name.as_str(),
        operation = operation.as_str(),
        filters = filters.len(),
        validations = validations.len(),
        "auth.guards"
    );
    let validation = CompiledPredicate::all(validations).map(|guard| validate(guard, scope));
    Ok(GuardSet {
        filter: CompiledPredicate::all(filters),
        validation,
    })
}

fn rule_predicate(
    rule: &AuthorizationRule,
    node: &NodeBinding,
    entity: EntityId,
    scope: &mut CompilationScope<'_>,
) -> Result<Option<CompiledPredicate>> {
    let mut parts = Vec::with_capacity(2);
    if rule.requires_authentication {
        parts.push(CompiledPredicate::new(scope.authenticated_check()));
    }
    if let Some(tree) = &rule.predicate {
        let ctx = FilterContext::node(NodeBinding::new(node.var.clone(), NodeTarget::Entity(entity))).with_claims();
        parts.extend(compile_filter(tree, &ctx, scope)?);
    }
    Ok(CompiledPredicate::all(parts))
}

fn validate(guard: CompiledPredicate, scope: &CompilationScope<'_>) -> CompiledPredicate {
    let message = pattern::string_literal(&scope.config.forbidden_message());
    CompiledPredicate {
        expr: format!("apoc.util.validatePredicate(NOT ({}), {message}, [0])", guard.expr),
        preludes: guard.preludes,
    }
}

/// Filter and guard placement for one bound node.
pub(crate) struct NodeFilters<'f> {
    /// Variable bound by the preceding clause.
    pub var: &'f str,
    /// Type the caller filter was resolved against.
    pub filter_target: NodeTarget,
    /// Concrete entity whose rules apply.
    pub entity: EntityId,
    /// Enclosing edge, for connection filters.
    pub edge: Option<EdgeBinding>,
    /// Operation the rules are selected for.
    pub operation: Operation,
}

impl NodeFilters<'_> {
    /// Pushes the guards of the operation and the caller filter.
    ///
    /// Order: before-validation right after the binding clause, then the
    /// non-traversing caller conjuncts, then the traversing conjuncts merged
    /// with filter rules. The after-validation is returned for the caller to
    /// place once the effect is compiled.
    pub(crate) fn push(
        &self,
        block: &mut Block,
        filter: Option<&FilterTree>,
        scope: &mut CompilationScope<'_>,
    ) -> Result<Option<CompiledPredicate>> {
        let binding = NodeBinding::new(self.var, NodeTarget::Entity(self.entity));
        let before = guards_for(self.entity, self.operation, GuardPhase::Before, &binding, scope)?;
        if let Some(validation) = before.validation {
            validation.push_into(block);
        }
        let ctx = FilterContext::node(NodeBinding::new(self.var, self.filter_target)).with_edge(self.edge.clone());
        let (pushdown, residual) = match filter {
            Some(tree) => tree.clone().split_pushdown(),
            None => (None, None),
        };
        if let Some(tree) = pushdown {
            if let Some(predicate) = compile_filter(&tree, &ctx, scope)? {
                predicate.push_into(block);
            }
        }
        let after = guards_for(self.entity, self.operation, GuardPhase::After, &binding, scope)?;
        let residual = match residual {
            Some(tree) => compile_filter(&tree, &ctx, scope)?,
            None => None,
        };
        if let Some(predicate) = CompiledPredicate::all(residual.into_iter().chain(after.filter)) {
            predicate.push_into(block);
        }
        Ok(after.validation)
    }
}

/// Pushes the validation rules of `operation` for an already bound node.
pub(crate) fn push_validation(
    block: &mut Block,
    entity: EntityId,
    operation: Operation,
    phase: GuardPhase,
    var: &str,
    scope: &mut CompilationScope<'_>,
) -> Result<()> {
    let binding = NodeBinding::new(var, NodeTarget::Entity(entity));
    if let Some(validation) = guards_for(entity, operation, phase, &binding, scope)?.validation {
        validation.push_into(block);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranslatorConfig;
    use crate::cypher::{render, Clause};
    use crate::query::value::Value;
    use crate::schema::{AuthContext, Schema};
    use crate::translate::testing::movie_schema;
    use std::collections::BTreeMap;

    fn account(schema: &Schema) -> EntityId {
        schema.entity_by_name("Account").unwrap().id
    }

    #[test]
    fn validations_guard_against_missing_claims() {
        let schema = movie_schema();
        let config = TranslatorConfig::default();
        let auth = AuthContext::with_claims(BTreeMap::from([("sub".to_owned(), Value::from("u1"))]));
        let mut scope = CompilationScope::new(&schema, &config, &auth);
        let node = NodeBinding::new("this", NodeTarget::Entity(account(&schema)));
        let guards = guards_for(account(&schema), Operation::Update, GuardPhase::Before, &node, &mut scope).unwrap();
        assert!(guards.filter.is_none());
        assert_eq!(
            guards.validation.unwrap().expr,
            "apoc.util.validatePredicate(NOT (($isAuthenticated = true AND ($jwt.sub IS NOT NULL AND this.ownerId = $jwt.sub))), \
             \"@gqlcypher/FORBIDDEN\", [0])"
        );
        let params = scope.into_params();
        assert_eq!(params.get("isAuthenticated"), Some(&Value::Bool(true)));
        assert!(params.contains_key("jwt"));
    }

    #[test]
    fn filter_rules_come_back_as_plain_predicates() {
        let schema = movie_schema();
        let config = TranslatorConfig::default();
        let auth = AuthContext::anonymous();
        let mut scope = CompilationScope::new(&schema, &config, &auth);
        let node = NodeBinding::new("this", NodeTarget::Entity(account(&schema)));
        let guards = guards_for(account(&schema), Operation::Aggregate, GuardPhase::After, &node, &mut scope).unwrap();
        assert!(guards.validation.is_none());
        assert_eq!(
            guards.filter.unwrap().expr,
            "(($jwt.sub IS NOT NULL AND this.ownerId = $jwt.sub) OR ($jwt.roles IS NOT NULL AND $param IN $jwt.roles))"
        );
    }

    #[test]
    fn unguarded_entities_add_nothing() {
        let schema = movie_schema();
        let config = TranslatorConfig::default();
        let auth = AuthContext::anonymous();
        let mut scope = CompilationScope::new(&schema, &config, &auth);
        let movie = schema.entity_by_name("Movie").unwrap().id;
        let node = NodeBinding::new("this", NodeTarget::Entity(movie));
        let guards = guards_for(movie, Operation::Read, GuardPhase::Before, &node, &mut scope).unwrap();
        assert_eq!(guards, GuardSet::default());
        assert_eq!(scope.param_count(), 0);
    }

    #[test]
    fn before_guard_comes_right_after_the_binding() {
        let schema = movie_schema();
        let config = TranslatorConfig::default();
        let auth = AuthContext::anonymous();
        let mut scope = CompilationScope::new(&schema, &config, &auth);
        let entity = account(&schema);
        let filter = FilterTree::eq("name", "x");
        let mut block = Block::new();
        block.push(Clause::matching("(this:Account)"));
        let placement = NodeFilters {
            var: "this",
            filter_target: NodeTarget::Entity(entity),
            entity,
            edge: None,
            operation: Operation::Read,
        };
        let after = placement.push(&mut block, Some(&filter), &mut scope).unwrap();
        assert!(after.is_none());
        assert_eq!(
            render(block.clauses()),
            "MATCH (this:Account)\n\
             WHERE apoc.util.validatePredicate(NOT (($jwt.sub IS NOT NULL AND this.ownerId = $jwt.sub)), \"@gqlcypher/FORBIDDEN\", [0])\n\
             WITH *\n\
             WHERE this.name = $param"
        );
    }
}
