//! Nested connect, disconnect and connectOrCreate.
//!
//! Connect binds the target through its own filter and writes the edge
//! with `MERGE` when the relationship must stay unique per node pair (or
//! is single-valued), `CREATE` otherwise. Both endpoints' connect rules
//! apply.

use crate::cypher::{pattern, Block, Clause};
use crate::error::{Result, TranslateError};
use crate::query::filter::FilterTree;
use crate::schema::{Entity, GuardPhase, NodeTarget, Operation, Relationship};
use crate::translate::auth::{push_validation, NodeFilters};
use crate::translate::literal;
use crate::translate::predicate::EdgeBinding;

use super::{Assignment, AssignmentValue, NestedOp, Stage, StageTracker, Writer};

impl Writer<'_, '_> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn connect(
        &mut self,
        parent: &str,
        parent_entity: &Entity,
        rel: &Relationship,
        target: &Entity,
        filter: Option<&FilterTree>,
        edge: &[Assignment<'_>],
        nested: &[NestedOp<'_>],
    ) -> Result<Clause> {
        let mut tracker = StageTracker::new("connect");
        let var = self.scope.allocate("this")?;
        let mut block = Block::new();
        block.push(Clause::with([parent]));
        block.push(Clause::matching(pattern::node(&var, &target.labels)));
        let after = NodeFilters {
            var: &var,
            filter_target: NodeTarget::Entity(target.id),
            entity: target.id,
            edge: None,
            operation: Operation::Connect,
        }
        .push(&mut block, filter, self.scope)?;
        push_validation(&mut block, parent_entity.id, Operation::Connect, GuardPhase::Before, parent, self.scope)?;
        tracker.advance(Stage::Guarded)?;

        let edge_var = if edge.is_empty() {
            String::new()
        } else {
            self.scope.allocate("edge")?
        };
        let edge_pattern = pattern::relationship(parent, &edge_var, &rel.rel_type, rel.direction, &format!("({var})"));
        block.push(if rel.connects_idempotently() {
            Clause::Merge(edge_pattern)
        } else {
            Clause::Create(edge_pattern)
        });
        self.push_set(&mut block, &edge_var, edge)?;
        self.push_all_nested(&mut block, &var, target, nested)?;
        tracker.advance(Stage::Applied)?;

        if let Some(validation) = after {
            validation.push_into(&mut block);
        }
        push_validation(&mut block, parent_entity.id, Operation::Connect, GuardPhase::After, parent, self.scope)?;
        tracker.finish()?;
        self.close_unit(block)
    }

    pub(crate) fn disconnect(
        &mut self,
        parent: &str,
        parent_entity: &Entity,
        rel: &Relationship,
        target: &Entity,
        filter: Option<&FilterTree>,
        nested: &[NestedOp<'_>],
    ) -> Result<Clause> {
        let mut tracker = StageTracker::new("disconnect");
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
            operation: Operation::Disconnect,
        }
        .push(&mut block, filter, self.scope)?;
        push_validation(&mut block, parent_entity.id, Operation::Disconnect, GuardPhase::Before, parent, self.scope)?;
        tracker.advance(Stage::Guarded)?;

        self.push_all_nested(&mut block, &var, target, nested)?;
        block.push(Clause::Delete {
            items: vec![edge_var],
            detach: false,
        });
        tracker.advance(Stage::Applied)?;

        if let Some(validation) = after {
            validation.push_into(&mut block);
        }
        push_validation(&mut block, parent_entity.id, Operation::Disconnect, GuardPhase::After, parent, self.scope)?;
        tracker.finish()?;
        self.close_unit(block)
    }

    /// Merges the target by its unique key, fills `on_create` only when the
    /// node is new, then merges the edge. The target's create rules apply
    /// alongside the connect rules of both endpoints.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn connect_or_create(
        &mut self,
        parent: &str,
        parent_entity: &Entity,
        rel: &Relationship,
        target: &Entity,
        key: &[Assignment<'_>],
        on_create: &[Assignment<'_>],
        edge: &[Assignment<'_>],
    ) -> Result<Clause> {
        let mut tracker = StageTracker::new("connectOrCreate");
        let var = self.scope.allocate("this")?;
        let mut properties = Vec::with_capacity(key.len());
        for assignment in key {
            let attribute = assignment.attribute;
            let AssignmentValue::Literal(value) = &assignment.value else {
                return Err(TranslateError::invalid_input(
                    "connectOrCreate",
                    format!("{}.{} must be matched by a literal", target.name, attribute.name),
                ));
            };
            let param = self.scope.param("param", value.clone())?;
            let wrapped = literal::wrap_param(self.scope, attribute.kind, attribute.list, &param)?;
            properties.push(format!("{}: {wrapped}", pattern::map_key(&attribute.property)));
        }
        let mut block = Block::new();
        block.push(Clause::with([parent]));
        block.push(Clause::Merge(format!(
            "({var}{} {{ {} }})",
            pattern::labels(&target.labels),
            properties.join(", ")
        )));
        let on_create = self.set_items(&var, on_create)?;
        if !on_create.is_empty() {
            block.push(Clause::OnCreateSet(on_create));
        }
        push_validation(&mut block, target.id, Operation::Create, GuardPhase::Before, &var, self.scope)?;
        push_validation(&mut block, parent_entity.id, Operation::Connect, GuardPhase::Before, parent, self.scope)?;
        push_validation(&mut block, target.id, Operation::Connect, GuardPhase::Before, &var, self.scope)?;
        tracker.advance(Stage::Guarded)?;

        let edge_var = if edge.is_empty() {
            String::new()
        } else {
            self.scope.allocate("edge")?
        };
        block.push(Clause::Merge(pattern::relationship(
            parent,
            &edge_var,
            &rel.rel_type,
            rel.direction,
            &format!("({var})"),
        )));
        self.push_set(&mut block, &edge_var, edge)?;
        tracker.advance(Stage::Applied)?;

        push_validation(&mut block, target.id, Operation::Create, GuardPhase::After, &var, self.scope)?;
        push_validation(&mut block, target.id, Operation::Connect, GuardPhase::After, &var, self.scope)?;
        push_validation(&mut block, parent_entity.id, Operation::Connect, GuardPhase::After, parent, self.scope)?;
        tracker.finish()?;
        self.close_unit(block)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::TranslatorConfig;
    use crate::cypher::render;
    use crate::query::request::Request;
    use crate::schema::{AuthContext, Schema};
    use crate::translate::mutation::compile_update;
    use crate::translate::scope::CompilationScope;
    use crate::translate::testing::{movie_schema, MOVIES};

    fn update(json: &str) -> String {
        update_in(&movie_schema(), json)
    }

    fn update_in(schema: &Schema, json: &str) -> String {
        let config = TranslatorConfig::default();
        let auth = AuthContext::anonymous();
        let mut scope = CompilationScope::new(schema, &config, &auth);
        let Request::Update(request) = serde_json::from_str(json).unwrap() else {
            panic!("expected update");
        };
        render(&compile_update(&request, &mut scope).unwrap())
    }

    #[test]
    fn unique_pairs_connect_with_merge() {
        assert_eq!(
            update(
                r#"{"operation": "update", "type": "Movie", "where": {"id": "1"},
                    "update": {"genres": {"connect": [{"where": {"node": {"name": "Noir"}}}]}}}"#
            ),
            "MATCH (this:Movie)\n\
             WHERE this.id = $param\n\
             CALL {\n    \
                 WITH this\n    \
                 MATCH (this0:Genre)\n    \
                 WHERE this0.name = $param0\n    \
                 MERGE (this)-[:IN_GENRE]->(this0)\n    \
                 RETURN count(*) AS var\n\
             }\n\
             RETURN collect(DISTINCT this { }) AS data"
        );
    }

    #[test]
    fn plain_connect_creates_the_edge_with_properties() {
        let cypher = update(
            r#"{"operation": "update", "type": "Movie",
                "update": {"actors": {"connect": {"where": {"node": {"name": "Keanu"}}, "edge": {"role": "Neo"}}}}}"#,
        );
        assert!(cypher.contains(
            "    MATCH (this0:Actor)\n    WHERE this0.name = $param\n    CREATE (this)<-[edge:ACTED_IN]-(this0)\n    SET edge.role = $param0\n    RETURN count(*) AS var\n"
        ), "{cypher}");
    }

    #[test]
    fn single_valued_connect_is_checked_afterwards() {
        let cypher = update(
            r#"{"operation": "update", "type": "Movie",
                "update": {"director": {"connect": {"where": {"node": {"name": "Mann"}}}}}}"#,
        );
        assert!(cypher.contains("MERGE (this)<-[:DIRECTED]-(this0)"));
        assert!(cypher.contains("validatePredicate(NOT (var0 <= 1)"), "{cypher}");
        assert!(cypher.contains("[\"Movie.director allowed at most once\"]"));
    }

    #[test]
    fn disconnect_deletes_only_the_edge() {
        let cypher = update(
            r#"{"operation": "update", "type": "Movie",
                "update": {"actors": {"disconnect": {"where": {"node": {"name": "Keanu"}}}}}}"#,
        );
        assert!(cypher.contains(
            "    MATCH (this)<-[edge:ACTED_IN]-(this0:Actor)\n    WHERE this0.name = $param\n    DELETE edge\n    RETURN count(*) AS var\n"
        ), "{cypher}");
    }

    #[test]
    fn connect_or_create_merges_by_key() {
        let cypher = update(
            r#"{"operation": "update", "type": "Movie",
                "update": {"genres": {"connectOrCreate": {"where": {"node": {"name": "Noir"}}}}}}"#,
        );
        assert!(cypher.contains(
            "    WITH this\n    MERGE (this0:Genre { name: $param })\n    MERGE (this)-[:IN_GENRE]->(this0)\n    RETURN count(*) AS var\n"
        ), "{cypher}");
    }

    /// Fixture schema with a create rule on Genre.
    fn guarded_genres() -> Schema {
        let mut def: serde_json::Value = serde_json::from_str(MOVIES).unwrap();
        let genre = def["entities"]
            .as_array_mut()
            .unwrap()
            .iter_mut()
            .find(|entity| entity["name"] == "Genre")
            .unwrap();
        genre["rules"] = serde_json::json!([{
            "operations": ["create"],
            "kind": "validate_before",
            "requires_authentication": true,
            "where": {"name": "$jwt.sub"}
        }]);
        Schema::from_json_str(&def.to_string()).unwrap()
    }

    #[test]
    fn connect_or_create_checks_create_rules_before_the_edge() {
        let cypher = update_in(
            &guarded_genres(),
            r#"{"operation": "update", "type": "Movie",
                "update": {"genres": {"connectOrCreate": {"where": {"node": {"name": "Noir"}}}}}}"#,
        );
        let merge = cypher.find("MERGE (this0:Genre { name: $param })").unwrap();
        let guard = cypher
            .find("validatePredicate(NOT (($isAuthenticated = true AND ($jwt.sub IS NOT NULL AND this0.name = $jwt.sub))")
            .unwrap_or_else(|| panic!("{cypher}"));
        let edge = cypher.find("MERGE (this)-[:IN_GENRE]->(this0)").unwrap();
        assert!(merge < guard && guard < edge, "{cypher}");
    }

    #[test]
    fn connect_or_create_matches_on_generated_ids() {
        let cypher = update(
            r#"{"operation": "update", "type": "User",
                "update": {"posts": {"connectOrCreate": {"where": {"node": {"id": "p1"}},
                                                         "onCreate": {"node": {"content": "hi"}}}}}}"#,
        );
        assert!(cypher.contains("MERGE (this0:Post { id: $param })"), "{cypher}");
        assert!(cypher.contains("this0.content = $param0"), "{cypher}");
        assert!(!cypher.contains("this0.id = randomUUID()"), "{cypher}");
    }

    #[test]
    fn connect_or_create_rejects_plain_and_null_keys() {
        let schema = movie_schema();
        let config = TranslatorConfig::default();
        let auth = AuthContext::anonymous();
        let code = |json: &str| {
            let mut scope = CompilationScope::new(&schema, &config, &auth);
            let Request::Update(request) = serde_json::from_str(json).unwrap() else {
                panic!("expected update");
            };
            compile_update(&request, &mut scope).unwrap_err().code()
        };
        assert_eq!(
            code(r#"{"operation": "update", "type": "User",
                     "update": {"posts": {"connectOrCreate": {"where": {"node": {"content": "hi"}}}}}}"#),
            "NotUniqueKey"
        );
        assert_eq!(
            code(r#"{"operation": "update", "type": "Movie",
                     "update": {"genres": {"connectOrCreate": {"where": {"node": {"name": null}}}}}}"#),
            "InvalidInput"
        );
    }
}
