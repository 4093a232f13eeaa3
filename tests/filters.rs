#![allow(missing_docs)]

mod common;

use common::{error_code, translate};
use gqlcypher::query::Value;
use serde_json::json;

fn where_clause(filter: serde_json::Value) -> String {
    let translation = translate(json!({"operation": "read", "type": "Movie", "where": filter}));
    translation
        .cypher
        .strip_prefix("MATCH (this:Movie)\n")
        .and_then(|rest| rest.strip_suffix("\nRETURN this { } AS this"))
        .unwrap_or_else(|| panic!("unexpected shape:\n{}", translation.cypher))
        .to_owned()
}

#[test]
fn implicit_keys_and_together_before_explicit_combinators() {
    assert_eq!(
        where_clause(json!({"title": "a", "released_GT": 1990, "OR": [{"title": "b"}, {"title": "c"}]})),
        "WHERE ((this.title = $param AND this.year > $param0) AND (this.title = $param1 OR this.title = $param2))"
    );
}

#[test]
fn every_literal_becomes_one_parameter() {
    let translation = translate(json!({
        "operation": "read",
        "type": "Movie",
        "where": {
            "title_STARTS_WITH": "The",
            "tags_INCLUDES": "noir",
            "released_IN": [1995, 1999],
            "NOT": {"rating_LT": 5.5}
        }
    }));
    assert_eq!(translation.params.len(), 4);
    assert_eq!(translation.params.get("param1"), Some(&Value::List(vec![Value::Int(1995), Value::Int(1999)])));
    assert!(translation.cypher.contains("this.title STARTS WITH $param"));
    assert!(translation.cypher.contains("$param0 IN this.tags"));
    assert!(translation.cypher.contains("this.year IN $param1"));
    assert!(translation.cypher.contains("NOT (this.rating < $param2)"));
}

#[test]
fn null_equality_is_inlined() {
    let translation = translate(json!({"operation": "read", "type": "Movie", "where": {"title": null}}));
    assert!(translation.cypher.contains("WHERE this.title IS NULL"));
    assert!(translation.params.is_empty());
}

#[test]
fn temporal_literals_use_constructors() {
    assert_eq!(
        where_clause(json!({"premiere_LT": "2020-01-01T00:00:00Z"})),
        "WHERE this.premiere < datetime($param)"
    );
    assert_eq!(error_code(json!({"operation": "read", "type": "Movie", "where": {"premiere": "soon"}})), "TypeMismatch");
}

#[test]
fn relationship_quantifiers() {
    assert_eq!(
        where_clause(json!({"actors_SOME": {"name": "Keanu"}})),
        "WHERE EXISTS {\n    MATCH (this)<-[:ACTED_IN]-(this0:Actor)\n    WHERE this0.name = $param\n}"
    );
    assert_eq!(
        where_clause(json!({"actors_NONE": {"name": "Keanu"}})),
        "WHERE NOT (EXISTS {\n    MATCH (this)<-[:ACTED_IN]-(this0:Actor)\n    WHERE this0.name = $param\n})"
    );
    assert_eq!(
        where_clause(json!({"actors_SINGLE": {"name": "Keanu"}})),
        "WHERE COUNT {\n    MATCH (this)<-[:ACTED_IN]-(this0:Actor)\n    WHERE this0.name = $param\n} = 1"
    );
}

#[test]
fn all_requires_a_witness() {
    let translation = translate(json!({"operation": "read", "type": "Movie", "where": {"actors_ALL": {"name": "Keanu"}}}));
    let cypher = &translation.cypher;
    assert!(cypher.contains("(EXISTS {"), "{cypher}");
    assert!(cypher.contains("AND NOT (EXISTS {"));
    assert!(cypher.contains("WHERE NOT (this0.name = $param)"));
    assert_eq!(translation.params.len(), 1, "the nested predicate is compiled once");
}

#[test]
fn relationship_existence() {
    assert_eq!(
        where_clause(json!({"actors": null})),
        "WHERE NOT (EXISTS {\n    MATCH (this)<-[:ACTED_IN]-(this0:Actor)\n})"
    );
    assert_eq!(
        where_clause(json!({"actors_NOT": null})),
        "WHERE EXISTS {\n    MATCH (this)<-[:ACTED_IN]-(this0:Actor)\n}"
    );
}

#[test]
fn traversing_conjuncts_follow_local_ones() {
    let translation = translate(json!({
        "operation": "read",
        "type": "Movie",
        "where": {"actors_SOME": {"name": "Keanu"}, "title": "Matrix"}
    }));
    let local = translation.cypher.find("this.title = $param").unwrap();
    let traversal = translation.cypher.find("EXISTS").unwrap();
    assert!(local < traversal, "{}", translation.cypher);
}

#[test]
fn aggregate_filters_use_a_prelude() {
    let translation = translate(json!({
        "operation": "read",
        "type": "Movie",
        "where": {"actorsAggregate": {"count_GT": 1, "node": {"name_SHORTEST_LENGTH_LT": 4}}}
    }));
    assert_eq!(
        translation.cypher,
        "MATCH (this:Movie)\n\
         CALL {\n    \
             WITH this\n    \
             MATCH (this)<-[:ACTED_IN]-(this0:Actor)\n    \
             RETURN (count(this0) > $param AND min(size(this0.name)) < $param0) AS var\n\
         }\n\
         WITH *\n\
         WHERE var = true\n\
         RETURN this { } AS this"
    );
}

#[test]
fn caller_filters_cannot_read_claims() {
    assert_eq!(
        error_code(json!({"operation": "read", "type": "Movie", "where": {"$jwt": {"roles_INCLUDES": "admin"}}})),
        "ClaimsNotAllowed"
    );
}

#[test]
fn unknown_and_unsupported_operators() {
    assert_eq!(error_code(json!({"operation": "read", "type": "Movie", "where": {"budget_GT": 1}})), "UnknownOperator");
    assert_eq!(
        error_code(json!({"operation": "read", "type": "Movie", "where": {"castSize_GT": 1}})),
        "NotFilterable"
    );
}

#[test]
fn unconditional_or_branches_drop_their_siblings_parameters() {
    let translation = translate(json!({"operation": "read", "type": "Movie", "where": {"OR": [{}, {"title": "a"}]}}));
    assert_eq!(translation.cypher, "MATCH (this:Movie)\nRETURN this { } AS this");
    assert!(translation.params.is_empty(), "{:?}", translation.params);

    let translation = translate(json!({
        "operation": "read",
        "type": "Movie",
        "where": {"title": "b", "OR": [{"released_GT": 1990}, {}]}
    }));
    assert_eq!(translation.cypher, "MATCH (this:Movie)\nWHERE this.title = $param\nRETURN this { } AS this");
    assert_eq!(translation.params.len(), 1);
    assert_eq!(translation.params.get("param"), Some(&Value::from("b")));
}
