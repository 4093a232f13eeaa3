#![allow(missing_docs)]

mod common;

use common::{error_code, translate};
use gqlcypher::query::Value;
use serde_json::json;

#[test]
fn plain_read_matches_all_nodes() {
    let translation = translate(json!({"operation": "read", "type": "Post", "selection": ["content"]}));
    assert_eq!(translation.cypher, "MATCH (this:Post)\nRETURN this { .content } AS this");
    assert!(translation.params.is_empty());
}

#[test]
fn projection_keys_follow_request_order() {
    let translation = translate(json!({
        "operation": "read",
        "type": "Movie",
        "selection": ["tags", "title", "id", "released"]
    }));
    assert_eq!(
        translation.cypher,
        "MATCH (this:Movie)\nRETURN this { .tags, .title, .id, released: this.year } AS this"
    );
}

#[test]
fn default_and_maximum_limits_apply() {
    let defaulted = translate(json!({"operation": "read", "type": "Actor", "selection": ["name"]}));
    assert_eq!(
        defaulted.cypher,
        "MATCH (this:Actor)\nWITH *\nLIMIT $param\nRETURN this { .name } AS this"
    );
    assert_eq!(defaulted.params.get("param"), Some(&Value::Int(20)));

    let clamped = translate(json!({"operation": "read", "type": "Actor", "limit": 500, "selection": ["name"]}));
    assert_eq!(clamped.params.get("param"), Some(&Value::Int(50)));

    let unlimited = translate(json!({"operation": "read", "type": "Person", "selection": ["name"]}));
    assert!(!unlimited.cypher.contains("LIMIT"));
}

#[test]
fn nested_relationships_compile_to_subqueries() {
    let translation = translate(json!({
        "operation": "read",
        "type": "Movie",
        "where": {"title": "Heat"},
        "selection": [
            "title",
            {"field": "actors", "limit": 3, "selection": ["name"]},
            {"field": "director", "selection": ["name"]}
        ]
    }));
    assert_eq!(
        translation.cypher,
        "MATCH (this:Movie)\n\
         WHERE this.title = $param\n\
         CALL {\n    \
             WITH this\n    \
             MATCH (this)<-[:ACTED_IN]-(this0:Actor)\n    \
             WITH *\n    \
             LIMIT $param0\n    \
             WITH this0 { .name } AS this0\n    \
             RETURN collect(this0) AS var\n\
         }\n\
         CALL {\n    \
             WITH this\n    \
             MATCH (this)<-[:DIRECTED]-(this1:Person)\n    \
             WITH this1 { .name } AS this1\n    \
             RETURN head(collect(this1)) AS var0\n\
         }\n\
         RETURN this { .title, actors: var, director: var0 } AS this"
    );
    assert_eq!(translation.params.len(), 2);
}

#[test]
fn interface_reads_sort_and_truncate_after_the_union() {
    let translation = translate(json!({
        "operation": "read",
        "type": "Production",
        "sort": [{"title": "ASC"}],
        "offset": 1,
        "limit": 2,
        "selection": ["__typename", "title"]
    }));
    let cypher = &translation.cypher;
    assert!(cypher.starts_with("CALL {\n    MATCH (this0:Movie)\n"), "{cypher}");
    assert!(cypher.contains("WITH this0 { __resolveType: \"Movie\", __typename: \"Movie\", .title } AS this, this0.title AS sort"));
    assert!(cypher.contains("UNION\n    MATCH (this1:Series)"));
    assert!(cypher.ends_with("}\nWITH this, sort\nORDER BY sort ASC\nSKIP $param\nLIMIT $param0\nRETURN this"));
}

#[test]
fn abstract_reads_are_clamped_by_member_limits() {
    let translation = translate(json!({
        "operation": "read",
        "type": "Production",
        "limit": 500,
        "selection": ["title"]
    }));
    assert!(translation.cypher.ends_with("}\nWITH this\nLIMIT $param\nRETURN this"), "{}", translation.cypher);
    assert_eq!(translation.params.get("param"), Some(&Value::Int(100)));
}

#[test]
fn union_fragments_project_per_member() {
    let translation = translate(json!({
        "operation": "read",
        "type": "SearchResult",
        "selection": [
            "__typename",
            {"on": "Movie", "selection": ["title"]},
            {"on": "Genre", "selection": ["name"]}
        ]
    }));
    let cypher = &translation.cypher;
    assert!(cypher.contains("this0 { __resolveType: \"Movie\", __typename: \"Movie\", .title }"), "{cypher}");
    assert!(cypher.contains("this1 { __resolveType: \"Genre\", __typename: \"Genre\", .name }"), "{cypher}");
    assert!(cypher.ends_with("RETURN this"));
}

#[test]
fn root_aggregates_count_and_summarize() {
    let translation = translate(json!({
        "operation": "aggregate",
        "type": "Movie",
        "where": {"released_GTE": 2000},
        "selection": ["count", {"field": "title", "selection": ["shortest"]}, {"field": "rating", "selection": ["max"]}]
    }));
    let cypher = &translation.cypher;
    assert!(cypher.starts_with("MATCH (this:Movie)\nWHERE this.year >= $param\nRETURN { count: count(this), "), "{cypher}");
    assert!(cypher.contains("rating: { max: max(this.rating) }"));
}

#[test]
fn schema_mismatches_are_rejected_before_compiling() {
    assert_eq!(
        error_code(json!({"operation": "read", "type": "Movie", "selection": ["budget"]})),
        "UnknownField"
    );
    assert_eq!(
        error_code(json!({"operation": "read", "type": "Movie", "sort": [{"castSize": "ASC"}]})),
        "NotFilterable"
    );
    assert_eq!(error_code(json!({"operation": "read", "type": "Movie", "limit": -1})), "InvalidInput");
    assert_eq!(
        error_code(json!({"operation": "aggregate", "type": "Movie", "selection": [{"field": "released", "selection": ["shortest"]}]})),
        "OperatorNotSupported"
    );
    assert_eq!(error_code(json!({"operation": "aggregate", "type": "Production"})), "InvalidInput");
}
