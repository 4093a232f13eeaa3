#![allow(missing_docs)]

mod common;

use common::translator;
use gqlcypher::AuthContext;
use proptest::prelude::*;
use serde_json::{json, Value as JsonValue};

/// What a generated `where` object should compile to.
#[derive(Clone, Copy, Debug)]
struct Shape {
    /// Literal leaves that survive compilation.
    params: usize,
    /// `NOT` nodes that survive compilation.
    negations: usize,
    /// Whether the object matches every node.
    unconditional: bool,
}

impl Shape {
    const LEAF: Shape = Shape { params: 1, negations: 0, unconditional: false };
    const EMPTY: Shape = Shape { params: 0, negations: 0, unconditional: true };

    fn sum(children: &[Shape], unconditional: bool) -> Shape {
        Shape {
            params: children.iter().map(|c| c.params).sum(),
            negations: children.iter().map(|c| c.negations).sum(),
            unconditional,
        }
    }
}

/// Random `where` object over Movie scalars. `{}` leaves only appear when
/// `allow_empty` is set.
fn arb_filter(allow_empty: bool) -> impl Strategy<Value = (JsonValue, Shape)> {
    let scalar = prop_oneof![
        "[a-z]{1,8}".prop_map(|title| (json!({"title": title}), Shape::LEAF)),
        "[a-z]{1,4}".prop_map(|part| (json!({"title_CONTAINS": part}), Shape::LEAF)),
        (1900i64..2030).prop_map(|year| (json!({"released_GT": year}), Shape::LEAF)),
        prop::collection::vec(1900i64..2030, 1..4).prop_map(|years| (json!({"released_IN": years}), Shape::LEAF)),
        (0.0f64..10.0).prop_map(|rating| (json!({"rating_LTE": rating}), Shape::LEAF)),
    ];
    let leaf = if allow_empty {
        prop_oneof![4 => scalar, 1 => Just((json!({}), Shape::EMPTY))].boxed()
    } else {
        scalar.boxed()
    };
    leaf.prop_recursive(4, 32, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 1..4).prop_map(|children| {
                let shapes: Vec<Shape> = children.iter().map(|(_, shape)| *shape).collect();
                let list: Vec<JsonValue> = children.into_iter().map(|(tree, _)| tree).collect();
                let unconditional = shapes.iter().all(|s| s.unconditional);
                (json!({"AND": list}), Shape::sum(&shapes, unconditional))
            }),
            prop::collection::vec(inner.clone(), 1..4).prop_map(|children| {
                let shapes: Vec<Shape> = children.iter().map(|(_, shape)| *shape).collect();
                let list: Vec<JsonValue> = children.into_iter().map(|(tree, _)| tree).collect();
                let shape = if shapes.iter().any(|s| s.unconditional) {
                    Shape::EMPTY
                } else {
                    Shape::sum(&shapes, false)
                };
                (json!({"OR": list}), shape)
            }),
            inner.prop_map(|(tree, shape)| {
                let shape = if shape.unconditional {
                    Shape { params: 0, negations: 0, unconditional: false }
                } else {
                    Shape { negations: shape.negations + 1, ..shape }
                };
                (json!({"NOT": tree}), shape)
            }),
        ]
    })
}

fn read_movies(filter: JsonValue) -> gqlcypher::Translation {
    translator()
        .translate_json(
            &json!({"operation": "read", "type": "Movie", "where": filter}).to_string(),
            &AuthContext::anonymous(),
        )
        .unwrap()
}

const MOVIE_FIELDS: [(&str, &str); 5] = [
    ("id", ".id"),
    ("title", ".title"),
    ("released", "released: this.year"),
    ("tags", ".tags"),
    ("rating", ".rating"),
];

proptest! {
    #[test]
    fn prop_one_parameter_per_surviving_literal((filter, shape) in arb_filter(true)) {
        let translation = read_movies(filter);
        prop_assert_eq!(translation.params.len(), shape.params, "{}", translation.cypher);
        for name in translation.params.keys() {
            let reference = format!("${name}");
            prop_assert!(translation.cypher.contains(&reference), "{} unused", name);
        }
        if shape.unconditional {
            prop_assert_eq!(translation.cypher.as_str(), "MATCH (this:Movie)\nRETURN this { } AS this");
        }
    }

    #[test]
    fn prop_boolean_structure_survives_compilation((filter, shape) in arb_filter(false)) {
        let translation = read_movies(filter);
        let predicate = translation
            .cypher
            .strip_prefix("MATCH (this:Movie)\nWHERE ")
            .and_then(|rest| rest.strip_suffix("\nRETURN this { } AS this"))
            .unwrap_or_else(|| panic!("unexpected shape:\n{}", translation.cypher));
        prop_assert_eq!(predicate.matches("NOT (").count(), shape.negations, "{}", predicate);
        let mut depth = 0i64;
        for c in predicate.chars() {
            match c {
                '(' => depth += 1,
                ')' => depth -= 1,
                _ => {}
            }
            prop_assert!(depth >= 0, "{}", predicate);
        }
        prop_assert_eq!(depth, 0, "{}", predicate);
    }

    #[test]
    fn prop_translation_is_deterministic((filter, _) in arb_filter(true)) {
        let request = json!({"operation": "read", "type": "Movie", "where": filter, "selection": ["title"]}).to_string();
        let first = translator().translate_json(&request, &AuthContext::anonymous()).unwrap();
        let second = translator().translate_json(&request, &AuthContext::anonymous()).unwrap();
        prop_assert_eq!(first.fingerprint(), second.fingerprint());
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_projection_keeps_selection_order(
        fields in Just(MOVIE_FIELDS.to_vec()).prop_shuffle(),
        take in 1usize..=5,
    ) {
        let chosen = &fields[..take];
        let selection: Vec<&str> = chosen.iter().map(|(name, _)| *name).collect();
        let translation = translator()
            .translate_json(
                &json!({"operation": "read", "type": "Movie", "selection": selection}).to_string(),
                &AuthContext::anonymous(),
            )
            .unwrap();
        let items: Vec<&str> = chosen.iter().map(|(_, item)| *item).collect();
        let expected = format!("RETURN this {{ {} }} AS this", items.join(", "));
        prop_assert!(translation.cypher.ends_with(&expected), "{}", translation.cypher);
    }
}
