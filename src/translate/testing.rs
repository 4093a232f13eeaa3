//! Fixture schema shared by the compiler unit tests.

use crate::schema::Schema;

pub(crate) const MOVIES: &str = include_str!("../../tests/fixtures/movies.json");

pub(crate) fn movie_schema() -> Schema {
    Schema::from_json_str(MOVIES).expect("fixture schema is valid")
}
