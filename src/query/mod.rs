#![forbid(unsafe_code)]

//! Caller-facing request tree.
//!
//! Requests arrive as JSON, are resolved against the schema and leave this
//! module as typed filter trees and selection inputs for the compilers in
//! [`crate::translate`].

/// Typed filter trees and their pushdown split.
pub mod filter;

/// Root request shapes (read, aggregate, create, update, delete).
pub mod request;

/// Parameter values.
pub mod value;

/// `where` object resolution (`title_CONTAINS`, `actors_SOME`, ...).
pub mod where_input;

pub use filter::FilterTree;
pub use request::{Request, SelectionInput};
pub use value::Value;
