//! Request tree accepted by the translator.
//!
//! The tree is what a GraphQL front end hands over after parsing and
//! validating a document: the operation, the root type, `where`/`sort`
//! arguments and the selection set. Key order inside `where` and selection
//! objects is preserved and drives the order of the compiled output.
//!
//! ```json
//! {
//!   "operation": "read",
//!   "type": "Movie",
//!   "where": {"title_CONTAINS": "Matrix"},
//!   "sort": [{"released": "DESC"}],
//!   "limit": 10,
//!   "selection": ["title", {"field": "actors", "selection": ["name"]}]
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// JSON object as received from the caller.
pub type InputObject = Map<String, JsonValue>;

/// One sort key, e.g. `{"title": "ASC"}`; connections nest it under `node`
/// or `edge`.
pub type SortInput = Map<String, JsonValue>;

/// Root request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "camelCase")]
pub enum Request {
    /// List query.
    Read(ReadRequest),
    /// Root aggregate query.
    Aggregate(AggregateRequest),
    /// Create mutation.
    Create(CreateRequest),
    /// Update mutation.
    Update(UpdateRequest),
    /// Delete mutation.
    Delete(DeleteRequest),
}

impl Request {
    /// Name of the root type.
    pub fn target(&self) -> &str {
        match self {
            Request::Read(r) => &r.target,
            Request::Aggregate(r) => &r.target,
            Request::Create(r) => &r.target,
            Request::Update(r) => &r.target,
            Request::Delete(r) => &r.target,
        }
    }

    /// Operation label used in logs.
    pub fn operation_name(&self) -> &'static str {
        match self {
            Request::Read(_) => "read",
            Request::Aggregate(_) => "aggregate",
            Request::Create(_) => "create",
            Request::Update(_) => "update",
            Request::Delete(_) => "delete",
        }
    }
}

/// Reads entities or abstract types.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadRequest {
    /// Entity, interface or union name.
    #[serde(rename = "type")]
    pub target: String,
    /// Filter.
    #[serde(default, rename = "where")]
    pub filter: Option<InputObject>,
    /// Sort keys, most significant first.
    #[serde(default)]
    pub sort: Vec<SortInput>,
    /// Maximum number of results.
    #[serde(default)]
    pub limit: Option<i64>,
    /// Number of results to skip.
    #[serde(default)]
    pub offset: Option<i64>,
    /// Projection.
    #[serde(default)]
    pub selection: Vec<SelectionInput>,
}

/// Aggregates over all matching entities.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateRequest {
    /// Entity name.
    #[serde(rename = "type")]
    pub target: String,
    /// Filter.
    #[serde(default, rename = "where")]
    pub filter: Option<InputObject>,
    /// `count` and per-attribute aggregate selections.
    #[serde(default)]
    pub selection: Vec<SelectionInput>,
}

/// Creates one node per input object, with nested operations.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    /// Entity name.
    #[serde(rename = "type")]
    pub target: String,
    /// Create payloads.
    pub input: Vec<InputObject>,
    /// Projection of the created nodes.
    #[serde(default)]
    pub selection: Vec<SelectionInput>,
}

/// Updates matching nodes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateRequest {
    /// Entity name.
    #[serde(rename = "type")]
    pub target: String,
    /// Filter selecting the nodes to update.
    #[serde(default, rename = "where")]
    pub filter: Option<InputObject>,
    /// Attribute assignments and nested relationship operations.
    #[serde(default)]
    pub update: InputObject,
    /// Projection of the updated nodes.
    #[serde(default)]
    pub selection: Vec<SelectionInput>,
}

/// Deletes matching nodes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteRequest {
    /// Entity name.
    #[serde(rename = "type")]
    pub target: String,
    /// Filter selecting the nodes to delete.
    #[serde(default, rename = "where")]
    pub filter: Option<InputObject>,
    /// Related nodes to delete first, keyed by relationship field.
    #[serde(default)]
    pub delete: InputObject,
}

/// One item of a selection set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectionInput {
    /// Plain field name.
    Field(String),
    /// Type-conditioned group (`... on Movie { ... }`).
    Fragment(InlineFragment),
    /// Field with arguments, alias or a nested selection.
    Nested(FieldSelection),
}

impl SelectionInput {
    /// Shorthand for a plain field.
    pub fn field(name: impl Into<String>) -> Self {
        SelectionInput::Field(name.into())
    }

    /// Shorthand for a field with a nested selection.
    pub fn nested(name: impl Into<String>, selection: Vec<SelectionInput>) -> Self {
        SelectionInput::Nested(FieldSelection {
            field: name.into(),
            selection,
            ..FieldSelection::default()
        })
    }
}

/// Selection applying only when the node has the named type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InlineFragment {
    /// Entity, interface or union name.
    pub on: String,
    /// Items selected for matching nodes.
    pub selection: Vec<SelectionInput>,
}

/// Field with arguments.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSelection {
    /// Schema field, or `<rel>Connection` / `<rel>Aggregate`.
    pub field: String,
    /// Output key; defaults to `field`.
    #[serde(default)]
    pub alias: Option<String>,
    /// Filter on related nodes (connection `where` for connections).
    #[serde(default, rename = "where")]
    pub filter: Option<InputObject>,
    /// Sort keys.
    #[serde(default)]
    pub sort: Vec<SortInput>,
    /// Maximum number of related nodes.
    #[serde(default)]
    pub limit: Option<i64>,
    /// Number of related nodes to skip.
    #[serde(default)]
    pub offset: Option<i64>,
    /// Maximum number of connection edges.
    #[serde(default)]
    pub first: Option<i64>,
    /// Arguments of computed fields.
    #[serde(default)]
    pub arguments: InputObject,
    /// Nested selection.
    #[serde(default)]
    pub selection: Vec<SelectionInput>,
}

impl FieldSelection {
    /// Output key.
    pub fn key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.field)
    }
}
