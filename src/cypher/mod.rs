#![forbid(unsafe_code)]

//! Cypher clause model and renderer.
//!
//! Compilers push [`Clause`]s into a [`Block`]; the block inserts the
//! `WITH *` separators Cypher requires (after write clauses, and before a
//! `WHERE` that no longer directly follows `MATCH`/`WITH`). Rendering
//! indents `CALL { ... }` bodies by four spaces.

pub mod pattern;

use std::collections::BTreeMap;

use xxhash_rust::xxh64::xxh64;

use crate::query::value::Value;

const INDENT: &str = "    ";

/// One Cypher clause. Expressions are pre-rendered strings.
#[derive(Clone, Debug, PartialEq)]
pub enum Clause {
    /// `MATCH pattern` or `OPTIONAL MATCH pattern`.
    Match {
        /// Pattern text.
        pattern: String,
        /// Emit `OPTIONAL MATCH`.
        optional: bool,
    },
    /// `WHERE expr`.
    Where(String),
    /// `WITH [DISTINCT] items`.
    With {
        /// Projection items.
        items: Vec<String>,
        /// Emit `WITH DISTINCT`.
        distinct: bool,
    },
    /// `UNWIND list AS alias`.
    Unwind {
        /// List expression.
        list: String,
        /// Row variable.
        alias: String,
    },
    /// `CALL { body }`.
    Call(Vec<Clause>),
    /// `UNION` between branches of a `CALL` body.
    Union,
    /// `CREATE pattern`.
    Create(String),
    /// `MERGE pattern`.
    Merge(String),
    /// `ON CREATE SET items` following a `MERGE`.
    OnCreateSet(Vec<String>),
    /// `SET items`.
    Set(Vec<String>),
    /// `[DETACH] DELETE items`.
    Delete {
        /// Variables to delete.
        items: Vec<String>,
        /// Emit `DETACH DELETE`.
        detach: bool,
    },
    /// `ORDER BY items`.
    OrderBy(Vec<String>),
    /// `SKIP expr`.
    Skip(String),
    /// `LIMIT expr`.
    Limit(String),
    /// `RETURN [DISTINCT] items`.
    Return {
        /// Returned items.
        items: Vec<String>,
        /// Emit `RETURN DISTINCT`.
        distinct: bool,
    },
    /// Verbatim statement text (computed fields).
    Raw(String),
}

impl Clause {
    /// `MATCH pattern`.
    pub fn matching(pattern: impl Into<String>) -> Self {
        Clause::Match {
            pattern: pattern.into(),
            optional: false,
        }
    }

    /// `WITH items`.
    pub fn with<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Clause::With {
            items: items.into_iter().map(Into::into).collect(),
            distinct: false,
        }
    }

    /// `WITH *`.
    pub fn with_all() -> Self {
        Clause::with(["*"])
    }

    /// `RETURN items`.
    pub fn returning<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Clause::Return {
            items: items.into_iter().map(Into::into).collect(),
            distinct: false,
        }
    }

    /// Whether the clause writes to the graph.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Clause::Create(_)
                | Clause::Merge(_)
                | Clause::OnCreateSet(_)
                | Clause::Set(_)
                | Clause::Delete { .. }
        )
    }

    fn is_read_start(&self) -> bool {
        matches!(
            self,
            Clause::Match { .. } | Clause::Call(_) | Clause::Unwind { .. } | Clause::Where(_)
        )
    }
}

/// Ordered clause list that maintains Cypher's clause-adjacency rules.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Block {
    clauses: Vec<Clause>,
}

impl Block {
    /// Empty block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a clause, inserting `WITH *` where Cypher needs one.
    pub fn push(&mut self, clause: Clause) {
        if let Some(last) = self.clauses.last() {
            let after_write = last.is_write() && clause.is_read_start();
            let detached_where = matches!(clause, Clause::Where(_))
                && !matches!(last, Clause::Match { .. } | Clause::With { .. });
            let detached_paging = match clause {
                Clause::OrderBy(_) => !matches!(last, Clause::With { .. }),
                Clause::Skip(_) => !matches!(last, Clause::With { .. } | Clause::OrderBy(_)),
                Clause::Limit(_) => !matches!(
                    last,
                    Clause::With { .. } | Clause::OrderBy(_) | Clause::Skip(_)
                ),
                _ => false,
            };
            if after_write || detached_where || detached_paging {
                self.clauses.push(Clause::with_all());
            }
        } else if matches!(clause, Clause::Where(_)) {
            self.clauses.push(Clause::with_all());
        }
        self.clauses.push(clause);
    }

    /// Appends every clause of `other` through [`Block::push`].
    pub fn extend(&mut self, other: impl IntoIterator<Item = Clause>) {
        for clause in other {
            self.push(clause);
        }
    }

    /// Last clause, if any.
    pub fn last(&self) -> Option<&Clause> {
        self.clauses.last()
    }

    /// Whether no clause was pushed.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Borrows the clauses.
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Consumes the block.
    pub fn into_clauses(self) -> Vec<Clause> {
        self.clauses
    }

    /// Wraps the block as a `CALL { ... }` clause.
    pub fn into_call(self) -> Clause {
        Clause::Call(self.clauses)
    }
}

/// Renders a clause sequence as query text.
pub fn render(clauses: &[Clause]) -> String {
    let mut lines = Vec::new();
    render_into(&mut lines, clauses, 0);
    lines.join("\n")
}

/// Renders `keyword { body }` for `EXISTS`/`COUNT` subquery expressions.
pub fn subquery_expression(keyword: &str, body: &[Clause]) -> String {
    let mut lines = vec![format!("{keyword} {{")];
    render_into(&mut lines, body, 1);
    lines.push("}".to_owned());
    lines.join("\n")
}

fn push_lines(lines: &mut Vec<String>, depth: usize, text: &str) {
    let prefix = INDENT.repeat(depth);
    for line in text.split('\n') {
        lines.push(format!("{prefix}{line}"));
    }
}

fn push_list(lines: &mut Vec<String>, depth: usize, keyword: &str, items: &[String]) {
    match items {
        [single] if !single.contains('\n') => push_lines(lines, depth, &format!("{keyword} {single}")),
        _ => {
            push_lines(lines, depth, keyword);
            let last = items.len().saturating_sub(1);
            for (i, item) in items.iter().enumerate() {
                let sep = if i == last { "" } else { "," };
                push_lines(lines, depth + 1, &format!("{item}{sep}"));
            }
        }
    }
}

fn render_into(lines: &mut Vec<String>, clauses: &[Clause], depth: usize) {
    for clause in clauses {
        match clause {
            Clause::Match { pattern, optional } => {
                let keyword = if *optional { "OPTIONAL MATCH" } else { "MATCH" };
                push_lines(lines, depth, &format!("{keyword} {pattern}"));
            }
            Clause::Where(expr) => push_lines(lines, depth, &format!("WHERE {expr}")),
            Clause::With { items, distinct } => {
                let keyword = if *distinct { "WITH DISTINCT" } else { "WITH" };
                push_lines(lines, depth, &format!("{keyword} {}", items.join(", ")));
            }
            Clause::Unwind { list, alias } => {
                push_lines(lines, depth, &format!("UNWIND {list} AS {alias}"));
            }
            Clause::Call(body) => {
                push_lines(lines, depth, "CALL {");
                render_into(lines, body, depth + 1);
                push_lines(lines, depth, "}");
            }
            Clause::Union => push_lines(lines, depth, "UNION"),
            Clause::Create(pattern) => push_lines(lines, depth, &format!("CREATE {pattern}")),
            Clause::Merge(pattern) => push_lines(lines, depth, &format!("MERGE {pattern}")),
            Clause::OnCreateSet(items) => push_list(lines, depth, "ON CREATE SET", items),
            Clause::Set(items) => push_list(lines, depth, "SET", items),
            Clause::Delete { items, detach } => {
                let keyword = if *detach { "DETACH DELETE" } else { "DELETE" };
                push_lines(lines, depth, &format!("{keyword} {}", items.join(", ")));
            }
            Clause::OrderBy(items) => {
                push_lines(lines, depth, &format!("ORDER BY {}", items.join(", ")));
            }
            Clause::Skip(expr) => push_lines(lines, depth, &format!("SKIP {expr}")),
            Clause::Limit(expr) => push_lines(lines, depth, &format!("LIMIT {expr}")),
            Clause::Return { items, distinct } => {
                let keyword = if *distinct { "RETURN DISTINCT" } else { "RETURN" };
                push_lines(lines, depth, &format!("{keyword} {}", items.join(", ")));
            }
            Clause::Raw(text) => push_lines(lines, depth, text),
        }
    }
}

/// Compiled query text plus its parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct Translation {
    /// Cypher text.
    pub cypher: String,
    /// Parameters referenced by the text, sorted by name.
    pub params: BTreeMap<String, Value>,
}

impl Translation {
    /// Stable hash of the query text, usable as a plan-cache key.
    pub fn fingerprint(&self) -> u64 {
        xxh64(self.cypher.as_bytes(), 0)
    }

    /// Parameters as a JSON object.
    pub fn params_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.params
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserts_with_after_writes_and_detached_where() {
        let mut block = Block::new();
        block.push(Clause::Create("(this:Movie)".into()));
        block.push(Clause::Set(vec!["this.title = $param0".into()]));
        block.push(Clause::matching("(other:Actor)"));
        block.push(Clause::Where("other.name = $param1".into()));
        block.push(Clause::Where("other.age > 3".into()));
        assert_eq!(
            render(block.clauses()),
            "CREATE (this:Movie)\n\
             SET this.title = $param0\n\
             WITH *\n\
             MATCH (other:Actor)\n\
             WHERE other.name = $param1\n\
             WITH *\n\
             WHERE other.age > 3"
        );
    }

    #[test]
    fn renders_nested_calls_and_multiline_sets() {
        let mut body = Block::new();
        body.push(Clause::with(["this"]));
        body.push(Clause::Set(vec!["this.a = 1".into(), "this.b = 2".into()]));
        body.push(Clause::returning(["count(*) AS var0"]));
        let mut block = Block::new();
        block.push(Clause::matching("(this:Movie)"));
        block.push(body.into_call());
        block.push(Clause::returning(["this"]));
        assert_eq!(
            render(block.clauses()),
            "MATCH (this:Movie)\n\
             CALL {\n\
             \x20   WITH this\n\
             \x20   SET\n\
             \x20       this.a = 1,\n\
             \x20       this.b = 2\n\
             \x20   RETURN count(*) AS var0\n\
             }\n\
             RETURN this"
        );
    }

    #[test]
    fn subquery_expressions_indent_their_body() {
        let body = [
            Clause::matching("(this)<-[:ACTED_IN]-(this0:Actor)"),
            Clause::Where("this0.name = $param0".into()),
        ];
        assert_eq!(
            subquery_expression("EXISTS", &body),
            "EXISTS {\n    MATCH (this)<-[:ACTED_IN]-(this0:Actor)\n    WHERE this0.name = $param0\n}"
        );
    }

    #[test]
    fn fingerprint_depends_only_on_text() {
        let a = Translation {
            cypher: "MATCH (n) RETURN n".into(),
            params: BTreeMap::new(),
        };
        let mut b = a.clone();
        b.params.insert("x".into(), Value::Int(1));
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}
