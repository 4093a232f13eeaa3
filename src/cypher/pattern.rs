//! Pattern and literal text helpers.

use crate::schema::Direction;

/// Backtick-quotes names that are not plain identifiers.
pub fn escape(name: &str) -> String {
    let mut chars = name.chars();
    let plain = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if plain {
        name.to_owned()
    } else {
        format!("`{}`", name.replace('`', "``"))
    }
}

/// `var.prop` with the property escaped.
pub fn property(var: &str, prop: &str) -> String {
    format!("{var}.{}", escape(prop))
}

/// `:A:B` label suffix.
pub fn labels<S: AsRef<str>>(labels: &[S]) -> String {
    labels
        .iter()
        .map(|label| format!(":{}", escape(label.as_ref())))
        .collect()
}

/// `(var:A:B)`; either part may be empty.
pub fn node<S: AsRef<str>>(var: &str, node_labels: &[S]) -> String {
    format!("({var}{})", labels(node_labels))
}

/// `(from)-[edge:T]->(to)` oriented by `direction`.
pub fn relationship(from: &str, edge: &str, rel_type: &str, direction: Direction, to: &str) -> String {
    let edge = format!("[{edge}:{}]", escape(rel_type));
    match direction {
        Direction::Out => format!("({from})-{edge}->{to}"),
        Direction::In => format!("({from})<-{edge}-{to}"),
    }
}

/// Double-quoted Cypher string literal.
pub fn string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

/// Map projection key; plain identifiers stay unquoted.
pub fn map_key(key: &str) -> String {
    escape(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_only_when_needed() {
        assert_eq!(escape("title"), "title");
        assert_eq!(escape("first name"), "`first name`");
        assert_eq!(escape("1st"), "`1st`");
        assert_eq!(escape("we`ird"), "`we``ird`");
        assert_eq!(property("this", "released"), "this.released");
    }

    #[test]
    fn builds_directed_patterns() {
        let to = node("this0", &["Actor"]);
        assert_eq!(
            relationship("this", "edge", "ACTED_IN", Direction::In, &to),
            "(this)<-[edge:ACTED_IN]-(this0:Actor)"
        );
        assert_eq!(
            relationship("this", "", "HAS", Direction::Out, "()"),
            "(this)-[:HAS]->()"
        );
        assert_eq!(labels(&["A", "B C"]), ":A:`B C`");
    }

    #[test]
    fn string_literals_escape_quotes() {
        assert_eq!(string_literal(r#"a "b" \ c"#), r#""a \"b\" \\ c""#);
    }
}
