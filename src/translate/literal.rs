//! Literal validation against attribute kinds and parameter wrapping.

use time::format_description::well_known::Iso8601;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};

use super::scope::CompilationScope;
use crate::error::{Result, TranslateError};
use crate::query::value::Value;
use crate::schema::{Attribute, ScalarKind};

/// Checks a full attribute value (a list for list attributes).
pub fn check_value(owner: &str, attribute: &Attribute, value: &Value) -> Result<()> {
    if value.is_null() {
        return Ok(());
    }
    if attribute.list {
        let Value::List(items) = value else {
            return Err(mismatch(owner, attribute, "list", value));
        };
        return items.iter().try_for_each(|item| check_item(owner, attribute, item));
    }
    check_item(owner, attribute, value)
}

/// Checks one element of the attribute's kind.
pub fn check_item(owner: &str, attribute: &Attribute, value: &Value) -> Result<()> {
    let ok = match (attribute.kind, value) {
        (ScalarKind::String, Value::String(_)) => true,
        (ScalarKind::Id, Value::String(_) | Value::Int(_)) => true,
        (ScalarKind::Int, Value::Int(_)) => true,
        (ScalarKind::Float, Value::Int(_) | Value::Float(_)) => true,
        (ScalarKind::Boolean, Value::Bool(_)) => true,
        (kind, Value::String(text)) if kind.is_temporal() => {
            if !is_valid_temporal(kind, text) {
                return Err(TranslateError::InvalidTemporal {
                    owner: owner.to_owned(),
                    field: attribute.name.clone(),
                    value: text.clone(),
                });
            }
            true
        }
        (ScalarKind::Point, Value::Map(map)) => {
            map.contains_key("longitude") && map.contains_key("latitude")
        }
        (ScalarKind::CartesianPoint, Value::Map(map)) => map.contains_key("x") && map.contains_key("y"),
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(mismatch(owner, attribute, expected_name(attribute.kind), value))
    }
}

/// Checks a `{ point, distance }` spatial comparison literal.
pub fn check_distance(owner: &str, attribute: &Attribute, value: &Value) -> Result<()> {
    let Value::Map(map) = value else {
        return Err(mismatch(owner, attribute, "{ point, distance }", value));
    };
    match (map.get("point"), map.get("distance")) {
        (Some(point), Some(distance)) if distance.is_number() => {
            check_item(owner, attribute, point)
        }
        _ => Err(mismatch(owner, attribute, "{ point, distance }", value)),
    }
}

fn mismatch(owner: &str, attribute: &Attribute, expected: &'static str, value: &Value) -> TranslateError {
    TranslateError::ValueTypeMismatch {
        owner: owner.to_owned(),
        field: attribute.name.clone(),
        expected,
        found: value.kind_name(),
    }
}

fn expected_name(kind: ScalarKind) -> &'static str {
    match kind {
        ScalarKind::String => "string",
        ScalarKind::Id => "string or integer",
        ScalarKind::Int => "integer",
        ScalarKind::Float => "number",
        ScalarKind::Boolean => "boolean",
        ScalarKind::Point => "{ longitude, latitude }",
        ScalarKind::CartesianPoint => "{ x, y }",
        _ => "temporal string",
    }
}

/// Whether `text` parses as a literal of the temporal `kind`.
pub fn is_valid_temporal(kind: ScalarKind, text: &str) -> bool {
    let local_time = format_description!("[hour]:[minute]:[second][optional [.[subsecond]]]");
    match kind {
        ScalarKind::DateTime => {
            OffsetDateTime::parse(text, &Iso8601::DEFAULT).is_ok()
                || PrimitiveDateTime::parse(text, &Iso8601::DEFAULT).is_ok()
        }
        ScalarKind::LocalDateTime => PrimitiveDateTime::parse(text, &Iso8601::DEFAULT).is_ok(),
        ScalarKind::Date => Date::parse(text, format_description!("[year]-[month]-[day]")).is_ok(),
        ScalarKind::LocalTime => Time::parse(text, local_time).is_ok(),
        ScalarKind::Time => Time::parse(strip_offset(text), local_time).is_ok(),
        ScalarKind::Duration => is_iso_duration(text),
        _ => false,
    }
}

fn strip_offset(text: &str) -> &str {
    if let Some(stripped) = text.strip_suffix('Z') {
        return stripped;
    }
    match text.rfind(['+', '-']) {
        Some(pos) if pos >= 8 => &text[..pos],
        _ => text,
    }
}

fn is_iso_duration(text: &str) -> bool {
    let Some(body) = text.strip_prefix('P') else {
        return false;
    };
    let (date, time) = match body.split_once('T') {
        Some((date, time)) => {
            if time.is_empty() {
                return false;
            }
            (date, Some(time))
        }
        None => (body, None),
    };
    if date.is_empty() && time.is_none() {
        return false;
    }
    let designators_ok = |part: &str, allowed: &str| {
        let mut digits = false;
        for c in part.chars() {
            if c.is_ascii_digit() || c == '.' {
                digits = true;
            } else if allowed.contains(c) && digits {
                digits = false;
            } else {
                return false;
            }
        }
        !digits
    };
    designators_ok(date, "YMWD") && time.map_or(true, |t| designators_ok(t, "HMS"))
}

/// Converts a parameter reference into the attribute's Cypher type.
///
/// Temporal kinds use their constructor, points use `point()`. Lists map
/// the constructor over the elements.
pub fn wrap_param(
    scope: &mut CompilationScope<'_>,
    kind: ScalarKind,
    as_list: bool,
    reference: &str,
) -> Result<String> {
    let constructor = match kind {
        kind if kind.is_spatial() => "point",
        kind => match kind.temporal_constructor() {
            Some(constructor) => constructor,
            None => return Ok(reference.to_owned()),
        },
    };
    if as_list {
        let item = scope.allocate("var")?;
        Ok(format!("[{item} IN {reference} | {constructor}({item})]"))
    } else {
        Ok(format!("{constructor}({reference})"))
    }
}
