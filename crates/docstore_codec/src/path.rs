//! Dotted field path resolution over a [`Content`] tree.
//!
//! Paths like `"address.city"` walk through nested maps. Lookups return
//! `None` instead of failing when a segment is missing or a non-map value is
//! reached; mutations report [`CodecError::InvalidPath`] in that case.

use crate::error::{CodecError, CodecResult};
use crate::value::{Content, Value};

/// Splits a dotted path into its segments.
///
/// Empty segments (`"a..b"`, `".a"`) make the path invalid.
pub fn segments(path: &str) -> CodecResult<Vec<&str>> {
    let parts: Vec<&str> = path.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(CodecError::invalid_path(path, "empty segment"));
    }
    Ok(parts)
}

/// Resolves a dotted path against a content map.
pub fn resolve<'a>(content: &'a Content, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = content.get(parts.next()?)?;
    for part in parts {
        current = current.as_map()?.get(part)?;
    }
    Some(current)
}

/// Sets the value at a dotted path, creating intermediate maps as needed.
///
/// # Errors
///
/// Fails when an intermediate segment holds a non-map value.
pub fn set_path(content: &mut Content, path: &str, value: Value) -> CodecResult<()> {
    let parts = segments(path)?;
    let (last, parents) = parts
        .split_last()
        .ok_or_else(|| CodecError::invalid_path(path, "empty path"))?;

    let mut current = content;
    for part in parents {
        let entry = current
            .entry((*part).to_string())
            .or_insert_with(|| Value::Map(Content::new()));
        if entry.is_null() {
            *entry = Value::Map(Content::new());
        }
        current = match entry {
            Value::Map(map) => map,
            _ => {
                return Err(CodecError::invalid_path(
                    path,
                    format!("segment '{part}' is not a map"),
                ))
            }
        };
    }
    current.insert((*last).to_string(), value);
    Ok(())
}

/// Returns a mutable reference to the value at a dotted path.
pub fn resolve_mut<'a>(content: &'a mut Content, path: &str) -> Option<&'a mut Value> {
    let mut parts = path.split('.');
    let mut current = content.get_mut(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Map(map) => map.get_mut(part)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Removes the value at a dotted path, returning it when present.
pub fn remove_path(content: &mut Content, path: &str) -> Option<Value> {
    match path.rsplit_once('.') {
        None => content.remove(path),
        Some((parent, last)) => match resolve_mut(content, parent)? {
            Value::Map(map) => map.remove(last),
            _ => None,
        },
    }
}

/// Returns the top-level field name of a dotted path.
pub fn root(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}
