//! Partial update operators.

use docstore_codec::{path, CodecError, CodecResult, Content, Value};
use serde::{Deserialize, Serialize};

/// One field change of a partial update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Change {
    /// Replace the value at the path.
    Set {
        /// Dotted field path.
        path: String,
        /// New value.
        value: Value,
    },
    /// Push a value onto the array at the path (created when missing).
    Append {
        /// Dotted field path.
        path: String,
        /// Appended item.
        value: Value,
    },
    /// Remove every occurrence of a value from the array at the path.
    Remove {
        /// Dotted field path.
        path: String,
        /// Removed item.
        value: Value,
    },
    /// Delete the field.
    Unset {
        /// Dotted field path.
        path: String,
    },
}

impl Change {
    /// Set a field.
    pub fn set(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Set {
            path: path.into(),
            value: value.into(),
        }
    }

    /// Append to an array field.
    pub fn append(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Append {
            path: path.into(),
            value: value.into(),
        }
    }

    /// Remove from an array field.
    pub fn remove(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Remove {
            path: path.into(),
            value: value.into(),
        }
    }

    /// Delete a field.
    pub fn unset(path: impl Into<String>) -> Self {
        Self::Unset { path: path.into() }
    }

    /// The dotted path this change targets.
    pub fn path(&self) -> &str {
        match self {
            Self::Set { path, .. }
            | Self::Append { path, .. }
            | Self::Remove { path, .. }
            | Self::Unset { path } => path,
        }
    }

    /// The top-level field this change touches.
    pub fn field(&self) -> &str {
        path::root(self.path())
    }

    /// Applies this change to a document in place.
    ///
    /// # Errors
    ///
    /// Fails when the path crosses a non-map value, or when `Append`/`Remove`
    /// target a value that is not an array.
    pub fn apply(&self, content: &mut Content) -> CodecResult<()> {
        match self {
            Self::Set { path, value } => path::set_path(content, path, value.clone()),
            Self::Append { path, value } => match path::resolve_mut(content, path) {
                Some(Value::Array(items)) => {
                    items.push(value.clone());
                    Ok(())
                }
                None | Some(Value::Null) => {
                    path::set_path(content, path, Value::Array(vec![value.clone()]))
                }
                Some(_) => Err(CodecError::invalid_path(path.as_str(), "not an array")),
            },
            Self::Remove { path, value } => match path::resolve_mut(content, path) {
                Some(Value::Array(items)) => {
                    items.retain(|item| item != value);
                    Ok(())
                }
                None | Some(Value::Null) => Ok(()),
                Some(_) => Err(CodecError::invalid_path(path.as_str(), "not an array")),
            },
            Self::Unset { path } => {
                path::remove_path(content, path);
                Ok(())
            }
        }
    }
}

/// Applies changes in order.
///
/// # Errors
///
/// Stops at the first change that cannot be applied.
pub fn apply_changes(content: &mut Content, changes: &[Change]) -> CodecResult<()> {
    changes.iter().try_for_each(|change| change.apply(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Content {
        let mut content = Content::new();
        content.insert("name".into(), Value::from("Alice"));
        content.insert("tags".into(), Value::array(["a", "b", "a"]));
        content
    }

    #[test]
    fn set_and_unset() {
        let mut content = sample();
        apply_changes(
            &mut content,
            &[
                Change::set("name", "Bob"),
                Change::set("address.city", "Paris"),
                Change::unset("tags"),
            ],
        )
        .unwrap();
        assert_eq!(content["name"], Value::from("Bob"));
        assert_eq!(
            path::resolve(&content, "address.city"),
            Some(&Value::from("Paris"))
        );
        assert!(!content.contains_key("tags"));
    }

    #[test]
    fn append_and_remove() {
        let mut content = sample();
        Change::append("tags", "c").apply(&mut content).unwrap();
        Change::remove("tags", "a").apply(&mut content).unwrap();
        assert_eq!(content["tags"], Value::array(["b", "c"]));

        Change::append("fresh", 1i64).apply(&mut content).unwrap();
        assert_eq!(content["fresh"], Value::array([1i64]));
    }

    #[test]
    fn append_to_scalar_fails() {
        let mut content = sample();
        let err = Change::append("name", "x").apply(&mut content).unwrap_err();
        assert!(matches!(err, CodecError::InvalidPath { .. }));
    }

    #[test]
    fn field_is_top_level() {
        assert_eq!(Change::set("address.city", "x").field(), "address");
        assert_eq!(Change::unset("name").field(), "name");
    }
}
