//! In-memory document values.

use crate::error::DocResult;
use docstore_codec::{path, Content, Value};

/// A document of some entity type.
///
/// `data` holds the persisted attributes, `runtime` scratch state that is
/// never written to an engine. A document without an id has not been stored
/// yet (or its key fields are not filled).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    entity_type: String,
    id: Option<String>,
    data: Content,
    runtime: Content,
}

impl Document {
    /// Creates an empty, unsaved document.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            ..Self::default()
        }
    }

    /// Creates a document read from storage.
    pub fn from_content(entity_type: impl Into<String>, id: Option<String>, data: Content) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
            data,
            runtime: Content::new(),
        }
    }

    /// Sets a top-level field (builder style).
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(field.into(), value.into());
        self
    }

    /// Entity type name.
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Document id.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Sets the document id.
    pub fn set_id(&mut self, id: Option<String>) {
        self.id = id;
    }

    /// Reads a field by dotted path.
    pub fn get(&self, field_path: &str) -> Option<&Value> {
        path::resolve(&self.data, field_path)
    }

    /// Writes a field by dotted path, creating intermediate maps.
    ///
    /// # Errors
    ///
    /// Fails on an empty path segment or when a parent value is not a map.
    pub fn set(&mut self, field_path: &str, value: impl Into<Value>) -> DocResult<()> {
        path::set_path(&mut self.data, field_path, value.into())?;
        Ok(())
    }

    /// Removes a field by dotted path.
    pub fn unset(&mut self, field_path: &str) -> Option<Value> {
        path::remove_path(&mut self.data, field_path)
    }

    /// Persisted attributes.
    pub fn data(&self) -> &Content {
        &self.data
    }

    /// Mutable persisted attributes.
    pub fn data_mut(&mut self) -> &mut Content {
        &mut self.data
    }

    /// Replaces the attributes and clears runtime state.
    pub fn replace_data(&mut self, data: Content) {
        self.data = data;
        self.runtime.clear();
    }

    /// Consumes the document, returning its attributes.
    pub fn into_data(self) -> Content {
        self.data
    }

    /// Runtime scratch state.
    pub fn runtime(&self) -> &Content {
        &self.runtime
    }

    /// Mutable runtime scratch state.
    pub fn runtime_mut(&mut self) -> &mut Content {
        &mut self.runtime
    }

    /// Resets to an empty, unsaved document of the same type.
    pub fn reset(&mut self) {
        self.id = None;
        self.data.clear();
        self.runtime.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_access() {
        let mut doc = Document::new("Order").with("orderId", "A1");
        doc.set("address.city", "Paris").unwrap();
        assert_eq!(doc.get("address.city"), Some(&Value::from("Paris")));
        assert_eq!(doc.unset("address.city"), Some(Value::from("Paris")));
        assert!(doc.get("address.city").is_none());
    }

    #[test]
    fn reset_clears_everything() {
        let mut doc = Document::from_content("Order", Some("A1".into()), Content::new())
            .with("qty", 1i64);
        doc.runtime_mut().insert("seen".into(), Value::Bool(true));
        doc.reset();
        assert_eq!(doc.id(), None);
        assert!(doc.data().is_empty());
        assert!(doc.runtime().is_empty());
        assert_eq!(doc.entity_type(), "Order");
    }
}
