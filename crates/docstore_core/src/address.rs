//! Engine address: where and how an entity type is stored on its engine.

use crate::error::{DocError, DocResult};
use docstore_codec::{Content, Value};
use docstore_engine::Condition;

/// Fields stored by an engine, as dotted paths.
///
/// A path covers everything below it: `"address"` keeps the whole embedded
/// document, `"address.city"` only that sub-field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    paths: Vec<String>,
}

impl Catalog {
    /// Creates a catalog from dotted paths.
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    /// Catalog paths.
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Returns true if changes to `field_path` reach the engine.
    pub fn covers(&self, field_path: &str) -> bool {
        let probe = format!("{field_path}.");
        self.paths.iter().any(|p| probe.starts_with(&format!("{p}.")))
    }

    /// Keeps the catalogued part of `content`. Key fields are always kept.
    pub fn project(&self, content: &Content, key_fields: &[String]) -> Content {
        let mut projected = Content::new();
        for (name, value) in content {
            if key_fields.contains(name) || self.paths.iter().any(|p| p == name) {
                projected.insert(name.clone(), value.clone());
                continue;
            }
            let prefix = format!("{name}.");
            let nested: Vec<&str> = self
                .paths
                .iter()
                .filter_map(|p| p.strip_prefix(&prefix))
                .collect();
            if let (false, Value::Map(inner)) = (nested.is_empty(), value) {
                let sub = Catalog::new(nested).project(inner, &[]);
                if !sub.is_empty() {
                    projected.insert(name.clone(), Value::Map(sub));
                }
            }
        }
        projected
    }
}

/// Per-engine settings of an entity type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineAddress {
    /// Collection name override.
    pub collection: Option<String>,
    /// Stored fields. `None` stores everything.
    pub catalog: Option<Catalog>,
    /// Constraints every stored document must satisfy.
    pub scope: Vec<Condition>,
}

impl EngineAddress {
    /// Creates an empty address.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the collection name.
    #[must_use]
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Restricts the stored fields.
    #[must_use]
    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Adds a scope constraint.
    #[must_use]
    pub fn with_scope(mut self, condition: Condition) -> Self {
        self.scope.push(condition);
        self
    }

    /// Applies the catalog projection.
    pub fn project(&self, content: &Content, key_fields: &[String]) -> Content {
        match &self.catalog {
            Some(catalog) => catalog.project(content, key_fields),
            None => content.clone(),
        }
    }

    /// Returns true if changes to `field_path` reach the engine.
    pub fn covers(&self, field_path: &str) -> bool {
        self.catalog.as_ref().map_or(true, |c| c.covers(field_path))
    }

    /// Checks the scope constraints.
    ///
    /// # Errors
    ///
    /// Returns [`DocError::OutOfScope`] naming the first violated constraint.
    pub fn check_scope(&self, content: &Content, engine: &str) -> DocResult<()> {
        match self.scope.iter().find(|c| !c.matches(content)) {
            Some(violated) => Err(DocError::out_of_scope(format!(
                "data out of scope for engine {engine}: {} {} {}",
                violated.path, violated.op, violated.value
            ))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docstore_engine::Operator;

    fn sample() -> Content {
        let mut c = Content::new();
        c.insert("orderId".into(), Value::from("A1"));
        c.insert("qty".into(), Value::Integer(3));
        c.insert("note".into(), Value::from("fragile"));
        c.insert(
            "address".into(),
            Value::map([("city", "Paris"), ("zip", "75001")]),
        );
        c
    }

    #[test]
    fn projection_keeps_keys_and_catalogued_paths() {
        let catalog = Catalog::new(["qty", "address.city"]);
        let projected = catalog.project(&sample(), &["orderId".to_string()]);

        assert_eq!(projected.len(), 3);
        assert_eq!(projected.get("qty"), Some(&Value::Integer(3)));
        assert_eq!(
            projected.get("address"),
            Some(&Value::map([("city", "Paris")]))
        );
        assert!(!projected.contains_key("note"));
    }

    #[test]
    fn covers_descendants_only() {
        let catalog = Catalog::new(["address"]);
        assert!(catalog.covers("address"));
        assert!(catalog.covers("address.city"));
        assert!(!catalog.covers("addressbook"));
        assert!(EngineAddress::new().covers("anything"));
    }

    #[test]
    fn scope_violation_is_reported() {
        let address =
            EngineAddress::new().with_scope(Condition::new("qty", Operator::Le, 10i64));
        address.check_scope(&sample(), "memory").unwrap();

        let mut big = sample();
        big.insert("qty".into(), Value::Integer(50));
        assert!(matches!(
            address.check_scope(&big, "memory"),
            Err(DocError::OutOfScope { .. })
        ));
    }
}
