//! Dependency declarations between entity types.
//!
//! A supporting type lists the dependent types holding copies of its
//! fields. Deleting a supporting document, or changing the referenced
//! values, is refused while dependents still match.

use docstore_codec::{path, Content, Value};
use docstore_engine::Criteria;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// One dependent type and how its fields map to the supporting type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    dependent: String,
    /// dependent field -> supporting field
    field_map: BTreeMap<String, String>,
}

impl Dependency {
    /// Declares a dependency.
    pub fn new<I, A, B>(dependent: impl Into<String>, field_map: I) -> Self
    where
        I: IntoIterator<Item = (A, B)>,
        A: Into<String>,
        B: Into<String>,
    {
        Self {
            dependent: dependent.into(),
            field_map: field_map
                .into_iter()
                .map(|(a, b)| (a.into(), b.into()))
                .collect(),
        }
    }

    /// Dependent entity type.
    pub fn dependent(&self) -> &str {
        &self.dependent
    }

    /// Dependent field to supporting field mapping.
    pub fn field_map(&self) -> &BTreeMap<String, String> {
        &self.field_map
    }

    fn mapped<'a>(&'a self, content: &'a Content) -> Option<BTreeMap<&'a str, &'a Value>> {
        self.field_map
            .iter()
            .map(|(dependent_field, supporting_field)| {
                path::resolve(content, supporting_field)
                    .filter(|v| !v.is_null())
                    .map(|v| (dependent_field.as_str(), v))
            })
            .collect()
    }

    /// Criteria selecting dependents of `old`, or `None` when nothing needs
    /// checking: a referenced value is missing in `old`, or `new` keeps every
    /// referenced value.
    pub fn query_for(&self, old: &Content, new: Option<&Content>) -> Option<Criteria> {
        let old_values = self.mapped(old)?;
        if let Some(new) = new {
            if self.mapped(new).as_ref() == Some(&old_values) {
                return None;
            }
        }
        Some(Criteria::from_pairs(
            old_values
                .into_iter()
                .map(|(field, value)| (field.to_string(), value.clone())),
        ))
    }
}

/// Dependencies of every registered supporting type.
#[derive(Debug, Default)]
pub struct DependencyRegistry {
    supporting: RwLock<BTreeMap<String, Vec<Dependency>>>,
}

impl DependencyRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `supporting` has the given dependent.
    pub fn declare(&self, supporting: impl Into<String>, dependency: Dependency) {
        let mut map = self.supporting.write();
        let entries = map.entry(supporting.into()).or_default();
        if !entries.contains(&dependency) {
            entries.push(dependency);
        }
    }

    /// Dependents declared for a supporting type.
    pub fn dependents_of(&self, supporting: &str) -> Vec<Dependency> {
        self.supporting
            .read()
            .get(supporting)
            .cloned()
            .unwrap_or_default()
    }

    /// Forgets every declaration.
    pub fn clear(&self) {
        self.supporting.write().clear();
    }
}
