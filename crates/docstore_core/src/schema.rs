//! Entity type declarations.
//!
//! A [`Schema`] is the explicit registration of an entity type: its fields,
//! key fields, privilege key sets, field groups, dependency declarations and
//! descriptive metadata. Schemas are built once with [`Schema::builder`] and
//! are immutable afterwards.

use crate::dependency::Dependency;
use crate::error::{DocError, DocResult};
use docstore_codec::{path, Content, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Name of the privilege key set derived from the key fields.
pub const KEY_SET: &str = "key";

/// Expected kind of a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldKind {
    /// Any value.
    #[default]
    Any,
    /// UTF-8 text.
    Text,
    /// 64-bit integer.
    Integer,
    /// Boolean.
    Bool,
    /// Byte string.
    Bytes,
    /// Array of values.
    Array,
    /// Nested map (embedded document).
    Map,
}

impl FieldKind {
    /// Returns true if `value` has this kind. Null is accepted by every kind.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (FieldKind::Any, _) => true,
            (FieldKind::Text, Value::Text(_))
            | (FieldKind::Integer, Value::Integer(_))
            | (FieldKind::Bool, Value::Bool(_))
            | (FieldKind::Bytes, Value::Bytes(_))
            | (FieldKind::Array, Value::Array(_))
            | (FieldKind::Map, Value::Map(_)) => true,
            _ => false,
        }
    }

    /// Parses the display form of a value of this kind.
    ///
    /// Text that does not parse as the expected kind stays text.
    pub fn from_display(self, display: &str) -> Value {
        match self {
            FieldKind::Integer => display
                .parse::<i64>()
                .map_or_else(|_| Value::from(display), Value::Integer),
            FieldKind::Bool => match display {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                other => Value::from(other),
            },
            _ => Value::from(display),
        }
    }
}

/// Declaration of one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field name.
    pub name: String,
    /// Expected kind.
    pub kind: FieldKind,
    /// The field must hold a non-null value.
    pub required: bool,
    /// The field value must be unique across the collection.
    pub unique: bool,
    /// Other fields forming a compound unique constraint with this one.
    pub unique_with: Vec<String>,
    /// Value applied when the field is missing on save.
    pub default: Option<Value>,
    /// Fields of an embedded document (for `Map` fields).
    pub fields: Vec<FieldSpec>,
}

impl FieldSpec {
    /// Declares a field.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            unique: false,
            unique_with: Vec::new(),
            default: None,
            fields: Vec::new(),
        }
    }

    /// Shorthand for a text field.
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text)
    }

    /// Shorthand for an integer field.
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    /// Marks the field as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Marks the field as unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Marks the field as unique together with other fields.
    #[must_use]
    pub fn unique_with<I, S>(mut self, others: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique = true;
        self.unique_with = others.into_iter().map(Into::into).collect();
        self
    }

    /// Sets a default value.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Declares the fields of an embedded document.
    #[must_use]
    pub fn embedded(mut self, fields: Vec<FieldSpec>) -> Self {
        self.kind = FieldKind::Map;
        self.fields = fields;
        self
    }
}

/// Descriptive metadata of an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaMeta {
    /// Entity type name.
    pub name: String,
    /// Data domain.
    pub domain: Option<String>,
    /// Human readable description (the type name when not given).
    pub description: String,
    /// Collection the type is stored in.
    pub collection: String,
    /// Key fields.
    pub key_fields: Vec<String>,
    /// Unique constraints.
    pub unique_lists: Vec<Vec<String>>,
    /// Cluster hints.
    pub cluster_fields: Vec<String>,
    /// Partition hints.
    pub partition_info: Content,
    /// Abstract types have no stored documents of their own.
    pub is_abstract: bool,
}

/// Declaration of an entity type.
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    collection: Option<String>,
    parent: Option<String>,
    is_abstract: bool,
    domain: Option<String>,
    description: Option<String>,
    key_fields: Vec<String>,
    privilege_keys: BTreeMap<String, Vec<String>>,
    field_groups: BTreeMap<String, Vec<String>>,
    cluster_fields: Vec<String>,
    partition_info: Content,
    fields: Vec<FieldSpec>,
    direct_search: Vec<BTreeSet<String>>,
    dependencies: Vec<Dependency>,
    engine_feedback: bool,
}

impl Schema {
    /// Starts declaring an entity type.
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            schema: Schema {
                name: name.into(),
                collection: None,
                parent: None,
                is_abstract: false,
                domain: None,
                description: None,
                key_fields: Vec::new(),
                privilege_keys: BTreeMap::new(),
                field_groups: BTreeMap::new(),
                cluster_fields: Vec::new(),
                partition_info: Content::new(),
                fields: Vec::new(),
                direct_search: Vec::new(),
                dependencies: Vec::new(),
                engine_feedback: false,
            },
        }
    }

    /// Entity type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Explicit collection name, if declared.
    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    /// Parent entity type, if any.
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Returns true for abstract types.
    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    /// Key fields, in declaration order.
    pub fn key_fields(&self) -> &[String] {
        &self.key_fields
    }

    /// Returns true if `field` is a key field.
    pub fn is_key_field(&self, field: &str) -> bool {
        self.key_fields.iter().any(|k| k == field)
    }

    /// Named privilege key sets (without the implicit `key` set).
    pub fn privilege_keys(&self) -> &BTreeMap<String, Vec<String>> {
        &self.privilege_keys
    }

    /// Field groups used for partial authorization.
    pub fn field_groups(&self) -> &BTreeMap<String, Vec<String>> {
        &self.field_groups
    }

    /// Declared fields.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Field sets that are always searched on the main engine.
    pub fn direct_search(&self) -> &[BTreeSet<String>] {
        &self.direct_search
    }

    /// Documents depending on this type.
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    /// Whether stored content is re-read after writes.
    pub fn engine_feedback(&self) -> bool {
        self.engine_feedback
    }

    /// Every privilege key set, `key` first.
    ///
    /// # Errors
    ///
    /// Returns an authorization error when the type declares neither key
    /// fields nor privilege keys, since no privilege check can be performed.
    pub fn privilege_key_sets(&self) -> DocResult<Vec<(&str, &[String])>> {
        let mut sets: Vec<(&str, &[String])> = Vec::new();
        if !self.key_fields.is_empty() {
            sets.push((KEY_SET, &self.key_fields));
        }
        sets.extend(
            self.privilege_keys
                .iter()
                .map(|(name, fields)| (name.as_str(), fields.as_slice())),
        );
        if sets.is_empty() {
            return Err(DocError::authorization(format!(
                "no privilege key set defined for {}",
                self.name
            )));
        }
        Ok(sets)
    }

    /// Fields of a privilege key set (`key` resolves to the key fields).
    pub fn privilege_key_set(&self, name: &str) -> Option<&[String]> {
        if name == KEY_SET {
            Some(&self.key_fields)
        } else {
            self.privilege_keys.get(name).map(Vec::as_slice)
        }
    }

    /// Unique constraints: each unique field with its companions, then the
    /// key fields.
    pub fn uniques(&self) -> Vec<Vec<String>> {
        let mut uniques: Vec<Vec<String>> = Vec::new();
        for field in self.fields.iter().filter(|f| f.unique) {
            let mut set = vec![field.name.clone()];
            set.extend(field.unique_with.iter().cloned());
            if !uniques.contains(&set) {
                uniques.push(set);
            }
        }
        if !self.key_fields.is_empty() && !uniques.contains(&self.key_fields) {
            uniques.push(self.key_fields.clone());
        }
        uniques
    }

    /// Resolves a dotted path to its field declaration.
    pub fn field(&self, field_path: &str) -> Option<&FieldSpec> {
        let mut fields = &self.fields;
        let mut found = None;
        for segment in field_path.split('.') {
            let spec = fields.iter().find(|f| f.name == segment)?;
            fields = &spec.fields;
            found = Some(spec);
        }
        found
    }

    /// Returns true if the path names a known field.
    ///
    /// Types without field declarations accept every path.
    pub fn has_field(&self, field_path: &str) -> bool {
        self.fields.is_empty() || self.field(field_path).is_some()
    }

    /// Declared kind of a field, `Any` when undeclared.
    pub fn field_kind(&self, field_path: &str) -> FieldKind {
        self.field(field_path).map_or(FieldKind::Any, |f| f.kind)
    }

    /// Parses a display value for the given field.
    pub fn from_display(&self, field_path: &str, display: &str) -> Value {
        self.field_kind(field_path).from_display(display)
    }

    /// Returns true if searching by exactly these fields bypasses the search engine.
    pub fn is_direct_search(&self, fields: &BTreeSet<String>) -> bool {
        !fields.is_empty() && self.direct_search.iter().any(|set| set == fields)
    }

    /// Fills missing top-level fields with their declared defaults.
    pub fn apply_defaults(&self, content: &mut Content) {
        for field in &self.fields {
            if let Some(default) = &field.default {
                let missing = content.get(&field.name).map_or(true, Value::is_null);
                if missing {
                    content.insert(field.name.clone(), default.clone());
                }
            }
        }
    }

    /// Metadata for the type stored in `collection`.
    pub fn meta(&self, collection: &str) -> SchemaMeta {
        SchemaMeta {
            name: self.name.clone(),
            domain: self.domain.clone(),
            description: self
                .description
                .clone()
                .unwrap_or_else(|| self.name.clone()),
            collection: collection.to_string(),
            key_fields: self.key_fields.clone(),
            unique_lists: self.uniques(),
            cluster_fields: self.cluster_fields.clone(),
            partition_info: self.partition_info.clone(),
            is_abstract: self.is_abstract,
        }
    }
}

/// Builder for [`Schema`].
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    /// Sets the collection name.
    #[must_use]
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.schema.collection = Some(name.into());
        self
    }

    /// Declares the parent type. Subtypes inherit the parent's engine
    /// bindings; each keeps its own collection unless one is declared.
    #[must_use]
    pub fn parent(mut self, name: impl Into<String>) -> Self {
        self.schema.parent = Some(name.into());
        self
    }

    /// Marks the type abstract.
    #[must_use]
    pub fn abstract_type(mut self) -> Self {
        self.schema.is_abstract = true;
        self
    }

    /// Sets the data domain.
    #[must_use]
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.schema.domain = Some(domain.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.schema.description = Some(description.into());
        self
    }

    /// Declares a field.
    #[must_use]
    pub fn field(mut self, field: FieldSpec) -> Self {
        self.schema.fields.push(field);
        self
    }

    /// Sets the key fields.
    #[must_use]
    pub fn key_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schema.key_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Declares a named privilege key set.
    #[must_use]
    pub fn privilege_keys<I, S>(mut self, name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schema
            .privilege_keys
            .insert(name.into(), fields.into_iter().map(Into::into).collect());
        self
    }

    /// Declares a field group.
    #[must_use]
    pub fn field_group<I, S>(mut self, name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schema
            .field_groups
            .insert(name.into(), fields.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the cluster hints.
    #[must_use]
    pub fn cluster_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schema.cluster_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the partition hints.
    #[must_use]
    pub fn partition_info(mut self, info: Content) -> Self {
        self.schema.partition_info = info;
        self
    }

    /// Declares a field set that is always searched on the main engine.
    #[must_use]
    pub fn direct_search<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schema
            .direct_search
            .push(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Declares that documents of `dependent` reference this type.
    ///
    /// `field_map` maps each dependent field to the field of this type it
    /// holds a copy of.
    #[must_use]
    pub fn supports<I, A, B>(mut self, dependent: impl Into<String>, field_map: I) -> Self
    where
        I: IntoIterator<Item = (A, B)>,
        A: Into<String>,
        B: Into<String>,
    {
        self.schema
            .dependencies
            .push(Dependency::new(dependent, field_map));
        self
    }

    /// Re-read stored content after every direct write.
    #[must_use]
    pub fn engine_feedback(mut self) -> Self {
        self.schema.engine_feedback = true;
        self
    }

    /// Finishes the declaration.
    ///
    /// # Errors
    ///
    /// Returns a schema error for duplicate fields, reserved privilege key set
    /// names, or references to undeclared fields.
    pub fn build(self) -> DocResult<Schema> {
        let schema = self.schema;
        if schema.name.is_empty() || schema.name.contains('/') {
            return Err(DocError::schema(format!(
                "invalid entity type name '{}'",
                schema.name
            )));
        }
        let mut seen = BTreeSet::new();
        for field in &schema.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(DocError::schema(format!(
                    "{}: field '{}' declared twice",
                    schema.name, field.name
                )));
            }
        }
        for name in schema.privilege_keys.keys() {
            if name == KEY_SET || name == "*" {
                return Err(DocError::schema(format!(
                    "{}: privilege key set name '{name}' is reserved",
                    schema.name
                )));
            }
        }
        let referenced = schema
            .key_fields
            .iter()
            .chain(schema.privilege_keys.values().flatten())
            .chain(schema.field_groups.values().flatten());
        for field in referenced {
            if !schema.has_field(field) {
                return Err(DocError::schema(format!(
                    "{}: unknown field '{field}'",
                    schema.name
                )));
            }
        }
        Ok(schema)
    }
}

/// Checks document content before it is written.
pub trait Validator: Send + Sync {
    /// Validates content against the schema.
    ///
    /// # Errors
    ///
    /// Returns [`DocError::Validation`] naming the first offending field.
    fn validate(&self, schema: &Schema, content: &Content) -> DocResult<()>;
}

/// Default validator: required fields and value kinds, including embedded
/// documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaValidator;

impl SchemaValidator {
    fn check(fields: &[FieldSpec], content: &Content, prefix: &str) -> DocResult<()> {
        for spec in fields {
            let field_path = if prefix.is_empty() {
                spec.name.clone()
            } else {
                format!("{prefix}.{}", spec.name)
            };
            let value = content.get(&spec.name).unwrap_or(&Value::Null);
            if value.is_null() {
                if spec.required {
                    return Err(DocError::validation(field_path, "field is required"));
                }
                continue;
            }
            if !spec.kind.accepts(value) {
                return Err(DocError::validation(
                    field_path,
                    format!("expected {:?} value", spec.kind),
                ));
            }
            if let (Value::Map(inner), false) = (value, spec.fields.is_empty()) {
                Self::check(&spec.fields, inner, &field_path)?;
            }
        }
        Ok(())
    }
}

impl Validator for SchemaValidator {
    fn validate(&self, schema: &Schema, content: &Content) -> DocResult<()> {
        Self::check(&schema.fields, content, "")
    }
}

/// Values of the given fields, `Null` for missing ones.
pub(crate) fn field_values(content: &Content, fields: &[String]) -> Vec<Value> {
    fields
        .iter()
        .map(|f| path::resolve(content, f).cloned().unwrap_or_default())
        .collect()
}
