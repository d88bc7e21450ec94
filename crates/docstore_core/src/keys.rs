//! Document ids derived from key fields.
//!
//! A type with a single text key field uses the key value itself as the id.
//! Every other key layout encodes the JSON array of key values with URL-safe
//! base64 without padding, so the id can always be turned back into key
//! values.

use crate::error::{DocError, DocResult};
use crate::schema::{field_values, FieldKind, Schema};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use docstore_codec::{path, Content, Value};
use std::collections::BTreeMap;

impl Schema {
    fn raw_key(&self) -> bool {
        self.key_fields().len() == 1 && self.field_kind(&self.key_fields()[0]) == FieldKind::Text
    }

    fn encode_key(&self, values: &[Value]) -> String {
        if self.raw_key() {
            if let [Value::Text(text)] = values {
                return text.clone();
            }
        }
        let json = serde_json::Value::Array(values.iter().map(Value::to_json).collect());
        URL_SAFE_NO_PAD.encode(json.to_string())
    }

    fn require_key_fields(&self) -> DocResult<()> {
        if self.key_fields().is_empty() {
            return Err(DocError::schema(format!(
                "key fields are not defined for {}",
                self.name()
            )));
        }
        Ok(())
    }

    /// Derives the document id from the key fields of `content`.
    ///
    /// Returns `None` when the type has no key fields or a key value is
    /// missing; the engine assigns the id in that case.
    pub fn calculate_id(&self, content: &Content) -> Option<String> {
        if self.key_fields().is_empty() {
            return None;
        }
        let values = field_values(content, self.key_fields());
        if values.iter().any(Value::is_blank) {
            return None;
        }
        Some(self.encode_key(&values))
    }

    /// Derives the id from explicit key values.
    ///
    /// # Errors
    ///
    /// Fails when the type has no key fields or a key value is missing.
    pub fn dict_to_id(&self, key_values: &BTreeMap<String, Value>) -> DocResult<String> {
        self.require_key_fields()?;
        let mut values = Vec::with_capacity(self.key_fields().len());
        for field in self.key_fields() {
            match key_values.get(field) {
                Some(value) if !value.is_blank() => values.push(value.clone()),
                _ => return Err(DocError::validation(field.clone(), "key value is missing")),
            }
        }
        Ok(self.encode_key(&values))
    }

    /// Derives every id matching the key values. Array values stand for any
    /// of their items, so the result is the cartesian product.
    ///
    /// # Errors
    ///
    /// Fails when the type has no key fields or a key value is missing.
    pub fn dict_to_id_list(&self, key_values: &BTreeMap<String, Value>) -> DocResult<Vec<String>> {
        self.require_key_fields()?;
        let mut combos: Vec<BTreeMap<String, Value>> = vec![BTreeMap::new()];
        for field in self.key_fields() {
            let choices: Vec<Value> = match key_values.get(field) {
                Some(Value::Array(items)) => items.clone(),
                Some(value) => vec![value.clone()],
                None => return Err(DocError::validation(field.clone(), "key value is missing")),
            };
            combos = combos
                .into_iter()
                .flat_map(|combo| {
                    choices.iter().map(move |choice| {
                        let mut next = combo.clone();
                        next.insert(field.clone(), choice.clone());
                        next
                    })
                })
                .collect();
        }
        combos.iter().map(|combo| self.dict_to_id(combo)).collect()
    }

    /// Recovers key values from an id.
    ///
    /// # Errors
    ///
    /// Fails when the type has no key fields or the id is not a key-derived id.
    pub fn id_to_dict(&self, doc_id: &str) -> DocResult<Content> {
        self.require_key_fields()?;
        if self.raw_key() {
            let mut content = Content::new();
            content.insert(self.key_fields()[0].clone(), Value::from(doc_id));
            return Ok(content);
        }
        let invalid = |reason: String| DocError::unprocessable(format!("invalid id '{doc_id}': {reason}"));
        let bytes = URL_SAFE_NO_PAD
            .decode(doc_id.trim_end_matches('='))
            .map_err(|e| invalid(e.to_string()))?;
        let json: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| invalid(e.to_string()))?;
        let serde_json::Value::Array(items) = json else {
            return Err(invalid("not a key array".to_string()));
        };
        if items.len() != self.key_fields().len() {
            return Err(invalid(format!(
                "expected {} key values, found {}",
                self.key_fields().len(),
                items.len()
            )));
        }
        let mut content = Content::new();
        for (field, item) in self.key_fields().iter().zip(items) {
            content.insert(field.clone(), Value::from_json(item)?);
        }
        Ok(content)
    }

    /// Privilege strings of a document, one per privilege key set:
    /// `"<Type>/<set>/<v1>/<v2>..."` with `*` standing for missing values.
    ///
    /// # Errors
    ///
    /// Fails when the type declares no privilege key set.
    pub fn privilege_values(&self, content: &Content) -> DocResult<Vec<String>> {
        Ok(self
            .privilege_key_sets()?
            .into_iter()
            .map(|(set, fields)| {
                let mut parts = vec![self.name().to_string(), set.to_string()];
                parts.extend(fields.iter().map(|f| {
                    path::resolve(content, f).map_or_else(|| "*".to_string(), Value::to_display_string)
                }));
                parts.join("/")
            })
            .collect())
    }
}
