//! Access control lists.
//!
//! An [`AclItem`] grants actions (`act`) on objects (`obj`). Objects follow
//! the privilege string layout `Type/keyset/v1/v2/...`:
//!
//! - `*` alone matches everything, `Type/*` a whole collection.
//! - A whole value segment may be `*`. Matching also honors a single `*`
//!   used as prefix, suffix or infix, as produced by intersections.
//! - `{name}` segments are variables filled from the caller's profile with
//!   [`Acl::filled`].
//!
//! Actions are comma separated (`read,write`), each optionally ending with a
//! wildcard (`read*` covers `read.public`).

use crate::config::StoreConfig;
use crate::error::{DocError, DocResult};
use crate::schema::{Schema, KEY_SET};
use docstore_codec::{Content, Value};
use docstore_engine::Criteria;
use std::collections::BTreeSet;

/// Caller capabilities, as seen by the document layer.
pub trait AccessPolicy: Send + Sync {
    /// Returns true if the policy grants nothing at all.
    fn is_empty(&self) -> bool;

    /// Returns true if `action` is granted on the privilege string.
    fn check(&self, privilege: &str, action: &str) -> bool;

    /// Derives engine-side restrictions for a search.
    ///
    /// Returns `None` with a message when the caller may not run the search
    /// at all. Otherwise the returned criteria are alternatives; an empty
    /// criteria in the list means no restriction.
    fn search_conditions(
        &self,
        schema: &Schema,
        ids: &[String],
        criteria: &Criteria,
    ) -> (Option<Vec<Criteria>>, String);
}

/// One grant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AclItem {
    obj: String,
    act: String,
}

impl AclItem {
    /// Creates an item. Whitespace around actions is removed.
    pub fn new(obj: impl Into<String>, act: impl AsRef<str>) -> Self {
        let act = act
            .as_ref()
            .split(',')
            .map(str::trim)
            .collect::<Vec<_>>()
            .join(",");
        Self {
            obj: obj.into(),
            act,
        }
    }

    /// Object pattern.
    pub fn obj(&self) -> &str {
        &self.obj
    }

    /// Action pattern.
    pub fn act(&self) -> &str {
        &self.act
    }

    /// Rejects patterns that can never match as intended.
    ///
    /// # Errors
    ///
    /// Returns a validation error describing the problem.
    pub fn validate(&self) -> DocResult<()> {
        let segments: Vec<&str> = self.obj.split('/').collect();
        if self.obj.matches('*').count() > 1 || self.act.matches('*').count() > 1 {
            return Err(DocError::validation("obj", "at most one wildcard per obj or act"));
        }
        if segments.len() == 2 && !self.obj.ends_with("/*") {
            return Err(DocError::validation("obj", "Type/* is the only two-segment pattern"));
        }
        if segments.len() == 3 && self.obj.ends_with("/*") {
            return Err(DocError::validation("obj", "use Type/* instead of Type/keyset/*"));
        }
        if self.obj.contains('*') && !segments.contains(&"*") {
            return Err(DocError::validation("obj", "wildcard must replace a value"));
        }
        for segment in &segments {
            if let Some(var) = segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                if var.contains('*') {
                    return Err(DocError::validation("obj", "wildcard in variable name"));
                }
            }
        }
        for act in self.act.split(',') {
            if act.contains('*') && !act.ends_with('*') {
                return Err(DocError::validation("act", "act only supports a trailing wildcard"));
            }
        }
        Ok(())
    }

    /// Matches a key against a pattern with at most one `*`.
    pub fn key_match(key: &str, pattern: &str) -> bool {
        if pattern == "*" {
            return true;
        }
        match pattern.split_once('*') {
            None => key == pattern,
            Some((start, end)) => {
                key.len() >= start.len() + end.len() && key.starts_with(start) && key.ends_with(end)
            }
        }
    }

    /// Matches an action against a comma separated action pattern.
    pub fn act_match(action: &str, pattern: &str) -> bool {
        pattern
            .split(',')
            .any(|p| Self::key_match(action, p.trim()))
    }

    /// Returns true if this item grants `act` on `obj`.
    pub fn matches(&self, obj: &str, act: &str) -> bool {
        Self::key_match(obj, &self.obj) && Self::act_match(act, &self.act)
    }

    /// Narrowest pattern matched by both keys, if any.
    pub fn key_intersect(key1: &str, key2: &str) -> Option<String> {
        if !key1.contains('*') {
            return Self::key_match(key1, key2).then(|| key1.to_string());
        }
        if !key2.contains('*') {
            return Self::key_match(key2, key1).then(|| key2.to_string());
        }
        let (s1, e1) = key1.split_once('*')?;
        let (s2, e2) = key2.split_once('*')?;
        let start = if s1.starts_with(s2) {
            s1
        } else if s2.starts_with(s1) {
            s2
        } else {
            return None;
        };
        let end = if e1.ends_with(e2) {
            e1
        } else if e2.ends_with(e1) {
            e2
        } else {
            return None;
        };
        Some(format!("{start}*{end}"))
    }

    /// Drops actions covered by another action of the list.
    fn act_compact(acts: BTreeSet<String>) -> Vec<String> {
        acts.iter()
            .filter(|a1| {
                !acts
                    .iter()
                    .any(|a2| a1 != &a2 && Self::key_intersect(a1, a2).as_deref() == Some(a1.as_str()))
            })
            .cloned()
            .collect()
    }

    fn act_intersect(act1: &str, act2: &str) -> Option<String> {
        let mut acts = BTreeSet::new();
        for a1 in act1.split(',') {
            for a2 in act2.split(',') {
                if let Some(act) = Self::key_intersect(a1.trim(), a2.trim()) {
                    if act == "*" {
                        return Some(act);
                    }
                    acts.insert(act);
                }
            }
        }
        let compacted = Self::act_compact(acts);
        (!compacted.is_empty()).then(|| compacted.join(","))
    }

    /// Grant held by both items, if any.
    pub fn intersect(&self, other: &AclItem) -> Option<AclItem> {
        let obj = Self::key_intersect(&self.obj, &other.obj)?;
        let act = Self::act_intersect(&self.act, &other.act)?;
        Some(AclItem { obj, act })
    }

    fn same_grant(&self, other: &AclItem) -> bool {
        let acts = |a: &str| a.split(',').map(str::to_string).collect::<BTreeSet<_>>();
        self.obj == other.obj && acts(&self.act) == acts(&other.act)
    }

    /// Expands `{var}` segments from the profile.
    ///
    /// An array profile value expands to one item per element. A variable
    /// missing from the profile grants nothing.
    ///
    /// # Errors
    ///
    /// Returns [`DocError::LimitExceeded`] when the expansion exceeds `limit`.
    pub fn filled(&self, profile: &Content, limit: usize) -> DocResult<Vec<AclItem>> {
        let mut choices: Vec<Vec<String>> = Vec::new();
        for segment in self.obj.split('/') {
            match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(var) => match profile.get(var) {
                    None => return Ok(Vec::new()),
                    Some(Value::Array(values)) => {
                        choices.push(values.iter().map(Value::to_display_string).collect());
                    }
                    Some(value) => choices.push(vec![value.to_display_string()]),
                },
                None => choices.push(vec![segment.to_string()]),
            }
        }
        let total = choices.iter().map(Vec::len).product::<usize>();
        if total > limit {
            return Err(DocError::limit_exceeded(format!(
                "a single dynamic ACL item can't be filled with more than {limit} entries"
            )));
        }
        let mut objs = vec![String::new()];
        for (i, options) in choices.iter().enumerate() {
            objs = objs
                .iter()
                .flat_map(|prefix| {
                    options.iter().map(move |option| {
                        if i == 0 {
                            option.clone()
                        } else {
                            format!("{prefix}/{option}")
                        }
                    })
                })
                .collect();
        }
        Ok(objs
            .into_iter()
            .map(|obj| AclItem {
                obj,
                act: self.act.clone(),
            })
            .collect())
    }
}

/// A caller's access control list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acl {
    items: Vec<AclItem>,
}

impl Acl {
    /// Creates a list from items.
    pub fn new(items: Vec<AclItem>) -> Self {
        Self { items }
    }

    /// Items of the list.
    pub fn items(&self) -> &[AclItem] {
        &self.items
    }

    /// Returns true if the list grants nothing.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns true if any item grants `act` on `obj`.
    pub fn check(&self, obj: &str, act: &str) -> bool {
        self.items.iter().any(|item| item.matches(obj, act))
    }

    /// Validates every item.
    ///
    /// # Errors
    ///
    /// Returns the first item error.
    pub fn validate(&self) -> DocResult<()> {
        self.items.iter().try_for_each(AclItem::validate)
    }

    /// Fills profile variables of every item.
    ///
    /// # Errors
    ///
    /// Returns [`DocError::LimitExceeded`] when one item or the whole list
    /// expands beyond the configured limits.
    pub fn filled(&self, profile: &Content, config: &StoreConfig) -> DocResult<Acl> {
        let mut items = Vec::new();
        for item in &self.items {
            items.extend(item.filled(profile, config.acl_item_fill_limit)?);
        }
        if items.len() > config.acl_total_fill_limit {
            return Err(DocError::limit_exceeded(format!(
                "filled ACL has more than {} entries",
                config.acl_total_fill_limit
            )));
        }
        Ok(Acl { items })
    }

    /// Removes items covered by another item of the list.
    fn compact(items: Vec<AclItem>) -> Vec<AclItem> {
        let mut kept: Vec<AclItem> = Vec::new();
        for (i, item) in items.iter().enumerate() {
            let covered = items.iter().enumerate().any(|(j, other)| {
                i != j
                    && !item.same_grant(other)
                    && item.intersect(other).is_some_and(|common| common.same_grant(item))
            });
            if !covered && !kept.iter().any(|k| k.same_grant(item)) {
                kept.push(item.clone());
            }
        }
        kept
    }

    /// Grants held by both lists.
    pub fn intersect(&self, other: &Acl) -> Acl {
        let left = Self::compact(self.items.clone());
        let right = Self::compact(other.items.clone());
        let common = left
            .iter()
            .flat_map(|l| right.iter().filter_map(move |r| l.intersect(r)))
            .collect();
        Acl {
            items: Self::compact(common),
        }
    }

    /// Items relevant to reading `schema`, with the fields they let the
    /// caller search on (`*` for every field).
    fn search_items(&self, schema: &Schema) -> (Vec<&AclItem>, BTreeSet<String>) {
        let type_prefix = format!("{}/", schema.name());
        let mut groups: Vec<(String, Option<&Vec<String>>)> = schema
            .field_groups()
            .iter()
            .map(|(name, fields)| (format!("read.{name}"), Some(fields)))
            .collect();
        groups.push(("read".to_string(), None));

        let mut items = Vec::new();
        let mut field_set = BTreeSet::new();
        for item in &self.items {
            if item.obj != "*" && !item.obj.starts_with(&type_prefix) {
                continue;
            }
            if item.obj != "*" {
                let keyset = item.obj.split('/').nth(1).unwrap_or_default();
                if keyset != "*" && keyset != KEY_SET && !schema.privilege_keys().contains_key(keyset) {
                    continue;
                }
            }
            let mut matched = false;
            for (action, fields) in &groups {
                if !AclItem::act_match(action, &item.act) {
                    continue;
                }
                matched = true;
                match fields {
                    Some(fields) => field_set.extend(fields.iter().cloned()),
                    None => {
                        field_set.insert("*".to_string());
                    }
                }
            }
            if matched {
                items.push(item);
            }
        }
        if field_set.contains("*") {
            field_set = BTreeSet::from(["*".to_string()]);
        } else {
            field_set.extend(schema.key_fields().iter().cloned());
        }
        (items, field_set)
    }

    /// Criteria equivalent to an object pattern. Missing trailing values
    /// are wildcards, and a `*` segment stands for as many values as needed.
    fn criteria_from_obj(schema: &Schema, obj: &str) -> Option<Criteria> {
        let segments: Vec<&str> = obj.split('/').collect();
        if segments.len() < 3 {
            return Some(Criteria::new());
        }
        let fields = schema.privilege_key_set(segments[1])?;
        let values = &segments[2..];
        let stretch = (fields.len() + 1).saturating_sub(values.len());
        let expanded = values
            .iter()
            .flat_map(|v| std::iter::repeat(*v).take(if *v == "*" { stretch } else { 1 }));
        let mut criteria = Criteria::new();
        for (field, display) in fields.iter().zip(expanded) {
            if display != "*" {
                criteria = criteria.eq(field.clone(), schema.from_display(field, display));
            }
        }
        Some(criteria)
    }

    /// Drops criteria implied by broader ones.
    fn compact_queries(queries: Vec<Criteria>) -> Vec<Criteria> {
        let mut kept: Vec<Criteria> = Vec::new();
        'next: for query in queries {
            let mut i = 0;
            while i < kept.len() {
                if query.is_subset_of(&kept[i]) {
                    kept.remove(i);
                    continue;
                }
                if kept[i].is_subset_of(&query) {
                    continue 'next;
                }
                i += 1;
            }
            kept.push(query);
        }
        kept
    }
}

impl AccessPolicy for Acl {
    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn check(&self, privilege: &str, action: &str) -> bool {
        Acl::check(self, privilege, action)
    }

    fn search_conditions(
        &self,
        schema: &Schema,
        ids: &[String],
        criteria: &Criteria,
    ) -> (Option<Vec<Criteria>>, String) {
        let (items, field_set) = self.search_items(schema);
        if !field_set.contains("*") && !criteria.fields().is_subset(&field_set) {
            return (
                None,
                "field level authorization doesn't cover the search criteria".to_string(),
            );
        }
        let mut queries: Vec<Criteria> = items
            .iter()
            .filter(|item| item.act.contains("read") || item.act == "*")
            .filter_map(|item| Self::criteria_from_obj(schema, &item.obj))
            .collect();
        if queries.iter().any(Criteria::is_empty) {
            queries = vec![Criteria::new()];
        }
        if ids.is_empty() && criteria.is_empty() && !queries.iter().any(Criteria::is_empty) {
            return (
                None,
                "no authorization to do a full scan, please provide at least one search criteria"
                    .to_string(),
            );
        }
        (Some(Self::compact_queries(queries)), String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldSpec;

    fn schema() -> Schema {
        Schema::builder("Order")
            .field(FieldSpec::text("orderId"))
            .field(FieldSpec::text("customer"))
            .field(FieldSpec::text("region"))
            .field(FieldSpec::integer("qty"))
            .field(FieldSpec::text("note"))
            .key_fields(["orderId"])
            .privilege_keys("owner", ["region", "customer"])
            .field_group("public", ["qty"])
            .build()
            .unwrap()
    }

    #[test]
    fn key_match_patterns() {
        assert!(AclItem::key_match("anything", "*"));
        assert!(AclItem::key_match("Order/key/A1", "Order/key/A1"));
        assert!(AclItem::key_match("Order/key/A1", "Order/*"));
        assert!(AclItem::key_match("Order/key/A1", "*/key/A1"));
        assert!(AclItem::key_match("Order/key/A1", "Order/*/A1"));
        assert!(!AclItem::key_match("Order/key/A1", "Order/*/B1"));
        assert!(!AclItem::key_match("Or", "Or*r"));
    }

    #[test]
    fn act_match_lists() {
        assert!(AclItem::act_match("write", "read, write"));
        assert!(AclItem::act_match("read.public", "read*"));
        assert!(!AclItem::act_match("delete", "read,write"));
        assert_eq!(AclItem::new("Order/*", "read, write").act(), "read,write");
    }

    #[test]
    fn validation_rules() {
        assert!(AclItem::new("Order/*", "read").validate().is_ok());
        assert!(AclItem::new("Order/owner/*/C1", "read").validate().is_ok());
        assert!(AclItem::new("Order/key/A*", "read").validate().is_err());
        assert!(AclItem::new("Order/key", "read").validate().is_err());
        assert!(AclItem::new("Order/key/*", "read").validate().is_err());
        assert!(AclItem::new("Order/*/A/*", "read").validate().is_err());
        assert!(AclItem::new("Order/*", "re*ad").validate().is_err());
    }

    #[test]
    fn fill_profile_variables() {
        let item = AclItem::new("Order/owner/{region}/{user}", "read");
        let mut profile = Content::new();
        profile.insert("region".into(), Value::array(["EU", "US"]));
        profile.insert("user".into(), Value::from("bob"));

        let filled = item.filled(&profile, 100).unwrap();
        let objs: Vec<&str> = filled.iter().map(AclItem::obj).collect();
        assert_eq!(objs, vec!["Order/owner/EU/bob", "Order/owner/US/bob"]);

        profile.remove("user");
        assert!(item.filled(&profile, 100).unwrap().is_empty());
    }

    #[test]
    fn fill_limits() {
        let mut profile = Content::new();
        profile.insert("region".into(), Value::array(["EU", "US", "APAC"]));
        let item = AclItem::new("Order/owner/{region}", "read");
        assert!(matches!(
            item.filled(&profile, 2),
            Err(DocError::LimitExceeded { .. })
        ));

        let acl = Acl::new(vec![item.clone(), item]);
        let config = StoreConfig::new().acl_fill_limits(10, 5);
        assert!(matches!(
            acl.filled(&profile, &config),
            Err(DocError::LimitExceeded { .. })
        ));
    }

    #[test]
    fn intersection() {
        assert_eq!(
            AclItem::key_intersect("Order/key/A*", "Order/*").as_deref(),
            Some("Order/key/A*")
        );
        assert_eq!(AclItem::key_intersect("A*", "B*"), None);

        let left = Acl::new(vec![AclItem::new("Order/*", "read,write")]);
        let right = Acl::new(vec![AclItem::new("Order/key/A1", "read")]);
        let common = left.intersect(&right);
        assert_eq!(common.items(), &[AclItem::new("Order/key/A1", "read")]);
    }

    #[test]
    fn search_conditions_from_owner_privileges() {
        let acl = Acl::new(vec![
            AclItem::new("Order/owner/EU/*", "read"),
            AclItem::new("Order/owner/EU/C1", "read"),
        ]);
        let (queries, message) = acl.search_conditions(&schema(), &[], &Criteria::new().eq("qty", 1i64));
        assert!(message.is_empty());
        let queries = queries.unwrap();
        assert_eq!(queries, vec![Criteria::new().eq("region", "EU")]);
    }

    #[test]
    fn full_scan_requires_wildcard() {
        let restricted = Acl::new(vec![AclItem::new("Order/key/A1", "read")]);
        let (queries, _) = restricted.search_conditions(&schema(), &[], &Criteria::new());
        assert!(queries.is_none());

        let (queries, _) = restricted.search_conditions(&schema(), &["A1".to_string()], &Criteria::new());
        assert_eq!(queries.unwrap(), vec![Criteria::new().eq("orderId", "A1")]);

        let open = Acl::new(vec![AclItem::new("Order/*", "read")]);
        let (queries, _) = open.search_conditions(&schema(), &[], &Criteria::new());
        assert_eq!(queries.unwrap(), vec![Criteria::new()]);
    }

    #[test]
    fn field_groups_limit_search_fields() {
        let acl = Acl::new(vec![AclItem::new("Order/*", "read.public")]);
        let (queries, _) = acl.search_conditions(&schema(), &[], &Criteria::new().eq("qty", 1i64));
        assert!(queries.is_some());
        let (queries, _) = acl.search_conditions(&schema(), &[], &Criteria::new().eq("orderId", "A1"));
        assert!(queries.is_some());
        let (queries, message) = acl.search_conditions(&schema(), &[], &Criteria::new().eq("note", "x"));
        assert!(queries.is_none());
        assert!(message.contains("field level"));
    }

    #[test]
    fn unknown_key_set_is_ignored() {
        let acl = Acl::new(vec![AclItem::new("Order/nope/X", "read")]);
        let (queries, _) = acl.search_conditions(&schema(), &[], &Criteria::new().eq("orderId", "A1"));
        assert_eq!(queries.unwrap(), Vec::<Criteria>::new());
    }
}
