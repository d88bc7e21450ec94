//! Search criteria understood by every engine.
//!
//! A [`Criteria`] is a conjunction of [`Condition`]s on dotted field paths.
//! A [`Query`] adds the access-control restrictions derived from the
//! caller's privileges (any one of them must match) and a result limit.

use docstore_codec::{path, Content, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Comparison operator of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    /// Equal. An array field matches when it contains the value.
    Eq,
    /// Not equal.
    Ne,
    /// Strictly lower.
    Lt,
    /// Lower or equal.
    Le,
    /// Strictly greater.
    Gt,
    /// Greater or equal.
    Ge,
    /// Equal to any member of the (array) value.
    In,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Lt => "lt",
            Operator::Le => "le",
            Operator::Gt => "gt",
            Operator::Ge => "ge",
            Operator::In => "in",
        };
        f.write_str(s)
    }
}

/// A single condition: `path <op> value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// Dotted field path.
    pub path: String,
    /// Operator.
    pub op: Operator,
    /// Operand.
    pub value: Value,
}

impl Condition {
    /// Creates a new condition.
    pub fn new(path: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Self {
            path: path.into(),
            op,
            value: value.into(),
        }
    }

    /// Evaluates the condition against a document.
    pub fn matches(&self, content: &Content) -> bool {
        let field = path::resolve(content, &self.path).unwrap_or(&Value::Null);
        match self.op {
            Operator::Eq => value_eq(field, &self.value),
            Operator::Ne => !value_eq(field, &self.value),
            Operator::In => match &self.value {
                Value::Array(options) => options.iter().any(|o| value_eq(field, o)),
                single => value_eq(field, single),
            },
            Operator::Lt => field.compare(&self.value) == Some(Ordering::Less),
            Operator::Le => matches!(
                field.compare(&self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::Gt => field.compare(&self.value) == Some(Ordering::Greater),
            Operator::Ge => matches!(
                field.compare(&self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        }
    }
}

fn value_eq(field: &Value, expected: &Value) -> bool {
    if field == expected {
        return true;
    }
    match (field, expected) {
        (Value::Array(items), scalar) if !matches!(scalar, Value::Array(_)) => {
            items.iter().any(|item| item == scalar)
        }
        _ => false,
    }
}

/// A conjunction of conditions. Empty criteria match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criteria {
    conditions: Vec<Condition>,
}

impl Criteria {
    /// Creates empty criteria.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds equality criteria from `(path, value)` pairs.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        pairs
            .into_iter()
            .fold(Self::new(), |criteria, (k, v)| criteria.eq(k, v))
    }

    /// Adds an arbitrary condition.
    #[must_use]
    pub fn with(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Adds an equality condition.
    #[must_use]
    pub fn eq(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(Condition::new(path, Operator::Eq, value))
    }

    /// Adds an inequality condition.
    #[must_use]
    pub fn ne(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(Condition::new(path, Operator::Ne, value))
    }

    /// Adds a strictly-lower condition.
    #[must_use]
    pub fn lt(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(Condition::new(path, Operator::Lt, value))
    }

    /// Adds a lower-or-equal condition.
    #[must_use]
    pub fn le(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(Condition::new(path, Operator::Le, value))
    }

    /// Adds a strictly-greater condition.
    #[must_use]
    pub fn gt(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(Condition::new(path, Operator::Gt, value))
    }

    /// Adds a greater-or-equal condition.
    #[must_use]
    pub fn ge(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(Condition::new(path, Operator::Ge, value))
    }

    /// Adds an any-of condition.
    #[must_use]
    pub fn is_in<V: Into<Value>>(
        self,
        path: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.with(Condition::new(path, Operator::In, Value::array(values)))
    }

    /// Returns the conditions.
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Returns true if there are no conditions.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Returns the set of top-level field names referenced.
    pub fn fields(&self) -> BTreeSet<String> {
        self.conditions
            .iter()
            .map(|c| path::root(&c.path).to_string())
            .collect()
    }

    /// Evaluates every condition against a document.
    pub fn matches(&self, content: &Content) -> bool {
        self.conditions.iter().all(|c| c.matches(content))
    }

    /// Returns the equality values by path when every condition is an
    /// `Eq` or `In` condition on a distinct path.
    ///
    /// `In` conditions keep their array value, so callers can expand them.
    pub fn equalities(&self) -> Option<BTreeMap<String, Value>> {
        let mut values = BTreeMap::new();
        for condition in &self.conditions {
            if !matches!(condition.op, Operator::Eq | Operator::In) {
                return None;
            }
            if values
                .insert(condition.path.clone(), condition.value.clone())
                .is_some()
            {
                return None;
            }
        }
        Some(values)
    }

    /// Returns true if every condition of `self` also appears in `other`.
    ///
    /// In that case anything matching `other` also matches `self`.
    pub fn is_subset_of(&self, other: &Criteria) -> bool {
        self.conditions.iter().all(|c| other.conditions.contains(c))
    }
}

impl fmt::Display for Criteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .conditions
            .iter()
            .map(|c| format!("{} {} {}", c.path, c.op, c.value))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// A search request sent to an engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    /// Search criteria (all must match).
    pub criteria: Criteria,
    /// Restrictions derived from the caller's privileges. When non-empty, a
    /// document must match at least one of them.
    pub acl_queries: Vec<Criteria>,
    /// Maximum number of results.
    pub limit: Option<usize>,
}

impl Query {
    /// Creates a query from criteria.
    #[must_use]
    pub fn new(criteria: Criteria) -> Self {
        Self {
            criteria,
            ..Self::default()
        }
    }

    /// Sets the privilege restrictions.
    #[must_use]
    pub fn with_acl_queries(mut self, acl_queries: Vec<Criteria>) -> Self {
        self.acl_queries = acl_queries;
        self
    }

    /// Sets the result limit.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Evaluates criteria and privilege restrictions against a document.
    pub fn matches(&self, content: &Content) -> bool {
        self.criteria.matches(content)
            && (self.acl_queries.is_empty() || self.acl_queries.iter().any(|q| q.matches(content)))
    }

    /// Returns true if `count` results already reach the limit.
    pub fn is_full(&self, count: usize) -> bool {
        self.limit.is_some_and(|limit| count >= limit)
    }
}
