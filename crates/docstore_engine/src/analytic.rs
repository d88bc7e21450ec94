//! Analytic requests: filtered group-by aggregation.
//!
//! The document layer hands an [`AnalyticRequest`] and the caller's
//! privilege restrictions to [`Engine::compile`](crate::Engine::compile);
//! the resulting [`AnalyticModel`] is then run with
//! [`Engine::analyze`](crate::Engine::analyze). Engines without analytics
//! refuse both calls.

use crate::query::{Criteria, Query};
use docstore_codec::{path, Content, Value};

/// What to aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyticRequest {
    /// Documents taken into account.
    pub filter: Criteria,
    /// Fields whose values form a group. Empty means one group.
    pub group_by: Vec<String>,
    /// Integer fields summed per group.
    pub sum: Vec<String>,
}

impl AnalyticRequest {
    /// Creates a request counting every document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the documents taken into account.
    #[must_use]
    pub fn filter(mut self, filter: Criteria) -> Self {
        self.filter = filter;
        self
    }

    /// Adds a grouping field.
    #[must_use]
    pub fn group_by(mut self, field: impl Into<String>) -> Self {
        self.group_by.push(field.into());
        self
    }

    /// Adds a summed field.
    #[must_use]
    pub fn sum(mut self, field: impl Into<String>) -> Self {
        self.sum.push(field.into());
        self
    }
}

/// A request bound to privilege restrictions, ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyticModel {
    /// The request.
    pub request: AnalyticRequest,
    /// Filter plus privilege restrictions.
    pub query: Query,
}

impl AnalyticModel {
    /// Binds a request to the caller's privilege restrictions.
    pub fn new(request: AnalyticRequest, acl_queries: Vec<Criteria>) -> Self {
        let query = Query::new(request.filter.clone()).with_acl_queries(acl_queries);
        Self { request, query }
    }

    /// Aggregates documents in memory.
    ///
    /// Each result row holds the group values, a `count` field and one
    /// total per summed field. Non-integer values are not summed. Rows come
    /// out in the order their group was first seen.
    pub fn run<'a>(&self, documents: impl IntoIterator<Item = &'a Content>) -> Vec<Content> {
        let mut groups: Vec<(Vec<Value>, i64, Vec<i64>)> = Vec::new();
        for content in documents {
            if !self.query.matches(content) {
                continue;
            }
            let key: Vec<Value> = self
                .request
                .group_by
                .iter()
                .map(|field| path::resolve(content, field).cloned().unwrap_or(Value::Null))
                .collect();
            let index = match groups.iter().position(|(k, _, _)| *k == key) {
                Some(index) => index,
                None => {
                    groups.push((key, 0, vec![0; self.request.sum.len()]));
                    groups.len() - 1
                }
            };
            let (_, count, totals) = &mut groups[index];
            *count += 1;
            for (total, field) in totals.iter_mut().zip(&self.request.sum) {
                if let Some(n) = path::resolve(content, field).and_then(Value::as_integer) {
                    *total = total.saturating_add(n);
                }
            }
        }

        groups
            .into_iter()
            .map(|(key, count, totals)| {
                let mut row = Content::new();
                for (field, value) in self.request.group_by.iter().zip(key) {
                    row.insert(field.clone(), value);
                }
                row.insert("count".into(), Value::Integer(count));
                for (field, total) in self.request.sum.iter().zip(totals) {
                    row.insert(field.clone(), Value::Integer(total));
                }
                row
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(customer: &str, qty: i64) -> Content {
        let mut content = Content::new();
        content.insert("customer".into(), Value::from(customer));
        content.insert("qty".into(), Value::Integer(qty));
        content
    }

    #[test]
    fn groups_count_and_sum() {
        let docs = [order("C1", 2), order("C2", 5), order("C1", 3)];
        let model = AnalyticModel::new(
            AnalyticRequest::new().group_by("customer").sum("qty"),
            Vec::new(),
        );
        let rows = model.run(&docs);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["customer"], Value::from("C1"));
        assert_eq!(rows[0]["count"], Value::Integer(2));
        assert_eq!(rows[0]["qty"], Value::Integer(5));
        assert_eq!(rows[1]["qty"], Value::Integer(5));
    }

    #[test]
    fn privilege_restrictions_filter_rows() {
        let docs = [order("C1", 2), order("C2", 5)];
        let model = AnalyticModel::new(
            AnalyticRequest::new().sum("qty"),
            vec![Criteria::new().eq("customer", "C2")],
        );
        let rows = model.run(&docs);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["count"], Value::Integer(1));
        assert_eq!(rows[0]["qty"], Value::Integer(5));
    }
}
