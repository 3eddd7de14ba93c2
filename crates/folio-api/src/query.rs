//! Structured query constraints and their reference evaluation.
//!
//! Backends translate [`Constraints`] into their own query language. The
//! evaluation methods here define the expected semantics and are what the
//! in-memory backend uses directly.

use std::cmp::Ordering;

use crate::collection::Collection;
use crate::document::Document;
use crate::error::StoreError;
use crate::value::{Fields, Value};

/// Upper bound on the value list of set-membership predicates.
pub const MAX_DISJUNCTION_VALUES: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FilterOp {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    NotIn,
    ArrayContains,
    ArrayContainsAny,
}

impl FilterOp {
    pub fn symbol(self) -> &'static str {
        match self {
            FilterOp::Eq => "==",
            FilterOp::NotEq => "!=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::In => "in",
            FilterOp::NotIn => "not-in",
            FilterOp::ArrayContains => "array-contains",
            FilterOp::ArrayContainsAny => "array-contains-any",
        }
    }

    fn takes_list(self) -> bool {
        matches!(
            self,
            FilterOp::In | FilterOp::NotIn | FilterOp::ArrayContainsAny
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Field path; dots address nested objects.
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Whether a document's fields satisfy this predicate. A missing field
    /// never matches, including for `!=` and `not-in`.
    pub fn matches(&self, fields: &Fields) -> bool {
        let Some(actual) = lookup(fields, &self.field) else {
            return false;
        };
        match self.op {
            FilterOp::Eq => actual.loosely_equals(&self.value),
            FilterOp::NotEq => !actual.loosely_equals(&self.value),
            FilterOp::Lt => actual.compare(&self.value) == Some(Ordering::Less),
            FilterOp::Lte => matches!(
                actual.compare(&self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOp::Gt => actual.compare(&self.value) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(
                actual.compare(&self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::In => list(&self.value)
                .iter()
                .any(|candidate| actual.loosely_equals(candidate)),
            FilterOp::NotIn => !list(&self.value)
                .iter()
                .any(|candidate| actual.loosely_equals(candidate)),
            FilterOp::ArrayContains => actual
                .as_array()
                .is_some_and(|items| items.iter().any(|item| item.loosely_equals(&self.value))),
            FilterOp::ArrayContainsAny => actual.as_array().is_some_and(|items| {
                list(&self.value)
                    .iter()
                    .any(|wanted| items.iter().any(|item| item.loosely_equals(wanted)))
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Predicates, ordering and result cap of one logical query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Constraints {
    pub filters: Vec<Filter>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
}

impl Constraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.where_field(field, FilterOp::Eq, value)
    }

    pub fn where_field(
        mut self,
        field: impl Into<String>,
        op: FilterOp,
        value: impl Into<Value>,
    ) -> Self {
        self.filters.push(Filter::new(field, op, value));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Reject constraints no backend could execute.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.limit == Some(0) {
            return Err(StoreError::invalid("limit must be greater than zero"));
        }
        for filter in &self.filters {
            if filter.field.is_empty() {
                return Err(StoreError::invalid("filter on empty field path"));
            }
            if filter.op.takes_list() {
                match &filter.value {
                    Value::Array(values) if values.is_empty() => {
                        return Err(StoreError::invalid(format!(
                            "'{}' filter on {} needs at least one value",
                            filter.op.symbol(),
                            filter.field
                        )));
                    }
                    Value::Array(values) if values.len() > MAX_DISJUNCTION_VALUES => {
                        return Err(StoreError::invalid(format!(
                            "'{}' filter on {} accepts at most {} values, got {}",
                            filter.op.symbol(),
                            filter.field,
                            MAX_DISJUNCTION_VALUES,
                            values.len()
                        )));
                    }
                    Value::Array(_) => {}
                    _ => {
                        return Err(StoreError::invalid(format!(
                            "'{}' filter on {} needs a list value",
                            filter.op.symbol(),
                            filter.field
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        self.filters.iter().all(|f| f.matches(fields))
            && self
                .order_by
                .iter()
                .all(|o| lookup(fields, &o.field).is_some())
    }

    /// Filter, order and cap a document set. Documents missing an ordering
    /// field are excluded; ties fall back to document id.
    pub fn apply(&self, documents: impl IntoIterator<Item = Document>) -> Vec<Document> {
        let mut selected: Vec<Document> = documents
            .into_iter()
            .filter(|doc| self.matches(&doc.fields))
            .collect();

        selected.sort_by(|a, b| {
            for clause in &self.order_by {
                let left = lookup(&a.fields, &clause.field);
                let right = lookup(&b.fields, &clause.field);
                let ordering = match (left, right) {
                    (Some(l), Some(r)) => l.compare(r).unwrap_or(Ordering::Equal),
                    _ => Ordering::Equal,
                };
                let ordering = match clause.direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.id.cmp(&b.id)
        });

        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }

    /// Canonical text of these constraints. Filter order does not matter;
    /// ordering clauses keep their order because it changes the result.
    pub fn canonical_string(&self) -> String {
        let mut filters: Vec<String> = self
            .filters
            .iter()
            .map(|f| {
                format!(
                    "{}{}{}",
                    f.field,
                    f.op.symbol(),
                    f.value.canonical_string()
                )
            })
            .collect();
        filters.sort();

        let order: Vec<String> = self
            .order_by
            .iter()
            .map(|o| match o.direction {
                Direction::Ascending => format!("{} asc", o.field),
                Direction::Descending => format!("{} desc", o.field),
            })
            .collect();

        let limit = self
            .limit
            .map(|l| l.to_string())
            .unwrap_or_else(|| "-".to_string());

        format!(
            "where[{}]order[{}]limit[{}]",
            filters.join("&"),
            order.join(","),
            limit
        )
    }
}

/// Deterministic key identifying a logical query.
pub fn cache_key(collection: Collection, constraints: &Constraints) -> String {
    format!("{}?{}", collection.name(), constraints.canonical_string())
}

/// Resolve a dotted field path.
pub fn lookup<'a>(fields: &'a Fields, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = fields.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn list(value: &Value) -> &[Value] {
    match value {
        Value::Array(values) => values,
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, fields: Vec<(&str, Value)>) -> Document {
        Document::new(
            id,
            fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    #[test]
    fn test_cache_key_ignores_filter_order() {
        let a = Constraints::new()
            .where_eq("status", "pending")
            .where_eq("submittedBy", "u1");
        let b = Constraints::new()
            .where_eq("submittedBy", "u1")
            .where_eq("status", "pending");
        assert_eq!(
            cache_key(Collection::JobQueue, &a),
            cache_key(Collection::JobQueue, &b)
        );
    }

    #[test]
    fn test_cache_key_separates_collections_and_limits() {
        let c = Constraints::new().where_eq("status", "pending");
        assert_ne!(
            cache_key(Collection::JobQueue, &c),
            cache_key(Collection::JobMatches, &c)
        );
        assert_ne!(
            cache_key(Collection::JobQueue, &c),
            cache_key(Collection::JobQueue, &c.clone().limit(5))
        );
    }

    #[test]
    fn test_apply_filters_orders_and_limits() {
        let docs = vec![
            doc("a", vec![("status", "pending".into()), ("order", 3.into())]),
            doc("b", vec![("status", "done".into()), ("order", 1.into())]),
            doc("c", vec![("status", "pending".into()), ("order", 1.into())]),
            doc("d", vec![("status", "pending".into()), ("order", 2.into())]),
        ];
        let constraints = Constraints::new()
            .where_eq("status", "pending")
            .order_by("order", Direction::Ascending)
            .limit(2);
        let ids: Vec<String> = constraints.apply(docs).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["c", "d"]);
    }

    #[test]
    fn test_set_membership_and_array_predicates() {
        let d = doc(
            "x",
            vec![
                ("status", "failed".into()),
                ("skills", Value::from(vec!["rust", "sql"])),
            ],
        );
        let in_filter = Filter::new("status", FilterOp::In, vec!["failed", "skipped"]);
        let not_in = Filter::new("status", FilterOp::NotIn, vec!["failed"]);
        let contains = Filter::new("skills", FilterOp::ArrayContains, "rust");
        let contains_any = Filter::new("skills", FilterOp::ArrayContainsAny, vec!["go", "sql"]);
        assert!(in_filter.matches(&d.fields));
        assert!(!not_in.matches(&d.fields));
        assert!(contains.matches(&d.fields));
        assert!(contains_any.matches(&d.fields));
    }

    #[test]
    fn test_missing_field_never_matches() {
        let d = doc("x", vec![]);
        assert!(!Filter::new("parentId", FilterOp::NotEq, "p").matches(&d.fields));
    }

    #[test]
    fn test_nested_lookup() {
        let mut inner = Fields::new();
        inner.insert("city".into(), "Berlin".into());
        let d = doc("x", vec![("address", Value::Object(inner))]);
        assert!(Filter::new("address.city", FilterOp::Eq, "Berlin").matches(&d.fields));
    }

    #[test]
    fn test_validate_rejects_bad_lists() {
        let scalar = Constraints::new().where_field("status", FilterOp::In, "pending");
        assert!(scalar.validate().is_err());
        let empty = Constraints::new().where_field("status", FilterOp::In, Vec::<Value>::new());
        assert!(empty.validate().is_err());
        assert!(Constraints::new().limit(0).validate().is_err());
        assert!(Constraints::new().limit(1).validate().is_ok());
    }
}
