//! Predicate evaluation and ordering for in-memory records.
//!
//! This module provides the evaluation engine for filter expressions and the
//! total order used when a query asks for sorted results.

use std::{cmp::Ordering, collections::HashMap};

use bson::{Bson, DateTime, oid::ObjectId};

use fakedb_core::{
    error::{FakeDbError, FakeDbResult},
    query::{Expr, FieldOp, Query, QueryVisitor, Sort, SortDirection},
    record::{Record, get_path},
};

/// Comparable representation of BSON values.
///
/// Numeric types are normalized to f64 so `Int32(1)`, `Int64(1)` and `Double(1.0)` compare equal.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    DateTime(DateTime),
    String(&'a str),
    ObjectId(ObjectId),
    Binary(&'a [u8]),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
    /// Values with no query semantics (regex, code, timestamps, ...). Never equal to anything.
    Opaque,
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(f64::from(*value)),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Binary(binary) => Comparable::Binary(&binary.bytes),
            Bson::Array(items) => Comparable::Array(items.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(key, value)| (key.as_str(), Comparable::from(value)))
                    .collect(),
            ),
            _ => Comparable::Opaque,
        }
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Binary(a), Comparable::Binary(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.bytes().partial_cmp(&b.bytes()),
            (Comparable::Binary(a), Comparable::Binary(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Returns `true` if two values are equal under query semantics.
pub(crate) fn values_equal(left: &Bson, right: &Bson) -> bool {
    Comparable::from(left) == Comparable::from(right)
}

/// Evaluates filter expressions against a single record.
pub(crate) struct RecordEvaluator<'a> {
    record: &'a Record,
}

impl<'a> RecordEvaluator<'a> {
    pub fn new(record: &'a Record) -> Self {
        Self { record }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> FakeDbResult<bool> {
        self.visit_expr(expr)
    }
}

/// Returns `true` if `record` satisfies `filter`. A missing filter matches everything.
pub fn matches(record: &Record, filter: Option<&Expr>) -> bool {
    match filter {
        Some(expr) => RecordEvaluator::new(record).evaluate(expr).unwrap_or(false),
        None => true,
    }
}

impl QueryVisitor for RecordEvaluator<'_> {
    type Output = bool;
    type Error = FakeDbError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_expr(expr)?)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(get_path(self.record, field).is_some() == should_exist)
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let field_value = get_path(self.record, field);

        Ok(match op {
            FieldOp::Eq => field_value.is_some_and(|actual| equals(actual, value)),
            FieldOp::Ne => !field_value.is_some_and(|actual| equals(actual, value)),
            FieldOp::Gt | FieldOp::Gte | FieldOp::Lt | FieldOp::Lte => {
                field_value.is_some_and(|actual| compare(actual, op, value))
            }
            FieldOp::In => field_value.is_some_and(|actual| any_of(actual, value)),
            FieldOp::NotIn => !field_value.is_some_and(|actual| any_of(actual, value)),
            FieldOp::Contains => field_value.is_some_and(|actual| contains(actual, value)),
            FieldOp::NotContains => !field_value.is_some_and(|actual| contains(actual, value)),
            FieldOp::StartsWith => match (field_value, value) {
                (Some(Bson::String(left)), Bson::String(right)) => left.starts_with(right.as_str()),
                _ => false,
            },
            FieldOp::EndsWith => match (field_value, value) {
                (Some(Bson::String(left)), Bson::String(right)) => left.ends_with(right.as_str()),
                _ => false,
            },
        })
    }
}

// An array field equals a scalar if any element does.
fn equals(actual: &Bson, expected: &Bson) -> bool {
    let (left, right) = (Comparable::from(actual), Comparable::from(expected));

    match (&left, &right) {
        (Comparable::Array(items), other) if !matches!(other, Comparable::Array(_)) => {
            items.iter().any(|item| item == other)
        }
        _ => left == right,
    }
}

fn compare(actual: &Bson, op: &FieldOp, expected: &Bson) -> bool {
    let ordering = Comparable::from(actual).partial_cmp(&Comparable::from(expected));

    match (op, ordering) {
        (FieldOp::Gt, Some(ordering)) => ordering == Ordering::Greater,
        (FieldOp::Gte, Some(ordering)) => ordering != Ordering::Less,
        (FieldOp::Lt, Some(ordering)) => ordering == Ordering::Less,
        (FieldOp::Lte, Some(ordering)) => ordering != Ordering::Greater,
        _ => false,
    }
}

fn any_of(actual: &Bson, candidates: &Bson) -> bool {
    match candidates {
        Bson::Array(candidates) => candidates.iter().any(|candidate| equals(actual, candidate)),
        single => equals(actual, single),
    }
}

fn contains(actual: &Bson, needle: &Bson) -> bool {
    match (Comparable::from(actual), Comparable::from(needle)) {
        (Comparable::Array(items), needle) => items.iter().any(|item| item == &needle),
        (Comparable::String(haystack), Comparable::String(needle)) => haystack.contains(needle),
        _ => false,
    }
}

// Cross-type sort order: missing, null, numbers, strings, documents, arrays,
// binary, object ids, booleans, datetimes, everything else.
fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None => 0,
        Some(Bson::Null | Bson::Undefined) => 1,
        Some(Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)) => 2,
        Some(Bson::String(_)) => 3,
        Some(Bson::Document(_)) => 4,
        Some(Bson::Array(_)) => 5,
        Some(Bson::Binary(_)) => 6,
        Some(Bson::ObjectId(_)) => 7,
        Some(Bson::Boolean(_)) => 8,
        Some(Bson::DateTime(_)) => 9,
        Some(_) => 10,
    }
}

/// Total order over optional field values used for sorting.
pub fn compare_values(left: Option<&Bson>, right: Option<&Bson>) -> Ordering {
    type_rank(left).cmp(&type_rank(right)).then_with(|| match (left, right) {
        (Some(Bson::Document(a)), Some(Bson::Document(b))) => a.to_string().cmp(&b.to_string()),
        (Some(Bson::Array(a)), Some(Bson::Array(b))) => a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| compare_values(Some(x), Some(y)))
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| a.len().cmp(&b.len())),
        (Some(a), Some(b)) => match (Comparable::from(a), Comparable::from(b)) {
            (Comparable::Number(x), Comparable::Number(y)) => compare_numbers(x, y),
            (x, y) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        },
        _ => Ordering::Equal,
    })
}

// NaN sorts before every other number and equal to itself.
fn compare_numbers(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Stable sort by a field path; records with equal keys keep insertion order.
pub fn sort_records(records: &mut [Record], sort: &Sort) {
    records.sort_by(|a, b| {
        let ordering = compare_values(get_path(a, &sort.field), get_path(b, &sort.field));

        match sort.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
}

/// Applies the sort, offset and limit of `query` to already filtered records.
pub fn apply_window(mut records: Vec<Record>, query: &Query) -> Vec<Record> {
    if let Some(sort) = &query.sort {
        sort_records(&mut records, sort);
    }

    records
        .into_iter()
        .skip(query.offset.unwrap_or(0))
        .take(query.limit.unwrap_or(usize::MAX))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use fakedb_core::query::Filter;

    fn event() -> Record {
        doc! {
            "_id": "e1",
            "type": "click",
            "tags": ["ui", "fast"],
            "meta": { "x": 1, "y": 2.5 },
            "count": 3i64,
        }
    }

    #[test]
    fn nested_paths_and_numeric_widths() {
        let record = event();

        assert!(matches(&record, Some(&Filter::eq("meta.x", 1i64))));
        assert!(matches(&record, Some(&Filter::eq("meta.x", 1.0))));
        assert!(matches(&record, Some(&Filter::gt("meta.y", 2))));
        assert!(!matches(&record, Some(&Filter::lt("meta.y", 2))));
        assert!(matches(&record, Some(&Filter::eq("tags.1", "fast"))));
    }

    #[test]
    fn missing_fields() {
        let record = event();

        assert!(!matches(&record, Some(&Filter::eq("meta.z", 1))));
        assert!(matches(&record, Some(&Filter::ne("meta.z", 1))));
        assert!(!matches(&record, Some(&Filter::gt("missing", 0))));
        assert!(matches(&record, Some(&Filter::not_exists("meta.z"))));
        assert!(matches(&record, Some(&Filter::exists("meta.x"))));
        assert!(matches(&record, Some(&Filter::not_in("missing", [1, 2]))));
    }

    #[test]
    fn membership_and_arrays() {
        let record = event();

        assert!(matches(&record, Some(&Filter::is_in("type", ["view", "click"]))));
        assert!(!matches(&record, Some(&Filter::not_in("type", ["view", "click"]))));
        assert!(matches(&record, Some(&Filter::eq("tags", "ui"))));
        assert!(matches(&record, Some(&Filter::is_in("tags", ["slow", "fast"]))));
        assert!(matches(&record, Some(&Filter::contains("tags", "ui"))));
        assert!(matches(&record, Some(&Filter::contains("type", "lic"))));
        assert!(matches(&record, Some(&Filter::starts_with("type", "cl"))));
        assert!(matches(&record, Some(&Filter::ends_with("type", "ck"))));
    }

    #[test]
    fn mismatched_types_never_match_ordering() {
        let record = event();

        assert!(!matches(&record, Some(&Filter::gt("type", 1))));
        assert!(!matches(&record, Some(&Filter::lte("type", 1))));
    }

    #[test]
    fn logical_combinators() {
        let record = event();
        let expr = Filter::or([Filter::eq("type", "view"), Filter::eq("meta.x", 1)]);

        assert!(matches(&record, Some(&expr)));
        assert!(!matches(&record, Some(&expr.clone().not())));
        assert!(matches(&record, Some(&Filter::and([]))));
        assert!(!matches(&record, Some(&Filter::or([]))));
        assert!(matches(&record, None));
    }

    #[test]
    fn sort_orders_types_then_values() {
        let mut records = vec![
            doc! { "n": "b" },
            doc! { "n": 2 },
            doc! {},
            doc! { "n": 1.5 },
            doc! { "n": Bson::Null },
        ];
        sort_records(&mut records, &Sort { field: "n".into(), direction: SortDirection::Asc });

        assert_eq!(
            records,
            vec![doc! {}, doc! { "n": Bson::Null }, doc! { "n": 1.5 }, doc! { "n": 2 }, doc! { "n": "b" }]
        );
    }

    #[test]
    fn nan_sorts_before_other_numbers() {
        let mut records = vec![
            doc! { "i": 0, "n": 3.0 },
            doc! { "i": 1, "n": f64::NAN },
            doc! { "i": 2, "n": 1 },
            doc! { "i": 3, "n": f64::NAN },
            doc! { "i": 4, "n": -2i64 },
        ];
        sort_records(&mut records, &Sort { field: "n".into(), direction: SortDirection::Asc });

        let order = records.iter().map(|record| record.get_i32("i").unwrap()).collect::<Vec<_>>();
        assert_eq!(order, vec![1, 3, 4, 2, 0]);

        let nan = Bson::Double(f64::NAN);
        assert_eq!(compare_values(Some(&nan), Some(&nan)), Ordering::Equal);
        assert_eq!(compare_values(Some(&nan), Some(&Bson::Int32(i32::MIN))), Ordering::Less);
        assert_eq!(compare_values(Some(&Bson::Null), Some(&nan)), Ordering::Less);
    }

    #[test]
    fn window_applies_offset_and_limit_after_sort() {
        let records = (0..5).map(|n| doc! { "n": n }).collect::<Vec<_>>();
        let query = Query::builder()
            .sort("n", SortDirection::Desc)
            .offset(1)
            .limit(2)
            .build();

        assert_eq!(apply_window(records, &query), vec![doc! { "n": 3 }, doc! { "n": 2 }]);
    }
}
