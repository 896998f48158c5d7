//! Query construction and filtering API for the fake databases.
//!
//! This module provides the predicate AST shared by both database variants,
//! fluent builders for it, and a visitor trait for evaluating or translating it.
//!
//! # Query Building
//!
//! ```ignore
//! use fakedb::query::{Filter, Query, SortDirection};
//!
//! let query = Query::builder()
//!     .filter(Filter::eq("name", "Ana").and(Filter::gte("age", 18)))
//!     .columns(["id", "name"])
//!     .sort("id", SortDirection::Desc)
//!     .limit(10)
//!     .build();
//! ```
//!
//! # Filter Expression API
//!
//! - Comparison: `eq`, `ne`, `gt`, `gte`, `lt`, `lte`
//! - Membership: `is_in`, `not_in`
//! - String/array: `contains`, `not_contains`, `starts_with`, `ends_with`
//! - Existence: `exists`, `not_exists`
//! - Logical: `and`, `or`, plus [`Expr::not`]
//!
//! Field names are dotted paths; `"meta.x"` addresses key `x` of the nested document `meta`.

use bson::{Bson, Document};

use crate::error::{FakeDbError, FakeDbResult};

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

/// Sort specification for query results.
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    /// The field path to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

/// Field comparison operators for filter expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    /// Equal to (exact match).
    Eq,
    /// Not equal to.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal to.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal to.
    Lte,
    /// Field value (or any element of an array field) is one of the listed values.
    In,
    /// Field value (and every element of an array field) is none of the listed values.
    NotIn,
    /// String contains substring, or array contains element.
    Contains,
    /// Negation of [`FieldOp::Contains`].
    NotContains,
    /// String starts with value.
    StartsWith,
    /// String ends with value.
    EndsWith,
}

/// A filter expression over record fields.
///
/// Expressions can be combined using logical operators (`And`, `Or`, `Not`)
/// to build complex predicates.
///
/// # Example
///
/// ```ignore
/// use fakedb::query::Filter;
///
/// let expr = Filter::and([
///     Filter::eq("type", "click"),
///     Filter::gt("meta.x", 0),
/// ]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Logical AND of multiple expressions (all must match). An empty list matches everything.
    And(Vec<Expr>),
    /// Logical OR of multiple expressions (any must match). An empty list matches nothing.
    Or(Vec<Expr>),
    /// Logical NOT of an expression.
    Not(Box<Expr>),
    /// Checks whether a field exists.
    Exists(String, bool),
    /// Field comparison expression.
    Field {
        /// The field path to compare.
        field: String,
        /// The comparison operator.
        op: FieldOp,
        /// The value to compare against.
        value: Bson,
    },
}

impl Expr {
    /// Creates a field comparison expression.
    pub fn field(field: String, op: FieldOp, value: Bson) -> Self {
        Expr::Field { field, op, value }
    }

    /// Combines this expression with another using logical AND.
    ///
    /// If this expression is already an AND, the other expression is appended
    /// to the list. Otherwise, a new AND expression is created.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// Combines this expression with another using logical OR.
    ///
    /// If this expression is already an OR, the other expression is appended
    /// to the list. Otherwise, a new OR expression is created.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }

    /// Negates this expression (logical NOT).
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }
}

/// A structured query: filter, projection, ordering and paging.
///
/// Without a sort, results come back in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Optional filter expression to match records.
    pub filter: Option<Expr>,
    /// Optional list of fields to keep in each result.
    pub projection: Option<Vec<String>>,
    /// Maximum number of records to return.
    pub limit: Option<usize>,
    /// Number of records to skip.
    pub offset: Option<usize>,
    /// Sort specification for results.
    pub sort: Option<Sort>,
}

impl Query {
    /// Creates a new empty query that matches every record.
    pub fn new() -> Self {
        Query::default()
    }

    /// Creates a new query builder for fluent construction.
    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }

    /// Creates a query holding only a filter.
    pub fn filtered(filter: Expr) -> Self {
        Query {
            filter: Some(filter),
            ..Query::default()
        }
    }
}

/// Helper struct for constructing filter expressions.
///
/// All methods accept field names as `Into<String>` and values as `Into<Bson>`.
pub struct Filter;

impl Filter {
    /// Matches records where the field equals the value.
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Eq, value.into())
    }

    /// Matches records where the field does not equal the value.
    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Ne, value.into())
    }

    /// Matches records where the field is greater than the value.
    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gt, value.into())
    }

    /// Matches records where the field is greater than or equal to the value.
    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gte, value.into())
    }

    /// Matches records where the field is less than the value.
    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lt, value.into())
    }

    /// Matches records where the field is less than or equal to the value.
    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lte, value.into())
    }

    /// Matches records where the field is one of the given values.
    pub fn is_in<V: Into<Bson>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Expr {
        Expr::field(
            field.into(),
            FieldOp::In,
            Bson::Array(values.into_iter().map(Into::into).collect()),
        )
    }

    /// Matches records where the field is none of the given values.
    pub fn not_in<V: Into<Bson>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Expr {
        Expr::field(
            field.into(),
            FieldOp::NotIn,
            Bson::Array(values.into_iter().map(Into::into).collect()),
        )
    }

    /// Matches records where the string field contains the substring, or the array field contains the element.
    pub fn contains(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Contains, value.into())
    }

    /// Negation of [`Filter::contains`].
    pub fn not_contains(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::NotContains, value.into())
    }

    /// Matches records where the string field starts with the value.
    pub fn starts_with(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::StartsWith, value.into())
    }

    /// Matches records where the string field ends with the value.
    pub fn ends_with(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::EndsWith, value.into())
    }

    /// Matches records where the field is present (a stored null counts as present).
    pub fn exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), true)
    }

    /// Matches records where the field is absent.
    pub fn not_exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), false)
    }

    /// Combines expressions such that all must match.
    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    /// Combines expressions such that any may match.
    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }

    /// Parses a mongo-style filter document such as `{"meta.x": 1, "age": {"$gte": 18}}`.
    ///
    /// See [`crate::filter_doc`] for the supported operators.
    pub fn from_document(filter: &Document) -> FakeDbResult<Expr> {
        crate::filter_doc::parse_filter(filter)
    }

    /// Renders an expression back into a mongo-style filter document.
    pub fn to_document(expr: &Expr) -> FakeDbResult<Document> {
        crate::filter_doc::FilterRenderer.visit_expr(expr)
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    /// Creates a new query builder.
    pub fn new() -> Self {
        QueryBuilder { query: Query::default() }
    }

    /// Sets the filter expression for this query.
    pub fn filter(mut self, filter: Expr) -> Self {
        self.query.filter = Some(filter);
        self
    }

    /// Restricts each result to the given fields.
    pub fn columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.query.projection = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the maximum number of records to return.
    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Sets the number of records to skip.
    pub fn offset(mut self, offset: usize) -> Self {
        self.query.offset = Some(offset);
        self
    }

    /// Sets the sort specification for the query results.
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query.sort = Some(Sort { field: field.into(), direction });
        self
    }

    /// Builds and returns the final query.
    pub fn build(self) -> Query {
        self.query
    }
}

pub trait QueryVisitor {
    type Output;
    type Error: Into<FakeDbError>;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error>;
    fn visit_exists(
        &mut self,
        field: &str,
        should_exist: bool,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_field(
        &mut self,
        field: &str,
        op: &FieldOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Not(expr) => self.visit_not(expr),
            Expr::Exists(field, should_exist) => self.visit_exists(field, *should_exist),
            Expr::Field { field, op, value } => self.visit_field(field, op, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_flattens_chains() {
        let expr = Filter::eq("a", 1).and(Filter::eq("b", 2)).and(Filter::eq("c", 3));

        match expr {
            Expr::And(list) => assert_eq!(list.len(), 3),
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn membership_builders_collect_arrays() {
        let expr = Filter::is_in("status", ["new", "open"]);

        assert_eq!(
            expr,
            Expr::field(
                "status".into(),
                FieldOp::In,
                Bson::Array(vec!["new".into(), "open".into()])
            )
        );
    }

    #[test]
    fn builder_sets_every_part() {
        let query = Query::builder()
            .filter(Filter::eq("id", 1))
            .columns(["id", "name"])
            .sort("name", SortDirection::Asc)
            .offset(2)
            .limit(5)
            .build();

        assert_eq!(query.filter, Some(Filter::eq("id", 1)));
        assert_eq!(query.projection, Some(vec!["id".to_string(), "name".to_string()]));
        assert_eq!(query.offset, Some(2));
        assert_eq!(query.limit, Some(5));
        assert_eq!(query.sort.map(|s| s.direction), Some(SortDirection::Asc));
    }
}
