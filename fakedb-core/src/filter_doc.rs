//! Mongo-style filter documents.
//!
//! Test code written against a document database usually spells predicates as
//! documents: `{"type": "click", "meta.x": {"$gte": 1}}`. This module parses that
//! shape into an [`Expr`] and renders an [`Expr`] back into it.
//!
//! Supported operators: `$eq $ne $gt $gte $lt $lte $in $nin $exists $not` at field
//! level and `$and $or $nor` at top level. `$contains $notContains $startsWith
//! $endsWith` are accepted as extensions mirroring [`FieldOp`]. A field mapped to
//! a plain value (including a document without operator keys) means equality.

use bson::{Bson, Document, doc};

use crate::{
    error::{FakeDbError, FakeDbResult},
    query::{Expr, FieldOp, QueryVisitor},
};

/// Parses a filter document into an expression. An empty document matches everything.
pub fn parse_filter(filter: &Document) -> FakeDbResult<Expr> {
    let mut exprs = filter
        .iter()
        .map(|(key, value)| parse_entry(key, value))
        .collect::<FakeDbResult<Vec<_>>>()?;

    Ok(match exprs.len() {
        1 => exprs.remove(0),
        _ => Expr::And(exprs),
    })
}

fn parse_entry(key: &str, value: &Bson) -> FakeDbResult<Expr> {
    match key {
        "$and" => Ok(Expr::And(parse_clauses(key, value)?)),
        "$or" => Ok(Expr::Or(parse_clauses(key, value)?)),
        "$nor" => Ok(Expr::Or(parse_clauses(key, value)?).not()),
        _ if key.starts_with('$') => Err(FakeDbError::InvalidArgument(format!(
            "unknown top-level operator '{key}'"
        ))),
        field => match value {
            Bson::Document(ops) if is_operator_document(ops) => parse_operators(field, ops),
            other => Ok(Expr::field(field.to_string(), FieldOp::Eq, other.clone())),
        },
    }
}

fn parse_clauses(key: &str, value: &Bson) -> FakeDbResult<Vec<Expr>> {
    match value {
        Bson::Array(items) => items
            .iter()
            .map(|item| match item {
                Bson::Document(clause) => parse_filter(clause),
                _ => Err(FakeDbError::InvalidArgument(format!(
                    "'{key}' expects an array of filter documents"
                ))),
            })
            .collect(),
        _ => Err(FakeDbError::InvalidArgument(format!("'{key}' expects an array"))),
    }
}

fn is_operator_document(doc: &Document) -> bool {
    !doc.is_empty() && doc.keys().all(|key| key.starts_with('$'))
}

fn parse_operators(field: &str, ops: &Document) -> FakeDbResult<Expr> {
    let mut exprs = Vec::with_capacity(ops.len());

    for (op, value) in ops {
        let expr = match op.as_str() {
            "$exists" => Expr::Exists(field.to_string(), truthy(value)),
            "$not" => match value {
                Bson::Document(inner) if is_operator_document(inner) => {
                    parse_operators(field, inner)?.not()
                }
                _ => {
                    return Err(FakeDbError::InvalidArgument(format!(
                        "'$not' on '{field}' expects an operator document"
                    )));
                }
            },
            "$in" | "$nin" => {
                if !matches!(value, Bson::Array(_)) {
                    return Err(FakeDbError::InvalidArgument(format!(
                        "'{op}' on '{field}' expects an array"
                    )));
                }
                let field_op = if op == "$in" { FieldOp::In } else { FieldOp::NotIn };
                Expr::field(field.to_string(), field_op, value.clone())
            }
            other => Expr::field(field.to_string(), field_op(field, other)?, value.clone()),
        };
        exprs.push(expr);
    }

    Ok(match exprs.len() {
        1 => exprs.remove(0),
        _ => Expr::And(exprs),
    })
}

fn field_op(field: &str, op: &str) -> FakeDbResult<FieldOp> {
    Ok(match op {
        "$eq" => FieldOp::Eq,
        "$ne" => FieldOp::Ne,
        "$gt" => FieldOp::Gt,
        "$gte" => FieldOp::Gte,
        "$lt" => FieldOp::Lt,
        "$lte" => FieldOp::Lte,
        "$contains" => FieldOp::Contains,
        "$notContains" => FieldOp::NotContains,
        "$startsWith" => FieldOp::StartsWith,
        "$endsWith" => FieldOp::EndsWith,
        _ => {
            return Err(FakeDbError::InvalidArgument(format!(
                "unknown operator '{op}' on field '{field}'"
            )));
        }
    })
}

fn operator_name(op: &FieldOp) -> &'static str {
    match op {
        FieldOp::Eq => "$eq",
        FieldOp::Ne => "$ne",
        FieldOp::Gt => "$gt",
        FieldOp::Gte => "$gte",
        FieldOp::Lt => "$lt",
        FieldOp::Lte => "$lte",
        FieldOp::In => "$in",
        FieldOp::NotIn => "$nin",
        FieldOp::Contains => "$contains",
        FieldOp::NotContains => "$notContains",
        FieldOp::StartsWith => "$startsWith",
        FieldOp::EndsWith => "$endsWith",
    }
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(value) => *value,
        Bson::Int32(value) => *value != 0,
        Bson::Int64(value) => *value != 0,
        Bson::Double(value) => *value != 0.0,
        Bson::Null => false,
        _ => true,
    }
}

/// Renders expressions into mongo-style filter documents.
pub(crate) struct FilterRenderer;

impl QueryVisitor for FilterRenderer {
    type Output = Document;
    type Error = FakeDbError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$and": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$or": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$nor": [self.visit_expr(expr)?],
        })
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: { "$exists": should_exist },
        })
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let operator = operator_name(op);

        Ok(doc! {
            field: { operator: value.clone() },
        })
    }
}
