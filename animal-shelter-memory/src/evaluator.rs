//! Query expression evaluation for in-memory document filtering.
//!
//! This module provides the evaluation engine for filter expressions and the ordering used for
//! sorting, following MongoDB's matching rules closely enough for the repository's needs.

use std::{cmp::Ordering, collections::HashMap};
use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};
use regex::RegexBuilder;

use animal_shelter_core::{
    error::{ShelterError, ShelterResult},
    query::{Expr, FieldOp, QueryVisitor},
    record,
};


/// Type-erased, comparable representation of BSON values.
///
/// Integers keep full `i64` precision; they are only widened to f64 when compared with a double,
/// so that `1`, `1_i64` and `1.0` still compare equal.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    /// Null value (also used for missing fields and unsupported types)
    Null,
    /// Integer value (Int32 and Int64)
    Int(i64),
    /// Floating point value
    Number(f64),
    /// String value
    String(&'a str),
    /// Map/Object of comparable values
    Map(HashMap<&'a str, Comparable<'a>>),
    /// Array of comparable values
    Array(Vec<Comparable<'a>>),
    /// Object identifier
    ObjectId(ObjectId),
    /// Boolean value
    Bool(bool),
    /// DateTime value
    DateTime(DateTime),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Int(i64::from(*value)),
            Bson::Int64(value) => Comparable::Int(*value),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Array(arr) => Comparable::Array(
                arr
                    .iter()
                    .map(Comparable::from)
                    .collect::<Vec<_>>()
            ),
            Bson::Document(doc) => Comparable::Map(
                doc
                    .iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect::<HashMap<_, _>>()
            ),
            _ => Comparable::Null, // Other types are not comparable
        }
    }
}

impl<'a> Comparable<'a> {
    /// Position of the value's type in MongoDB's cross-type sort order.
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Int(_) | Comparable::Number(_) => 1,
            Comparable::String(_) => 2,
            Comparable::Map(_) => 3,
            Comparable::Array(_) => 4,
            Comparable::ObjectId(_) => 5,
            Comparable::Bool(_) => 6,
            Comparable::DateTime(_) => 7,
        }
    }

    /// Total order used for sorting: values of different types are ordered by type.
    pub(crate) fn sort_cmp(&self, other: &Self) -> Ordering {
        self.partial_cmp(other)
            .unwrap_or_else(|| self.rank().cmp(&other.rank()))
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Int(a), Comparable::Int(b)) => a == b,
            (Comparable::Int(a), Comparable::Number(b)) => (*a as f64) == *b,
            (Comparable::Number(a), Comparable::Int(b)) => *a == (*b as f64),
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Int(a), Comparable::Int(b)) => a.partial_cmp(b),
            (Comparable::Int(a), Comparable::Number(b)) => (*a as f64).partial_cmp(b),
            (Comparable::Number(a), Comparable::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.bytes().partial_cmp(&b.bytes()),
            _ => None,
        }
    }
}

/// Compares two documents by one field, missing fields sorting first.
pub(crate) fn compare_field(left: &Document, right: &Document, field: &str) -> Ordering {
    let left = record::lookup(left, field)
        .map(Comparable::from)
        .unwrap_or(Comparable::Null);
    let right = record::lookup(right, field)
        .map(Comparable::from)
        .unwrap_or(Comparable::Null);

    left.sort_cmp(&right)
}


pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    /// Evaluates `expr` against the document; no expression matches everything.
    pub fn matches(document: &'a Document, expr: Option<&Expr>) -> ShelterResult<bool> {
        match expr {
            Some(expr) => DocumentEvaluator::new(document).visit_expr(expr),
            None => Ok(true),
        }
    }

    /// Equality with MongoDB's array semantics: a scalar also matches an array containing it.
    fn equals(field_value: &Bson, value: &Bson) -> bool {
        let expected = Comparable::from(value);

        match Comparable::from(field_value) {
            Comparable::Array(items) if !matches!(expected, Comparable::Array(_)) => {
                items.iter().any(|item| item == &expected)
            }
            actual => actual == expected,
        }
    }

    /// `$regex` semantics: a string field matches, an array matches if any string element does.
    fn matches_pattern(field_value: &Bson, pattern: &Bson) -> ShelterResult<bool> {
        let regex = match pattern {
            Bson::RegularExpression(regex) => regex,
            _ => return Err(ShelterError::invalid("$regex expects a regular expression")),
        };

        let options = regex.options.as_str();
        let compiled = RegexBuilder::new(regex.pattern.as_str())
            .case_insensitive(options.contains('i'))
            .multi_line(options.contains('m'))
            .dot_matches_new_line(options.contains('s'))
            .ignore_whitespace(options.contains('x'))
            .build()
            .map_err(|e| ShelterError::invalid(format!("invalid $regex {regex}: {e}")))?;

        Ok(match field_value {
            Bson::String(text) => compiled.is_match(text),
            Bson::Array(items) => items.iter().any(|item| match item {
                Bson::String(text) => compiled.is_match(text),
                _ => false,
            }),
            _ => false,
        })
    }

    /// `$type` semantics: arrays also match when one of their elements has the type.
    fn has_type(field_value: &Bson, alias: &Bson) -> ShelterResult<bool> {
        if let Bson::Array(aliases) = alias {
            for alias in aliases {
                if Self::has_type(field_value, alias)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }

        if type_matches(field_value, alias)? {
            return Ok(true);
        }

        match field_value {
            Bson::Array(items) => {
                for item in items {
                    if type_matches(item, alias)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    fn candidates(value: &Bson) -> ShelterResult<&Vec<Bson>> {
        match value {
            Bson::Array(values) => Ok(values),
            _ => Err(ShelterError::invalid("$in and $nin expect an array")),
        }
    }
}

impl<'a> QueryVisitor for DocumentEvaluator<'a> {
    type Output = bool;
    type Error = ShelterError;

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
        Ok(record::lookup(self.document, field).is_some() == should_exist)
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let field_value = match record::lookup(self.document, field) {
            Some(field_value) => field_value,
            // A missing field behaves like null.
            None => &Bson::Null,
        };

        match op {
            FieldOp::Eq => Ok(Self::equals(field_value, value)),
            FieldOp::Ne => Ok(!Self::equals(field_value, value)),
            FieldOp::Gt | FieldOp::Gte | FieldOp::Lt | FieldOp::Lte => {
                if field_value == &Bson::Null {
                    return Ok(matches!(op, FieldOp::Gte | FieldOp::Lte) && value == &Bson::Null);
                }

                match Comparable::from(field_value).partial_cmp(&Comparable::from(value)) {
                    Some(ordering) => Ok(match op {
                        FieldOp::Gt => ordering == Ordering::Greater,
                        FieldOp::Gte => ordering != Ordering::Less,
                        FieldOp::Lt => ordering == Ordering::Less,
                        _ => ordering != Ordering::Greater,
                    }),
                    None => Ok(false),
                }
            },
            FieldOp::AnyOf => Ok(
                Self::candidates(value)?
                    .iter()
                    .any(|candidate| Self::equals(field_value, candidate))
            ),
            FieldOp::NoneOf => Ok(
                !Self::candidates(value)?
                    .iter()
                    .any(|candidate| Self::equals(field_value, candidate))
            ),
            FieldOp::Regex => Self::matches_pattern(field_value, value),
            FieldOp::Type => match record::lookup(self.document, field) {
                Some(stored) => Self::has_type(stored, value),
                None => Ok(false),
            },
        }
    }

    fn visit_raw(&mut self, clause: &Document) -> Result<Self::Output, Self::Error> {
        Err(ShelterError::invalid(format!(
            "the in-memory backend cannot evaluate {clause}"
        )))
    }
}

/// MongoDB's type number and alias for a value.
fn bson_type(value: &Bson) -> (i64, &'static str) {
    match value {
        Bson::Double(_) => (1, "double"),
        Bson::String(_) => (2, "string"),
        Bson::Document(_) => (3, "object"),
        Bson::Array(_) => (4, "array"),
        Bson::Binary(_) => (5, "binData"),
        Bson::Undefined => (6, "undefined"),
        Bson::ObjectId(_) => (7, "objectId"),
        Bson::Boolean(_) => (8, "bool"),
        Bson::DateTime(_) => (9, "date"),
        Bson::Null => (10, "null"),
        Bson::RegularExpression(_) => (11, "regex"),
        Bson::DbPointer(_) => (12, "dbPointer"),
        Bson::JavaScriptCode(_) => (13, "javascript"),
        Bson::Symbol(_) => (14, "symbol"),
        Bson::JavaScriptCodeWithScope(_) => (15, "javascriptWithScope"),
        Bson::Int32(_) => (16, "int"),
        Bson::Timestamp(_) => (17, "timestamp"),
        Bson::Int64(_) => (18, "long"),
        Bson::Decimal128(_) => (19, "decimal"),
        Bson::MinKey => (-1, "minKey"),
        Bson::MaxKey => (127, "maxKey"),
    }
}

fn type_matches(value: &Bson, alias: &Bson) -> ShelterResult<bool> {
    let (code, name) = bson_type(value);

    match alias {
        Bson::String(alias) if alias == "number" => Ok(matches!(
            value,
            Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_)
        )),
        Bson::String(alias) => Ok(alias == name),
        Bson::Int32(n) => Ok(i64::from(*n) == code),
        Bson::Int64(n) => Ok(*n == code),
        Bson::Double(n) => Ok(*n == code as f64),
        _ => Err(ShelterError::invalid("$type expects a type alias or a type number")),
    }
}
