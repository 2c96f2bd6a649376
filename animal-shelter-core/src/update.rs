//! Update specifications for `update_many`-style writes.
//!
//! An update document must consist solely of update operators, e.g.
//! `{ "$set": { "outcome_type": "Adoption" }, "$inc": { "visits": 1 } }`. Replacement-style
//! documents are rejected so that an update can never silently overwrite whole records.
//!
//! `$set`, `$unset`, `$inc`, `$mul`, `$rename`, `$push`, `$addToSet` and `$currentDate` are
//! parsed into typed operations. Other operators (`$pull`, `$min`, `$max`, `$setOnInsert`, ...)
//! are carried as [`UpdateOp::Raw`] and handed to MongoDB unchanged.

use bson::{Bson, DateTime, Document};

use crate::{
    error::{ShelterError, ShelterResult},
    record::{self, ID_FIELD},
};

/// A single field-level update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    /// `$set`: assign a value, creating the field (and embedded documents) if needed.
    Set(String, Bson),
    /// `$unset`: remove a field.
    Unset(String),
    /// `$inc`: add a number to a numeric field, or create it with that number.
    Inc(String, Bson),
    /// `$mul`: multiply a numeric field, or create it as zero.
    Mul(String, Bson),
    /// `$rename`: move a field's value to a new name.
    Rename(String, String),
    /// `$push`: append values to an array field. `each` records the `{ "$each": [..] }` form.
    Push { field: String, values: Vec<Bson>, each: bool },
    /// `$addToSet`: append values not already present in an array field.
    AddToSet { field: String, values: Vec<Bson>, each: bool },
    /// `$currentDate`: set a field to the current date.
    CurrentDate(String),
    /// Any other operator, as `(operator, field, operand)`.
    Raw(String, String, Bson),
}

impl UpdateOp {
    fn operator(&self) -> &str {
        match self {
            UpdateOp::Set(..) => "$set",
            UpdateOp::Unset(_) => "$unset",
            UpdateOp::Inc(..) => "$inc",
            UpdateOp::Mul(..) => "$mul",
            UpdateOp::Rename(..) => "$rename",
            UpdateOp::Push { .. } => "$push",
            UpdateOp::AddToSet { .. } => "$addToSet",
            UpdateOp::CurrentDate(_) => "$currentDate",
            UpdateOp::Raw(operator, ..) => operator,
        }
    }

    fn parse(operator: &str, field: &str, value: &Bson) -> ShelterResult<Self> {
        let field = field.to_string();

        Ok(match operator {
            "$set" => UpdateOp::Set(field, value.clone()),
            "$unset" => UpdateOp::Unset(field),
            "$inc" | "$mul" if !is_number(value) => {
                return Err(ShelterError::invalid(format!(
                    "{operator} on {field} expects a number"
                )));
            }
            "$inc" => UpdateOp::Inc(field, value.clone()),
            "$mul" => UpdateOp::Mul(field, value.clone()),
            "$rename" => match value {
                Bson::String(target) if target != ID_FIELD && !target.is_empty() => {
                    UpdateOp::Rename(field, target.clone())
                }
                _ => {
                    return Err(ShelterError::invalid(format!(
                        "$rename on {field} expects a new field name"
                    )));
                }
            },
            "$push" | "$addToSet" => match array_values(value) {
                Some((values, each)) if operator == "$push" => UpdateOp::Push { field, values, each },
                Some((values, each)) => UpdateOp::AddToSet { field, values, each },
                // Modifiers such as `$slice` or `$position`
                None => UpdateOp::Raw(operator.to_string(), field, value.clone()),
            },
            "$currentDate" => match value {
                Bson::Boolean(true) => UpdateOp::CurrentDate(field),
                Bson::Document(spec) if spec.get_str("$type").ok() == Some("date") => {
                    UpdateOp::CurrentDate(field)
                }
                _ => UpdateOp::Raw(operator.to_string(), field, value.clone()),
            },
            _ => UpdateOp::Raw(operator.to_string(), field, value.clone()),
        })
    }

    /// The operand as MongoDB expects it under [`operator`](Self::operator).
    fn operand(&self) -> Bson {
        match self {
            UpdateOp::Set(_, value) | UpdateOp::Inc(_, value) | UpdateOp::Mul(_, value) => {
                value.clone()
            }
            UpdateOp::Unset(_) => Bson::String(String::new()),
            UpdateOp::Rename(_, target) => Bson::String(target.clone()),
            UpdateOp::Push { values, each, .. } | UpdateOp::AddToSet { values, each, .. } => {
                match (*each, values.as_slice()) {
                    (false, [value]) => value.clone(),
                    _ => {
                        let mut modifiers = Document::new();
                        modifiers.insert("$each", values.clone());
                        Bson::Document(modifiers)
                    }
                }
            }
            UpdateOp::CurrentDate(_) => Bson::Boolean(true),
            UpdateOp::Raw(_, _, operand) => operand.clone(),
        }
    }

    fn field(&self) -> &str {
        match self {
            UpdateOp::Set(field, _)
            | UpdateOp::Unset(field)
            | UpdateOp::Inc(field, _)
            | UpdateOp::Mul(field, _)
            | UpdateOp::Rename(field, _)
            | UpdateOp::Push { field, .. }
            | UpdateOp::AddToSet { field, .. }
            | UpdateOp::CurrentDate(field)
            | UpdateOp::Raw(_, field, _) => field,
        }
    }
}

/// A validated, ordered list of update operations.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateSpec {
    ops: Vec<UpdateOp>,
}

impl UpdateSpec {
    /// Parses an update document.
    ///
    /// # Errors
    ///
    /// Returns [`ShelterError::InvalidArgument`] if the document is empty, contains a key that is
    /// not an update operator, targets `_id`, or gives a typed operator an operand of the wrong
    /// type.
    pub fn parse(update: &Document) -> ShelterResult<Self> {
        if update.is_empty() {
            return Err(ShelterError::invalid("update document must not be empty"));
        }

        let mut ops = Vec::new();

        for (operator, operand) in update {
            if !operator.starts_with('$') {
                return Err(ShelterError::invalid(format!(
                    "update document may only contain update operators, found {operator}"
                )));
            }

            let fields = match operand {
                Bson::Document(fields) => fields,
                _ => {
                    return Err(ShelterError::invalid(format!(
                        "{operator} expects a document of fields"
                    )));
                }
            };

            for (field, value) in fields {
                if field == ID_FIELD {
                    return Err(ShelterError::invalid(format!(
                        "{operator} cannot modify the immutable field {ID_FIELD}"
                    )));
                }

                ops.push(UpdateOp::parse(operator, field, value)?);
            }
        }

        Ok(Self { ops })
    }

    /// The parsed operations, in document order.
    pub fn ops(&self) -> &[UpdateOp] {
        &self.ops
    }

    /// Applies every operation to `document`, returning whether its content changed.
    ///
    /// # Errors
    ///
    /// Returns [`ShelterError::Backend`] when an operation conflicts with the stored document,
    /// e.g. `$inc` on a string or `$set` through a non-document path segment, and
    /// [`ShelterError::InvalidArgument`] for operators kept as [`UpdateOp::Raw`].
    pub fn apply(&self, document: &mut Document) -> ShelterResult<bool> {
        let mut changed = false;

        for op in &self.ops {
            changed |= match op {
                UpdateOp::Set(field, value) => {
                    let previous = record::set_path(document, field, value.clone())?;
                    previous.as_ref() != Some(value)
                }
                UpdateOp::Unset(field) => record::remove_path(document, field).is_some(),
                UpdateOp::Inc(field, amount) => {
                    let next = match record::lookup(document, field) {
                        Some(current) => add_numbers(current, amount)
                            .ok_or_else(|| non_numeric("$inc", field))?,
                        None => amount.clone(),
                    };

                    let previous = record::set_path(document, field, next)?;
                    previous.is_none() || !is_zero(amount)
                }
                UpdateOp::Mul(field, factor) => {
                    let next = match record::lookup(document, field) {
                        Some(current) => multiply_numbers(current, factor)
                            .ok_or_else(|| non_numeric("$mul", field))?,
                        None => zero_like(factor),
                    };

                    let previous = record::set_path(document, field, next.clone())?;
                    previous.as_ref() != Some(&next)
                }
                UpdateOp::Rename(field, target) => match record::remove_path(document, field) {
                    Some(value) => {
                        record::set_path(document, target, value)?;
                        true
                    }
                    None => false,
                },
                UpdateOp::Push { field, values, .. } => {
                    let mut items = array_at(document, field)?;
                    items.extend(values.iter().cloned());
                    record::set_path(document, field, Bson::Array(items))?;
                    true
                }
                UpdateOp::AddToSet { field, values, .. } => {
                    let mut items = array_at(document, field)?;
                    let before = items.len();
                    for value in values {
                        if !items.contains(value) {
                            items.push(value.clone());
                        }
                    }

                    let grew = items.len() != before;
                    let previous = record::set_path(document, field, Bson::Array(items))?;
                    grew || previous.is_none()
                }
                UpdateOp::CurrentDate(field) => {
                    record::set_path(document, field, Bson::DateTime(DateTime::now()))?;
                    true
                }
                UpdateOp::Raw(operator, field, _) => {
                    return Err(ShelterError::invalid(format!(
                        "{operator} on {field} can only be applied by MongoDB"
                    )));
                }
            };
        }

        Ok(changed)
    }

    /// Renders the specification as a MongoDB update document.
    pub fn to_document(&self) -> Document {
        let mut update = Document::new();

        for op in &self.ops {
            let operator = op.operator();

            if !update.contains_key(operator) {
                update.insert(operator, Document::new());
            }
            if let Some(Bson::Document(fields)) = update.get_mut(operator) {
                fields.insert(op.field(), op.operand());
            }
        }

        update
    }
}

/// Splits a `$push`/`$addToSet` operand into its values; `None` for modifiers other than `$each`.
fn array_values(value: &Bson) -> Option<(Vec<Bson>, bool)> {
    match value {
        Bson::Document(modifiers) if modifiers.keys().any(|key| key.starts_with('$')) => {
            match (modifiers.len(), modifiers.get("$each")) {
                (1, Some(Bson::Array(values))) => Some((values.clone(), true)),
                _ => None,
            }
        }
        _ => Some((vec![value.clone()], false)),
    }
}

fn array_at(document: &Document, field: &str) -> ShelterResult<Vec<Bson>> {
    match record::lookup(document, field) {
        None => Ok(Vec::new()),
        Some(Bson::Array(items)) => Ok(items.clone()),
        Some(_) => Err(ShelterError::Backend(format!(
            "cannot append to non-array field {field}"
        ))),
    }
}

fn non_numeric(operator: &str, field: &str) -> ShelterError {
    ShelterError::Backend(format!("cannot apply {operator} to non-numeric field {field}"))
}

fn is_number(value: &Bson) -> bool {
    matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))
}

fn is_zero(value: &Bson) -> bool {
    match value {
        Bson::Int32(n) => *n == 0,
        Bson::Int64(n) => *n == 0,
        Bson::Double(n) => *n == 0.0,
        _ => false,
    }
}

fn zero_like(value: &Bson) -> Bson {
    match value {
        Bson::Int64(_) => Bson::Int64(0),
        Bson::Double(_) => Bson::Double(0.0),
        _ => Bson::Int32(0),
    }
}

fn add_numbers(current: &Bson, amount: &Bson) -> Option<Bson> {
    Some(match (current, amount) {
        (Bson::Int32(a), Bson::Int32(b)) => a
            .checked_add(*b)
            .map(Bson::Int32)
            .unwrap_or(Bson::Int64(i64::from(*a) + i64::from(*b))),
        (Bson::Int32(a), Bson::Int64(b)) => Bson::Int64(i64::from(*a).checked_add(*b)?),
        (Bson::Int64(a), Bson::Int32(b)) => Bson::Int64(a.checked_add(i64::from(*b))?),
        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(a.checked_add(*b)?),
        (Bson::Double(a), b) => Bson::Double(a + as_f64(b)?),
        (a, Bson::Double(b)) => Bson::Double(as_f64(a)? + b),
        _ => return None,
    })
}

fn multiply_numbers(current: &Bson, factor: &Bson) -> Option<Bson> {
    Some(match (current, factor) {
        (Bson::Int32(a), Bson::Int32(b)) => a
            .checked_mul(*b)
            .map(Bson::Int32)
            .unwrap_or(Bson::Int64(i64::from(*a) * i64::from(*b))),
        (Bson::Int32(a), Bson::Int64(b)) => Bson::Int64(i64::from(*a).checked_mul(*b)?),
        (Bson::Int64(a), Bson::Int32(b)) => Bson::Int64(a.checked_mul(i64::from(*b))?),
        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(a.checked_mul(*b)?),
        (Bson::Double(a), b) => Bson::Double(a * as_f64(b)?),
        (a, Bson::Double(b)) => Bson::Double(as_f64(a)? * b),
        _ => return None,
    })
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}
