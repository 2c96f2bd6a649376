//! Query construction and filtering API for the shelter collection.
//!
//! Callers hand the repository filters written in MongoDB query syntax (plain BSON documents).
//! Those documents are parsed into a backend-neutral expression tree ([`Expr`]) which every
//! backend consumes through the [`QueryVisitor`] trait: the MongoDB backend translates it back to
//! a query document, the in-memory backend evaluates it directly.
//!
//! # Filter documents
//!
//! ```ignore
//! use bson::doc;
//! use animal_shelter_core::query::Expr;
//!
//! let expr = Expr::parse(&doc! {
//!     "breed": "Labrador Retriever Mix",
//!     "age_upon_outcome_in_weeks": { "$gte": 26, "$lt": 156 },
//!     "$or": [{ "sex_upon_outcome": "Intact Male" }, { "sex_upon_outcome": "Intact Female" }],
//! })?;
//! ```
//!
//! The comparison operators (`$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$nin`), `$regex`
//! (with `$options`), `$type`, `$exists`, `$not` and the logical operators `$and`, `$or` and `$nor`
//! are parsed into typed nodes. Any other operator (`$all`, `$elemMatch`, `$expr`, ...) is kept
//! verbatim as an [`Expr::Raw`] clause: MongoDB receives it unchanged, backends that cannot
//! evaluate it report an invalid argument.
//!
//! # Typed construction
//!
//! The [`Filter`] helpers build the same tree without going through a document:
//!
//! ```ignore
//! use animal_shelter_core::query::{Filter, Query, SortDirection};
//!
//! let query = Query::builder()
//!     .filter(Filter::eq("animal_type", "Dog").and(Filter::gt("rec_num", 10)))
//!     .sort("rec_num", SortDirection::Asc)
//!     .limit(5)
//!     .build();
//! ```

use bson::{Bson, Document, Regex, raw::CString};

use crate::{
    error::{ShelterError, ShelterResult},
    projection::Projection,
};

/// Sort direction for query results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

/// Sort specification for query results.
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    /// The field name to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

/// Field comparison operators for filter expressions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldOp {
    /// Equal to (`$eq`).
    Eq,
    /// Not equal to (`$ne`).
    Ne,
    /// Greater than (`$gt`).
    Gt,
    /// Greater than or equal to (`$gte`).
    Gte,
    /// Less than (`$lt`).
    Lt,
    /// Less than or equal to (`$lte`).
    Lte,
    /// Field equals any of the listed values (`$in`).
    AnyOf,
    /// Field equals none of the listed values (`$nin`).
    NoneOf,
    /// String field matches a regular expression (`$regex`); the value is a BSON regex.
    Regex,
    /// Field holds a value of the given BSON type alias or number (`$type`).
    Type,
}

impl FieldOp {
    /// The MongoDB operator name for this comparison.
    pub fn operator(&self) -> &'static str {
        match self {
            FieldOp::Eq => "$eq",
            FieldOp::Ne => "$ne",
            FieldOp::Gt => "$gt",
            FieldOp::Gte => "$gte",
            FieldOp::Lt => "$lt",
            FieldOp::Lte => "$lte",
            FieldOp::AnyOf => "$in",
            FieldOp::NoneOf => "$nin",
            FieldOp::Regex => "$regex",
            FieldOp::Type => "$type",
        }
    }

    fn from_operator(operator: &str) -> Option<Self> {
        Some(match operator {
            "$eq" => FieldOp::Eq,
            "$ne" => FieldOp::Ne,
            "$gt" => FieldOp::Gt,
            "$gte" => FieldOp::Gte,
            "$lt" => FieldOp::Lt,
            "$lte" => FieldOp::Lte,
            "$in" => FieldOp::AnyOf,
            "$nin" => FieldOp::NoneOf,
            "$regex" => FieldOp::Regex,
            "$type" => FieldOp::Type,
            _ => return None,
        })
    }
}

/// A filter expression for querying documents.
///
/// Expressions can be combined using logical operators (`And`, `Or`, `Not`)
/// to build complex filter predicates.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Logical AND of multiple expressions (all must match).
    And(Vec<Expr>),
    /// Logical OR of multiple expressions (any must match).
    Or(Vec<Expr>),
    /// Logical NOT of an expression (inverts the result).
    Not(Box<Expr>),
    /// Checks if a field exists or doesn't exist.
    Exists(String, bool),
    /// Field comparison expression.
    Field {
        /// The field name (dotted paths address embedded documents).
        field: String,
        /// The comparison operator.
        op: FieldOp,
        /// The value to compare against.
        value: Bson,
    },
    /// A clause with an operator this layer does not interpret, e.g. `{ "tags": { "$all": [..] } }`.
    Raw(Document),
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
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// Wraps `{ key: value }` as an uninterpreted clause.
    pub fn raw(key: impl Into<String>, value: Bson) -> Self {
        let mut clause = Document::new();
        clause.insert(key, value);
        Expr::Raw(clause)
    }

    /// Parses a filter document written in MongoDB query syntax.
    ///
    /// Returns `Ok(None)` for an empty document, which matches every record.
    ///
    /// # Errors
    ///
    /// Returns [`ShelterError::InvalidArgument`] for malformed filters: logical operators without
    /// an array of documents, conditions mixing operators and plain fields, or operands of the
    /// wrong type (for example `$in` without an array).
    pub fn parse(filter: &Document) -> ShelterResult<Option<Expr>> {
        let mut exprs = filter
            .iter()
            .map(|(key, value)| parse_entry(key, value))
            .collect::<ShelterResult<Vec<_>>>()?;

        Ok(match exprs.len() {
            0 => None,
            1 => exprs.pop(),
            _ => Some(Expr::And(exprs)),
        })
    }
}

fn parse_entry(key: &str, value: &Bson) -> ShelterResult<Expr> {
    match key {
        "$and" => Ok(Expr::And(parse_clauses(key, value)?)),
        "$or" => Ok(Expr::Or(parse_clauses(key, value)?)),
        "$nor" => Ok(Expr::Or(parse_clauses(key, value)?).not()),
        _ if key.starts_with('$') => Ok(Expr::raw(key, value.clone())),
        _ => parse_field(key, value),
    }
}

fn parse_clauses(operator: &str, value: &Bson) -> ShelterResult<Vec<Expr>> {
    let clauses = match value {
        Bson::Array(clauses) if !clauses.is_empty() => clauses,
        _ => {
            return Err(ShelterError::invalid(format!(
                "{operator} expects a non-empty array of filter documents"
            )));
        }
    };

    clauses
        .iter()
        .map(|clause| match clause {
            Bson::Document(doc) => Ok(Expr::parse(doc)?.unwrap_or(Expr::And(vec![]))),
            _ => Err(ShelterError::invalid(format!(
                "{operator} expects a non-empty array of filter documents"
            ))),
        })
        .collect()
}

fn is_operator_document(doc: &Document) -> bool {
    doc.keys().next().is_some_and(|key| key.starts_with('$'))
}

fn parse_field(field: &str, value: &Bson) -> ShelterResult<Expr> {
    match value {
        Bson::Document(operators) if is_operator_document(operators) => {
            let options = operators.get("$options");
            let has_pattern = operators.contains_key("$regex");

            let mut exprs = Vec::with_capacity(operators.len());
            for (operator, operand) in operators {
                exprs.push(match operator.as_str() {
                    "$options" if has_pattern => continue,
                    "$regex" => Expr::field(
                        field.to_string(),
                        FieldOp::Regex,
                        regex_operand(field, operand, options)?,
                    ),
                    _ => parse_operator(field, operator, operand)?,
                });
            }

            Ok(if exprs.len() == 1 {
                exprs.remove(0)
            } else {
                Expr::And(exprs)
            })
        }
        // A regex literal in equality position is a pattern match
        Bson::RegularExpression(_) => Ok(Expr::field(field.to_string(), FieldOp::Regex, value.clone())),
        _ => Ok(Expr::field(field.to_string(), FieldOp::Eq, value.clone())),
    }
}

fn parse_operator(field: &str, operator: &str, operand: &Bson) -> ShelterResult<Expr> {
    match operator {
        "$exists" => Ok(Expr::Exists(field.to_string(), truthy(operator, operand)?)),
        "$not" => match operand {
            Bson::Document(inner) if is_operator_document(inner) => {
                Ok(parse_field(field, operand)?.not())
            }
            Bson::RegularExpression(_) => {
                Ok(Expr::field(field.to_string(), FieldOp::Regex, operand.clone()).not())
            }
            _ => Err(ShelterError::invalid(format!(
                "$not on {field} expects an operator document or a regular expression"
            ))),
        },
        "$in" | "$nin" if !matches!(operand, Bson::Array(_)) => Err(ShelterError::invalid(
            format!("{operator} on {field} expects an array"),
        )),
        "$type" if !is_type_operand(operand) => Err(ShelterError::invalid(format!(
            "$type on {field} expects a type alias, a type number or an array of them"
        ))),
        _ => match FieldOp::from_operator(operator) {
            Some(op) => Ok(Expr::field(field.to_string(), op, operand.clone())),
            None if operator.starts_with('$') => {
                let mut condition = Document::new();
                condition.insert(operator, operand.clone());
                Ok(Expr::raw(field, Bson::Document(condition)))
            }
            None => Err(ShelterError::invalid(format!(
                "cannot mix operators and plain fields in the condition on {field}"
            ))),
        },
    }
}

/// Normalizes `$regex` (a string or regex literal) and an optional `$options` into a BSON regex.
fn regex_operand(field: &str, pattern: &Bson, options: Option<&Bson>) -> ShelterResult<Bson> {
    let (pattern, inline_options) = match pattern {
        Bson::String(pattern) => (pattern.clone(), String::new()),
        Bson::RegularExpression(regex) => (
            regex.pattern.as_str().to_string(),
            regex.options.as_str().to_string(),
        ),
        _ => {
            return Err(ShelterError::invalid(format!(
                "$regex on {field} expects a string or a regular expression"
            )));
        }
    };

    let options = match options {
        None => inline_options,
        Some(Bson::String(options)) => options.clone(),
        Some(_) => {
            return Err(ShelterError::invalid(format!("$options on {field} expects a string")));
        }
    };

    // BSON stores regex flags sorted
    let mut flags = options.chars().collect::<Vec<_>>();
    flags.sort_unstable();
    flags.dedup();

    let invalid = |_| ShelterError::invalid(format!("$regex on {field} must not contain NUL bytes"));

    Ok(Bson::RegularExpression(Regex {
        pattern: CString::try_from(pattern).map_err(invalid)?,
        options: CString::try_from(flags.into_iter().collect::<String>()).map_err(invalid)?,
    }))
}

fn is_type_operand(operand: &Bson) -> bool {
    match operand {
        Bson::String(_) | Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => true,
        Bson::Array(aliases) => !aliases.is_empty() && aliases.iter().all(is_type_operand),
        _ => false,
    }
}

fn truthy(operator: &str, value: &Bson) -> ShelterResult<bool> {
    match value {
        Bson::Boolean(flag) => Ok(*flag),
        Bson::Int32(n) => Ok(*n != 0),
        Bson::Int64(n) => Ok(*n != 0),
        Bson::Double(n) => Ok(*n != 0.0),
        _ => Err(ShelterError::invalid(format!(
            "{operator} expects a boolean or a number"
        ))),
    }
}

/// A structured find request handed to a backend.
///
/// Encapsulates the filter, projection, sort and limit of a single round trip. Use
/// [`QueryBuilder`] for ergonomic construction.
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// Optional filter expression to match documents.
    pub filter: Option<Expr>,
    /// Optional field selection applied to every returned document.
    pub projection: Option<Projection>,
    /// Maximum number of documents to return.
    pub limit: Option<usize>,
    /// Sort specification for results.
    pub sort: Option<Sort>,
}

impl Query {
    /// Creates a new empty query with no filters or limits.
    pub fn new() -> Self {
        Query::default()
    }

    /// Creates a new query builder for fluent construction.
    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }
}

/// Helper struct for constructing filter expressions.
///
/// All methods accept field names and values as `Into<String>` and `Into<Bson>`.
pub struct Filter;

impl Filter {
    /// Matches documents where the field equals the specified value.
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Eq, value.into())
    }

    /// Matches documents where the field does not equal the specified value.
    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Ne, value.into())
    }

    /// Matches documents where the field is greater than the specified value.
    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gt, value.into())
    }

    /// Matches documents where the field is greater than or equal to the specified value.
    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gte, value.into())
    }

    /// Matches documents where the field is less than the specified value.
    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lt, value.into())
    }

    /// Matches documents where the field is less than or equal to the specified value.
    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lte, value.into())
    }

    /// Matches documents where the field exists.
    pub fn exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), true)
    }

    /// Matches documents where the field is missing.
    pub fn not_exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), false)
    }

    /// Matches documents where the field holds a value of the given type (`"number"`, `"string"`, ...).
    pub fn has_type(field: impl Into<String>, alias: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Type, alias.into())
    }

    /// Combines multiple expressions such that all must match.
    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    /// Combines multiple expressions such that any can match.
    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }

    /// Matches documents where the field equals any of the given values.
    pub fn any_of(field: impl Into<String>, values: impl IntoIterator<Item = impl Into<Bson>>) -> Expr {
        Expr::field(
            field.into(),
            FieldOp::AnyOf,
            Bson::Array(values.into_iter().map(Into::into).collect()),
        )
    }

    /// Matches documents where the field equals none of the given values.
    pub fn none_of(field: impl Into<String>, values: impl IntoIterator<Item = impl Into<Bson>>) -> Expr {
        Expr::field(
            field.into(),
            FieldOp::NoneOf,
            Bson::Array(values.into_iter().map(Into::into).collect()),
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    /// Creates a new query builder.
    pub fn new() -> Self {
        QueryBuilder::default()
    }

    /// Sets the filter expression for this query.
    pub fn filter(mut self, filter: Expr) -> Self {
        self.query.filter = Some(filter);
        self
    }

    /// Restricts the fields returned for each document.
    pub fn projection(mut self, projection: Option<Projection>) -> Self {
        self.query.projection = projection;
        self
    }

    /// Sets the maximum number of documents to return.
    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
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

/// Walks an [`Expr`] tree; implemented by each backend to translate or evaluate filters.
pub trait QueryVisitor {
    type Output;
    type Error: Into<ShelterError>;

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
    fn visit_raw(&mut self, clause: &Document) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Not(expr) => self.visit_not(expr),
            Expr::Exists(field, should_exist) => self.visit_exists(field, *should_exist),
            Expr::Field { field, op, value } => self.visit_field(field, op, value),
            Expr::Raw(clause) => self.visit_raw(clause),
        }
    }
}
