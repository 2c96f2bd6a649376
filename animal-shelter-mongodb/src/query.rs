//! Query translation from filter expressions to MongoDB query syntax.

use bson::{Bson, Document, doc};

use animal_shelter_core::{
    error::ShelterError,
    query::{Expr, FieldOp, QueryVisitor},
};


/// Translates filter expressions into MongoDB query documents.
pub(crate) struct MongoQueryTranslator;

impl MongoQueryTranslator {
    /// Translates an optional filter; no filter selects every document.
    pub(crate) fn translate(filter: Option<&Expr>) -> Result<Document, ShelterError> {
        match filter {
            Some(expr) => MongoQueryTranslator.visit_expr(expr),
            None => Ok(doc! {}),
        }
    }

    fn clauses(&mut self, exprs: &[Expr]) -> Result<Vec<Document>, ShelterError> {
        exprs
            .iter()
            .map(|expr| self.visit_expr(expr))
            .collect()
    }
}

impl QueryVisitor for MongoQueryTranslator {
    type Output = Document;
    type Error = ShelterError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        // `$and` rejects an empty array; an empty conjunction matches everything
        if exprs.is_empty() {
            return Ok(doc! {});
        }

        Ok(doc! {
            "$and": self.clauses(exprs)?,
        })
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        // An empty disjunction matches nothing
        if exprs.is_empty() {
            return Ok(doc! { "$nor": [{}] });
        }

        Ok(doc! {
            "$or": self.clauses(exprs)?,
        })
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        // Top-level `$not` is not valid MongoDB syntax
        let negated = self.visit_expr(expr)?;

        Ok(doc! {
            "$nor": [negated],
        })
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: { "$exists": should_exist },
        })
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        if matches!(op, FieldOp::AnyOf | FieldOp::NoneOf) && !matches!(value, Bson::Array(_)) {
            return Err(ShelterError::invalid(format!(
                "{} on {field} expects an array",
                op.operator()
            )));
        }

        Ok(doc! {
            field: { op.operator(): value.clone() },
        })
    }

    fn visit_raw(&mut self, clause: &Document) -> Result<Self::Output, Self::Error> {
        Ok(clause.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translate(filter: Document) -> Document {
        MongoQueryTranslator::translate(Expr::parse(&filter).unwrap().as_ref()).unwrap()
    }

    #[test]
    fn empty_filter() {
        assert_eq!(translate(doc! {}), doc! {});
    }

    #[test]
    fn equality_becomes_explicit() {
        assert_eq!(
            translate(doc! { "animal_id": "B721406" }),
            doc! { "animal_id": { "$eq": "B721406" } }
        );
    }

    #[test]
    fn conjunctions_and_ranges() {
        assert_eq!(
            translate(doc! { "breed": "Beagle", "rec_num": { "$gte": 2, "$in": [2, 3] } }),
            doc! {
                "$and": [
                    { "breed": { "$eq": "Beagle" } },
                    { "$and": [{ "rec_num": { "$gte": 2 } }, { "rec_num": { "$in": [2, 3] } }] },
                ]
            }
        );
    }

    #[test]
    fn negation_uses_nor() {
        assert_eq!(
            translate(doc! { "age": { "$not": { "$gt": 5 } }, "name": { "$exists": false } }),
            doc! {
                "$and": [
                    { "$nor": [{ "age": { "$gt": 5 } }] },
                    { "name": { "$exists": false } },
                ]
            }
        );
    }

    #[test]
    fn regex_and_type_conditions() {
        let pattern = Bson::RegularExpression(bson::Regex {
            pattern: "^lab".try_into().unwrap(),
            options: "i".try_into().unwrap(),
        });

        assert_eq!(
            translate(doc! { "breed": { "$regex": "^lab", "$options": "i" }, "rec_num": { "$type": "number" } }),
            doc! {
                "$and": [
                    { "breed": { "$regex": pattern } },
                    { "rec_num": { "$type": "number" } },
                ]
            }
        );
    }

    #[test]
    fn uninterpreted_operators_pass_through() {
        assert_eq!(
            translate(doc! { "tags": { "$elemMatch": { "$eq": "calm" } } }),
            doc! { "tags": { "$elemMatch": { "$eq": "calm" } } }
        );
        assert_eq!(
            translate(doc! { "$expr": { "$gt": ["$age", 3] }, "name": { "$not": { "$size": 2 } } }),
            doc! {
                "$and": [
                    { "$expr": { "$gt": ["$age", 3] } },
                    { "$nor": [{ "name": { "$size": 2 } }] },
                ]
            }
        );
    }

    #[test]
    fn nor_round_trips_as_negated_or() {
        assert_eq!(
            translate(doc! { "$nor": [{ "outcome_type": "Euthanasia" }] }),
            doc! { "$nor": [{ "$or": [{ "outcome_type": { "$eq": "Euthanasia" } }] }] }
        );
    }
}
