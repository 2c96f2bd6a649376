//! Animal records and the reserved fields this layer manages.
//!
//! A record is an open-ended BSON document; no schema is enforced beyond two reserved fields:
//!
//! - [`ID_FIELD`] (`_id`) belongs to the storage engine and is stripped before every insert.
//! - [`REC_NUM_FIELD`] (`rec_num`) is the sequential surrogate key assigned by the repository.

use bson::{Bson, Document};

use crate::error::{ShelterError, ShelterResult};

/// Backend-assigned identifier field.
pub const ID_FIELD: &str = "_id";
/// Sequential record number assigned at insert time.
pub const REC_NUM_FIELD: &str = "rec_num";

/// A single shelter animal document.
pub type AnimalRecord = Document;

/// Reads the record number of a stored document.
///
/// Integer and double encodings are all accepted; doubles are truncated.
pub fn record_number(record: &Document) -> Option<i64> {
    match record.get(REC_NUM_FIELD)? {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        Bson::Double(n) if n.is_finite() => Some(n.trunc() as i64),
        _ => None,
    }
}

/// Resolves a dotted path (`location.lat`) inside a document.
pub fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    match path.split_once('.') {
        None => document.get(path),
        Some((head, rest)) => match document.get(head)? {
            Bson::Document(inner) => lookup(inner, rest),
            _ => None,
        },
    }
}

/// Sets the value at a dotted path, creating embedded documents along the way.
///
/// Returns the value previously stored at that path.
///
/// # Errors
///
/// Returns [`ShelterError::Backend`] when a path segment exists but is not a document.
pub fn set_path(document: &mut Document, path: &str, value: Bson) -> ShelterResult<Option<Bson>> {
    match path.split_once('.') {
        None => Ok(document.insert(path, value)),
        Some((head, rest)) => {
            if !document.contains_key(head) {
                document.insert(head, Document::new());
            }

            match document.get_mut(head) {
                Some(Bson::Document(inner)) => set_path(inner, rest, value),
                _ => Err(ShelterError::Backend(format!(
                    "cannot create field {rest} inside non-document field {head}"
                ))),
            }
        }
    }
}

/// Removes the value at a dotted path, returning it if it existed.
pub fn remove_path(document: &mut Document, path: &str) -> Option<Bson> {
    match path.split_once('.') {
        None => document.remove(path),
        Some((head, rest)) => match document.get_mut(head)? {
            Bson::Document(inner) => remove_path(inner, rest),
            _ => None,
        },
    }
}

/// One or more records handed to `create`, in insertion order.
///
/// Built from any BSON value: a document becomes a single-record batch, an array of documents a
/// multi-record batch. Everything else is rejected as an invalid argument.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordBatch {
    records: Vec<Document>,
}

impl RecordBatch {
    /// Number of records in the batch.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the batch holds no records (an empty array was supplied).
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Consumes the batch, yielding records ready for insertion.
    ///
    /// Each record has its `_id` removed so that cloned documents never collide with the
    /// originals they were copied from.
    pub fn into_records(self) -> impl Iterator<Item = Document> {
        self.records.into_iter().map(|mut record| {
            record.remove(ID_FIELD);
            record
        })
    }
}

impl From<Document> for RecordBatch {
    fn from(record: Document) -> Self {
        Self { records: vec![record] }
    }
}

impl From<Vec<Document>> for RecordBatch {
    fn from(records: Vec<Document>) -> Self {
        Self { records }
    }
}

impl TryFrom<Bson> for RecordBatch {
    type Error = ShelterError;

    fn try_from(data: Bson) -> ShelterResult<Self> {
        match data {
            Bson::Null | Bson::Undefined => Err(ShelterError::invalid(
                "Nothing to save, because data parameter is empty",
            )),
            Bson::Document(record) => Ok(record.into()),
            Bson::Array(values) => values
                .into_iter()
                .map(|value| match value {
                    Bson::Document(record) => Ok(record),
                    _ => Err(not_a_record()),
                })
                .collect::<ShelterResult<Vec<_>>>()
                .map(RecordBatch::from),
            _ => Err(not_a_record()),
        }
    }
}

impl TryFrom<serde_json::Value> for RecordBatch {
    type Error = ShelterError;

    fn try_from(data: serde_json::Value) -> ShelterResult<Self> {
        bson::serialize_to_bson(&data)?.try_into()
    }
}

fn not_a_record() -> ShelterError {
    ShelterError::invalid("create() expects a document or an array of documents")
}
