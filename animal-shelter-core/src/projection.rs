//! Field selection for read results.

use bson::{Bson, Document};

use crate::{
    error::{ShelterError, ShelterResult},
    record::ID_FIELD,
};

/// Which fields a read returns.
///
/// Parsed from a MongoDB-style projection document such as `{ "name": 1, "breed": 1 }` or
/// `{ "_id": 0 }`. A projection either includes or excludes fields; `_id` is the only field that
/// may be excluded from an inclusion projection, and it is kept unless explicitly set to `0`.
/// Dotted paths (`location.lat`) select inside embedded documents and arrays of documents.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    mode: ProjectionMode,
    fields: Vec<String>,
    include_id: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProjectionMode {
    Include,
    Exclude,
}

impl Projection {
    /// Parses a projection document.
    ///
    /// Returns `Ok(None)` for an empty document, which keeps every field.
    ///
    /// # Errors
    ///
    /// Returns [`ShelterError::InvalidArgument`] when inclusion and exclusion are mixed or a
    /// value is neither a boolean nor a number.
    pub fn parse(projection: &Document) -> ShelterResult<Option<Self>> {
        if projection.is_empty() {
            return Ok(None);
        }

        let mut mode = None;
        let mut fields = Vec::new();
        let mut include_id = true;

        for (field, value) in projection {
            let included = match value {
                Bson::Boolean(flag) => *flag,
                Bson::Int32(n) => *n != 0,
                Bson::Int64(n) => *n != 0,
                Bson::Double(n) => *n != 0.0,
                _ => {
                    return Err(ShelterError::invalid(format!(
                        "projection value for {field} must be a boolean or a number"
                    )));
                }
            };

            if field == ID_FIELD {
                include_id = included;
                continue;
            }

            let field_mode = if included {
                ProjectionMode::Include
            } else {
                ProjectionMode::Exclude
            };

            match mode {
                Some(existing) if existing != field_mode => {
                    return Err(ShelterError::invalid(
                        "projection cannot mix inclusion and exclusion",
                    ));
                }
                _ => mode = Some(field_mode),
            }

            fields.push(field.clone());
        }

        Ok(Some(Self {
            // `{ "_id": 0 }` alone excludes only the identifier.
            mode: mode.unwrap_or(ProjectionMode::Exclude),
            fields,
            include_id,
        }))
    }

    /// Applies the projection to a stored document.
    pub fn apply(&self, document: &Document) -> Document {
        let paths = self.fields.iter().map(String::as_str).collect::<Vec<_>>();
        let mut projected = Document::new();

        for (key, value) in document {
            if key == ID_FIELD {
                if self.include_id {
                    projected.insert(key.clone(), value.clone());
                }
                continue;
            }

            if let Some(value) = self.mode.project(key, value, &paths) {
                projected.insert(key.clone(), value);
            }
        }

        projected
    }

    /// Renders the projection back into a MongoDB projection document.
    pub fn to_document(&self) -> Document {
        let flag = match self.mode {
            ProjectionMode::Include => 1,
            ProjectionMode::Exclude => 0,
        };

        let mut document = self
            .fields
            .iter()
            .map(|field| (field.clone(), Bson::Int32(flag)))
            .collect::<Document>();

        if !self.include_id {
            document.insert(ID_FIELD, 0);
        }

        document
    }
}

impl ProjectionMode {
    /// Projects the value stored under `key`, given the projected paths relative to its parent.
    fn project(self, key: &str, value: &Bson, paths: &[&str]) -> Option<Bson> {
        if paths.contains(&key) {
            return (self == ProjectionMode::Include).then(|| value.clone());
        }

        let nested = paths
            .iter()
            .filter_map(|path| path.strip_prefix(key)?.strip_prefix('.'))
            .collect::<Vec<_>>();

        if nested.is_empty() {
            return (self == ProjectionMode::Exclude).then(|| value.clone());
        }

        match value {
            Bson::Document(inner) => Some(Bson::Document(self.project_document(inner, &nested))),
            Bson::Array(items) => Some(Bson::Array(
                items
                    .iter()
                    .filter_map(|item| match item {
                        Bson::Document(inner) => {
                            Some(Bson::Document(self.project_document(inner, &nested)))
                        }
                        other => (self == ProjectionMode::Exclude).then(|| other.clone()),
                    })
                    .collect(),
            )),
            other => (self == ProjectionMode::Exclude).then(|| other.clone()),
        }
    }

    fn project_document(self, document: &Document, paths: &[&str]) -> Document {
        document
            .iter()
            .filter_map(|(key, value)| Some((key.clone(), self.project(key, value, paths)?)))
            .collect()
    }
}
