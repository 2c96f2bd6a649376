//! In-memory storage implementation of the shelter backend.
//!
//! Documents are kept per collection in insertion order, behind an async-safe read-write lock.

use std::{collections::HashMap, sync::Arc};
use async_trait::async_trait;
use mea::rwlock::RwLock;
use bson::{Bson, Document, oid::ObjectId};

use animal_shelter_core::{
    backend::{ShelterBackend, ShelterBackendBuilder},
    error::{ShelterError, ShelterResult},
    query::{Expr, Query, SortDirection},
    record::{self, ID_FIELD},
    update::UpdateSpec,
};

use crate::evaluator::{Comparable, DocumentEvaluator, compare_field};

type StoreMap = HashMap<String, CollectionState>;

#[derive(Debug, Default)]
struct CollectionState {
    /// Documents in insertion order (the natural order of unsorted finds)
    documents: Vec<Document>,
    /// Fields carrying a unique index
    unique_fields: Vec<String>,
}

impl CollectionState {
    /// Finds a unique field on which `candidate` collides with a stored document other than
    /// the one at `skip`.
    fn conflict(&self, candidate: &Document, skip: Option<usize>) -> Option<(String, String)> {
        self.unique_fields.iter().find_map(|field| {
            let value = record::lookup(candidate, field)
                .map(Comparable::from)
                .unwrap_or(Comparable::Null);

            self.documents
                .iter()
                .enumerate()
                .filter(|(index, _)| Some(*index) != skip)
                .any(|(_, stored)| {
                    record::lookup(stored, field)
                        .map(Comparable::from)
                        .unwrap_or(Comparable::Null)
                        == value
                })
                .then(|| {
                    let shown = record::lookup(candidate, field)
                        .map(ToString::to_string)
                        .unwrap_or_else(|| "null".to_string());
                    (field.clone(), shown)
                })
        })
    }
}


/// Thread-safe in-memory shelter backend.
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, so clones share the
/// same data. Queries scan every document in a collection; unique indexes are enforced on insert
/// and update. Intended for tests and local development.
///
/// # Example
///
/// ```ignore
/// use animal_shelter_memory::InMemoryStore;
/// use animal_shelter_core::repository::AnimalShelterRepository;
///
/// let repository = AnimalShelterRepository::connect(InMemoryStore::new(), "animals").await?;
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    /// collection_name -> documents
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
        }
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Number of documents currently stored in `collection`.
    pub async fn count(&self, collection: &str) -> usize {
        self.store
            .read()
            .await
            .get(collection)
            .map_or(0, |state| state.documents.len())
    }
}


#[async_trait]
impl ShelterBackend for InMemoryStore {
    async fn ping(&self) -> ShelterResult<()> {
        Ok(())
    }

    async fn find_documents(&self, query: Query, collection: &str) -> ShelterResult<Vec<Document>> {
        let store = self.store.read().await;
        let state = match store.get(collection) {
            Some(state) => state,
            None => return Ok(vec![]),
        };

        let mut matched = Vec::new();
        for document in &state.documents {
            if DocumentEvaluator::matches(document, query.filter.as_ref())? {
                matched.push(document);
            }
        }

        // Stable sort keeps insertion order among equal keys
        if let Some(sort) = &query.sort {
            matched.sort_by(|a, b| match sort.direction {
                SortDirection::Asc => compare_field(a, b, &sort.field),
                SortDirection::Desc => compare_field(b, a, &sort.field),
            });
        }

        Ok(
            matched
                .into_iter()
                .take(query.limit.unwrap_or(usize::MAX))
                .map(|document| match &query.projection {
                    Some(projection) => projection.apply(document),
                    None => document.clone(),
                })
                .collect()
        )
    }

    async fn insert_document(&self, mut document: Document, collection: &str) -> ShelterResult<Bson> {
        let mut store = self.store.write().await;
        let state = store
            .entry(collection.to_string())
            .or_default();

        let id = match document.get(ID_FIELD) {
            Some(id) => id.clone(),
            None => Bson::ObjectId(ObjectId::new()),
        };

        // Stored documents lead with their identifier, as MongoDB does
        let mut stored = Document::new();
        stored.insert(ID_FIELD, id.clone());
        document.remove(ID_FIELD);
        for (key, value) in document {
            stored.insert(key, value);
        }

        if state
            .documents
            .iter()
            .any(|existing| existing.get(ID_FIELD) == Some(&id))
        {
            return Err(ShelterError::DuplicateKey(format!("{ID_FIELD}: {id}")));
        }

        if let Some((field, value)) = state.conflict(&stored, None) {
            return Err(ShelterError::DuplicateKey(format!("{field}: {value}")));
        }

        state.documents.push(stored);

        Ok(id)
    }

    async fn update_documents(
        &self,
        filter: Option<Expr>,
        update: UpdateSpec,
        collection: &str,
    ) -> ShelterResult<u64> {
        let mut store = self.store.write().await;
        let state = match store.get_mut(collection) {
            Some(state) => state,
            None => return Ok(0),
        };

        let mut modified = 0;

        for index in 0..state.documents.len() {
            if !DocumentEvaluator::matches(&state.documents[index], filter.as_ref())? {
                continue;
            }

            let mut updated = state.documents[index].clone();
            if !update.apply(&mut updated)? {
                continue;
            }

            if let Some((field, value)) = state.conflict(&updated, Some(index)) {
                return Err(ShelterError::DuplicateKey(format!("{field}: {value}")));
            }

            state.documents[index] = updated;
            modified += 1;
        }

        Ok(modified)
    }

    async fn delete_documents(&self, filter: Option<Expr>, collection: &str) -> ShelterResult<u64> {
        let mut store = self.store.write().await;
        let state = match store.get_mut(collection) {
            Some(state) => state,
            None => return Ok(0),
        };

        // Evaluate everything first so a failing filter leaves the collection untouched
        let mut doomed = Vec::with_capacity(state.documents.len());
        for document in &state.documents {
            doomed.push(DocumentEvaluator::matches(document, filter.as_ref())?);
        }

        let before = state.documents.len();
        let mut doomed = doomed.into_iter();
        state.documents.retain(|_| !doomed.next().unwrap_or(false));

        Ok((before - state.documents.len()) as u64)
    }

    async fn add_index(&self, collection: &str, field: &str, unique: bool) -> ShelterResult<()> {
        // Non-unique indexes only speed up lookups, which a full scan doesn't need
        if !unique {
            return Ok(());
        }

        let mut store = self.store.write().await;
        let state = store
            .entry(collection.to_string())
            .or_default();

        if state.unique_fields.iter().any(|existing| existing == field) {
            return Ok(());
        }

        let mut values: Vec<Comparable<'_>> = Vec::with_capacity(state.documents.len());
        for document in &state.documents {
            let value = record::lookup(document, field)
                .map(Comparable::from)
                .unwrap_or(Comparable::Null);

            if values.contains(&value) {
                return Err(ShelterError::Backend(format!(
                    "cannot build unique index on {field}: duplicate values in {collection}"
                )));
            }
            values.push(value);
        }

        state.unique_fields.push(field.to_string());

        Ok(())
    }
}


/// Builder for constructing [`InMemoryStore`] instances.
#[derive(Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl ShelterBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    /// Builds and returns a new [`InMemoryStore`] instance. Always succeeds.
    async fn build(self) -> ShelterResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}
