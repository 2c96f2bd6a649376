//! CRUD access to the shelter animal collection.
//!
//! [`AnimalShelterRepository`] owns an open backend session and the name of the collection it
//! works on. It is only ever handed out connected: [`AnimalShelterRepository::connect`] probes the
//! backend first and fails with [`ShelterError::Connection`] otherwise.
//!
//! # Record numbers
//!
//! Every inserted record gets a `rec_num` of `max(rec_num) + 1` (or `1` in an empty collection),
//! re-evaluated per record so a batch receives consecutive numbers. Only numeric `rec_num` values
//! count towards the maximum; strings or other values left by external writers are ignored. Computing the number and
//! inserting are two round trips, so concurrent writers can pick the same number. The repository
//! asks the backend for a unique index on `rec_num` when it connects; a colliding insert is then
//! rejected by the backend and retried with a fresh number.
//!
//! # Errors
//!
//! Argument errors are returned before anything is sent to the backend. Backend failures are
//! logged with `tracing` and returned as errors; an empty result always means "nothing matched".
//!
//! # Example
//!
//! ```ignore
//! use bson::doc;
//! use animal_shelter_core::repository::AnimalShelterRepository;
//!
//! let repository = AnimalShelterRepository::connect(backend, "animals").await?;
//!
//! let numbers = repository
//!     .create(doc! { "breed": "Labrador Retriever Mix", "animal_id": "B721406" })
//!     .await?;
//! let labs = repository.read(doc! { "breed": "Labrador Retriever Mix" }, None).await?;
//!
//! repository.shutdown().await?;
//! ```

use bson::{Bson, Document};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    backend::ShelterBackend,
    error::{ShelterError, ShelterResult},
    projection::Projection,
    query::{Expr, Filter, Query, SortDirection},
    record::{record_number, RecordBatch, REC_NUM_FIELD},
    update::UpdateSpec,
};

/// How many times an insert is attempted when its record number is taken concurrently.
pub const DEFAULT_INSERT_ATTEMPTS: usize = 3;

/// Data-access object over one collection of shelter animal documents.
#[derive(Debug)]
pub struct AnimalShelterRepository<B: ShelterBackend> {
    backend: B,
    collection: String,
    insert_attempts: usize,
}

impl<B: ShelterBackend> AnimalShelterRepository<B> {
    /// Probes `backend` and binds the repository to `collection`.
    ///
    /// Also requests the unique `rec_num` index. If the index cannot be built (for example because
    /// legacy records already share numbers) a warning is logged and the repository works without
    /// the uniqueness guarantee.
    ///
    /// # Errors
    ///
    /// Returns [`ShelterError::Connection`] if the liveness probe fails; the backend session is
    /// shut down before returning. Returns [`ShelterError::InvalidArgument`] for an empty
    /// collection name.
    pub async fn connect(backend: B, collection: impl Into<String>) -> ShelterResult<Self> {
        let collection = collection.into();

        if collection.trim().is_empty() {
            return Err(ShelterError::invalid("collection name must not be empty"));
        }

        if let Err(err) = backend.ping().await {
            error!(%collection, error = %err, "liveness probe failed");

            if let Err(shutdown_err) = backend.shutdown().await {
                warn!(error = %shutdown_err, "failed to release backend after probe failure");
            }

            return Err(ShelterError::Connection(err.to_string()));
        }

        let repository = Self {
            backend,
            collection,
            insert_attempts: DEFAULT_INSERT_ATTEMPTS,
        };

        if let Err(err) = repository.ensure_record_index().await {
            warn!(
                collection = %repository.collection,
                error = %err,
                "rec_num uniqueness is not enforced by the backend",
            );
        }

        info!(collection = %repository.collection, "connected to shelter collection");

        Ok(repository)
    }

    /// Sets how many times an insert is attempted when its record number collides.
    pub fn with_insert_attempts(mut self, attempts: usize) -> Self {
        self.insert_attempts = attempts.max(1);
        self
    }

    /// The collection this repository reads and writes.
    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    /// The underlying backend session.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Requests the unique index on `rec_num`. Idempotent.
    pub async fn ensure_record_index(&self) -> ShelterResult<()> {
        self.backend
            .add_index(&self.collection, REC_NUM_FIELD, true)
            .await
    }

    /// Returns the record number the next insert will receive.
    ///
    /// Read only; the value is not reserved.
    pub async fn next_record_num(&self) -> ShelterResult<i64> {
        self.fetch_next_record_num()
            .await
            .inspect_err(|err| self.log_failure("next_record_num", err))
    }

    async fn fetch_next_record_num(&self) -> ShelterResult<i64> {
        let latest = self
            .backend
            .find_documents(
                Query::builder()
                    .filter(Filter::has_type(REC_NUM_FIELD, "number"))
                    .sort(REC_NUM_FIELD, SortDirection::Desc)
                    .limit(1)
                    .build(),
                &self.collection,
            )
            .await?;

        Ok(latest.first().and_then(record_number).unwrap_or(0) + 1)
    }

    /// Inserts one record or an array of records.
    ///
    /// `data` may be a document, an array of documents, or anything convertible into one of
    /// those. Each record loses its `_id` and receives the next record number before it is
    /// inserted. Returns the assigned record numbers in insertion order.
    ///
    /// # Errors
    ///
    /// - [`ShelterError::InvalidArgument`] if `data` is null or not a document/array of documents.
    /// - [`ShelterError::PartialInsert`] if the backend fails after some records were stored;
    ///   those records stay in the collection.
    /// - The backend's error if the very first insert fails.
    pub async fn create(&self, data: impl Into<Bson>) -> ShelterResult<Vec<i64>> {
        self.create_batch(RecordBatch::try_from(data.into())?).await
    }

    /// Inserts an already validated batch. See [`create`](Self::create).
    #[instrument(skip_all, fields(collection = %self.collection, records = batch.len()))]
    pub async fn create_batch(&self, batch: RecordBatch) -> ShelterResult<Vec<i64>> {
        let mut committed = Vec::with_capacity(batch.len());

        for record in batch.into_records() {
            match self.insert_numbered(record).await {
                Ok(rec_num) => committed.push(rec_num),
                Err(err) => {
                    self.log_failure("create", &err);

                    return Err(if committed.is_empty() {
                        err
                    } else {
                        ShelterError::PartialInsert {
                            committed,
                            reason: err.to_string(),
                        }
                    });
                }
            }
        }

        debug!(?committed, "records created");

        Ok(committed)
    }

    async fn insert_numbered(&self, mut record: Document) -> ShelterResult<i64> {
        let mut attempt = 1;

        loop {
            let rec_num = self.fetch_next_record_num().await?;
            record.insert(REC_NUM_FIELD, rec_num);

            match self
                .backend
                .insert_document(record.clone(), &self.collection)
                .await
            {
                Ok(_) => return Ok(rec_num),
                Err(ShelterError::DuplicateKey(reason)) if attempt < self.insert_attempts => {
                    warn!(rec_num, attempt, %reason, "record number already taken, retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Reads records.
    ///
    /// With an empty `filter` at most one record is returned (the first one the backend yields).
    /// Otherwise every matching record is returned, ordered by ascending `rec_num`. `projection`
    /// restricts the returned fields.
    ///
    /// # Errors
    ///
    /// [`ShelterError::InvalidArgument`] for unsupported filter or projection documents, or the
    /// backend's error.
    #[instrument(skip_all, fields(collection = %self.collection))]
    pub async fn read(
        &self,
        filter: Document,
        projection: Option<Document>,
    ) -> ShelterResult<Vec<Document>> {
        let projection = match projection {
            Some(projection) => Projection::parse(&projection)?,
            None => None,
        };

        let query = match Expr::parse(&filter)? {
            None => Query::builder()
                .projection(projection)
                .limit(1)
                .build(),
            Some(expr) => Query::builder()
                .filter(expr)
                .projection(projection)
                .sort(REC_NUM_FIELD, SortDirection::Asc)
                .build(),
        };

        let documents = self
            .backend
            .find_documents(query, &self.collection)
            .await
            .inspect_err(|err| self.log_failure("read", err))?;

        debug!(matched = documents.len(), "records read");

        Ok(documents)
    }

    /// Applies `update` to every record matching `query`.
    ///
    /// Returns how many records actually changed; records that matched but already held the new
    /// values are not counted.
    ///
    /// # Errors
    ///
    /// [`ShelterError::InvalidArgument`] if `query` is empty or `update` is not an operator
    /// document, or the backend's error.
    #[instrument(skip_all, fields(collection = %self.collection))]
    pub async fn update(&self, query: Document, update: Document) -> ShelterResult<u64> {
        if query.is_empty() {
            return Err(ShelterError::invalid("update() requires a non-empty query"));
        }

        let filter = Expr::parse(&query)?;
        let update = UpdateSpec::parse(&update)?;

        let modified = self
            .backend
            .update_documents(filter, update, &self.collection)
            .await
            .inspect_err(|err| self.log_failure("update", err))?;

        debug!(modified, "records updated");

        Ok(modified)
    }

    /// Deletes every record matching `query` and returns how many were removed.
    ///
    /// # Errors
    ///
    /// [`ShelterError::InvalidArgument`] if `query` is empty, or the backend's error.
    #[instrument(skip_all, fields(collection = %self.collection))]
    pub async fn delete(&self, query: Document) -> ShelterResult<u64> {
        if query.is_empty() {
            return Err(ShelterError::invalid("delete() requires a non-empty query"));
        }

        let filter = Expr::parse(&query)?;

        let deleted = self
            .backend
            .delete_documents(filter, &self.collection)
            .await
            .inspect_err(|err| self.log_failure("delete", err))?;

        debug!(deleted, "records deleted");

        Ok(deleted)
    }

    /// Fetches one arbitrary record to check that the session responds.
    pub async fn probe(&self) -> ShelterResult<Option<Document>> {
        Ok(self
            .backend
            .find_documents(Query::builder().limit(1).build(), &self.collection)
            .await
            .inspect_err(|err| self.log_failure("probe", err))?
            .into_iter()
            .next())
    }

    /// Closes the backend session.
    pub async fn shutdown(self) -> ShelterResult<()> {
        info!(collection = %self.collection, "closing shelter repository");

        self.backend.shutdown().await
    }

    fn log_failure(&self, operation: &str, err: &ShelterError) {
        if err.is_backend() {
            error!(collection = %self.collection, operation, error = %err, "backend operation failed");
        }
    }
}
