//! Storage backend abstraction for the shelter repository.
//!
//! A backend is an open session against one database: it owns the client connection and the
//! selected database, and executes single round-trip commands against a named collection. The
//! repository layers record numbering, argument validation and logging on top.
//!
//! # Traits
//!
//! - [`ShelterBackend`]: the commands a document database must support
//! - [`ShelterBackendBuilder`]: factory trait for opening backend sessions

use async_trait::async_trait;
use bson::{Bson, Document};
use std::fmt::Debug;

use crate::{error::ShelterResult, query::{Expr, Query}, update::UpdateSpec};

/// Abstract interface for document storage backends.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the repository may be shared between tasks. Each
/// method is an independent round trip, and no method assumes exclusive access to the collection.
///
/// # Error Handling
///
/// Driver or store failures are reported as
/// [`ShelterError::Backend`](crate::error::ShelterError::Backend). Writes rejected by a unique
/// index must be reported as
/// [`ShelterError::DuplicateKey`](crate::error::ShelterError::DuplicateKey) so the repository can
/// retry record numbering.
#[async_trait]
pub trait ShelterBackend: Send + Sync + Debug {
    /// Administrative liveness check.
    async fn ping(&self) -> ShelterResult<()>;

    /// Finds documents matching the query.
    ///
    /// Without a sort, documents come back in the backend's natural order.
    async fn find_documents(&self, query: Query, collection: &str) -> ShelterResult<Vec<Document>>;

    /// Inserts one document and returns the identifier the backend assigned to it.
    ///
    /// The document never carries an `_id` when the repository calls this.
    async fn insert_document(&self, document: Document, collection: &str) -> ShelterResult<Bson>;

    /// Applies `update` to every document matching `filter`.
    ///
    /// Returns the number of documents whose content actually changed.
    async fn update_documents(
        &self,
        filter: Option<Expr>,
        update: UpdateSpec,
        collection: &str,
    ) -> ShelterResult<u64>;

    /// Deletes every document matching `filter`, returning how many were removed.
    async fn delete_documents(&self, filter: Option<Expr>, collection: &str) -> ShelterResult<u64>;

    /// Creates an ascending index on `field`; creating an existing index is a no-op.
    ///
    /// If `unique` is true and existing documents violate the constraint, the backend returns an
    /// error and leaves the collection unindexed.
    async fn add_index(&self, collection: &str, field: &str, unique: bool) -> ShelterResult<()>;

    /// Cleanly shuts down the backend, releasing the session.
    ///
    /// The default implementation is a no-op; backends holding network connections override it.
    async fn shutdown(self) -> ShelterResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

/// Opens a backend session.
#[async_trait]
pub trait ShelterBackendBuilder {
    type Backend: ShelterBackend;

    async fn build(self) -> ShelterResult<Self::Backend>;
}
