//! CRUD repository over a document collection of shelter animals.
//!
//! This crate is the entry point of the workspace. It re-exports the core types and the
//! available backends.
//!
//! # Features
//!
//! - **Sequential record numbers** - every insert gets `rec_num = max + 1`, backed by a unique
//!   index and retried on collision
//! - **MongoDB-style filters** - reads, updates and deletes take ordinary filter documents
//! - **Explicit errors** - backend failures are returned, never folded into empty results
//! - **Two backends** - in-memory for tests, MongoDB behind the `mongodb` feature
//!
//! # Quick Start
//!
//! ```ignore
//! use animal_shelter::{prelude::*, memory::InMemoryStore};
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> ShelterResult<()> {
//!     let repository = AnimalShelterRepository::connect(InMemoryStore::new(), "animals").await?;
//!
//!     // Insert a record; it receives rec_num 1
//!     let numbers = repository
//!         .create(doc! { "breed": "Labrador Retriever Mix", "animal_id": "B721406" })
//!         .await?;
//!     assert_eq!(numbers, vec![1]);
//!
//!     // Update every matching record
//!     let modified = repository
//!         .update(doc! { "animal_id": "B721406" }, doc! { "$set": { "note": "x" } })
//!         .await?;
//!     assert_eq!(modified, 1);
//!
//!     // Delete by record number
//!     assert_eq!(repository.delete(doc! { "rec_num": 1 }).await?, 1);
//!
//!     repository.shutdown().await
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing
//! - [`mongodb`] - MongoDB backend (requires the `mongodb` feature)

pub mod prelude;

pub use animal_shelter_core::{backend, config, error, projection, query, record, repository, update};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend.
pub mod memory {
    pub use animal_shelter_memory::{InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use animal_shelter_mongodb::{MongoDbStore, MongoDbStoreBuilder, MongoShelterRepository, connect};
}
