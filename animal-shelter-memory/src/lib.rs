//! In-memory backend for the animal shelter repository.
//!
//! This crate provides a thread-safe, in-memory implementation of the `ShelterBackend` trait.
//! It uses async-aware read-write locks for concurrent access and is meant for tests and local
//! development, where a MongoDB server is not available.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **MongoDB-like matching** - Filters, sorting, projections and update operators behave like
//!   their MongoDB counterparts for the supported subset
//! - **Unique indexes** - Enforced on insert and update, so record-number collisions surface as
//!   duplicate-key errors
//!
//! # Quick Start
//!
//! ```ignore
//! use animal_shelter_core::repository::AnimalShelterRepository;
//! use animal_shelter_memory::InMemoryStore;
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let repository = AnimalShelterRepository::connect(InMemoryStore::new(), "animals").await?;
//!
//!     repository.create(doc! { "animal_id": "A746874", "breed": "Beagle" }).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as animal_shelter_memory;

pub mod store;
pub mod evaluator;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
