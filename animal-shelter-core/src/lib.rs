//! Core of the animal shelter repository: a small data-access layer over one document collection.
//!
//! This crate provides:
//!
//! - **Repository** ([`repository`]) - CRUD operations plus sequential record numbering
//! - **Backend abstraction** ([`backend`]) - The commands a document database must support
//! - **Filters** ([`query`]) - MongoDB-style filter documents parsed into a backend-neutral tree
//! - **Updates** ([`update`]) - Validated update-operator documents
//! - **Projections** ([`projection`]) - Field selection for reads
//! - **Records** ([`record`]) - Reserved fields and create-input validation
//! - **Configuration** ([`config`]) - Connection parameters
//! - **Error handling** ([`error`]) - Error and result types
//!
//! # Example
//!
//! ```ignore
//! use animal_shelter_core::repository::AnimalShelterRepository;
//! use bson::doc;
//!
//! let repository = AnimalShelterRepository::connect(backend, "animals").await?;
//! repository.create(doc! { "animal_id": "B721406", "breed": "Labrador Retriever Mix" }).await?;
//! assert_eq!(repository.next_record_num().await?, 2);
//! ```

#[allow(unused_extern_crates)]
extern crate self as animal_shelter_core;

pub mod backend;
pub mod config;
pub mod error;
pub mod projection;
pub mod query;
pub mod record;
pub mod repository;
pub mod update;
