//! Convenient re-exports of commonly used types.
//!
//! ```ignore
//! use animal_shelter::prelude::*;
//! ```

pub use animal_shelter_core::{
    backend::{ShelterBackend, ShelterBackendBuilder},
    config::ConnectionConfig,
    error::{ShelterError, ShelterResult},
    projection::Projection,
    query::{Expr, Filter, FieldOp, Query, QueryBuilder, QueryVisitor, Sort, SortDirection},
    record::{AnimalRecord, RecordBatch, ID_FIELD, REC_NUM_FIELD},
    repository::AnimalShelterRepository,
    update::{UpdateOp, UpdateSpec},
};
