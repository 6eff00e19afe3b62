//! Database module: document rows and SQL repositories.
//!
//! - `model`: input records accepted by the repository.
//! - `repo`: SQL-only functions that map rows into `crate::model::Document`.
//!
//! Callers import from `publish_notifier::db`; the repository API is
//! re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::NewDocument;
