//! Persistence layer — libSQL-backed document store.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlDocumentStore;
pub use traits::{DocumentStore, MergeUpdate};
