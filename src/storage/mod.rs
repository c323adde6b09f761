//! `SQLite` storage layer for `rootsync`.
//!
//! The import pipeline is the sole writer of Gramps-owned fields; the
//! web-layer stand-ins here only touch non-identity person fields.

pub mod schema;
pub mod sqlite;

pub use sqlite::{EntityCounts, PersonEdit, PersonImport, SqliteStorage, Upserted, VitalEvent};
