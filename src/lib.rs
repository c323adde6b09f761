//! `rootsync`: Gramps XML import and reconciliation for a family-tree
//! `SQLite` database.

pub mod cli;
pub mod config;
pub mod error;
pub mod import;
pub mod logging;
pub mod model;
pub mod storage;
pub mod util;

pub use error::{ErrorCode, Result, RootsyncError, StructuredError};
