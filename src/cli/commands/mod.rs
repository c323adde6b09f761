//! Command implementations.

pub mod batches;
pub mod completions;
pub mod edit;
pub mod import;
pub mod init;
pub mod modified;
pub mod person;
pub mod stats;
