//! Error types for the shadow store.
//!
//! Mutation entry points are no-ops on unknown references by contract;
//! only the fallible accessors return errors.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Node not found: {0}")]
    UnknownNode(u32),
}
