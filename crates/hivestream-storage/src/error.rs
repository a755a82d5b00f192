//! Storage Error Types
//!
//! This module defines all error types that can occur during store-facing
//! operations.
//!
//! ## Error Categories
//!
//! ### Store Errors
//! - `ObjectStore`: a listing, read, write or delete against the store
//!   failed; generation conflicts surface here as
//!   `object_store::Error::Precondition`
//!
//! ### Writer Lifecycle Errors
//! - `AlreadyClosed`: a write or close hit a writer that was already
//!   closed (usually by its idle self-destruct); the writer cache
//!   retries this exact case once
//! - `WriterClosed`: a record was submitted to a sorted writer or
//!   streamer after `close()`
//!
//! ### Capacity Errors
//! - `TooManyPartitions`: the streamer refused to open yet another
//!   partition
//!
//! ### Aggregates
//! - `Multi`: group close operations collect child failures in order
//!
//! ## Usage
//!
//! All storage operations return `Result<T>` which is aliased to
//! `Result<T, Error>`. Core machinery errors convert via `#[from]`, so
//! `?` works across the crate boundary.

use hivestream_core::MultiError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("record error: {0}")]
    Core(#[from] hivestream_core::Error),

    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("writer is already closed")]
    AlreadyClosed,

    #[error("writer no longer accepts records")]
    WriterClosed,

    #[error("partition limit reached ({limit})")]
    TooManyPartitions { limit: usize },

    #[error("{0}")]
    Multi(MultiError),
}

impl From<MultiError> for Error {
    fn from(me: MultiError) -> Self {
        Error::Multi(me)
    }
}

impl Error {
    /// True for the store errors that mean "someone else won the
    /// generation race"; the compaction retry triggers.
    pub fn is_generation_conflict(&self) -> bool {
        matches!(
            self,
            Error::ObjectStore(
                object_store::Error::Precondition { .. } | object_store::Error::AlreadyExists { .. }
            )
        )
    }
}
