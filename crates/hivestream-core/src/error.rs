//! Error Types for hivestream-core
//!
//! This module defines the error enum shared by the record machinery.
//!
//! ## Error Categories
//!
//! ### Ordering Errors
//! - `NotOrdered`: a merge input produced a record stream that cannot be
//!   compared (an input that was documented as sorted but is not)
//!
//! ### Codec Errors
//! - `Json`: a record failed to encode or decode as a JSON value
//!
//! ### Retry Errors
//! - `Exhausted`: a bounded backoff ran out of attempts
//!
//! ### Aggregates
//! - `Multi`: a group operation (flush-all, close-all) collected one or
//!   more child failures; insertion order is preserved
//!
//! ## End of sequence
//!
//! End-of-sequence is NOT an error: every iterator in this crate signals
//! it as `Ok(None)`. Only genuine failures travel through `Error`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("record stream is not ordered: {0}")]
    NotOrdered(String),

    #[error("backoff exhausted after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("{0}")]
    Multi(MultiError),
}

impl From<MultiError> for Error {
    fn from(me: MultiError) -> Self {
        Error::Multi(me)
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An ordered collection of errors produced by a group operation.
///
/// Children of any error type are kept in the order they were recorded.
/// An empty `MultiError` is not an error; use
/// [`MultiError::into_result`] to collapse it.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<BoxError>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a child failure.
    pub fn push<E: Into<BoxError>>(&mut self, err: E) {
        self.errors.push(err.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// `Ok(())` when no child failed, otherwise `Err(self)`.
    pub fn into_result(self) -> std::result::Result<(), MultiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    pub fn errors(&self) -> &[BoxError] {
        &self.errors
    }
}

impl std::fmt::Display for MultiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error(s): ", self.errors.len())?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_multi_error_is_ok() {
        assert!(MultiError::new().into_result().is_ok());
    }

    #[test]
    fn test_multi_error_preserves_order() {
        let mut me = MultiError::new();
        me.push(Error::NotOrdered("first".to_string()));
        me.push(Error::Exhausted { attempts: 5 });
        assert_eq!(me.len(), 2);

        let rendered = me.to_string();
        let first = rendered.find("first").unwrap();
        let second = rendered.find("5 attempts").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_multi_error_into_result() {
        let mut me = MultiError::new();
        me.push(Error::NotOrdered("boom".to_string()));
        match me.into_result() {
            Err(inner) => assert_eq!(inner.len(), 1),
            Ok(()) => panic!("expected an error"),
        }
    }

    #[test]
    fn test_multi_error_accepts_foreign_errors() {
        let mut me = MultiError::new();
        me.push(std::io::Error::new(std::io::ErrorKind::Other, "io boom"));
        me.push(Error::NotOrdered("ord boom".to_string()));
        assert_eq!(me.len(), 2);
        assert!(me.to_string().contains("io boom"));
    }
}
