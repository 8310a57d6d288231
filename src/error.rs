//! The closed error taxonomy surfaced to clients (spec §6/§7).
//!
//! The coordinator is the sole translator from backend-specific errors
//! into this taxonomy; backends never leak their own error type across
//! the API boundary (spec §7 "Propagation policy").

use crate::key::InvalidKey;
use thiserror::Error;

/// Errors surfaced by the public [`crate::Store`] API.
#[derive(Debug, Error)]
pub enum Error {
    #[error("key not found")]
    NotFound,

    #[error("key already exists")]
    AlreadyExists,

    #[error("no capacity available in target tier")]
    NoCapacity,

    #[error("checksum mismatch; key is fenced")]
    Corrupted,

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("operation timed out")]
    Timeout,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("key is pinned")]
    Pinned,
}

impl From<InvalidKey> for Error {
    fn from(e: InvalidKey) -> Self {
        Error::InvalidArgument(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Errors a [`crate::backend::TierBackend`] may surface internally.
///
/// Split from [`Error`] because backends retry `Transient` failures
/// themselves before the coordinator ever observes them (spec §4.2
/// "Error model").
#[derive(Debug, Error, Clone)]
pub enum BackendError {
    #[error("transient backend failure: {0}")]
    Transient(String),

    #[error("permanent backend failure: {0}")]
    Permanent(String),

    #[error("checksum mismatch on read")]
    Corrupted,

    #[error("handle not found")]
    NotFound,
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}
