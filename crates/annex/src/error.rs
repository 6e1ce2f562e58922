//! Crate-wide error type

use annex_types::TransitionError;

use crate::environment::{BuildError, ManifestError, ProbeError};
use crate::lifecycle::LockContention;
use crate::plugin::ActivationError;
use crate::store::StoreError;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by lifecycle operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The resolver rejected the candidate set; the caller's create/update is refused
    #[error("plugin dependencies cannot be resolved: {diagnostic}")]
    Conflict { id: String, diagnostic: String },

    #[error("plugin not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Activation(#[from] ActivationError),

    #[error(transparent)]
    LockContention(#[from] LockContention),
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Error::NotFound(id),
            StoreError::Invalid(err) => Error::Transition(err),
            other => Error::Store(other),
        }
    }
}
