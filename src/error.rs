//! Error types shared across the crate.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The rendering backend refused an operation. Carries the backend's
    /// own diagnostic text.
    #[error("rendering backend failure: {0}")]
    Backend(String),

    #[error("geometry group `{group}` of `{source_id}` has no position data")]
    MissingPositions { source_id: String, group: String },

    #[error("geometry group `{group}` of `{source_id}` is malformed: {reason}")]
    MalformedGeometry {
        source_id: String,
        group: String,
        reason: String,
    },

    #[error("no instance named `{0}` in the scene")]
    UnknownInstance(String),

    #[error("instance `{0}` was already disposed")]
    AlreadyDisposed(String),
}
