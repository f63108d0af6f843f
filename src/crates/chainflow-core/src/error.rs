//! Error types for pipeline construction and execution.
//!
//! All errors implement `std::error::Error` via the `thiserror` crate.
//! There are three categories: topology-shape errors caught before any
//! worker starts, construction failures raised while the graph is being
//! wired, and abnormal exit reasons raised by running workers.

use thiserror::Error;

/// Convenience result type using [`ChainError`].
pub type Result<T> = std::result::Result<T, ChainError>;

/// Error type for all pipeline operations.
#[derive(Error, Debug)]
pub enum ChainError {
    /// The topology value is structurally invalid.
    ///
    /// Raised by [`create`](crate::create) before anything is spawned,
    /// e.g. for an empty `chain` or an empty `fan_in`.
    #[error("invalid topology: {0}")]
    Topology(String),

    /// A worker could not be started during pipeline construction.
    ///
    /// Typically the worker's downstream successor terminated between
    /// build steps, so the start-up handshake was aborted.
    #[error("pipeline construction failed: {0}")]
    Build(String),

    /// An abnormal exit reason raised by a worker body.
    ///
    /// The `Display` form is the bare reason string so that a reason
    /// raised inside a worker survives the trip through the link graph
    /// unchanged and comes back out of
    /// [`ChainOutput::Error`](crate::ChainOutput::Error) verbatim.
    #[error("{0}")]
    Worker(String),
}

impl ChainError {
    /// Create a worker failure with the given exit reason.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use chainflow_core::ChainError;
    ///
    /// let err = ChainError::worker("boom");
    /// assert_eq!(err.to_string(), "boom");
    /// ```
    pub fn worker(reason: impl Into<String>) -> Self {
        Self::Worker(reason.into())
    }

    /// Create a topology-shape error.
    pub fn topology(message: impl Into<String>) -> Self {
        Self::Topology(message.into())
    }

    /// Create a construction failure.
    pub fn build(message: impl Into<String>) -> Self {
        Self::Build(message.into())
    }
}
