//! Error types for BVH optimization and packing.

use thiserror::Error;

/// Main error type for tree loading, validation and packing.
///
/// Budget and cap trips inside the optimizer are never reported through
/// this type; they are logged and the affected phase stops early.
#[derive(Error, Debug)]
pub enum Error {
    /// Handle does not address a node in the arena
    #[error("Invalid node handle: {0}")]
    InvalidHandle(u32),

    /// Node violates the leaf/internal contract
    #[error("Malformed node {handle}: {reason}")]
    MalformedNode { handle: u32, reason: String },

    /// A node is reachable through more than one parent
    #[error("Tree contains a cycle or shared subtree")]
    CyclicTree,

    /// Tree has no nodes
    #[error("Tree is empty")]
    EmptyTree,

    /// Configuration value out of range or unreadable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Flatten worker thread is gone
    #[error("Flatten worker disconnected")]
    WorkerDisconnected,

    /// Flatten worker reported a failure
    #[error("Flatten worker failed: {0}")]
    Worker(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a malformed-node error.
    pub fn malformed(handle: u32, reason: impl Into<String>) -> Self {
        Self::MalformedNode {
            handle,
            reason: reason.into(),
        }
    }
}

/// Result type alias for BVH operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::InvalidHandle(42);
        assert!(e.to_string().contains("42"));

        let e = Error::malformed(7, "internal node with triangles");
        assert!(e.to_string().contains("7"));
        assert!(e.to_string().contains("internal node"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
