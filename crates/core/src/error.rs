//! Error types for the Kindred domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Kindred operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model errors ---
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Task errors ---
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    // --- Merge errors ---
    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    // --- Fetch errors ---
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("API request failed: {message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    #[error("Rate limited by model backend, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Model backend not configured: {0}")]
    NotConfigured(String),

    #[error("Malformed model output: {0}")]
    Malformed(String),
}

impl ModelError {
    /// Transient failures are worth one retry of the same request;
    /// everything else fails the caller immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::Timeout(_)
                | Self::Network(_)
                | Self::StreamInterrupted(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Memory storage error: {0}")]
    Storage(String),

    #[error("Memory classification failed: {0}")]
    Classification(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error(
        "Version conflict on document {document_id}: save based on v{expected}, store holds v{stored}"
    )]
    VersionConflict {
        document_id: String,
        expected: u64,
        stored: u64,
    },

    #[error("Storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Model call failed: {0}")]
    Model(#[from] ModelError),

    #[error("Tool execution failed: {tool} — {reason}")]
    Tool { tool: String, reason: String },

    #[error("Goal blocked after {consecutive} consecutive failed iterations")]
    Blocked { consecutive: u32 },

    #[error("Task cancelled")]
    Cancelled,

    #[error("Session not approved: {0}")]
    NotApproved(String),

    #[error("Store operation failed during task: {0}")]
    Store(#[from] StoreError),
}

impl TaskError {
    /// Whether the user can meaningfully retry or rephrase.
    ///
    /// Cancellation is deliberate, so it is reported as its own outcome
    /// rather than a retryable failure.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Model(e) => e.is_transient(),
            Self::Tool { .. } | Self::Blocked { .. } | Self::NotApproved(_) => true,
            Self::Cancelled => false,
            Self::Store(e) => matches!(e, StoreError::VersionConflict { .. }),
        }
    }
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("{count} conflicting hunks left unresolved")]
    UnresolvedConflicts { count: usize },

    #[error("Hunk index out of range: {index}")]
    HunkOutOfRange { index: usize },
}

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("Page fetch failed: {url} (status: {status_code})")]
    Http { status_code: u16, url: String },

    #[error("Network error fetching {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("Page too large: {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: usize },

    #[error("Fetch timed out: {0}")]
    Timeout(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_error_displays_correctly() {
        let err = Error::Model(ModelError::Api {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn transient_classification() {
        assert!(ModelError::Timeout("30s".into()).is_transient());
        assert!(ModelError::RateLimited { retry_after_secs: 5 }.is_transient());
        assert!(!ModelError::AuthFailed("bad key".into()).is_transient());
        assert!(
            !ModelError::Api {
                status_code: 500,
                message: "boom".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn version_conflict_displays_both_versions() {
        let err = Error::Store(StoreError::VersionConflict {
            document_id: "doc_1".into(),
            expected: 3,
            stored: 5,
        });
        assert!(err.to_string().contains("v3"));
        assert!(err.to_string().contains("v5"));
    }

    #[test]
    fn cancellation_is_not_recoverable() {
        assert!(!TaskError::Cancelled.is_recoverable());
        assert!(
            TaskError::Tool {
                tool: "read_document".into(),
                reason: "empty".into()
            }
            .is_recoverable()
        );
    }
}
