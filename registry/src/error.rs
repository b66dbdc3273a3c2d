//! Error types for the registry client
//!
//! Store-level failures (`StoreError`) are what a `RemoteStore` reports;
//! `RegistryError` is what the synchronizer surfaces to its callers.

use crate::record::{RecordId, RecordStatus};
use thiserror::Error;

/// Errors reported by a remote store implementation
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store cannot be reached at all
    #[error("store unavailable")]
    Unavailable,

    /// A store call did not complete in time
    #[error("store call timed out after {0}ms")]
    Timeout(u64),

    /// The write path has no signing principal attached
    #[error("write requires an authenticated signer")]
    Unauthenticated,

    /// The signer declined the write
    #[error("write cancelled by signer")]
    Cancelled,

    /// The store refused the write
    #[error("write rejected: {0}")]
    Rejected(String),

    /// A compare-and-set kept losing to concurrent writers
    #[error("write conflict: {0}")]
    Conflict(String),

    /// Local persistence failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stage of a multi-step write that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStage {
    /// Writing the record body
    Record,
    /// Adding the id to the index
    Index,
}

impl std::fmt::Display for SubmissionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionStage::Record => write!(f, "record"),
            SubmissionStage::Index => write!(f, "index"),
        }
    }
}

/// Errors surfaced by the registry operations
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Malformed payload
    #[error("decode error: {0}")]
    Decode(String),

    /// A value could not be serialized for storage
    #[error("encode error: {0}")]
    Encode(String),

    /// Referenced record does not exist
    #[error("record not found: {0}")]
    NotFound(RecordId),

    /// Acting principal is not the record owner
    #[error("principal {principal} is not allowed to modify record {id}")]
    Authorization { id: RecordId, principal: String },

    /// Status change not allowed by the record state machine
    #[error("invalid transition for record {id}: {from} -> {to}")]
    InvalidTransition {
        id: RecordId,
        from: RecordStatus,
        to: RecordStatus,
    },

    /// Store unavailable or a call failed in a way that is safe to retry
    #[error("transient error: {0}")]
    Transient(String),

    /// A write sequence failed part way
    #[error("submission failed at {stage} stage: {source}")]
    Submission {
        stage: SubmissionStage,
        #[source]
        source: StoreError,
    },
}

impl From<StoreError> for RegistryError {
    fn from(e: StoreError) -> Self {
        RegistryError::Transient(e.to_string())
    }
}

impl RegistryError {
    pub fn submission(stage: SubmissionStage, source: StoreError) -> Self {
        RegistryError::Submission { stage, source }
    }

    /// True when the signer declined a write
    pub fn is_user_cancelled(&self) -> bool {
        matches!(
            self,
            RegistryError::Submission {
                source: StoreError::Cancelled,
                ..
            }
        )
    }

    /// Whether the same call may succeed if issued again unchanged
    pub fn is_retryable(&self) -> bool {
        match self {
            RegistryError::Transient(_) => true,
            RegistryError::Submission { source, .. } => matches!(
                source,
                StoreError::Unavailable | StoreError::Timeout(_) | StoreError::Io(_)
            ),
            _ => false,
        }
    }

    /// Message suitable for showing to an end user
    pub fn user_message(&self) -> String {
        if self.is_user_cancelled() {
            return "Transaction cancelled by user".to_string();
        }
        match self {
            RegistryError::NotFound(_) => "Record not found".to_string(),
            RegistryError::Authorization { .. } => {
                "Only the record owner can change its status".to_string()
            }
            RegistryError::InvalidTransition { from, .. } => {
                format!("Record is already {}", from)
            }
            RegistryError::Transient(_) => {
                "Store is not reachable right now, please try again".to_string()
            }
            other => format!("Submission failed: {}", other),
        }
    }
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_submission_has_distinct_message() {
        let cancelled = RegistryError::submission(SubmissionStage::Record, StoreError::Cancelled);
        let rejected = RegistryError::submission(
            SubmissionStage::Record,
            StoreError::Rejected("out of gas".to_string()),
        );

        assert!(cancelled.is_user_cancelled());
        assert!(!rejected.is_user_cancelled());
        assert_eq!(cancelled.user_message(), "Transaction cancelled by user");
        assert_ne!(rejected.user_message(), cancelled.user_message());
        assert!(rejected.user_message().contains("out of gas"));
    }

    #[test]
    fn test_retryable() {
        assert!(RegistryError::from(StoreError::Timeout(10)).is_retryable());
        assert!(
            RegistryError::submission(SubmissionStage::Index, StoreError::Unavailable)
                .is_retryable()
        );
        assert!(!RegistryError::NotFound("a".to_string()).is_retryable());
        assert!(
            !RegistryError::submission(SubmissionStage::Index, StoreError::Cancelled)
                .is_retryable()
        );
        // The record body is already written; re-issuing would orphan another one
        assert!(!RegistryError::submission(
            SubmissionStage::Index,
            StoreError::Conflict("lost 9 races".to_string())
        )
        .is_retryable());
    }
}
