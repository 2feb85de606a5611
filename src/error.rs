//! Error types for seller onboarding.

use crate::onboarding::model::{Category, DocumentRecord};

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Blob error: {0}")]
    Blob(#[from] BlobError),

    #[error("Onboarding error: {0}")]
    Onboarding(#[from] OnboardingError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Document store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Document already exists: {collection}/{id}")]
    AlreadyExists { collection: String, id: String },

    #[error("Precondition failed on {collection}/{id}: field {field} is already set")]
    PreconditionFailed {
        collection: String,
        id: String,
        field: String,
    },

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Blob upload channel errors.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Upload rejected for {path}: {reason}")]
    Rejected { path: String, reason: String },

    #[error("Blob not found: {0}")]
    NotFound(String),
}

/// Errors surfaced by the onboarding core to its callers.
///
/// Each variant tells the caller what a retry looks like: `Validation` needs a
/// new file, `UploadFailed` can be retried as-is, `Persistence` must retry
/// only the store write via `retry_persistence`.
#[derive(Debug, thiserror::Error)]
pub enum OnboardingError {
    #[error("Invalid file: {reason}")]
    Validation { reason: String },

    #[error("No active seller session, please log in")]
    Unauthenticated,

    #[error("Upload of {category} document failed: {reason}")]
    UploadFailed { category: Category, reason: String },

    #[error("Upload of {category} document was cancelled")]
    UploadCancelled { category: Category },

    #[error("{category} document uploaded but saving it failed: {source}")]
    Persistence {
        category: Category,
        record: DocumentRecord,
        #[source]
        source: StoreError,
    },

    #[error("No uploaded {category} document is waiting to be saved")]
    NothingToPersist { category: Category },

    #[error("Documents missing: {}", format_categories(.missing))]
    IncompleteSubmission { missing: Vec<Category> },

    #[error("Document store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl OnboardingError {
    /// Whether the caller may simply try the same operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UploadFailed { .. } | Self::Persistence { .. } | Self::StoreUnavailable(_)
        )
    }
}

fn format_categories(categories: &[Category]) -> String {
    categories
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
