//! Error taxonomy shared by the query pipeline and the sync engine.
//!
//! Most functions return [`anyhow::Result`]; the variants below are wrapped
//! into `anyhow::Error` where a caller may want to branch on the kind of
//! failure (`err.downcast_ref::<KeysenseError>()`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeysenseError {
    /// The query was empty or whitespace-only.
    #[error("query must not be empty")]
    EmptyQuery,

    /// A record produced no searchable text after normalization.
    #[error("record '{id}' has no embeddable content")]
    EmptyContent { id: String },

    /// The vector index or inference service failed or was unreachable.
    #[error("{service} error: {message}")]
    Dependency { service: String, message: String },

    /// The fingerprint table claims more synced records than the index holds.
    #[error("fingerprint table out of sync with index: {0}")]
    Consistency(String),
}

impl KeysenseError {
    pub fn dependency(service: &str, err: impl std::fmt::Display) -> Self {
        Self::Dependency {
            service: service.to_string(),
            message: err.to_string(),
        }
    }
}

/// Returns true when `err` wraps [`KeysenseError::EmptyContent`].
pub fn is_empty_content(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<KeysenseError>(),
        Some(KeysenseError::EmptyContent { .. })
    )
}
