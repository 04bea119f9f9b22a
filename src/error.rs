//! Error taxonomy shared by every stage of the engine.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or out-of-bounds input at the hazard boundary.
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    /// The provider handed back geometry we cannot walk.
    #[error("malformed route {route}: {reason}")]
    MalformedRoute { route: usize, reason: String },

    #[error("route {route} has no segments")]
    EmptyRoute { route: usize },

    #[error("no candidate routes to rank")]
    NoCandidates,

    /// Directions provider failed or timed out. Not retried here.
    #[error("directions provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("hazard store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Store(err.to_string())
    }
}
