//! Errors shared by the endpoints and the gateway.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Rejected configuration value (env var, ICE server url, limits).
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown role '{0}'")]
    UnknownRole(String),

    #[error("unknown call state '{0}'")]
    UnknownState(String),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }
}
