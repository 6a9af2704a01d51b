//! Error types for RankRelay.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Codex error: {0}")]
    Codex(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Storage error: {0}")]
    Db(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Short stable tag for the error variant, used in logs and error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::BadRequest(_) => "bad_request",
            Error::Upstream(_) => "upstream",
            Error::Codex(_) => "codex",
            Error::Model(_) => "model",
            Error::Db(_) => "db",
            Error::Http(_) => "http",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Internal(_) => "internal",
        }
    }

    /// HTTP status a client should see for this error. Client mistakes map
    /// to 400, unreachable or misbehaving search APIs to 502, everything
    /// else to 500.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::BadRequest(_) | Error::Json(_) => 400,
            Error::Upstream(_) => 502,
            _ => 500,
        }
    }
}
