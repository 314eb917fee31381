//! Error types for the Envoy client
//!
//! This module defines all error types returned by the gateway client,
//! the token services and discovery.

use thiserror::Error;

/// Result type alias for Envoy operations
pub type Result<T> = std::result::Result<T, EnvoyError>;

/// Main error type for Envoy operations
#[derive(Error, Debug)]
pub enum EnvoyError {
    /// Transport-level failure (connect, TLS, timeout, body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The gateway rejected the session or token (HTTP 401)
    #[error("Unauthorized request to {path}")]
    Unauthorized { path: String },

    /// Any other non-success status
    #[error("Unexpected status {status} from {path}")]
    Status { status: u16, path: String },

    /// Response body could not be decoded
    #[error("Decode error on {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// Gateway address is not a usable URL
    #[error("Invalid gateway address: {0}")]
    InvalidAddress(String),

    /// Neither a JWT nor a username/password pair was supplied
    #[error("Missing credentials: a JWT or a username and password are required")]
    MissingCredentials,

    /// Token acquisition from the Enlighten/Entrez services failed
    #[error("Token request failed: {0}")]
    Token(String),

    /// Session establishment with the gateway failed
    #[error("Session error: {0}")]
    Session(String),

    /// Gateway could not be located or identified
    #[error("Discovery failed: {0}")]
    Discovery(String),
}

impl EnvoyError {
    /// Whether the gateway answered with HTTP 401
    pub fn is_unauthorized(&self) -> bool {
        match self {
            Self::Unauthorized { .. } => true,
            Self::Http(e) => e.status() == Some(reqwest::StatusCode::UNAUTHORIZED),
            _ => false,
        }
    }
}
