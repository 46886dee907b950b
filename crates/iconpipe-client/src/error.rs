//! Client error types.
//!
//! These never reach consumers: the `IconSource` boundary folds every
//! variant into `ResolutionOutcome::Transient`.

use thiserror::Error;

/// Errors that can occur while performing one lookup.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid base url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tls configuration error: {0}")]
    TlsConfig(String),

    #[error("invalid tls server name: {0}")]
    ServerName(String),

    #[error("tls handshake failed: {0}")]
    Tls(#[source] std::io::Error),

    #[error("http handshake failed: {0}")]
    Handshake(#[source] hyper::Error),

    #[error("request failed: {0}")]
    Request(#[source] hyper::Error),

    #[error("failed to read response body: {0}")]
    Body(#[source] hyper::Error),

    #[error("failed to build request: {0}")]
    Build(#[from] http::Error),

    #[error(transparent)]
    Config(#[from] iconpipe_core::ConfigError),
}

pub type ClientResult<T> = Result<T, ClientError>;
