//! HTTP client error types

use std::{error::Error as _, io, time::Duration};

use thiserror::Error;

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, HttpError>;

/// HTTP client errors
#[derive(Debug, Error)]
pub enum HttpError {
    /// URL cannot be resolved to scheme, host and port
    #[error("Invalid URL configuration: {0}")]
    Configuration(String),

    /// Method outside the supported set
    #[error("Unsupported HTTP method: {0}")]
    UnsupportedMethod(String),

    /// Content-Type without a body encoding rule
    #[error("Unexpected Content-Type: {0}")]
    UnsupportedContentType(String),

    /// Header name/value or request line rejected before sending
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Body serialization or response decoding failed
    #[error("JSON serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TCP connect failed
    #[error("Failed to connect to {destination}: {source}")]
    Connect {
        destination: String,
        #[source]
        source: io::Error,
    },

    /// TLS setup or handshake failed
    #[error("TLS error: {0}")]
    Tls(String),

    /// Connect or socket wait exceeded its budget
    #[error("{phase} timed out after {after:?}")]
    Timeout { phase: &'static str, after: Duration },

    /// No pool slot became free in time
    #[error("Timed out after {0:?} waiting for a pooled connection")]
    PoolTimeout(Duration),

    /// Protocol or connection failure reported by hyper
    #[error("Transport failure: {0}")]
    Transport(#[from] hyper::Error),

    /// Raw I/O failure on an established connection
    #[error("I/O failure: {0}")]
    Io(#[from] io::Error),

    /// Peer closed the connection without sending a status line
    #[error("No response from {url}")]
    NoResponse { url: String },

    /// Retry limit exceeded
    #[error("Retry limit exceeded after {attempts} attempts: {source}")]
    RetryLimitExceeded {
        attempts: u32,
        #[source]
        source: Box<HttpError>,
    },

    /// Client or pool already shut down
    #[error("HTTP client pool is closed")]
    Closed,
}

impl HttpError {
    /// Check if error is retryable
    ///
    /// Only failures on an already established connection qualify. Connect
    /// refusals, name resolution, TLS and timeouts are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            HttpError::NoResponse { .. } => true,
            HttpError::Io(e) => is_transient_io(e),
            HttpError::Transport(e) => {
                if e.is_incomplete_message() || e.is_canceled() || e.is_closed() {
                    return true;
                }
                // hyper wraps socket errors; walk the chain for the io cause
                let mut cause = e.source();
                while let Some(err) = cause {
                    if let Some(io) = err.downcast_ref::<io::Error>() {
                        return is_transient_io(io);
                    }
                    cause = err.source();
                }
                false
            }
            _ => false,
        }
    }

    /// Whether the peer never answered, directly or after exhausting retries
    pub fn is_no_response(&self) -> bool {
        match self {
            HttpError::NoResponse { .. } => true,
            HttpError::RetryLimitExceeded { source, .. } => source.is_no_response(),
            _ => false,
        }
    }

    /// Errors raised before any network activity
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            HttpError::Configuration(_)
                | HttpError::UnsupportedMethod(_)
                | HttpError::UnsupportedContentType(_)
                | HttpError::InvalidRequest(_)
        )
    }
}

fn is_transient_io(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}
