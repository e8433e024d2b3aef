//! The error taxonomy for the recording engine.
//!
//! Every fallible path in the crate resolves to one of these variants so
//! that the HTTP transport can map errors to the right response and the
//! writer loop can decide whether a failure is fatal to one transaction or
//! to the whole destination file.

use std::io;

/// Errors produced anywhere in the capture → write → dedup pipeline.
#[derive(thiserror::Error, Debug)]
pub enum RecorderError {
    /// The upstream server could not be reached at all (connect failure,
    /// DNS failure, TLS failure).
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    /// The upstream server did not respond within the configured timeout.
    #[error("upstream timed out after {0} seconds")]
    UpstreamTimeout(u64),

    /// The client disconnected before the capture completed.
    #[error("client disconnected mid-capture")]
    ClientDisconnect,

    /// A write to a WARC file failed (disk full, permission denied, ...).
    #[error("failed to write to {path}: {source}")]
    WriteFailure { path: String, source: io::Error },

    /// The dedup index could not be reached or returned an error.
    #[error("dedup index failure: {0}")]
    IndexFailure(String),

    /// The proxied request head could not be parsed as HTTP/1.1.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// A WARC record failed to parse.
    #[error("failed to parse WARC record: {0}")]
    ParseFailure(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl RecorderError {
    /// Whether this error represents an upstream timeout, used to decide
    /// which status line to hand back to the client before the error is
    /// otherwise consumed.
    pub fn is_timeout(&self) -> bool {
        return matches!(self, Self::UpstreamTimeout(_));
    }
}

impl From<reqwest::Error> for RecorderError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return Self::UpstreamTimeout(0);
        }
        return Self::UpstreamUnreachable(error.to_string());
    }
}

impl From<httparse::Error> for RecorderError {
    fn from(error: httparse::Error) -> Self {
        return Self::MalformedRequest(error.to_string());
    }
}

pub type Result<T, E = RecorderError> = std::result::Result<T, E>;

/// How an `IndexFailure` should be handled: strict treats it like a
/// `WriteFailure` (the transaction is dropped), lenient skips dedup and
/// writes the transaction as a full response without checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexFailureMode {
    Strict,
    #[default]
    Lenient,
}
