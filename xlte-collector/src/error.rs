//! Error taxonomy (§7): typed enums for everything a caller might act on,
//! `anyhow` only at task-join/`main` boundaries.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnError {
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("connection closed")]
    ConnClosed,
    #[error("connection I/O error: {0}")]
    ConnIO(String),
    #[error("reply name mismatch: expected {expected}, got {got}")]
    ReplyMismatch { expected: String, got: String },
}

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("parse error at line {line}: {reason}")]
    Parse { line: i64, reason: String },
    #[error("loss of sync: {0} entries without a sync event")]
    Los(usize),
}

#[derive(Debug, Error)]
#[error("log error at t={tau:?}: {reason}")]
pub struct LogError {
    pub tau: Option<f64>,
    pub reason: String,
}

impl LogError {
    pub fn new(tau: Option<f64>, reason: impl Into<String>) -> Self {
        LogError { tau, reason: reason.into() }
    }

    pub fn internal(tau: Option<f64>, cause: impl std::fmt::Display) -> Self {
        LogError { tau, reason: format!("internal failure: {cause}") }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid rotate-spec {0:?}: {1}")]
    BadRotateSpec(String, String),
    #[error("invalid log-spec {0:?}: {1}")]
    BadLogSpec(String, String),
    #[error("too many non-sync entries per sync period: {got} > LOS_window ({limit})")]
    TooManySpecsPerSyncPeriod { got: usize, limit: usize },
}
