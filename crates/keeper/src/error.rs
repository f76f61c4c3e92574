//! Keeper error types.

use crate::types::BackendKind;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by backend adapters and keepers
#[derive(Debug, Error)]
pub enum KeeperError {
    /// Session could not be established or validated
    #[error("[{kind}] connection failed: {message}")]
    Connection { kind: BackendKind, message: String },

    /// Keep-alive write or ping failed
    #[error("[{kind}] keep-alive failed: {message}")]
    Sustain { kind: BackendKind, message: String },

    /// Retention pruning failed after a successful write
    #[error("[{kind}] cleanup failed: {message}")]
    Cleanup { kind: BackendKind, message: String },

    /// Handle could not be closed
    #[error("[{kind}] release failed: {message}")]
    Release { kind: BackendKind, message: String },

    /// Operation exceeded its time bound
    #[error("[{kind}] {operation} timed out after {after:?}")]
    Timeout {
        kind: BackendKind,
        operation: &'static str,
        after: Duration,
    },
}

impl KeeperError {
    pub fn connection(kind: BackendKind, msg: impl fmt::Display) -> Self {
        KeeperError::Connection {
            kind,
            message: msg.to_string(),
        }
    }

    pub fn sustain(kind: BackendKind, msg: impl fmt::Display) -> Self {
        KeeperError::Sustain {
            kind,
            message: msg.to_string(),
        }
    }

    pub fn cleanup(kind: BackendKind, msg: impl fmt::Display) -> Self {
        KeeperError::Cleanup {
            kind,
            message: msg.to_string(),
        }
    }

    pub fn release(kind: BackendKind, msg: impl fmt::Display) -> Self {
        KeeperError::Release {
            kind,
            message: msg.to_string(),
        }
    }

    pub fn timeout(kind: BackendKind, operation: &'static str, after: Duration) -> Self {
        KeeperError::Timeout {
            kind,
            operation,
            after,
        }
    }

    /// Backend the error originated from
    pub fn kind(&self) -> BackendKind {
        match self {
            KeeperError::Connection { kind, .. }
            | KeeperError::Sustain { kind, .. }
            | KeeperError::Cleanup { kind, .. }
            | KeeperError::Release { kind, .. }
            | KeeperError::Timeout { kind, .. } => *kind,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, KeeperError::Timeout { .. })
    }
}
