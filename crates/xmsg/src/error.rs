// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Error type shared by every xMsg component.
//!
//! Variants follow the failure taxonomy of the fabric:
//! configuration errors fail fast at parse time, transport errors are
//! recovered by the failover loop, protocol errors are hard rejections,
//! and state errors never leave the local process.

use std::io;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by xMsg components.
#[derive(Debug, Error)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Topic could not be built (wildcard domain, reserved separator, ...).
    #[error("malformed topic: {0}")]
    MalformedTopic(String),
    /// UDL string could not be parsed.
    #[error("invalid UDL: {0}")]
    InvalidUdl(String),
    /// Invalid runtime configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Underlying socket error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// An operation did not complete in time.
    #[error("timeout: {0}")]
    Timeout(String),
    /// Transport-level failure (peer vanished, frame too large, ...).
    #[error("transport error: {0}")]
    Transport(String),

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Peer sent something that does not follow the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Name server refused the connection (wrong password, version, ...).
    #[error("rejected by server (code {code}): {message}")]
    Rejected {
        /// Error code sent by the server.
        code: i32,
        /// Human-readable reason sent by the server.
        message: String,
    },
    /// Registrar answered with a non-success status string.
    #[error("registrar error: {0}")]
    Registrar(String),
    /// Message payload could not be encoded or decoded.
    #[error("payload error: {0}")]
    Payload(String),

    // ========================================================================
    // State Errors
    // ========================================================================
    /// Operation not valid in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Operation not defined for this kind of object.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    /// Object was already closed.
    #[error("{0} is closed")]
    Closed(&'static str),

    // ========================================================================
    // Aggregated Errors
    // ========================================================================
    /// Every failover candidate failed; `source` is the last failure.
    #[error("could not connect to any of {attempts} server(s): {source}")]
    ConnectFailed {
        /// Number of candidates tried.
        attempts: usize,
        /// Failure of the last candidate tried.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// True for errors that mean the remote side actively refused us.
    ///
    /// Failover does not retry a candidate that answered this way.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::Rejected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_rejected() {
        let err = Error::Rejected {
            code: 4,
            message: "wrong password".into(),
        };
        assert!(err.to_string().contains("code 4"));
        assert!(err.to_string().contains("wrong password"));
        assert!(err.is_rejection());
    }

    #[test]
    fn test_connect_failed_keeps_source() {
        let err = Error::ConnectFailed {
            attempts: 3,
            source: Box::new(Error::Timeout("multicast".into())),
        };
        assert!(err.to_string().contains("3 server(s)"));
        assert!(err.to_string().contains("multicast"));
        assert!(!err.is_rejection());
    }

    #[test]
    fn test_io_conversion() {
        let err: Error = io::Error::new(io::ErrorKind::ConnectionRefused, "refused").into();
        assert!(matches!(err, Error::Io(_)));
    }
}
