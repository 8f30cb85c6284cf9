// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Error handling module
//!
//! Errors that end the server process. Everything a client can observe is
//! produced by the route handlers themselves; the middleware stages never fail.

use std::net::SocketAddr;

use thiserror::Error;

/// Fatal errors raised while starting, running or stopping the server
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration validation errors
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Network binding errors
    #[error("Failed to bind to {address}: {source}")]
    Bind {
        /// Socket address that failed to bind
        address: SocketAddr,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Server startup errors
    #[error("Server startup failed: {source}")]
    Startup {
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Termination signal handlers could not be installed
    #[error("Failed to register signal handler: {source}")]
    Signal {
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Connections survived the forced close at the end of a drain
    #[error(
        "Server shutdown failed: {remaining} connection(s) still open {timeout_seconds}s after forced close"
    )]
    Shutdown {
        /// Connections that were still tracked when the force timeout expired
        remaining: usize,
        /// Force timeout that elapsed, in seconds
        timeout_seconds: u64,
    },

    /// Task join errors for async operations
    #[error("Task join error: {source}")]
    TaskJoin {
        /// Underlying tokio join error
        #[source]
        source: tokio::task::JoinError,
    },
}

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

impl From<tokio::task::JoinError> for ServerError {
    fn from(source: tokio::task::JoinError) -> Self {
        Self::TaskJoin { source }
    }
}
