// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Middleware module for HTTP request processing
//!
//! Request-lifecycle stages wrapped around the route handlers. Composition
//! order is fixed: the correlation stage runs outside the access log stage so
//! the identifier exists by the time a record is produced.
//!
//! ```text
//! request ─▶ Correlation ─▶ AccessLog ─▶ Timeout ─▶ routes
//! ```

pub mod access_log;
pub mod correlation;

pub use access_log::{
    AccessLog, AccessLogLayer, AccessLogRecord, AccessLogSink, TracingAccessLog,
    UNKNOWN_CORRELATION_ID,
};
pub use correlation::{
    Correlation, CorrelationIdGenerator, CorrelationLayer, REQUEST_ID_HEADER, RequestContext,
};
