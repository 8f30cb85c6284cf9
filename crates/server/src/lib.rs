// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! HTTP Server Implementation
//!
//! This crate provides an Axum-based HTTP server that wraps every request in a
//! fixed lifecycle (correlation identifier, then access record) and drains its
//! connections within a deadline when asked to stop.
//!
//! # Module Structure
//!
//! - [`config`]: Server configuration and environment management with hierarchical loading
//! - [`error`]: Fatal startup and shutdown errors
//! - [`liveness`]: Tri-state readiness flag shared by the health handler and the orchestrator
//! - [`middleware`]: Correlation and access log stages
//! - [`metrics`]: Prometheus request and connection metrics
//! - [`routes`]: Route registry and HTTP request handlers
//! - [`server`]: Router assembly, lifecycle phases, and coordinated shutdown
//! - [`session`]: Listener, per-connection tasks, and the bounded drain
//! - [`state`]: Shared application state
//!
//! # Key Features
//!
//! - **Request Correlation**: Inbound `X-Request-Id` reused, otherwise generated, always echoed
//! - **Access Logging**: Exactly one record per request, including aborted ones
//! - **Graceful Shutdown**: Coordinated termination using `CancellationToken` with deadlines
//! - **Health Monitoring**: `/health` reports readiness and flips to unavailable while draining

pub mod config;
pub mod error;
pub mod liveness;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod session;
pub mod state;

pub use config::{Environment, RequestIdFormat, ServerConfig};
pub use error::{ServerError, ServerResult};
pub use liveness::{Liveness, LivenessState};
pub use middleware::{AccessLogRecord, AccessLogSink, RequestContext, TracingAccessLog};
pub use server::{Server, ServerHandle, ServerPhase, ShutdownConfig};
pub use session::DrainOutcome;
pub use state::ServerState;
