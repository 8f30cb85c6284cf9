// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Routes module
//!
//! This module provides the route registry served behind the request-lifecycle stages.

pub mod handlers;

use axum::{Router, routing::get};
use handlers::{health_handler, hello_handler, json_as_text_handler, not_found_handler};

use crate::{metrics::metrics_handler, state::ServerState};

/// Create application routes
pub fn create_routes() -> Router<ServerState> {
    // Operational endpoints
    let ops_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler));

    let app_routes = Router::new()
        .route("/hello", get(hello_handler))
        .route("/json-as-text", get(json_as_text_handler));

    Router::new()
        .merge(ops_routes)
        .merge(app_routes)
        .fallback(not_found_handler)
}
