// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! HTTP request handlers module
//!
//! Health reporting plus the canned responses served by the registry.

use axum::{
    extract::State,
    http::{HeaderName, HeaderValue, StatusCode, header},
    response::IntoResponse,
};

use crate::state::ServerState;

const JSON_AS_TEXT_BODY: &str = r#"{"status":"ok"}"#;

/// Health check endpoint handler
///
/// `204 No Content` while the process takes traffic, `503 Service Unavailable`
/// before startup completes and for the whole drain.
pub async fn health_handler(State(state): State<ServerState>) -> StatusCode {
    if state.liveness().is_ready() {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Greeting endpoint
pub async fn hello_handler() -> &'static str {
    "Hello, World!\n"
}

/// JSON payload deliberately served as plain text
pub async fn json_as_text_handler() -> impl IntoResponse {
    (
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            ),
            (
                HeaderName::from_static("x-content-type-options"),
                HeaderValue::from_static("nosniff"),
            ),
        ],
        JSON_AS_TEXT_BODY,
    )
}

/// Fallback for paths with no registered route
pub async fn not_found_handler() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}
