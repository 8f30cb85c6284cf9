// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Correlation stage
//!
//! Gives every request a correlation identifier. An inbound `X-Request-Id` is
//! reused verbatim; otherwise one is generated. The identifier is stored in the
//! request's [`RequestContext`] and mirrored on the response header.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
    time::{SystemTime, UNIX_EPOCH},
};

use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, Response};
use tower::{Layer, Service};

use crate::config::RequestIdFormat;

/// Header carrying the correlation identifier in both directions
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Last timestamp identifier handed out in this process
static LAST_TIMESTAMP_ID: AtomicU64 = AtomicU64::new(0);

/// Per-request scope created by the correlation stage
///
/// Stored in the request extensions; downstream stages read it but never replace it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    correlation_id: Arc<str>,
    header: Option<HeaderValue>,
}

impl RequestContext {
    /// Context for an identifier supplied by the client; echoed byte for byte
    fn inbound(value: &HeaderValue) -> Self {
        Self {
            correlation_id: String::from_utf8_lossy(value.as_bytes()).into(),
            header: Some(value.clone()),
        }
    }

    fn generated(correlation_id: String) -> Self {
        Self {
            header: HeaderValue::from_str(&correlation_id).ok(),
            correlation_id: correlation_id.into(),
        }
    }

    /// Identifier tying together every log line for this request
    ///
    /// Bytes of an inbound identifier that are not UTF-8 are replaced with U+FFFD.
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

/// Source of identifiers for requests that arrive without one
#[derive(Debug, Clone)]
pub enum CorrelationIdGenerator {
    /// Random UUID v4
    Uuid,
    /// Unix-epoch nanoseconds, bumped so that no two calls in the process return the same value
    Timestamp,
}

impl CorrelationIdGenerator {
    /// UUID v4 generator
    pub fn uuid() -> Self {
        Self::Uuid
    }

    /// Strictly increasing nanosecond timestamp generator
    pub fn timestamp() -> Self {
        Self::Timestamp
    }

    /// Produce a fresh identifier
    pub fn next_id(&self) -> String {
        match self {
            Self::Uuid => uuid::Uuid::new_v4().to_string(),
            Self::Timestamp => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_or(0, |elapsed| {
                        u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
                    });
                let previous = LAST_TIMESTAMP_ID
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                        Some(now.max(last.saturating_add(1)))
                    })
                    .unwrap_or_else(|current| current);
                now.max(previous.saturating_add(1)).to_string()
            }
        }
    }
}

impl From<RequestIdFormat> for CorrelationIdGenerator {
    fn from(format: RequestIdFormat) -> Self {
        match format {
            RequestIdFormat::Uuid => Self::uuid(),
            RequestIdFormat::Timestamp => Self::timestamp(),
        }
    }
}

/// Inbound identifier, if the client sent a non-empty one
fn inbound_correlation_id(headers: &HeaderMap) -> Option<&HeaderValue> {
    headers
        .get(REQUEST_ID_HEADER)
        .filter(|value| !value.is_empty())
}

/// Layer installing the correlation stage
#[derive(Debug, Clone)]
pub struct CorrelationLayer {
    generator: CorrelationIdGenerator,
}

impl CorrelationLayer {
    /// Create the layer with the given identifier generator
    pub fn new(generator: CorrelationIdGenerator) -> Self {
        Self { generator }
    }
}

impl<S> Layer<S> for CorrelationLayer {
    type Service = Correlation<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Correlation {
            inner,
            generator: self.generator.clone(),
        }
    }
}

/// Service wrapper that assigns and propagates the correlation identifier
#[derive(Debug, Clone)]
pub struct Correlation<S> {
    inner: S,
    generator: CorrelationIdGenerator,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for Correlation<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ReqBody: 'static,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<ReqBody>) -> Self::Future {
        let context = if let Some(existing) = request.extensions().get::<RequestContext>() {
            existing.clone()
        } else {
            let context = match inbound_correlation_id(request.headers()) {
                Some(inbound) => RequestContext::inbound(inbound),
                None => RequestContext::generated(self.generator.next_id()),
            };
            request.extensions_mut().insert(context.clone());
            context
        };

        let header = context.header;
        let future = self.inner.call(request);

        Box::pin(async move {
            let mut response = future.await?;
            if let Some(header) = header {
                response.headers_mut().insert(REQUEST_ID_HEADER, header);
            }
            Ok(response)
        })
    }
}
