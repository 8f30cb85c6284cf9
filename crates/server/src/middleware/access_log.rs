// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Access log stage
//!
//! Emits exactly one [`AccessLogRecord`] per request once the wrapped service
//! has produced a response, or once the request future is dropped because the
//! connection went away. Emission lives in a drop guard so the aborted path
//! cannot skip it.

use std::{
    fmt,
    future::Future,
    io,
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::{Duration, Instant},
};

use axum::{
    extract::ConnectInfo,
    http::{Method, Request, Response, StatusCode, header::USER_AGENT},
};
use tower::{Layer, Service};
use tracing::{debug, info};

use super::correlation::RequestContext;
use crate::metrics;

/// Correlation id logged when the correlation stage did not run
pub const UNKNOWN_CORRELATION_ID: &str = "unknown";

/// One line of the access log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessLogRecord {
    /// Correlation identifier, or [`UNKNOWN_CORRELATION_ID`]
    pub correlation_id: String,
    /// Request method
    pub method: Method,
    /// Request path, without the query string
    pub path: String,
    /// Peer address of the connection, when known
    pub remote_addr: Option<SocketAddr>,
    /// `User-Agent` header, empty when absent
    pub user_agent: String,
    /// Response status; `None` when the request was aborted before a response existed
    pub status: Option<StatusCode>,
    /// Time from entering the stage until the record was emitted
    pub latency: Duration,
}

impl fmt::Display for AccessLogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} ", self.correlation_id, self.method, self.path)?;
        match self.remote_addr {
            Some(addr) => write!(f, "{addr}")?,
            None => f.write_str("-")?,
        }
        write!(f, " {}", self.user_agent)
    }
}

/// Destination for access log records
///
/// Errors are reported back to the stage, which discards them: a broken sink
/// never changes what the client receives.
pub trait AccessLogSink: Send + Sync + 'static {
    /// Write one record
    ///
    /// # Errors
    ///
    /// Returns an error when the record could not be written.
    fn write(&self, record: &AccessLogRecord) -> io::Result<()>;
}

impl<K: AccessLogSink + ?Sized> AccessLogSink for Arc<K> {
    fn write(&self, record: &AccessLogRecord) -> io::Result<()> {
        (**self).write(record)
    }
}

/// Sink that turns each record into a structured `tracing` event
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAccessLog;

impl AccessLogSink for TracingAccessLog {
    fn write(&self, record: &AccessLogRecord) -> io::Result<()> {
        let latency_ms = u64::try_from(record.latency.as_millis()).unwrap_or(u64::MAX);
        info!(
            target: "access_log",
            request_id = %record.correlation_id,
            method = %record.method,
            path = %record.path,
            remote_addr = ?record.remote_addr,
            user_agent = %record.user_agent,
            status = record.status.map(|status| status.as_u16()),
            latency_ms,
            "{record}"
        );
        Ok(())
    }
}

/// Layer installing the access log stage
#[derive(Debug)]
pub struct AccessLogLayer<K> {
    sink: Arc<K>,
}

impl<K> AccessLogLayer<K> {
    /// Create the layer writing to `sink`
    pub fn new(sink: K) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    /// Create the layer from a sink that is already shared
    pub fn from_shared(sink: Arc<K>) -> Self {
        Self { sink }
    }
}

impl<K> Clone for AccessLogLayer<K> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
        }
    }
}

impl<S, K> Layer<S> for AccessLogLayer<K> {
    type Service = AccessLog<S, K>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessLog {
            inner,
            sink: Arc::clone(&self.sink),
        }
    }
}

/// Service wrapper that records every request it sees
#[derive(Debug)]
pub struct AccessLog<S, K> {
    inner: S,
    sink: Arc<K>,
}

impl<S: Clone, K> Clone for AccessLog<S, K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            sink: Arc::clone(&self.sink),
        }
    }
}

impl<S, K, ReqBody, ResBody> Service<Request<ReqBody>> for AccessLog<S, K>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    K: AccessLogSink,
    ReqBody: 'static,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let mut pending = PendingRecord::start(&request, Arc::clone(&self.sink));
        let future = self.inner.call(request);

        Box::pin(async move {
            let result = future.await;
            if let Ok(response) = &result {
                pending.status = Some(response.status());
            }
            drop(pending);
            result
        })
    }
}

/// Record under construction; written to the sink when dropped
struct PendingRecord<K: AccessLogSink> {
    correlation_id: String,
    method: Method,
    path: String,
    remote_addr: Option<SocketAddr>,
    user_agent: String,
    status: Option<StatusCode>,
    started: Instant,
    sink: Arc<K>,
}

impl<K: AccessLogSink> PendingRecord<K> {
    fn start<B>(request: &Request<B>, sink: Arc<K>) -> Self {
        let correlation_id = request
            .extensions()
            .get::<RequestContext>()
            .map_or(UNKNOWN_CORRELATION_ID, RequestContext::correlation_id)
            .to_owned();
        let remote_addr = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let user_agent = request
            .headers()
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_owned();

        Self {
            correlation_id,
            method: request.method().clone(),
            path: request.uri().path().to_owned(),
            remote_addr,
            user_agent,
            status: None,
            started: Instant::now(),
            sink,
        }
    }
}

impl<K: AccessLogSink> Drop for PendingRecord<K> {
    fn drop(&mut self) {
        let record = AccessLogRecord {
            correlation_id: std::mem::take(&mut self.correlation_id),
            method: std::mem::take(&mut self.method),
            path: std::mem::take(&mut self.path),
            remote_addr: self.remote_addr,
            user_agent: std::mem::take(&mut self.user_agent),
            status: self.status,
            latency: self.started.elapsed(),
        };

        let status = record
            .status
            .map_or_else(|| "aborted".to_owned(), |status| status.as_u16().to_string());
        metrics::record_request(record.method.as_str(), &status);

        if let Err(error) = self.sink.write(&record) {
            debug!(%error, request_id = %record.correlation_id, "access log sink rejected record");
        }
    }
}
