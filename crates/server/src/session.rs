// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Listener session
//!
//! Owns the bound socket, the accept loop and one task per client connection.
//! Connections are tracked so that shutdown can wait for them, ask them to
//! finish gracefully, and finally close them by force.

use std::{net::SocketAddr, pin::pin, sync::Arc, time::Duration};

use axum::{Router, extract::ConnectInfo};
use hyper::{Request, body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::watch,
    task::JoinHandle,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tower::ServiceExt;
use tracing::{debug, info, warn};

use crate::{
    error::{ServerError, ServerResult},
    metrics::{self, OpenConnectionGuard},
    server::ShutdownConfig,
};

/// Pause after a failed `accept`
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Per-connection timeouts enforced by the session
#[derive(Debug, Clone, Copy)]
pub struct SessionTimeouts {
    /// Time allowed to receive a full request head
    pub read: Duration,
    /// Time a connection may sit with no request in flight
    pub idle: Duration,
}

/// How a drain ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every connection finished on its own before the deadline
    Completed,
    /// The deadline expired and the remaining connections were closed
    ForcedClose {
        /// Connections still open when the deadline expired
        remaining: usize,
    },
}

/// A bound listener that is not yet accepting
#[derive(Debug)]
pub struct Session {
    listener: TcpListener,
    local_addr: SocketAddr,
    timeouts: SessionTimeouts,
}

impl Session {
    /// Bind the listening socket
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Bind` if the address cannot be bound, or
    /// `ServerError::Startup` if the bound address cannot be read back.
    pub async fn bind(addr: SocketAddr, timeouts: SessionTimeouts) -> ServerResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                address: addr,
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Startup { source })?;

        Ok(Self {
            listener,
            local_addr,
            timeouts,
        })
    }

    /// Address the socket is bound to, with the real port when 0 was requested
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start accepting connections and serving them with `app`
    ///
    /// Cancelling `force_close` drops every open connection immediately.
    pub fn start(self, app: Router, force_close: CancellationToken) -> ActiveSession {
        let tracker = TaskTracker::new();
        let stop_accepting = CancellationToken::new();

        let accept_task = tokio::spawn(accept_loop(
            self.listener,
            app,
            self.timeouts,
            tracker.clone(),
            stop_accepting.clone(),
            force_close.clone(),
        ));

        ActiveSession {
            local_addr: self.local_addr,
            tracker,
            stop_accepting,
            force_close,
            accept_task: Some(accept_task),
        }
    }
}

/// A session whose accept loop is running
#[derive(Debug)]
pub struct ActiveSession {
    local_addr: SocketAddr,
    tracker: TaskTracker,
    stop_accepting: CancellationToken,
    force_close: CancellationToken,
    accept_task: Option<JoinHandle<()>>,
}

impl ActiveSession {
    /// Address the session is serving on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connections currently open
    pub fn open_connections(&self) -> usize {
        self.tracker.len()
    }

    /// Close the listener and ask every connection to finish its current request
    ///
    /// Returns once the listening socket is closed, so new connection attempts
    /// are refused from that point on. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::TaskJoin` if the accept loop panicked.
    pub async fn stop_accepting(&mut self) -> ServerResult<()> {
        self.stop_accepting.cancel();
        if let Some(accept_task) = self.accept_task.take() {
            accept_task.await?;
            debug!(address = %self.local_addr, "listener closed");
        }
        self.tracker.close();
        Ok(())
    }

    /// Wait for open connections to finish, bounded by `config`
    ///
    /// Connections still open after `graceful_timeout`, or as soon as the force
    /// token is cancelled, are closed; their in-flight requests are abandoned.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Shutdown` if connections are still tracked
    /// `force_timeout` after being force-closed.
    pub async fn drain(mut self, config: &ShutdownConfig) -> ServerResult<DrainOutcome> {
        self.stop_accepting().await?;

        let open = self.tracker.len();
        if open > 0 {
            info!(
                connections = open,
                deadline_seconds = config.graceful_timeout.as_secs_f64(),
                "waiting for open connections to finish"
            );
        }

        let drained = tokio::select! {
            biased;
            () = self.tracker.wait() => true,
            () = self.force_close.cancelled() => false,
            () = tokio::time::sleep(config.graceful_timeout) => false,
        };
        if drained {
            return Ok(DrainOutcome::Completed);
        }

        let remaining = self.tracker.len();
        warn!(
            connections = remaining,
            "drain deadline expired, closing remaining connections"
        );
        metrics::record_forced_closures(remaining);
        self.force_close.cancel();

        if tokio::time::timeout(config.force_timeout, self.tracker.wait())
            .await
            .is_err()
        {
            return Err(ServerError::Shutdown {
                remaining: self.tracker.len(),
                timeout_seconds: config.force_timeout.as_secs(),
            });
        }

        Ok(DrainOutcome::ForcedClose { remaining })
    }
}

async fn accept_loop(
    listener: TcpListener,
    app: Router,
    timeouts: SessionTimeouts,
    tracker: TaskTracker,
    stop_accepting: CancellationToken,
    force_close: CancellationToken,
) {
    loop {
        let (stream, remote_addr) = tokio::select! {
            biased;
            () = stop_accepting.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(error) => {
                    warn!(%error, "failed to accept connection");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
            },
        };

        debug!(%remote_addr, "accepted connection");
        tracker.spawn(serve_connection(
            stream,
            remote_addr,
            app.clone(),
            timeouts,
            stop_accepting.clone(),
            force_close.clone(),
        ));
    }
}

/// Counts one request in flight on a connection
struct ActiveRequest(Arc<watch::Sender<usize>>);

impl ActiveRequest {
    fn begin(in_flight: Arc<watch::Sender<usize>>) -> Self {
        in_flight.send_modify(|count| *count += 1);
        Self(in_flight)
    }
}

impl Drop for ActiveRequest {
    fn drop(&mut self) {
        self.0.send_modify(|count| *count = count.saturating_sub(1));
    }
}

/// Resolves once the connection has had no request in flight for `idle`
async fn idle_expired(in_flight: &mut watch::Receiver<usize>, idle: Duration) {
    loop {
        let closed = in_flight.wait_for(|count| *count == 0).await.is_err();
        if closed {
            return std::future::pending().await;
        }
        tokio::select! {
            () = tokio::time::sleep(idle) => return,
            changed = in_flight.changed() => {
                if changed.is_err() {
                    return std::future::pending().await;
                }
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    app: Router,
    timeouts: SessionTimeouts,
    stop_accepting: CancellationToken,
    force_close: CancellationToken,
) {
    let _open = OpenConnectionGuard::new();
    let (in_flight, mut idle) = watch::channel(0_usize);
    let in_flight = Arc::new(in_flight);

    let service = service_fn(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(ConnectInfo(remote_addr));
        let active = ActiveRequest::begin(Arc::clone(&in_flight));
        let app = app.clone();
        async move {
            let response = app.oneshot(request).await;
            drop(active);
            response
        }
    });

    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(timeouts.read)
        .keep_alive(true);
    let mut connection = pin!(builder.serve_connection(TokioIo::new(stream), service));

    let mut closing = false;
    loop {
        tokio::select! {
            result = connection.as_mut() => {
                if let Err(error) = result {
                    debug!(%remote_addr, %error, "connection ended with error");
                }
                break;
            }
            () = force_close.cancelled() => {
                warn!(%remote_addr, "forcing connection closed");
                break;
            }
            () = stop_accepting.cancelled(), if !closing => {
                connection.as_mut().graceful_shutdown();
                closing = true;
            }
            () = idle_expired(&mut idle, timeouts.idle), if !closing => {
                debug!(%remote_addr, "closing idle connection");
                connection.as_mut().graceful_shutdown();
                closing = true;
            }
        }
    }
}
