// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Server implementation module
//!
//! This module provides the main server struct: router assembly with the
//! request-lifecycle stages, and the shutdown orchestrator that moves the
//! process through `Starting -> Serving -> Draining -> Stopped` using
//! `CancellationToken`s for coordination.

use std::{net::SocketAddr, time::Duration};

use axum::{Router, http::StatusCode};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info, warn};

use crate::{
    config::ServerConfig,
    error::{ServerError, ServerResult},
    liveness::Liveness,
    middleware::{
        AccessLogLayer, AccessLogSink, CorrelationIdGenerator, CorrelationLayer, TracingAccessLog,
    },
    routes::create_routes,
    session::{DrainOutcome, Session, SessionTimeouts},
    state::ServerState,
};

// Server constants
const DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_FORCE_SHUTDOWN_TIMEOUT_SECONDS: u64 = 5;

/// Configuration for server shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Maximum time to wait for open connections before forcing them closed
    pub graceful_timeout: Duration,
    /// Maximum time for force-closed connections to release their resources
    pub force_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            graceful_timeout: Duration::from_secs(DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT_SECONDS),
            force_timeout: Duration::from_secs(DEFAULT_FORCE_SHUTDOWN_TIMEOUT_SECONDS),
        }
    }
}

impl ShutdownConfig {
    /// Take the drain and force deadlines from the server configuration
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            graceful_timeout: config.shutdown_timeout_seconds.value(),
            force_timeout: config.force_timeout_seconds.value(),
        }
    }
}

/// Lifecycle phase published by the orchestrator
///
/// Phases only move forward, so they are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ServerPhase {
    /// Constructed, listener not yet accepting
    Starting,
    /// Accepting connections and serving requests
    Serving,
    /// Listener closed, waiting for open connections
    Draining,
    /// Every connection is gone
    Stopped,
}

/// Main server struct
#[derive(Debug)]
pub struct Server {
    /// Server configuration
    config: ServerConfig,
    /// Application router, wrapped in the request-lifecycle stages
    router: Router,
    /// Liveness flag shared with the health handler
    liveness: Liveness,
    /// Cancellation token for coordinated shutdown
    cancellation_token: CancellationToken,
    /// Cancelled to abandon the drain and close every connection
    force_close: CancellationToken,
    /// Configuration for coordinated shutdown
    shutdown_config: ShutdownConfig,
    /// Current lifecycle phase
    phase: watch::Sender<ServerPhase>,
}

impl Server {
    /// Create new server instance with the default routes and access log
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` if the configuration is invalid.
    pub fn new(config: ServerConfig, shutdown_config: ShutdownConfig) -> ServerResult<Self> {
        Self::with_routes(config, shutdown_config, create_routes(), TracingAccessLog)
    }

    /// Create server with a custom route registry and access log sink
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` if the configuration is invalid.
    pub fn with_routes<K: AccessLogSink>(
        config: ServerConfig,
        shutdown_config: ShutdownConfig,
        routes: Router<ServerState>,
        access_log: K,
    ) -> ServerResult<Self> {
        if shutdown_config.graceful_timeout.is_zero() {
            return Err(ServerError::Config {
                message: "shutdown timeout must be greater than zero".to_string(),
            });
        }

        let liveness = Liveness::new();
        let router = Self::create_router(
            &config,
            routes,
            ServerState::new(liveness.clone()),
            access_log,
        );
        let (phase, _) = watch::channel(ServerPhase::Starting);

        Ok(Self {
            config,
            router,
            liveness,
            cancellation_token: CancellationToken::new(),
            force_close: CancellationToken::new(),
            shutdown_config,
            phase,
        })
    }

    /// Create application router with middleware
    ///
    /// Stages run outermost first: correlation, access log, write timeout.
    fn create_router<K: AccessLogSink>(
        config: &ServerConfig,
        routes: Router<ServerState>,
        state: ServerState,
        access_log: K,
    ) -> Router {
        let middleware = ServiceBuilder::new()
            .layer(CorrelationLayer::new(CorrelationIdGenerator::from(
                config.request_id,
            )))
            .layer(AccessLogLayer::new(access_log))
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                config.write_timeout_seconds.value(),
            ));

        routes.layer(middleware).with_state(state)
    }

    fn session_timeouts(&self) -> SessionTimeouts {
        SessionTimeouts {
            read: self.config.read_timeout_seconds.value(),
            idle: self.config.idle_timeout_seconds.value(),
        }
    }

    /// Run the server until a shutdown signal or request, then drain
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Bind` if unable to bind to the configured address,
    /// `ServerError::Signal` if signal handlers cannot be installed, or
    /// `ServerError::Shutdown` if connections outlive the forced close.
    pub async fn run(self) -> ServerResult<()> {
        let addr = self.config.socket_addr();
        let session = Session::bind(addr, self.session_timeouts())
            .await
            .inspect_err(|e| error!(error = %e, "failed to bind listener"))?;

        let signals = ShutdownSignals::register()
            .inspect_err(|e| error!(error = %e, "failed to install signal handlers"))?;

        info!(
            address = %session.local_addr(),
            environment = %self.config.environment,
            "server starting",
        );

        let signal_task = tokio::spawn(Self::shutdown_signal_handler(
            signals,
            self.cancellation_token.clone(),
            self.force_close.clone(),
        ));

        let result = self.serve(session).await;
        signal_task.abort();
        result
    }

    /// Orchestrate the lifecycle of a bound session
    async fn serve(self, session: Session) -> ServerResult<()> {
        let Self {
            router,
            liveness,
            cancellation_token,
            force_close,
            shutdown_config,
            phase,
            ..
        } = self;

        let mut active = session.start(router, force_close);
        liveness.set_ready();
        phase.send_replace(ServerPhase::Serving);
        info!(
            address = %active.local_addr(),
            liveness = %liveness.state(),
            "server ready"
        );

        cancellation_token.cancelled().await;

        liveness.set_draining();
        phase.send_replace(ServerPhase::Draining);
        info!(
            connections = active.open_connections(),
            deadline_seconds = shutdown_config.graceful_timeout.as_secs_f64(),
            liveness = %liveness.state(),
            "server stopping"
        );

        active.stop_accepting().await?;
        let outcome = active.drain(&shutdown_config).await;
        phase.send_replace(ServerPhase::Stopped);

        match outcome {
            Ok(DrainOutcome::Completed) => {
                info!("server stopped");
                Ok(())
            }
            Ok(DrainOutcome::ForcedClose { remaining }) => {
                warn!(
                    forced_connections = remaining,
                    "server stopped after forcing connections closed"
                );
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "server shutdown failed");
                Err(e)
            }
        }
    }

    /// Handle shutdown signals and trigger coordinated cancellation
    ///
    /// The first SIGINT or SIGTERM cancels `cancellation_token`. A second one,
    /// received while draining, cancels `force_close`.
    async fn shutdown_signal_handler(
        mut signals: ShutdownSignals,
        cancellation_token: CancellationToken,
        force_close: CancellationToken,
    ) {
        tokio::select! {
            signal_name = signals.recv() => {
                warn!("Shutdown signal {} received, draining connections...", signal_name);
                cancellation_token.cancel();
            },
            () = cancellation_token.cancelled() => {
                info!("shutdown requested, listening for a second signal to force close");
            }
        }

        tokio::select! {
            signal_name = signals.recv() => {
                warn!("Shutdown signal {} received again, forcing connections closed", signal_name);
                force_close.cancel();
            },
            () = force_close.cancelled() => {}
        }
    }

    /// Returns a clone of the cancellation token for coordinated shutdown
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Initiates graceful shutdown by cancelling the server's cancellation token
    pub fn shutdown(&self) {
        info!("programmatic shutdown requested");
        self.cancellation_token.cancel();
    }

    /// Liveness flag of this server
    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    /// Subscribe to lifecycle phase changes
    pub fn phase(&self) -> watch::Receiver<ServerPhase> {
        self.phase.subscribe()
    }

    /// Run server for testing without installing signal handlers
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Bind` if unable to bind to the configured address.
    pub async fn run_for_testing(self) -> ServerResult<ServerHandle> {
        let session = Session::bind(self.config.socket_addr(), self.session_timeouts()).await?;

        let handle = ServerHandle {
            addr: session.local_addr(),
            cancellation_token: self.cancellation_token.clone(),
            force_close: self.force_close.clone(),
            liveness: self.liveness.clone(),
            phase: self.phase.subscribe(),
            task: tokio::spawn(self.serve(session)),
        };

        Ok(handle)
    }

    /// Get server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Control handle for a server started with [`Server::run_for_testing`]
#[derive(Debug)]
pub struct ServerHandle {
    addr: SocketAddr,
    cancellation_token: CancellationToken,
    force_close: CancellationToken,
    liveness: Liveness,
    phase: watch::Receiver<ServerPhase>,
    task: JoinHandle<ServerResult<()>>,
}

impl ServerHandle {
    /// Address the server is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Liveness flag of the running server
    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    /// Most recently published phase
    pub fn phase(&self) -> ServerPhase {
        *self.phase.borrow()
    }

    /// Wait until the server has reached at least `target`
    pub async fn wait_for_phase(&mut self, target: ServerPhase) -> ServerPhase {
        let _ = self.phase.wait_for(|phase| *phase >= target).await;
        *self.phase.borrow()
    }

    /// Begin a graceful shutdown, as a first signal would
    pub fn shutdown(&self) {
        self.cancellation_token.cancel();
    }

    /// Abandon the drain and close every connection, as a second signal would
    pub fn force_close(&self) {
        self.force_close.cancel();
    }

    /// Wait for the server task to finish
    ///
    /// # Errors
    ///
    /// Returns the error the server stopped with, or `ServerError::TaskJoin`
    /// if the server task panicked.
    pub async fn join(self) -> ServerResult<()> {
        self.task.await?
    }
}

/// Termination signal streams, registered before the server starts serving
#[derive(Debug)]
struct ShutdownSignals {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    #[cfg(unix)]
    fn register() -> ServerResult<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        let terminate =
            signal(SignalKind::terminate()).map_err(|source| ServerError::Signal { source })?;
        let interrupt =
            signal(SignalKind::interrupt()).map_err(|source| ServerError::Signal { source })?;

        Ok(Self {
            terminate,
            interrupt,
        })
    }

    #[cfg(not(unix))]
    #[allow(clippy::unnecessary_wraps)]
    fn register() -> ServerResult<Self> {
        Ok(Self {})
    }

    /// Wait for the next termination signal
    #[cfg(unix)]
    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.interrupt.recv() => "SIGINT",
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) -> &'static str {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for CTRL+C");
            return std::future::pending().await;
        }
        "CTRL+C"
    }
}
