// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0
#![allow(dead_code)]

//! Server fixtures
//!
//! Starts servers whose registry adds `/slow` and `/hang` to the default
//! routes, and records every access log line in memory.

use std::{
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::routing::get;
use server::{
    AccessLogRecord, AccessLogSink, Server, ServerConfig, ServerHandle, ServerPhase,
    ShutdownConfig, routes::create_routes,
};
use tokio::sync::mpsc;

/// Access log sink that keeps every record
#[derive(Debug, Default)]
pub struct CapturingSink {
    records: Mutex<Vec<AccessLogRecord>>,
}

impl CapturingSink {
    /// Snapshot of the records written so far
    pub fn records(&self) -> Vec<AccessLogRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Records for one request path
    pub fn records_for(&self, path: &str) -> Vec<AccessLogRecord> {
        self.records()
            .into_iter()
            .filter(|record| record.path == path)
            .collect()
    }
}

impl AccessLogSink for CapturingSink {
    fn write(&self, record: &AccessLogRecord) -> io::Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// A running test server and the probes attached to its routes
#[derive(Debug)]
pub struct TestServer {
    /// Control handle of the running server
    pub handle: ServerHandle,
    /// Every access record written by the server
    pub sink: Arc<CapturingSink>,
    /// Receives one message each time `/slow` or `/hang` is entered
    pub entered: mpsc::UnboundedReceiver<()>,
    /// Number of `/slow` handlers that ran to completion
    pub completed: Arc<AtomicUsize>,
}

impl TestServer {
    /// Base URL of the server
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.handle.local_addr())
    }

    /// Wait until `count` handlers have been entered
    pub async fn wait_entered(&mut self, count: usize) {
        for _ in 0..count {
            self.entered.recv().await.unwrap();
        }
    }

    /// `/slow` handlers that finished
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

/// Drain and force deadlines suitable for tests
pub fn shutdown_config(graceful: Duration) -> ShutdownConfig {
    ShutdownConfig {
        graceful_timeout: graceful,
        force_timeout: Duration::from_secs(2),
    }
}

/// Start a server with `/slow` sleeping for `slow_delay`
pub async fn start_server(
    config: ServerConfig,
    shutdown_config: ShutdownConfig,
    slow_delay: Duration,
) -> TestServer {
    let sink = Arc::new(CapturingSink::default());
    let completed = Arc::new(AtomicUsize::new(0));
    let (entered_tx, entered) = mpsc::unbounded_channel();

    let slow_entered = entered_tx.clone();
    let slow_completed = Arc::clone(&completed);
    let routes = create_routes()
        .route(
            "/slow",
            get(move || {
                let entered = slow_entered.clone();
                let completed = Arc::clone(&slow_completed);
                async move {
                    let _ = entered.send(());
                    tokio::time::sleep(slow_delay).await;
                    completed.fetch_add(1, Ordering::SeqCst);
                    "done"
                }
            }),
        )
        .route(
            "/hang",
            get(move || {
                let entered = entered_tx.clone();
                async move {
                    let _ = entered.send(());
                    std::future::pending::<&'static str>().await
                }
            }),
        );

    let mut handle = Server::with_routes(config, shutdown_config, routes, Arc::clone(&sink))
        .expect("Failed to create server")
        .run_for_testing()
        .await
        .expect("Failed to start test server");
    handle.wait_for_phase(ServerPhase::Serving).await;

    TestServer {
        handle,
        sink,
        entered,
        completed,
    }
}
