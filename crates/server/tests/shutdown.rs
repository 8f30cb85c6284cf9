// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Integration tests for the shutdown orchestrator

mod fixtures;

use std::time::{Duration, Instant};

use axum::http::StatusCode;
use fixtures::{shutdown_config, start_server};
use server::{
    LivenessState, Server, ServerConfig, ServerError, ServerPhase, ShutdownConfig,
    config::{Environment, ServerPort},
};
use tokio::net::TcpStream;

#[tokio::test]
async fn health_reports_ready_while_serving() {
    let server = start_server(
        ServerConfig::for_testing(),
        shutdown_config(Duration::from_secs(2)),
        Duration::ZERO,
    )
    .await;

    let response = reqwest::get(server.url("/health"))
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(server.handle.liveness().state(), LivenessState::Ready);

    server.handle.shutdown();
    server.handle.join().await.expect("Server failed to stop");
}

#[tokio::test]
async fn drain_lets_slow_requests_finish() {
    let mut server = start_server(
        ServerConfig::for_testing(),
        shutdown_config(Duration::from_secs(3)),
        Duration::from_millis(200),
    )
    .await;

    let client = reqwest::Client::new();
    let requests: Vec<_> = (0..5)
        .map(|_| {
            let request = client.get(server.url("/slow")).send();
            tokio::spawn(async move { request.await?.text().await })
        })
        .collect();
    server.wait_entered(5).await;

    server.handle.shutdown();
    assert_eq!(
        server.handle.wait_for_phase(ServerPhase::Stopped).await,
        ServerPhase::Stopped
    );
    // Stopped is published only after the slowest handler returned
    assert_eq!(server.completed(), 5);
    assert!(!server.handle.liveness().is_ready());

    for request in requests {
        assert_eq!(request.await.unwrap().expect("Request failed"), "done");
    }
    assert_eq!(server.sink.records_for("/slow").len(), 5);
    assert!(
        server
            .sink
            .records_for("/slow")
            .iter()
            .all(|record| record.status == Some(StatusCode::OK))
    );

    server.handle.join().await.expect("Server failed to stop");
}

#[tokio::test]
async fn drain_deadline_force_closes_hung_request() {
    let mut server = start_server(
        ServerConfig::for_testing(),
        shutdown_config(Duration::from_millis(200)),
        Duration::ZERO,
    )
    .await;

    let request = tokio::spawn(reqwest::get(server.url("/hang")));
    server.wait_entered(1).await;

    let started = Instant::now();
    server.handle.shutdown();
    server.handle.wait_for_phase(ServerPhase::Stopped).await;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_secs(2), "drain took {elapsed:?}");
    assert!(request.await.unwrap().is_err());

    let records = server.sink.records_for("/hang");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, None);
    assert!(!records[0].correlation_id.is_empty());

    // a drain that ends in forced closure is not fatal
    server.handle.join().await.expect("Server failed to stop");
}

#[tokio::test]
async fn force_close_skips_the_rest_of_the_deadline() {
    let mut server = start_server(
        ServerConfig::for_testing(),
        shutdown_config(Duration::from_secs(60)),
        Duration::ZERO,
    )
    .await;

    let request = tokio::spawn(reqwest::get(server.url("/hang")));
    server.wait_entered(1).await;

    server.handle.shutdown();
    server.handle.wait_for_phase(ServerPhase::Draining).await;
    server.handle.force_close();

    tokio::time::timeout(
        Duration::from_secs(5),
        server.handle.wait_for_phase(ServerPhase::Stopped),
    )
    .await
    .expect("forced close did not stop the server");
    assert!(request.await.unwrap().is_err());
    server.handle.join().await.expect("Server failed to stop");
}

#[tokio::test]
async fn listener_refuses_connections_after_stop() {
    let mut server = start_server(
        ServerConfig::for_testing(),
        shutdown_config(Duration::from_secs(2)),
        Duration::ZERO,
    )
    .await;
    let addr = server.handle.local_addr();

    server.handle.shutdown();
    server.handle.wait_for_phase(ServerPhase::Stopped).await;

    assert!(TcpStream::connect(addr).await.is_err());
    assert_eq!(server.handle.liveness().state(), LivenessState::Draining);
    server.handle.join().await.expect("Server failed to stop");
}

#[tokio::test]
async fn bind_conflict_is_fatal() {
    let running = start_server(
        ServerConfig::for_testing(),
        shutdown_config(Duration::from_secs(2)),
        Duration::ZERO,
    )
    .await;

    let mut config = ServerConfig::for_testing();
    config.port = ServerPort::new(running.handle.local_addr().port(), Environment::Testing)
        .expect("Failed to build port");

    let result = Server::new(config, ShutdownConfig::default())
        .expect("Failed to create server")
        .run_for_testing()
        .await;
    assert!(matches!(result, Err(ServerError::Bind { .. })));

    running.handle.shutdown();
    running.handle.join().await.expect("Server failed to stop");
}
