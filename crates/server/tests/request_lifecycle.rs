// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Integration tests for the correlation and access log stages

mod fixtures;

use std::{collections::HashSet, time::Duration};

use axum::http::{Method, StatusCode};
use fixtures::{shutdown_config, start_server};
use server::{ServerConfig, config::TimeoutSeconds};

const REQUEST_ID: &str = "x-request-id";

#[tokio::test]
async fn inbound_request_id_is_echoed_and_logged() {
    let server = start_server(
        ServerConfig::for_testing(),
        shutdown_config(Duration::from_secs(2)),
        Duration::ZERO,
    )
    .await;

    let response = reqwest::Client::new()
        .get(server.url("/hello"))
        .header(REQUEST_ID, "abc")
        .header("user-agent", "lifecycle-test")
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[REQUEST_ID], "abc");
    assert_eq!(response.text().await.unwrap(), "Hello, World!\n");

    let records = server.sink.records_for("/hello");
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.correlation_id, "abc");
    assert_eq!(record.method, Method::GET);
    assert_eq!(record.user_agent, "lifecycle-test");
    assert_eq!(record.status, Some(StatusCode::OK));
    assert_eq!(
        record.remote_addr.map(|addr| addr.ip()),
        Some(server.handle.local_addr().ip())
    );

    server.handle.shutdown();
    server.handle.join().await.expect("Server failed to stop");
}

#[tokio::test]
async fn generated_request_ids_are_distinct() {
    let server = start_server(
        ServerConfig::for_testing(),
        shutdown_config(Duration::from_secs(2)),
        Duration::ZERO,
    )
    .await;

    let client = reqwest::Client::new();
    let requests: Vec<_> = (0..16)
        .map(|_| {
            let request = client.get(server.url("/hello")).send();
            tokio::spawn(async move {
                let response = request.await?;
                Ok::<_, reqwest::Error>(response.headers()[REQUEST_ID].to_str().unwrap().to_owned())
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for request in requests {
        let id = request.await.unwrap().expect("Request failed");
        assert!(!id.is_empty());
        ids.insert(id);
    }
    assert_eq!(ids.len(), 16);

    let logged: HashSet<_> = server
        .sink
        .records_for("/hello")
        .into_iter()
        .map(|record| record.correlation_id)
        .collect();
    assert_eq!(logged, ids);

    server.handle.shutdown();
    server.handle.join().await.expect("Server failed to stop");
}

#[tokio::test]
async fn unknown_route_is_not_found_and_logged() {
    let server = start_server(
        ServerConfig::for_testing(),
        shutdown_config(Duration::from_secs(2)),
        Duration::ZERO,
    )
    .await;

    let response = reqwest::get(server.url("/nowhere"))
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.headers().contains_key(REQUEST_ID));

    let records = server.sink.records_for("/nowhere");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, Some(StatusCode::NOT_FOUND));

    server.handle.shutdown();
    server.handle.join().await.expect("Server failed to stop");
}

#[tokio::test]
async fn write_timeout_returns_request_timeout() {
    let mut config = ServerConfig::for_testing();
    config.write_timeout_seconds = TimeoutSeconds::new(1).expect("Failed to build timeout");

    let server = start_server(
        config,
        shutdown_config(Duration::from_secs(2)),
        Duration::from_secs(10),
    )
    .await;

    let response = reqwest::Client::new()
        .get(server.url("/slow"))
        .header(REQUEST_ID, "too-slow")
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    assert_eq!(response.headers()[REQUEST_ID], "too-slow");

    let records = server.sink.records_for("/slow");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, Some(StatusCode::REQUEST_TIMEOUT));

    server.handle.shutdown();
    server.handle.join().await.expect("Server failed to stop");
}
