// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! End-to-end tests of the sink against a mock HTTP intake.

#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use datadog_logs_sink::config::{DatadogConfiguration, SinkConfig};
use datadog_logs_sink::error::{AttemptError, LogEventError};
use datadog_logs_sink::retry::DeliveryOutcome;
use datadog_logs_sink::{DatadogLayer, DatadogSink, Level, LogEvent, SinkBuilder};
use mockito::Matcher;
use serde_json::Value;
use tracing_subscriber::layer::SubscriberExt;

type Reports = Arc<Mutex<Vec<LogEventError>>>;

fn http_config(url: String) -> SinkConfig {
    SinkConfig {
        transport: DatadogConfiguration {
            max_retries: Some(3),
            backoff_unit: Duration::from_millis(1),
            ..DatadogConfiguration::http(url)
        },
        batch_period: Duration::from_secs(3600),
        service: Some("checkout".to_string()),
        tags: vec!["env:test".to_string(), "team:logs".to_string()],
        ..SinkConfig::new("test-api-key")
    }
}

fn start(config: SinkConfig) -> (DatadogSink, Reports) {
    let reports: Reports = Arc::new(Mutex::new(Vec::new()));
    let collected = Arc::clone(&reports);
    let sink = SinkBuilder::new(config)
        .exception_handler(move |err| collected.lock().unwrap().push(err.clone()))
        .start()
        .unwrap();
    (sink, reports)
}

fn event(i: usize) -> LogEvent {
    LogEvent::new(Level::Information, format!("event {i}"))
}

#[tokio::test]
async fn test_small_batch_is_one_request() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v2/logs")
        .match_header("DD-API-KEY", "test-api-key")
        .match_header("Content-Type", "application/json")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#""message":"event 0""#.to_string()),
            Matcher::Regex(r#""message":"event 1""#.to_string()),
            Matcher::Regex(r#""message":"event 2""#.to_string()),
            Matcher::Regex(r#""ddsource":"rust""#.to_string()),
            Matcher::Regex(r#""service":"checkout""#.to_string()),
            Matcher::Regex(r#""ddtags":"env:test,team:logs""#.to_string()),
        ]))
        .with_status(202)
        .expect(1)
        .create_async()
        .await;

    let (sink, reports) = start(http_config(server.url()));
    for i in 0..3 {
        sink.emit(event(i));
    }
    sink.flush().await.unwrap();
    sink.shutdown().await;

    mock.assert_async().await;
    assert!(reports.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_server_errors_exhaust_retries_and_report_once() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v2/logs")
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    let (sink, reports) = start(http_config(server.url()));
    for i in 0..3 {
        sink.emit(event(i));
    }
    sink.flush().await.unwrap();
    sink.shutdown().await;

    mock.assert_async().await;
    let reports = reports.lock().unwrap();
    assert_eq!(reports.len(), 1);
    let LogEventError::CannotSend {
        payload,
        events,
        outcome,
    } = &reports[0]
    else {
        panic!("unexpected report: {}", reports[0]);
    };
    assert_eq!(
        *outcome,
        DeliveryOutcome::Exhausted {
            attempts: 3,
            last_error: AttemptError::Status(503),
        }
    );
    let templates: Vec<&str> = events.iter().map(|e| e.message_template()).collect();
    assert_eq!(templates, vec!["event 0", "event 1", "event 2"]);
    let records: Vec<Value> = serde_json::from_slice(payload).unwrap();
    assert_eq!(records.len(), 3);
}

#[tokio::test]
async fn test_client_error_is_reported_without_retrying() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v2/logs")
        .with_status(400)
        .expect(1)
        .create_async()
        .await;

    let (sink, reports) = start(http_config(server.url()));
    sink.emit(event(0));
    sink.flush().await.unwrap();
    sink.shutdown().await;

    mock.assert_async().await;
    let reports = reports.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert!(matches!(
        &reports[0],
        LogEventError::CannotSend {
            outcome: DeliveryOutcome::Rejected { attempts: 1, error: AttemptError::Status(400) },
            ..
        }
    ));
}

#[tokio::test]
async fn test_oversized_message_is_split_into_truncated_records() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v2/logs")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#"^\[\{"#.to_string()),
            Matcher::Regex(r"\.\.\.TRUNCATED\.\.\.".to_string()),
        ]))
        .with_status(202)
        .expect(1)
        .create_async()
        .await;

    let (sink, reports) = start(http_config(server.url()));
    sink.emit(LogEvent::new(Level::Information, "x".repeat(300_000)));
    sink.flush().await.unwrap();
    sink.shutdown().await;

    mock.assert_async().await;
    assert!(reports.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_legacy_intake_carries_key_in_path() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/input/test-api-key")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let mut config = http_config(server.url());
    config.transport.intake_api = datadog_logs_sink::config::IntakeApi::LegacyV1;
    let (sink, reports) = start(config);
    sink.emit(event(0));
    sink.flush().await.unwrap();
    sink.shutdown().await;

    mock.assert_async().await;
    assert!(reports.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_tracing_events_are_shipped() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v2/logs")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#""message":"logged in""#.to_string()),
            Matcher::Regex(r#""level":"Information""#.to_string()),
            Matcher::Regex(r#""user":"alice""#.to_string()),
            Matcher::Regex(r#""logger.name":"billing""#.to_string()),
        ]))
        .with_status(202)
        .expect(1)
        .create_async()
        .await;

    let (sink, reports) = start(http_config(server.url()));
    let subscriber = tracing_subscriber::registry().with(DatadogLayer::new(sink.handle()));
    tracing::subscriber::with_default(subscriber, || {
        tracing::info!(target: "billing", user = "alice", "logged in");
    });
    sink.flush().await.unwrap();
    sink.shutdown().await;

    mock.assert_async().await;
    assert!(reports.lock().unwrap().is_empty());
}
