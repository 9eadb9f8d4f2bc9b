//! Retry and circuit breaking against a mock service

use super::*;
use annotation_integration::{
    AnnotationError, CircuitState, FailureKind, NetworkError, RemoteError, RetryDisposition,
};

#[tokio::test]
async fn test_reclassified_server_errors_are_retried() {
    let server = MockServer::start().await;
    mount_login(&server, "access-1", "refresh-1").await;
    Mock::given(method("GET"))
        .and(path("/exports"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/exports"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ready": true})))
        .expect(1)
        .mount(&server)
        .await;

    let builder = session_config(&server)
        .max_attempts(3)
        .classify(FailureKind::ServerError, RetryDisposition::Retryable);
    let client = build_client(builder, Arc::new(InMemoryMetrics::new()));

    let export: serde_json::Value = client.get_json("/exports").await.unwrap();
    assert_eq!(export["ready"], true);
}

#[tokio::test]
async fn test_malformed_request_fails_without_retry() {
    let server = MockServer::start().await;
    mount_login(&server, "access-1", "refresh-1").await;
    Mock::given(method("POST"))
        .and(path("/tasks"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"detail": "project is required"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = build_client(
        session_config(&server).max_attempts(5),
        Arc::new(InMemoryMetrics::new()),
    );

    let err = client
        .post_json::<_, serde_json::Value>("/tasks", &json!({"title": "t"}))
        .await
        .unwrap_err();

    match err {
        AnnotationError::Remote(RemoteError::MalformedRequest { context }) => {
            assert_eq!(context.status, Some(400));
            assert_eq!(context.reason.as_deref(), Some("project is required"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_slow_responses_time_out_and_retry() {
    let server = MockServer::start().await;
    mount_login(&server, "access-1", "refresh-1").await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .expect(2)
        .mount(&server)
        .await;

    let builder = session_config(&server)
        .max_attempts(2)
        .request_timeout(Duration::from_millis(100));
    let client = build_client(builder, Arc::new(InMemoryMetrics::new()));

    let err = client.get_json::<serde_json::Value>("/slow").await.unwrap_err();
    assert!(matches!(err, AnnotationError::Network(NetworkError::Timeout { .. })));
}

#[tokio::test]
async fn test_circuit_opens_after_threshold_and_short_circuits() {
    let server = MockServer::start().await;
    mount_login(&server, "access-1", "refresh-1").await;
    Mock::given(method("GET"))
        .and(path("/tasks"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let metrics = Arc::new(InMemoryMetrics::new());
    let builder = session_config(&server)
        .max_attempts(1)
        .failure_threshold(2)
        .recovery_timeout(Duration::from_secs(60));
    let client = build_client(builder, metrics.clone());

    for _ in 0..2 {
        let err = client.get_json::<serde_json::Value>("/tasks").await.unwrap_err();
        assert!(matches!(err, AnnotationError::Remote(RemoteError::Server { .. })));
    }

    let err = client.get_json::<serde_json::Value>("/tasks").await.unwrap_err();
    assert!(matches!(err, AnnotationError::CircuitOpen { .. }));
    assert_eq!(
        client.circuit_breaker().map(|b| b.state()),
        Some(CircuitState::Open)
    );
    assert_eq!(
        metrics.count_with_label(
            "annotation_circuit_rejections_total",
            "breaker",
            "annotation-api"
        ),
        1
    );
}

#[tokio::test]
async fn test_clients_share_breakers_through_registry() {
    let server = MockServer::start().await;
    mount_login(&server, "access-1", "refresh-1").await;
    Mock::given(method("GET"))
        .and(path("/tasks"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&server)
        .await;

    let registry = Arc::new(CircuitBreakerRegistry::default());
    let make_client = || {
        let config = session_config(&server)
            .max_attempts(1)
            .failure_threshold(1)
            .build()
            .unwrap();
        annotation_client(config)
            .registry(Arc::clone(&registry))
            .build()
            .unwrap()
    };
    let first = make_client();
    let second = make_client();

    assert!(first.get_json::<serde_json::Value>("/tasks").await.is_err());
    let err = second.get_json::<serde_json::Value>("/tasks").await.unwrap_err();

    assert!(matches!(err, AnnotationError::CircuitOpen { .. }));
    assert_eq!(registry.len(), 1);
}
