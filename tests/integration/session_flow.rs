//! Credential lifecycle against a mock service

use super::*;
use annotation_integration::{AnnotationError, AuthenticationError, CredentialProvider};
use wiremock::matchers::header;

#[tokio::test]
async fn test_login_once_then_bearer_on_every_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions"))
        .and(body_json(json!({"identity": IDENTITY, "secret": SECRET})))
        .respond_with(session("access-1", "refresh-1"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tasks"))
        .and(header("Authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
        .expect(2)
        .mount(&server)
        .await;

    let metrics = Arc::new(InMemoryMetrics::new());
    let client = build_client(session_config(&server), metrics.clone());

    for _ in 0..2 {
        let tasks: Vec<serde_json::Value> = client.get_json("/tasks").await.unwrap();
        assert_eq!(tasks.len(), 1);
    }
    assert!(client.credentials().is_authenticated());
    assert_eq!(
        metrics.count_with_label("annotation_logins_total", "success", "true"),
        1
    );
}

#[tokio::test]
async fn test_concurrent_calls_share_one_login() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions"))
        .respond_with(session("access-1", "refresh-1").set_delay(Duration::from_millis(50)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/projects"))
        .and(header("Authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 0})))
        .expect(8)
        .mount(&server)
        .await;

    let client = Arc::new(build_client(
        session_config(&server),
        Arc::new(InMemoryMetrics::new()),
    ));

    let calls = (0..8).map(|_| {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.get_json::<serde_json::Value>("/projects").await })
    });
    for result in futures::future::join_all(calls).await {
        assert!(result.unwrap().is_ok());
    }
}

#[tokio::test]
async fn test_expired_credential_refreshes_and_resends_once() {
    let server = MockServer::start().await;
    mount_login(&server, "access-1", "refresh-1").await;
    Mock::given(method("POST"))
        .and(path("/sessions/refresh"))
        .and(body_json(json!({"refresh_secret": "refresh-1"})))
        .respond_with(session("access-2", "refresh-2"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tasks/9"))
        .and(header("Authorization", "Bearer access-1"))
        .respond_with(expired())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tasks/9"))
        .and(header("Authorization", "Bearer access-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 9})))
        .expect(1)
        .mount(&server)
        .await;

    let metrics = Arc::new(InMemoryMetrics::new());
    let client = build_client(session_config(&server), metrics.clone());

    let task: serde_json::Value = client.get_json("/tasks/9").await.unwrap();

    assert_eq!(task["id"], 9);
    assert_eq!(
        metrics.count_with_label("annotation_expired_recoveries_total", "success", "true"),
        1
    );
}

#[tokio::test]
async fn test_rejected_refresh_falls_back_to_login() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions"))
        .respond_with(session("access-1", "refresh-1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sessions"))
        .respond_with(session("access-2", "refresh-2"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sessions/refresh"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"detail": "Refresh token revoked"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tasks"))
        .and(header("Authorization", "Bearer access-1"))
        .respond_with(expired())
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tasks"))
        .and(header("Authorization", "Bearer access-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let metrics = Arc::new(InMemoryMetrics::new());
    let client = build_client(session_config(&server), metrics.clone());

    let tasks: Vec<serde_json::Value> = client.get_json("/tasks").await.unwrap();

    assert!(tasks.is_empty());
    assert_eq!(
        metrics.count_with_label(
            "annotation_refresh_fallbacks_total",
            "reason",
            "refresh_rejected"
        ),
        1
    );
}

#[tokio::test]
async fn test_second_expiry_escalates_and_clears() {
    let server = MockServer::start().await;
    mount_login(&server, "access-1", "refresh-1").await;
    Mock::given(method("POST"))
        .and(path("/sessions/refresh"))
        .respond_with(session("access-2", "refresh-2"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tasks"))
        .respond_with(expired())
        .expect(2)
        .mount(&server)
        .await;

    let client = build_client(session_config(&server), Arc::new(InMemoryMetrics::new()));

    let err = client.get_json::<serde_json::Value>("/tasks").await.unwrap_err();

    assert!(matches!(
        err,
        AnnotationError::Authentication(AuthenticationError::ExpiredAfterRefresh { .. })
    ));
    assert!(!client.credentials().is_authenticated());
}

#[tokio::test]
async fn test_login_rejections_are_subclassified() {
    for (status, detail) in [
        (401, "Unable to log in with provided credentials."),
        (403, "User account is not permitted to annotate."),
    ] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions"))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({"detail": detail})))
            .expect(1)
            .mount(&server)
            .await;

        let client = build_client(session_config(&server), Arc::new(InMemoryMetrics::new()));
        let err = client.get_json::<serde_json::Value>("/tasks").await.unwrap_err();

        match (status, &err) {
            (401, AnnotationError::Authentication(AuthenticationError::InvalidIdentity { .. }))
            | (
                403,
                AnnotationError::Authentication(AuthenticationError::InsufficientPrivilege { .. }),
            ) => {}
            other => panic!("unexpected classification: {other:?}"),
        }
        assert!(!err.to_string().contains(SECRET));
        assert!(!format!("{err:?}").contains(SECRET));
    }
}

#[tokio::test]
async fn test_static_token_sends_token_scheme_without_login() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions"))
        .respond_with(session("unused", "unused"))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/tasks/3"))
        .and(header("Authorization", "Token legacy-key"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let builder = annotation_config()
        .base_url(server.uri())
        .static_token("legacy-key");
    let client = build_client(builder, Arc::new(InMemoryMetrics::new()));

    client.delete("/tasks/3").await.unwrap();
}
