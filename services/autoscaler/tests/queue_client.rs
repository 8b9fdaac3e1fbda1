//! Runner task API client against a local mock server.

use fleet_autoscaler::{Credential, QueueStatus, RunnerQueueClient, ScaleError};
use fleet_id::ResourceClass;
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn resource_class() -> ResourceClass {
    "acme/docker".parse().unwrap()
}

fn credential() -> Credential {
    Credential::new("queue-token").unwrap()
}

fn client(server: &MockServer) -> RunnerQueueClient {
    RunnerQueueClient::with_client(reqwest::Client::new(), &format!("{}/api/v2/", server.uri()))
}

#[tokio::test]
async fn test_waiting_jobs() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/tasks"))
        .and(query_param("resource-class", "acme/docker"))
        .and(header("Circle-Token", "queue-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "unclaimed_task_count": 7
        })))
        .expect(1)
        .mount(&server)
        .await;

    let count = client(&server)
        .waiting_jobs(&credential(), &resource_class())
        .await
        .unwrap();
    assert_eq!(count, 7);
}

#[tokio::test]
async fn test_running_jobs() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/tasks/running"))
        .and(query_param("resource-class", "acme/docker"))
        .and(header("Circle-Token", "queue-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "running_runner_tasks": 2
        })))
        .expect(1)
        .mount(&server)
        .await;

    let count = client(&server)
        .running_jobs(&credential(), &resource_class())
        .await
        .unwrap();
    assert_eq!(count, 2);
}

#[tokio::test]
async fn test_unauthorized_is_remote_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/tasks"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
        .mount(&server)
        .await;

    let err = client(&server)
        .waiting_jobs(&credential(), &resource_class())
        .await
        .unwrap_err();

    match &err {
        ScaleError::RemoteStatus { status, body, .. } => {
            assert_eq!(*status, 401);
            assert_eq!(body, "invalid token");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!err.to_string().contains("queue-token"));
}

#[tokio::test]
async fn test_only_200_counts_as_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/tasks/running"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let err = client(&server)
        .running_jobs(&credential(), &resource_class())
        .await
        .unwrap_err();
    assert!(matches!(err, ScaleError::RemoteStatus { status: 204, .. }));
}

#[tokio::test]
async fn test_malformed_body_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/tasks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "unclaimed_task_count": "many"
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .waiting_jobs(&credential(), &resource_class())
        .await
        .unwrap_err();
    assert!(matches!(err, ScaleError::Decode { .. }));
}

#[tokio::test]
async fn test_unreachable_server_is_transport_error() {
    let server = MockServer::start().await;
    let uri = server.uri();
    drop(server);

    let client = RunnerQueueClient::with_client(reqwest::Client::new(), &uri);
    let err = client
        .waiting_jobs(&credential(), &resource_class())
        .await
        .unwrap_err();
    assert!(matches!(err, ScaleError::Transport { .. }));
}
