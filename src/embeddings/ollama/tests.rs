use super::*;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> OllamaConfig {
    let address = server.address();
    OllamaConfig {
        host: address.ip().to_string(),
        port: address.port(),
        model: "test-model".to_string(),
        ..OllamaConfig::default()
    }
}

#[test]
fn client_configuration() {
    let config = OllamaConfig {
        protocol: "http".to_string(),
        host: "test-host".to_string(),
        port: 1234,
        model: "test-model".to_string(),
        timeout_seconds: 5,
        retry_attempts: 2,
    };
    let client = OllamaClient::new(&config).expect("Failed to create client");

    assert_eq!(client.model, "test-model");
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
    assert_eq!(client.retry_attempts, 2);
}

#[test]
fn client_builder_methods() {
    let client = OllamaClient::new(&OllamaConfig::default())
        .expect("Failed to create client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(0);

    // at least one attempt is always made
    assert_eq!(client.retry_attempts, 1);
}

#[test]
fn model_name_matching() {
    assert!(OllamaClient::same_model("mxbai-embed-large", "mxbai-embed-large"));
    assert!(OllamaClient::same_model(
        "mxbai-embed-large:latest",
        "mxbai-embed-large"
    ));
    assert!(!OllamaClient::same_model("nomic-embed-text:latest", "mxbai-embed-large"));
}

#[tokio::test]
async fn embed_parses_first_vector() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_json(serde_json::json!({
            "model": "test-model",
            "input": "how do i make tom yum soup?"
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "embeddings": [[0.25, -0.5, 1.0]] })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server)).expect("Failed to create client");
    let vector = client
        .embed("how do i make tom yum soup?")
        .await
        .expect("should embed");

    assert_eq!(vector, vec![0.25, -0.5, 1.0]);
    assert_eq!(client.model(), "test-model");
}

#[tokio::test]
async fn embed_rejects_empty_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "embeddings": [] })),
        )
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server)).expect("Failed to create client");
    let result = client.embed("anything").await;

    assert!(matches!(result, Err(CacheError::Embedding(_))));
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server))
        .expect("Failed to create client")
        .with_retry_attempts(3);
    let result = client.embed("anything").await;

    assert!(matches!(result, Err(CacheError::Embedding(_))));
}

#[tokio::test]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server))
        .expect("Failed to create client")
        .with_retry_attempts(2);
    let result = client.embed("anything").await;

    assert!(matches!(result, Err(CacheError::Embedding(_))));
}

#[tokio::test]
async fn empty_text_is_rejected_without_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server)).expect("Failed to create client");
    assert!(client.embed("   ").await.is_err());
}

#[tokio::test]
async fn health_check_accepts_latest_tag() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": [{ "name": "test-model:latest", "size": 42 }]
        })))
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server)).expect("Failed to create client");
    let result = tokio::task::spawn_blocking(move || client.health_check())
        .await
        .expect("task should join");

    assert!(result.is_ok(), "health check failed: {:?}", result);
}

#[tokio::test]
async fn health_check_reports_missing_model() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": [{ "name": "other-model" }]
        })))
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server)).expect("Failed to create client");
    let result = tokio::task::spawn_blocking(move || client.health_check())
        .await
        .expect("task should join");

    assert!(result.is_err());
}
