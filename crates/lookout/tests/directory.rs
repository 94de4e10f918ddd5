//! Directory client against a mock session bridge.

use anyhow::Result;
use lookout::directory::{DirectoryClient, StartOutcome, StartRequest, StopOutcome};
use lookout::error::DirectoryError;
use lookoutconf::DirectoryConfig;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> Result<DirectoryClient> {
    let config = DirectoryConfig {
        base_url: server.uri(),
        request_timeout_ms: 2_000,
        ..DirectoryConfig::default()
    };
    Ok(DirectoryClient::new(&config)?)
}

#[tokio::test]
async fn test_list_sessions() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "streams": [
                {
                    "stream_id": "harbour",
                    "status": "running",
                    "playback_urls": {"whep": "http://media/harbour/whep"}
                },
                {"stream_id": "stream-1", "status": "starting"}
            ]
        })))
        .mount(&server)
        .await;

    let sessions = client(&server)?.list_sessions().await?;
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].id, "harbour");
    assert_eq!(sessions[0].status.as_deref(), Some("running"));
    assert_eq!(
        sessions[0].playback_endpoints.get("whep").map(String::as_str),
        Some("http://media/harbour/whep")
    );
    assert_eq!(sessions[1].id, "stream-1");
    assert!(sessions[1].playback_endpoints.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_list_without_streams_key_is_empty() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    assert!(client(&server)?.list_sessions().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_list_failures() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sessions"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let err = client(&server)?.list_sessions().await.unwrap_err();
    assert!(matches!(err, DirectoryError::Http { status: 502, .. }), "{err:?}");

    let garbled = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&garbled)
        .await;

    let err = client(&garbled)?.list_sessions().await.unwrap_err();
    assert!(matches!(err, DirectoryError::Decode(_)), "{err:?}");
    Ok(())
}

#[tokio::test]
async fn test_start_session_outcomes() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions/stream-1/start"))
        .and(body_json(json!({"source_url": "rtsp://cam/1", "loop": false})))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sessions/harbour/start"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sessions/broken/start"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = client(&server)?;
    let request = StartRequest {
        source_url: Some("rtsp://cam/1".into()),
        looping: false,
    };
    assert_eq!(
        client.start_session("stream-1", &request).await?,
        StartOutcome::Started
    );
    assert_eq!(
        client.start_session("harbour", &request).await?,
        StartOutcome::AlreadyRunning
    );
    let err = client.start_session("broken", &request).await.unwrap_err();
    assert!(matches!(err, DirectoryError::Http { status: 500, .. }), "{err:?}");
    Ok(())
}

#[tokio::test]
async fn test_stop_session_outcomes() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/sessions/harbour"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/sessions/ghost"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client(&server)?;
    assert_eq!(client.stop_session("harbour").await?, StopOutcome::Stopped);
    assert_eq!(client.stop_session("ghost").await?, StopOutcome::AlreadyGone);
    Ok(())
}

#[tokio::test]
async fn test_heartbeat_swallows_failures() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions/harbour/heartbeat"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)?.heartbeat("harbour").await;

    // Unreachable bridge: still no error surfaces
    let unreachable = DirectoryClient::with_client("http://127.0.0.1:9", reqwest::Client::new())?;
    unreachable.heartbeat("harbour").await;
    Ok(())
}
