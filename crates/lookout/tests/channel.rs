//! Detection subscription against a local websocket feed.

mod common;

use anyhow::Result;
use common::{detections_message, eventually, feed_server, within, FeedScript};
use lookout::channel::{ChannelEvent, ChannelMessage, ChannelState, DetectionChannel};
use lookoutconf::ChannelConfig;
use serde_json::json;
use tokio::sync::mpsc;

fn channel_config(url: &str) -> ChannelConfig {
    ChannelConfig {
        detections_url: url.to_string(),
        reconnect_delay_ms: 50,
        ..ChannelConfig::default()
    }
}

fn script(messages: &[String], hang_up: bool) -> FeedScript {
    FeedScript {
        messages: messages.to_vec(),
        hang_up,
    }
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<ChannelMessage>) -> Result<ChannelMessage> {
    within("channel event", rx.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("event channel closed"))
}

#[tokio::test]
async fn test_streams_events_until_complete() -> Result<()> {
    let ready = json!({"type": "ready", "width": 1920, "height": 1080, "fps": 25}).to_string();
    let complete = json!({"type": "complete"}).to_string();
    let mut server = feed_server(vec![script(
        &[ready, detections_message(0, 1_000.0, &[(10.0, 20.0)]), complete],
        false,
    )])
    .await?;

    let config = channel_config(&server.url);
    let mut overrides = serde_json::Map::new();
    overrides.insert("loop".into(), json!(false));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let channel = DetectionChannel::open(config.url_for("harbour"), 7, &config, overrides, tx);
    assert_eq!(channel.generation(), 7);

    let sent = within("config payload", server.configs.recv()).await?.expect("config");
    let sent: serde_json::Value = serde_json::from_str(&sent)?;
    assert_eq!(sent, json!({"track": true, "loop": false}));

    let first = next_event(&mut rx).await?;
    assert_eq!(first.generation, 7);
    assert_eq!(
        first.event,
        ChannelEvent::Ready {
            width: 1920,
            height: 1080,
            fps: 25.0
        }
    );

    let ChannelEvent::Detections(frame) = next_event(&mut rx).await?.event else {
        panic!("expected detections");
    };
    assert_eq!(frame.frame_index, 0);
    assert_eq!(frame.source_timestamp_ms, 1_000.0);
    assert_eq!(frame.vessels.len(), 1);
    assert_eq!(frame.detections()[0].class, "boat");
    let vessel = frame.vessels[0].vessel.as_ref().expect("vessel info");
    assert_eq!(vessel.mmsi.as_deref(), Some("257000000"));

    assert_eq!(next_event(&mut rx).await?.event, ChannelEvent::Complete);
    eventually("idle", || channel.state() == ChannelState::Idle).await?;

    // A completed feed is not reopened
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert!(server.configs.try_recv().is_err());

    channel.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_reconnects_after_unclean_close() -> Result<()> {
    let mut server = feed_server(vec![
        script(&[detections_message(1, 40.0, &[])], true),
        script(&[detections_message(2, 80.0, &[])], false),
    ])
    .await?;

    let config = channel_config(&server.url);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let channel = DetectionChannel::open(
        config.url_for("harbour"),
        1,
        &config,
        serde_json::Map::new(),
        tx,
    );

    let ChannelEvent::Detections(first) = next_event(&mut rx).await?.event else {
        panic!("expected detections");
    };
    assert_eq!(first.frame_index, 1);

    let ChannelEvent::Detections(second) = next_event(&mut rx).await?.event else {
        panic!("expected detections after reconnect");
    };
    assert_eq!(second.frame_index, 2);

    within("first config", server.configs.recv()).await?;
    within("second config", server.configs.recv()).await?;
    eventually("connected", || channel.state() == ChannelState::Connected).await?;

    channel.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_error_event_triggers_reconnect() -> Result<()> {
    let error = json!({"type": "error", "message": "detector crashed"}).to_string();
    let ready = json!({"type": "ready", "width": 640, "height": 480}).to_string();
    let server = feed_server(vec![script(&[error], false), script(&[ready], false)]).await?;

    let config = channel_config(&server.url);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let channel = DetectionChannel::open(
        config.url_for("harbour"),
        3,
        &config,
        serde_json::Map::new(),
        tx,
    );

    assert_eq!(
        next_event(&mut rx).await?.event,
        ChannelEvent::Error("detector crashed".into())
    );
    assert_eq!(
        next_event(&mut rx).await?.event,
        ChannelEvent::Ready {
            width: 640,
            height: 480,
            fps: 0.0
        }
    );

    channel.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_connect_failure_reports_error_state() -> Result<()> {
    // Grab a free port, then release it so nothing is listening
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);

    let config = channel_config(&format!("ws://{addr}/sessions/{{session}}/detections"));
    let (tx, _rx) = mpsc::unbounded_channel();
    let channel = DetectionChannel::open(
        config.url_for("harbour"),
        1,
        &config,
        serde_json::Map::new(),
        tx,
    );

    eventually("error state", || {
        matches!(channel.state(), ChannelState::Error(ref message) if message.starts_with("Connect failed"))
    })
    .await?;

    channel.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_close_is_idempotent() -> Result<()> {
    let server = feed_server(vec![script(&[], false)]).await?;

    let config = channel_config(&server.url);
    let (tx, _rx) = mpsc::unbounded_channel();
    let channel = DetectionChannel::open(
        config.url_for("harbour"),
        1,
        &config,
        serde_json::Map::new(),
        tx,
    );
    let mut states = channel.subscribe();

    eventually("connected", || channel.state() == ChannelState::Connected).await?;

    channel.close();
    channel.close();
    eventually("idle", || channel.state() == ChannelState::Idle).await?;
    assert_eq!(*states.borrow_and_update(), ChannelState::Idle);

    within("shutdown", channel.shutdown()).await?;
    Ok(())
}
