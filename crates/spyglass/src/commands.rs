//! Subcommand implementations.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use lookout::directory::{DirectoryClient, StartOutcome, StartRequest, StopOutcome};
use lookout::engine::{Engine, EngineCommand, EngineSnapshot};
use lookout::transport::discover_relays;
use lookoutconf::{ConfigSources, LookoutConfig};
use reqwest::Url;
use tracing::{info, warn};

fn directory(config: &LookoutConfig) -> Result<DirectoryClient> {
    DirectoryClient::new(&config.directory).context("Failed to build directory client")
}

/// Print the remote inventory.
pub async fn sessions(config: &LookoutConfig, json: bool) -> Result<()> {
    let client = directory(config)?;
    let sessions = client
        .list_sessions()
        .await
        .with_context(|| format!("Failed to list sessions from {}", client.base_url()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }

    if sessions.is_empty() {
        println!("No remote sessions");
        return Ok(());
    }
    for session in &sessions {
        let kinds: Vec<&str> = session.playback_endpoints.keys().map(String::as_str).collect();
        println!(
            "{:<24} {:<10} {}",
            session.id,
            session.status.as_deref().unwrap_or("unknown"),
            if kinds.is_empty() { "-".to_string() } else { kinds.join(",") }
        );
    }
    Ok(())
}

pub async fn start(
    config: &LookoutConfig,
    id: &str,
    source_url: Option<String>,
    looping: bool,
) -> Result<()> {
    let outcome = directory(config)?
        .start_session(id, &StartRequest { source_url, looping })
        .await
        .with_context(|| format!("Failed to start session {id}"))?;
    match outcome {
        StartOutcome::Started => println!("Started {id}"),
        StartOutcome::AlreadyRunning => println!("{id} is already running"),
    }
    Ok(())
}

pub async fn stop(config: &LookoutConfig, id: &str) -> Result<()> {
    let outcome = directory(config)?
        .stop_session(id)
        .await
        .with_context(|| format!("Failed to stop session {id}"))?;
    match outcome {
        StopOutcome::Stopped => println!("Stopped {id}"),
        StopOutcome::AlreadyGone => println!("{id} was not running"),
    }
    Ok(())
}

/// Run relay discovery against a playback URL and print what it offers.
pub async fn probe(config: &LookoutConfig, playback_url: &str) -> Result<()> {
    let url = Url::parse(playback_url)
        .with_context(|| format!("Invalid playback URL: {playback_url}"))?;
    let http = reqwest::Client::builder()
        .timeout(Duration::from_millis(config.transport.request_timeout_ms))
        .build()
        .context("Failed to build HTTP client")?;

    let relays = discover_relays(&http, &url).await;
    if relays.is_empty() {
        println!("No relays advertised by {url}");
    } else {
        println!("{}", serde_json::to_string_pretty(&relays)?);
    }
    Ok(())
}

/// Run the engine without a media peer and log what it would draw.
pub async fn watch(
    config: LookoutConfig,
    session: Option<String>,
    duration: Option<Duration>,
) -> Result<()> {
    let client = directory(&config)?;
    let engine = Engine::spawn(config, client, None).context("Failed to start engine")?;

    if let Some(id) = session {
        if !engine.send(EngineCommand::JoinExternalSession(id)).await {
            bail!("Engine exited before joining session");
        }
    }

    let mut snapshots = engine.subscribe();
    let deadline = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut last_frame = None;
    let mut last_status = String::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            _ = &mut deadline => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    warn!("engine exited");
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                report(&snapshot, &mut last_frame, &mut last_status);
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}

fn report(snapshot: &EngineSnapshot, last_frame: &mut Option<u64>, last_status: &mut String) {
    let status = format!(
        "{} | feed {} | transport {} | {}",
        snapshot.active,
        snapshot.channel.label(),
        snapshot.transport.status.as_str(),
        snapshot.directory_status
    );
    if status != *last_status {
        info!("{status}");
        *last_status = status;
    }

    let Some(frame) = &snapshot.frame else {
        return;
    };
    if *last_frame == Some(frame.frame_index) {
        return;
    }
    *last_frame = Some(frame.frame_index);

    let names: Vec<&str> = frame
        .annotations
        .iter()
        .map(|a| {
            a.vessel
                .as_ref()
                .and_then(|v| v.name.as_deref().or(v.mmsi.as_deref()))
                .unwrap_or(a.detection.class.as_str())
        })
        .collect();
    info!(
        frame = frame.frame_index,
        source_ts_ms = frame.source_timestamp_ms,
        visible = frame.annotations.len(),
        p50_ms = ?snapshot.latency.p50_ms,
        p95_ms = ?snapshot.latency.p95_ms,
        "{}",
        names.join(", ")
    );
}

/// Print the effective configuration and where it came from.
pub fn show_config(config: &LookoutConfig, sources: &ConfigSources) {
    println!("# Sources");
    if sources.files.is_empty() {
        println!("#   (defaults only)");
    }
    for file in &sources.files {
        println!("#   {}", file.display());
    }
    for var in &sources.env_overrides {
        println!("#   env {var}");
    }
    println!();
    print!("{}", config.to_toml());
}
