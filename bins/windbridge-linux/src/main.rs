//! Wind bridge for Linux hosts.
//!
//! Environment:
//! - `WINDBRIDGE_CONFIG`: configuration file (default `windbridge.json`)
//! - `WINDBRIDGE_DEMO`: when set, feed simulated sentences to the active
//!   UDP profile
//! - `RUST_LOG`: log filter

mod output;
mod storage;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use windbridge_core::{Endpoint, SharedState};
use windbridge_protocol::encode_sentence;
use windbridge_server::WindBridge;

use crate::output::LogOutput;
use crate::storage::FileConfigStorage;

const DEFAULT_CONFIG_PATH: &str = "windbridge.json";

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,windbridge_server=debug,windbridge_providers=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // one worker per task
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;
    runtime.block_on(run())
}

async fn run() -> anyhow::Result<()> {
    tracing::info!("Wind bridge starting...");

    let path = std::env::var("WINDBRIDGE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let storage = Arc::new(FileConfigStorage::open(path)?);
    tracing::info!("Configuration: {}", storage.path().display());

    let handle = WindBridge::from_storage(LogOutput::new(), storage)?.spawn();
    let (endpoint, _) = handle.state().active_endpoint();
    tracing::info!("Active endpoint: {}", endpoint);

    let demo = std::env::var_os("WINDBRIDGE_DEMO").map(|_| {
        let state = handle.state().clone();
        tokio::spawn(async move {
            if let Err(e) = generate_demo_data(state).await {
                tracing::error!("Demo feeder error: {}", e);
            }
        })
    });

    let mut watchdog = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("Received Ctrl+C, shutting down...");
                break;
            }
            _ = watchdog.tick() => {
                if handle.is_finished() {
                    tracing::warn!("Bridge task stopped");
                    break;
                }
            }
        }
    }

    if let Some(demo) = demo {
        demo.abort();
    }
    handle.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Simulated wind and navigation data sent to the active UDP profile.
async fn generate_demo_data(state: SharedState) -> anyhow::Result<()> {
    let (endpoint, _) = state.active_endpoint();
    let port = match endpoint {
        Endpoint::Udp { port } => port,
        other => {
            tracing::warn!("Demo feeder needs a UDP profile, active is {}", other);
            return Ok(());
        }
    };
    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    tracing::info!("Demo feeder sending to 127.0.0.1:{}", port);

    let mut interval = tokio::time::interval(Duration::from_secs(1));
    let mut step = 0u32;
    loop {
        interval.tick().await;
        let t = step as f32;
        step = step.wrapping_add(1);

        let awa = 40.0 + 10.0 * (t / 10.0).sin();
        let aws = 12.0 + 2.0 * (t / 7.0).cos();
        let sog = 6.0 + 0.5 * (t / 13.0).sin();
        let cog = 90.0 + 5.0 * (t / 11.0).cos();

        let (awa, aws) = (format!("{:05.1}", awa), format!("{:.1}", aws));
        let (cog, sog, heading) = (
            format!("{:05.1}", cog),
            format!("{:.1}", sog),
            format!("{:05.1}", cog - 3.0),
        );
        let sentences = [
            encode_sentence("WIMWV", &[awa.as_str(), "R", aws.as_str(), "N", "A"])?,
            encode_sentence("GPVTG", &[cog.as_str(), "T", "", "M", sog.as_str(), "N", "", "K", "A"])?,
            encode_sentence("HEHDT", &[heading.as_str(), "T"])?,
        ];
        let datagram: String = sentences.iter().map(|s| s.as_str()).collect();
        socket.send_to(datagram.as_bytes(), ("127.0.0.1", port)).await?;
    }
}
