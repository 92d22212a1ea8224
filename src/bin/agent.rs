//! Call Agent Application
//!
//! Headless source endpoint: captures system audio and microphone, streams
//! them to the relay, and plays the viewer's voice through local speakers.

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use remote_audio_call::{
    agent::{machine_identity, CallAgent},
    audio::list_devices,
    config::AppConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting call agent");

    let config = AppConfig::load_or_default();

    // Server URL from args or config
    let server_url = match std::env::args().nth(1).or_else(|| config.agent.server_url.clone()) {
        Some(url) => url,
        None => {
            eprintln!("Usage: agent <server_ws_url>");
            eprintln!("Example: agent wss://192.168.1.10:5444/ws");
            std::process::exit(2);
        }
    };

    // List available devices so a misconfigured machine is obvious up front
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}", device.name, device_type, default_marker);
    }
    println!();

    let identity = machine_identity(&config.agent);
    println!("Identity: {}", identity);
    println!("Relay:    {}", server_url);
    println!();

    let agent = CallAgent::new(identity, config.audio.clone(), config.agent.clone());
    agent.run(&server_url).await?;

    Ok(())
}
