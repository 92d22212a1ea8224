//! Call Relay Application
//!
//! Pairs one source agent with one viewer per identity and relays audio
//! between them under the session's call mode.

use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use remote_audio_call::{
    auth::AllowList, config::AppConfig, relay::RelayServer, session::SessionRegistry,
};

fn print_usage() {
    println!("Usage: relay [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --host <ADDR>      Address to bind (default 0.0.0.0)");
    println!("  --port <PORT>      Port to bind (default 5444)");
    println!("  --cert <FILE>      TLS certificate chain (PEM)");
    println!("  --key <FILE>       TLS private key (PEM)");
    println!("  --allowed <FILE>   Identity allow-list (default allowed.json)");
    println!("  --static <DIR>     Static pages directory (default static)");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting call relay");

    let mut config = AppConfig::load_or_default();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--host" => {
                if let Some(value) = args.next() {
                    config.server.bind_address = value;
                }
            }
            "--port" => {
                if let Some(value) = args.next() {
                    config.server.port = value.parse()?;
                }
            }
            "--cert" => config.server.cert_file = args.next().map(Into::into),
            "--key" => config.server.key_file = args.next().map(Into::into),
            "--allowed" => {
                if let Some(value) = args.next() {
                    config.server.allowed_file = value.into();
                }
            }
            "--static" => {
                if let Some(value) = args.next() {
                    config.server.static_dir = value.into();
                }
            }
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                print_usage();
                std::process::exit(2);
            }
        }
    }

    let allow_list = Arc::new(AllowList::load(&config.server.allowed_file)?);
    let registry = Arc::new(SessionRegistry::new(allow_list.clone()));

    let scheme = if config.server.cert_file.is_some() && config.server.key_file.is_some() {
        ("https", "wss")
    } else {
        ("http", "ws")
    };

    println!("\n=== Remote Audio Call Relay ===");
    println!(
        "  Web interface: {}://{}:{}",
        scheme.0, config.server.bind_address, config.server.port
    );
    println!(
        "  WebSocket:     {}://{}:{}/ws",
        scheme.1, config.server.bind_address, config.server.port
    );
    println!("  Allowed identities: {}", allow_list.len());
    println!();
    println!("  Call modes:");
    println!("    off    - no audio transmission");
    println!("    listen - hear the source's system audio");
    println!("    talk   - send your voice to the source");
    println!("    both   - full two-way conversation");
    println!();

    RelayServer::new(config.server.clone(), registry).run().await?;

    Ok(())
}
