//! Lifeline directory server: name registry and link broker.
//!
//! An axum WebSocket server that lets Lifeline clients claim a name, ask
//! for links to other names, and exchange payloads over open links. It
//! keeps nothing for absent peers; queuing is the client's job.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9100
//! cargo run --bin lifeline-directory
//!
//! # Run on custom address
//! cargo run --bin lifeline-directory -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! DIRECTORY_ADDR=127.0.0.1:8080 cargo run --bin lifeline-directory
//! ```

use std::sync::Arc;

use clap::Parser;
use lifeline_directory::config::{DirectoryCliArgs, DirectoryConfig};
use lifeline_directory::directory::{self, DirectoryState};

#[tokio::main]
async fn main() {
    let cli = DirectoryCliArgs::parse();

    let config = match DirectoryConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        addr = %config.bind_addr,
        max_payload_size = config.max_payload_size,
        config_file = ?config.source,
        "starting lifeline directory"
    );

    let state = Arc::new(DirectoryState::with_max_payload_size(
        config.max_payload_size,
    ));

    match directory::start_server_with_state(&config.bind_addr.to_string(), state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "directory listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "directory server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start directory server");
            std::process::exit(1);
        }
    }
}
