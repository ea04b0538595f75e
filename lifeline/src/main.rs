//! Lifeline: peer-to-peer disaster messenger.
//!
//! Launches the TUI. With a directory URL it registers on a
//! `lifeline-directory` server; without one it runs an offline demo over
//! an in-process directory with a built-in relief-camp peer.
//!
//! ```bash
//! # Offline demo mode
//! cargo run --bin lifeline
//!
//! # Use a directory server
//! cargo run --bin lifeline -- --directory-url ws://127.0.0.1:9100/ws --name rescue-42
//!
//! # Or via environment variables
//! LIFELINE_DIRECTORY_URL=ws://127.0.0.1:9100/ws LIFELINE_NAME=rescue-42 cargo run
//! ```

use std::io;
use std::path::Path;

use clap::Parser;
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

use lifeline::app::App;
use lifeline::config::{CliArgs, ClientConfig};
use lifeline::messenger::Messenger;
use lifeline::network::{ManualNetworkSignal, NetworkSignal, ReachabilityNetworkSignal};
use lifeline::provider::directory::DirectoryProvider;
use lifeline::provider::loopback::{LoopbackDirectory, LoopbackProvider};
use lifeline::provider::{ConnectionProvider, PeerName, ProviderEvent};
use lifeline::runtime::{Command, spawn_messenger};
use lifeline::store::file::FileStore;
use lifeline::ui;
use lifeline_proto::codec;
use lifeline_proto::message::{PayloadKind, PeerPayload, Timestamp};

/// Name of the built-in peer in offline demo mode.
const DEMO_PEER: &str = "relief-camp";

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    // Logs go to a file, never stdout, since ratatui owns the terminal.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    tracing::info!("lifeline starting");

    let store = match &config.data_dir {
        Some(dir) => FileStore::new(dir),
        None => FileStore::in_default_location().map_err(io::Error::other)?,
    };
    tracing::info!(data_dir = %store.root().display(), "using file store");

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = match config.directory_url.clone() {
        Some(url) => {
            let provider = DirectoryProvider::new(url.as_str())
                .with_connect_timeout(config.connect_timeout)
                .with_request_timeout(config.register_timeout);
            match reachability_target(&url) {
                Some(target) => {
                    let network = ReachabilityNetworkSignal::spawn(
                        target,
                        config.check_interval,
                        config.connect_timeout,
                        config.position,
                    );
                    run_app(&mut terminal, provider, network, store, &config).await
                }
                None => {
                    tracing::warn!(%url, "cannot derive a reachability target, assuming online");
                    let network = manual_network(&config);
                    run_app(&mut terminal, provider, network, store, &config).await
                }
            }
        }
        None => {
            let directory = LoopbackDirectory::new();
            let demo = tokio::spawn(run_demo_peer(directory.provider()));
            let result = run_app(
                &mut terminal,
                directory.provider(),
                manual_network(&config),
                store,
                &config,
            )
            .await;
            demo.abort();
            result
        }
    };

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    tracing::info!("lifeline exiting");
    result
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("lifeline.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// `host:port` of the directory server, for reachability checks.
fn reachability_target(directory_url: &str) -> Option<String> {
    let url = url::Url::parse(directory_url).ok()?;
    let host = url.host_str()?;
    let port = url.port_or_known_default()?;
    Some(format!("{host}:{port}"))
}

fn manual_network(config: &ClientConfig) -> ManualNetworkSignal {
    let network = ManualNetworkSignal::new(true);
    network.set_position(config.position);
    network
}

/// Main application loop.
async fn run_app<P, N>(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    provider: P,
    network: N,
    store: FileStore,
    config: &ClientConfig,
) -> io::Result<()>
where
    P: ConnectionProvider + 'static,
    N: NetworkSignal + 'static,
{
    let (messenger, _events) =
        Messenger::load(provider, store, network, config.messenger.clone())
            .await
            .map_err(io::Error::other)?;
    let needs_name = messenger.identity().is_none();
    let (cmd_tx, mut snapshot_rx, handle) =
        spawn_messenger(messenger, config.channel_capacity);

    if needs_name && let Some(name) = &config.name {
        let _ = cmd_tx.try_send(Command::SetIdentity(name.clone()));
    }

    let mut app =
        App::new(snapshot_rx.borrow().clone()).with_timestamp_format(&config.timestamp_format);

    loop {
        if snapshot_rx.has_changed().unwrap_or(false) {
            app.update(snapshot_rx.borrow_and_update().clone());
        }

        terminal.draw(|frame| ui::draw(frame, &app))?;

        if event::poll(config.poll_timeout)?
            && let Event::Key(key) = event::read()?
        {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            if let Some(cmd) = app.handle_key_event(key) {
                match cmd_tx.try_send(cmd) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        app.notice = Some("Busy, try again".to_string());
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        app.notice = Some("Messenger stopped".to_string());
                    }
                }
            }
        }

        if app.should_quit {
            let _ = cmd_tx.send(Command::Shutdown).await;
            let _ = handle.await;
            return Ok(());
        }
    }
}

/// A scripted peer for the offline demo: accepts every connection and
/// answers each message.
async fn run_demo_peer(provider: LoopbackProvider) {
    let Ok(me) = PeerName::parse(DEMO_PEER) else {
        return;
    };
    if let Err(e) = provider.register(&me).await {
        tracing::warn!(error = %e, "demo peer could not register");
        return;
    }

    while let Some(event) = provider.next_event().await {
        match event {
            ProviderEvent::Incoming { peer } => {
                if let Err(e) = provider.accept(&peer).await {
                    tracing::debug!(%peer, error = %e, "demo peer accept failed");
                }
            }
            ProviderEvent::Data { peer, payload } => {
                let Ok(incoming) = codec::decode(&payload) else {
                    continue;
                };
                let text = match (incoming.kind, incoming.category) {
                    (PayloadKind::Request, Some(category)) => {
                        format!("{category} request logged, a volunteer will reach you")
                    }
                    (PayloadKind::Location, _) => "Location received, stay where you are".to_string(),
                    _ => format!("Copy that: {}", incoming.text),
                };
                let reply = PeerPayload {
                    from: me.to_string(),
                    kind: PayloadKind::Text,
                    text,
                    category: None,
                    coords: None,
                    sent_at: Timestamp::now(),
                };
                if let Ok(bytes) = codec::encode(&reply) {
                    let _ = provider.send(&peer, &bytes).await;
                }
            }
            ProviderEvent::Lost { reason } => {
                tracing::warn!(%reason, "demo peer lost its registration");
                break;
            }
            ProviderEvent::Opened { .. }
            | ProviderEvent::Closed { .. }
            | ProviderEvent::Error { .. } => {}
        }
    }
}
