//! Event loop wiring the TUI to a [`Messenger`].
//!
//! The messenger runs on one background task. The TUI sends [`Command`]s
//! and reads the latest [`Snapshot`] from a watch channel on every frame.
//!
//! ```text
//! TUI (main thread)  ←── watch<Snapshot> ───  messenger task
//!                     ─── Command        →      ↑ provider events
//!                                               ↑ network transitions
//! ```
//!
//! Inputs are handled one at a time: a command, a provider event, or a
//! network transition runs to completion before the next is taken.

use lifeline_proto::message::RequestCategory;
use tokio::sync::{mpsc, watch};

use crate::messenger::{Messenger, MessengerError, Snapshot};
use crate::network::NetworkSignal;
use crate::provider::{ConnectionProvider, ProviderEvent};
use crate::store::KeyValueStore;

/// Commands sent from the TUI to the messenger task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Register or change the identity.
    SetIdentity(String),
    /// Open a connection to a peer.
    Connect(String),
    /// Focus a conversation.
    Select(String),
    /// Send free text to the active peer.
    SendText(String),
    /// Share the device position with the active peer.
    SendLocation,
    /// Ask the active peer for help.
    SendRequest(RequestCategory),
    /// Close every connection and forget known peers.
    DisconnectAll,
    /// Force the online flag (manual signals only).
    SetOnline(bool),
    /// Tear down and stop the task.
    Shutdown,
}

enum Input {
    Command(Command),
    Provider(ProviderEvent),
    Network(bool),
    ProviderGone,
    NetworkGone,
    Stop,
}

/// Spawn the messenger task and return channel handles.
///
/// The task first calls [`Messenger::start`], then serves inputs until it
/// receives [`Command::Shutdown`] or every command sender is dropped. The
/// snapshot is republished after each handled input.
pub fn spawn_messenger<P, S, N>(
    messenger: Messenger<P, S, N>,
    channel_capacity: usize,
) -> (
    mpsc::Sender<Command>,
    watch::Receiver<Snapshot>,
    tokio::task::JoinHandle<()>,
)
where
    P: ConnectionProvider + 'static,
    S: KeyValueStore + 'static,
    N: NetworkSignal + 'static,
{
    let (cmd_tx, cmd_rx) = mpsc::channel(channel_capacity.max(1));
    let (snapshot_tx, snapshot_rx) = watch::channel(messenger.snapshot());
    let handle = tokio::spawn(run(messenger, cmd_rx, snapshot_tx));
    (cmd_tx, snapshot_rx, handle)
}

async fn run<P, S, N>(
    mut messenger: Messenger<P, S, N>,
    mut cmd_rx: mpsc::Receiver<Command>,
    snapshot_tx: watch::Sender<Snapshot>,
) where
    P: ConnectionProvider,
    S: KeyValueStore,
    N: NetworkSignal,
{
    let mut network_rx = messenger.network().subscribe();

    if let Err(e) = messenger.start().await {
        tracing::warn!(error = %e, "startup registration failed");
    }
    snapshot_tx.send_replace(messenger.snapshot());

    let mut provider_alive = true;
    let mut network_alive = true;

    loop {
        let input = tokio::select! {
            cmd = cmd_rx.recv() => cmd.map_or(Input::Stop, Input::Command),
            event = messenger.provider().next_event(), if provider_alive => {
                event.map_or(Input::ProviderGone, Input::Provider)
            }
            changed = network_rx.changed(), if network_alive => match changed {
                Ok(()) => Input::Network(*network_rx.borrow_and_update()),
                Err(_) => Input::NetworkGone,
            },
        };

        let outcome = match input {
            Input::Command(Command::Shutdown) | Input::Stop => {
                messenger.shutdown().await;
                snapshot_tx.send_replace(messenger.snapshot());
                tracing::info!("messenger task stopped");
                return;
            }
            Input::Command(cmd) => apply(&mut messenger, cmd).await,
            Input::Provider(event) => messenger.handle_provider_event(event).await,
            Input::Network(online) => messenger.handle_network_change(online).await,
            Input::ProviderGone => {
                tracing::warn!("connection provider stopped producing events");
                provider_alive = false;
                Ok(())
            }
            Input::NetworkGone => {
                tracing::warn!("network signal closed");
                network_alive = false;
                Ok(())
            }
        };
        if let Err(e) = outcome {
            tracing::debug!(error = %e, "input handled with error");
        }
        snapshot_tx.send_replace(messenger.snapshot());
    }
}

async fn apply<P, S, N>(
    messenger: &mut Messenger<P, S, N>,
    cmd: Command,
) -> Result<(), MessengerError>
where
    P: ConnectionProvider,
    S: KeyValueStore,
    N: NetworkSignal,
{
    match cmd {
        Command::SetIdentity(name) => messenger.set_identity(&name).await,
        Command::Connect(name) => messenger.connect(&name).await,
        Command::Select(name) => messenger.select_active_peer(&name).await,
        Command::SendText(text) => messenger.send_text(&text).await.map(|_| ()),
        Command::SendLocation => messenger.send_location().await.map(|_| ()),
        Command::SendRequest(category) => messenger.send_request(category).await.map(|_| ()),
        Command::DisconnectAll => messenger.disconnect_all().await,
        Command::SetOnline(online) => {
            messenger.request_online(online);
            Ok(())
        }
        Command::Shutdown => Ok(()),
    }
}
