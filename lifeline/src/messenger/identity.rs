//! Identity and session lifecycle.
//!
//! `NoIdentity -> Registering -> Ready`, and `Ready -> Resetting ->
//! Registering` when the user picks a different name. An identity is
//! persisted only once the directory has accepted it.
//!
//! When the provider loses the registration the session drops back to
//! `Registering` and the persisted identity registers again on the next
//! online transition. A retry that fails stays in `Registering`, except
//! when someone else took the name meanwhile.

use rand::Rng;

use super::{Messenger, MessengerError, MessengerEvent};
use crate::network::NetworkSignal;
use crate::provider::{ConnectionProvider, PeerName, ProviderError};
use crate::store::KeyValueStore;
use crate::store::repository::PersistedState;

/// Words used by [`suggest_identity`].
const TAG_WORDS: [&str; 9] = [
    "rescue", "team", "safe", "camp", "hope", "aid", "alpha", "bravo", "delta",
];

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    /// No name is registered.
    #[default]
    NoIdentity,
    /// A registration is in flight or waiting to be retried.
    Registering,
    /// Registered and able to connect.
    Ready,
    /// Tearing down state for an identity change.
    Resetting,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoIdentity => write!(f, "no identity"),
            Self::Registering => write!(f, "registering"),
            Self::Ready => write!(f, "ready"),
            Self::Resetting => write!(f, "resetting"),
        }
    }
}

/// Propose an easy-to-say name such as `rescue-42`.
#[must_use]
pub fn suggest_identity() -> String {
    let mut rng = rand::rng();
    let word = TAG_WORDS[rng.random_range(0..TAG_WORDS.len())];
    let number: u8 = rng.random_range(0..100);
    format!("{word}-{number}")
}

impl<P: ConnectionProvider, S: KeyValueStore, N: NetworkSignal> Messenger<P, S, N> {
    /// Register the persisted identity, if there is one.
    ///
    /// Without a persisted identity this only sets the status prompt.
    ///
    /// # Errors
    ///
    /// Same as [`set_identity`](Self::set_identity).
    pub async fn start(&mut self) -> Result<(), MessengerError> {
        if self.session == SessionState::Ready {
            return Ok(());
        }
        match self.state.identity.clone() {
            Some(name) => self.register(name).await,
            None => {
                self.set_status("Choose a name to get started");
                Ok(())
            }
        }
    }

    /// Register `raw` as this device's identity.
    ///
    /// Choosing a name different from the current one is destructive: every
    /// connection is closed and history, known peers, queue, and active
    /// peer are cleared before the new name registers. Choosing the name
    /// that is already registered does nothing.
    ///
    /// # Errors
    ///
    /// - [`MessengerError::InvalidName`] if `raw` is not a valid name.
    /// - [`MessengerError::NameTaken`] if another session holds it; the
    ///   messenger stays in [`SessionState::NoIdentity`].
    /// - [`MessengerError::Registration`] for other provider failures.
    /// - [`MessengerError::Persistence`] if the new state could not be saved.
    pub async fn set_identity(&mut self, raw: &str) -> Result<(), MessengerError> {
        let name = match PeerName::parse(raw) {
            Ok(name) => name,
            Err(e) => return Err(self.fail(e.into())),
        };

        if self.session == SessionState::Ready && self.state.identity.as_ref() == Some(&name) {
            self.set_status(format!("Already registered as {name}"));
            return Ok(());
        }

        let reset = if self.state.identity.as_ref().is_some_and(|current| *current != name) {
            self.reset_for_identity_change().await
        } else {
            Ok(())
        };
        let registered = self.register(name).await;
        registered.and(reset)
    }

    /// Close every connection and release the registration. Persisted
    /// state is kept so the next start resumes where this one ended.
    pub async fn shutdown(&mut self) {
        self.close_all_connections().await;
        self.provider.unregister().await;
        self.session = SessionState::NoIdentity;
        self.set_status("Session closed");
        tracing::info!(identity = ?self.state.identity, "messenger shut down");
    }

    async fn register(&mut self, name: PeerName) -> Result<(), MessengerError> {
        self.session = SessionState::Registering;
        self.set_status(format!("Registering as {name}..."));
        tracing::info!(%name, "registering identity");

        if let Err(e) = self.provider.register(&name).await {
            let retry = !matches!(e, ProviderError::NameTaken(_))
                && self.state.identity.as_ref() == Some(&name);
            self.session = if retry {
                SessionState::Registering
            } else {
                SessionState::NoIdentity
            };
            let err = match e {
                ProviderError::NameTaken(_) => MessengerError::NameTaken(name),
                other => MessengerError::Registration(other),
            };
            tracing::warn!(error = %err, "registration failed");
            return Err(self.fail(err));
        }

        self.session = SessionState::Ready;
        if self.state.identity.as_ref() != Some(&name) {
            self.state.identity = Some(name.clone());
            self.emit(MessengerEvent::IdentityChanged {
                identity: Some(name.clone()),
            });
        }
        tracing::info!(%name, "identity registered");
        let saved = self.persist().await;

        let attempted = self.state.known_peers.len();
        let reconnected = self.reconnect_known_peers().await;
        if attempted == 0 {
            self.set_status(format!("Registered as {name}"));
        } else if let Ok(count) = &reconnected {
            self.set_status(format!(
                "Registered as {name}, reconnected to {count} of {attempted} peers"
            ));
        }
        saved.and(reconnected.map(|_| ()))
    }

    /// Register the persisted identity again after a lost or failed
    /// registration. Does nothing unless a retry is due.
    pub(super) async fn resume_registration(&mut self) -> Result<(), MessengerError> {
        if self.session != SessionState::Registering {
            return Ok(());
        }
        match self.state.identity.clone() {
            Some(name) => self.register(name).await,
            None => Ok(()),
        }
    }

    /// The provider dropped the registration. Connections are gone but the
    /// identity and everything persisted stay. Registration is retried at
    /// once if the network is up, otherwise when it comes back.
    pub(super) async fn handle_registration_lost(
        &mut self,
        reason: &str,
    ) -> Result<(), MessengerError> {
        if self.session != SessionState::Ready {
            return Ok(());
        }
        tracing::warn!(%reason, "directory registration lost");
        self.close_all_connections().await;
        self.session = SessionState::Registering;
        self.set_status(format!(
            "Lost contact with the directory ({reason}), will reconnect when online"
        ));
        if self.network.is_online() {
            return self.resume_registration().await;
        }
        Ok(())
    }

    async fn reset_for_identity_change(&mut self) -> Result<(), MessengerError> {
        self.session = SessionState::Resetting;
        tracing::info!(old = ?self.state.identity, "identity change, clearing all state");
        self.close_all_connections().await;
        self.provider.unregister().await;
        self.state = PersistedState::default();
        self.emit(MessengerEvent::IdentityChanged { identity: None });
        self.persist().await
    }
}
