//! Application state and event handling.
//!
//! [`App`] holds only what the terminal needs between frames: the input
//! line, focus, scroll position, and the latest [`Snapshot`] published by
//! the messenger task. Key presses that mean something to the messenger
//! come back out of [`App::handle_key_event`] as [`Command`]s.

use std::collections::BTreeSet;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use lifeline_proto::message::{RequestCategory, Timestamp};

use crate::messenger::{Message, Snapshot, suggest_identity};
use crate::provider::PeerName;
use crate::runtime::Command;

/// Which panel is currently focused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelFocus {
    /// Input box is focused (default).
    Input,
    /// Sidebar peer list is focused.
    Sidebar,
    /// Chat message list is focused.
    Chat,
}

/// What an input line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputAction {
    /// Hand a command to the messenger.
    Command(Command),
    /// Leave the application.
    Quit,
}

/// Why an input line could not be understood.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    /// The slash command does not exist.
    #[error("unknown command {0}, try /name /connect /select /loc /req /disconnect /online /offline /quit")]
    UnknownCommand(String),
    /// The command needs an argument.
    #[error("usage: {0}")]
    MissingArgument(&'static str),
    /// `/req` named no known category.
    #[error(transparent)]
    Category(#[from] lifeline_proto::message::UnknownCategory),
}

/// Parse one submitted input line.
///
/// Lines starting with `/` are commands; anything else is text for the
/// active peer. `/name` without an argument proposes a readable name.
/// Returns `Ok(None)` for a blank line.
///
/// # Errors
///
/// Returns an [`InputError`] for unknown commands, missing arguments, and
/// unknown request categories.
pub fn parse_input(line: &str) -> Result<Option<InputAction>, InputError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(InputAction::Command(Command::SendText(line.to_string()))));
    };

    let (name, arg) = rest
        .split_once(char::is_whitespace)
        .map_or((rest, ""), |(name, arg)| (name, arg.trim()));
    let required = |usage: &'static str| {
        if arg.is_empty() {
            Err(InputError::MissingArgument(usage))
        } else {
            Ok(arg.to_string())
        }
    };

    let command = match name {
        "name" if arg.is_empty() => Command::SetIdentity(suggest_identity()),
        "name" => Command::SetIdentity(arg.to_string()),
        "connect" => Command::Connect(required("/connect <name>")?),
        "select" => Command::Select(required("/select <name>")?),
        "loc" => Command::SendLocation,
        "req" => Command::SendRequest(required("/req <category>")?.parse::<RequestCategory>()?),
        "disconnect" => Command::DisconnectAll,
        "online" => Command::SetOnline(true),
        "offline" => Command::SetOnline(false),
        "quit" => return Ok(Some(InputAction::Quit)),
        other => return Err(InputError::UnknownCommand(format!("/{other}"))),
    };
    Ok(Some(InputAction::Command(command)))
}

/// Format a timestamp in local time with a chrono format string.
#[must_use]
pub fn format_timestamp(ts: Timestamp, format: &str) -> String {
    use chrono::{Local, TimeZone};
    let ms = ts.as_millis();
    let secs = i64::try_from(ms / 1000).unwrap_or(i64::MAX);
    let nsecs = u32::try_from((ms % 1000) * 1_000_000).unwrap_or(0);
    match Local.timestamp_opt(secs, nsecs) {
        chrono::LocalResult::Single(dt) => dt.format(format).to_string(),
        _ => "??:??".to_string(),
    }
}

/// Main application state.
pub struct App {
    /// Current text input.
    pub input: String,
    /// Cursor position in input (character index).
    pub cursor_position: usize,
    /// Which panel is focused.
    pub focus: PanelFocus,
    /// Scroll offset for the message list.
    pub message_scroll: usize,
    /// Highlighted row in the sidebar.
    pub selected_peer: usize,
    /// Last messenger state received.
    pub snapshot: Snapshot,
    /// Local feedback, e.g. an unparseable command. Cleared on next submit.
    pub notice: Option<String>,
    /// chrono format for message timestamps.
    pub timestamp_format: String,
    /// Whether the app should quit.
    pub should_quit: bool,
}

impl App {
    /// Create an application showing `snapshot`.
    #[must_use]
    pub fn new(snapshot: Snapshot) -> Self {
        let mut app = Self {
            input: String::new(),
            cursor_position: 0,
            focus: PanelFocus::Input,
            message_scroll: 0,
            selected_peer: 0,
            snapshot: Snapshot::default(),
            notice: None,
            timestamp_format: "%H:%M".to_string(),
            should_quit: false,
        };
        app.update(snapshot);
        app
    }

    /// Set the timestamp display format.
    #[must_use]
    pub fn with_timestamp_format(mut self, format: impl Into<String>) -> Self {
        self.timestamp_format = format.into();
        self
    }

    /// Replace the displayed messenger state.
    ///
    /// Follows the bottom of the conversation when it grows or the active
    /// peer changes, and keeps the sidebar cursor in range.
    pub fn update(&mut self, snapshot: Snapshot) {
        let was_at_bottom = self.message_scroll + 1 >= self.active_messages().len();
        let peer_changed = snapshot.active_peer != self.snapshot.active_peer;
        self.snapshot = snapshot;

        if peer_changed || was_at_bottom {
            self.message_scroll = self.active_messages().len().saturating_sub(1);
        }
        let peers = self.sidebar_peers().len();
        if self.selected_peer >= peers {
            self.selected_peer = peers.saturating_sub(1);
        }
    }

    /// Every peer worth listing: known, connected, or with a thread.
    #[must_use]
    pub fn sidebar_peers(&self) -> Vec<PeerName> {
        let mut peers: BTreeSet<PeerName> = self.snapshot.known.iter().cloned().collect();
        peers.extend(self.snapshot.connected.iter().cloned());
        peers.extend(self.snapshot.threads.keys().cloned());
        peers.into_iter().collect()
    }

    /// The thread with the active peer, oldest first.
    #[must_use]
    pub fn active_messages(&self) -> &[Message] {
        self.snapshot
            .active_peer
            .as_ref()
            .and_then(|peer| self.snapshot.threads.get(peer))
            .map_or(&[], Vec::as_slice)
    }

    /// Whether `peer` has an open connection.
    #[must_use]
    pub fn is_connected(&self, peer: &PeerName) -> bool {
        self.snapshot.connected.contains(peer)
    }

    /// Handle a key event. Returns a command for the messenger, if any.
    pub fn handle_key_event(&mut self, key: KeyEvent) -> Option<Command> {
        match (key.code, key.modifiers) {
            (KeyCode::Char('c'), KeyModifiers::CONTROL) | (KeyCode::Esc, _) => {
                self.should_quit = true;
                return None;
            }
            (KeyCode::Tab, KeyModifiers::SHIFT) | (KeyCode::BackTab, _) => {
                self.cycle_focus_backward();
                return None;
            }
            (KeyCode::Tab, _) => {
                self.cycle_focus_forward();
                return None;
            }
            _ => {}
        }

        match self.focus {
            PanelFocus::Input => self.handle_input_key(key),
            PanelFocus::Sidebar => self.handle_sidebar_key(key),
            PanelFocus::Chat => {
                self.handle_chat_key(key);
                None
            }
        }
    }

    fn handle_input_key(&mut self, key: KeyEvent) -> Option<Command> {
        match key.code {
            KeyCode::Enter => return self.submit(),
            KeyCode::Char(c) => self.enter_char(c),
            KeyCode::Backspace => self.delete_char(),
            KeyCode::Left => self.cursor_position = self.cursor_position.saturating_sub(1),
            KeyCode::Right => {
                self.cursor_position = (self.cursor_position + 1).min(self.input.chars().count());
            }
            KeyCode::Home => self.cursor_position = 0,
            KeyCode::End => self.cursor_position = self.input.chars().count(),
            _ => {}
        }
        None
    }

    fn handle_sidebar_key(&mut self, key: KeyEvent) -> Option<Command> {
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected_peer = self.selected_peer.saturating_sub(1);
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if self.selected_peer + 1 < self.sidebar_peers().len() {
                    self.selected_peer += 1;
                }
            }
            KeyCode::Enter => {
                let peer = self.sidebar_peers().into_iter().nth(self.selected_peer)?;
                return Some(Command::Select(peer.into()));
            }
            _ => {}
        }
        None
    }

    fn handle_chat_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => {
                self.message_scroll = self.message_scroll.saturating_sub(1);
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if self.message_scroll + 1 < self.active_messages().len() {
                    self.message_scroll += 1;
                }
            }
            _ => {}
        }
    }

    /// Cycle focus forward: Input -> Sidebar -> Chat -> Input.
    const fn cycle_focus_forward(&mut self) {
        self.focus = match self.focus {
            PanelFocus::Input => PanelFocus::Sidebar,
            PanelFocus::Sidebar => PanelFocus::Chat,
            PanelFocus::Chat => PanelFocus::Input,
        };
    }

    /// Cycle focus backward: Input -> Chat -> Sidebar -> Input.
    const fn cycle_focus_backward(&mut self) {
        self.focus = match self.focus {
            PanelFocus::Input => PanelFocus::Chat,
            PanelFocus::Chat => PanelFocus::Sidebar,
            PanelFocus::Sidebar => PanelFocus::Input,
        };
    }

    fn submit(&mut self) -> Option<Command> {
        let line = std::mem::take(&mut self.input);
        self.cursor_position = 0;
        self.notice = None;
        match parse_input(&line) {
            Ok(Some(InputAction::Command(command))) => Some(command),
            Ok(Some(InputAction::Quit)) => {
                self.should_quit = true;
                None
            }
            Ok(None) => None,
            Err(e) => {
                self.notice = Some(e.to_string());
                self.input = line;
                self.cursor_position = self.input.chars().count();
                None
            }
        }
    }

    fn byte_index(&self, char_index: usize) -> usize {
        self.input
            .char_indices()
            .nth(char_index)
            .map_or(self.input.len(), |(i, _)| i)
    }

    fn enter_char(&mut self, c: char) {
        let at = self.byte_index(self.cursor_position);
        self.input.insert(at, c);
        self.cursor_position += 1;
    }

    fn delete_char(&mut self) {
        if self.cursor_position > 0 {
            let at = self.byte_index(self.cursor_position - 1);
            self.input.remove(at);
            self.cursor_position -= 1;
        }
    }
}
