//! Styles for the terminal UI.
//!
//! Widgets ask for a style by role rather than by color, so the palette
//! lives here and nowhere else.

use lifeline_proto::message::RequestCategory;
use ratatui::style::{Color, Modifier, Style};

const TEXT: Color = Color::White;
const FAINT: Color = Color::Gray;
const ACCENT: Color = Color::Cyan;
const ALARM: Color = Color::Red;
const CAUTION: Color = Color::Yellow;
const GOOD: Color = Color::Green;
const BAR: Color = Color::Rgb(30, 30, 50);

/// Peer names get one of these, chosen by name so a peer keeps its color.
const PEER_COLORS: [Color; 6] = [
    Color::Cyan,
    Color::Green,
    Color::Magenta,
    Color::LightBlue,
    Color::LightYellow,
    Color::Rgb(255, 165, 0),
];

/// Plain message and input text.
#[must_use]
pub fn text() -> Style {
    Style::default().fg(TEXT)
}

/// Placeholders and key help.
#[must_use]
pub fn faint() -> Style {
    Style::default().fg(FAINT)
}

/// Our own name in a thread, and the app name in the status bar.
#[must_use]
pub fn own_name() -> Style {
    text().add_modifier(Modifier::BOLD)
}

/// A peer's name in a thread.
#[must_use]
pub fn peer_name(name: &str) -> Style {
    let hash = name
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
    Style::default().fg(PEER_COLORS[hash as usize % PEER_COLORS.len()])
}

/// Panel border: accented while the panel has focus.
#[must_use]
pub fn border(focused: bool) -> Style {
    if focused { active() } else { text() }
}

/// The active conversation in the peer list.
#[must_use]
pub fn active() -> Style {
    Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)
}

/// The list row under the cursor.
#[must_use]
pub fn selected() -> Style {
    Style::default()
        .fg(Color::Black)
        .bg(ACCENT)
        .add_modifier(Modifier::BOLD)
}

/// Panel title.
#[must_use]
pub fn title() -> Style {
    Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)
}

/// Dot next to a peer: lit while a link is open.
#[must_use]
pub fn link_dot(connected: bool) -> Style {
    Style::default().fg(if connected { GOOD } else { Color::DarkGray })
}

/// Dot next to the network state in the status bar.
#[must_use]
pub fn network_dot(online: bool) -> Style {
    Style::default().fg(if online { GOOD } else { CAUTION })
}

/// The `[LOC]` tag in front of a shared location.
#[must_use]
pub fn location_tag() -> Style {
    Style::default().fg(Color::LightBlue)
}

/// A request marker. SOS is drawn on an alarm background.
#[must_use]
pub fn request(category: Option<RequestCategory>) -> Style {
    match category {
        Some(RequestCategory::Sos) => Style::default()
            .fg(TEXT)
            .bg(ALARM)
            .add_modifier(Modifier::BOLD),
        _ => Style::default().fg(CAUTION).add_modifier(Modifier::BOLD),
    }
}

/// Hint shown in an empty chat panel.
#[must_use]
pub fn hint() -> Style {
    Style::default()
        .fg(Color::Rgb(100, 140, 180))
        .add_modifier(Modifier::ITALIC)
}

#[must_use]
pub fn timestamp() -> Style {
    Style::default().fg(Color::Rgb(120, 120, 120))
}

#[must_use]
pub fn cursor() -> Style {
    own_name()
}

/// A rejected command, shown in the input box title.
#[must_use]
pub fn notice() -> Style {
    Style::default().fg(ALARM)
}

#[must_use]
pub fn status_bar() -> Style {
    Style::default().fg(TEXT).bg(BAR)
}
