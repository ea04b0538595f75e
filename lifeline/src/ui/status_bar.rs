//! Status bar rendering.

use ratatui::{
    Frame,
    layout::Rect,
    text::{Line, Span},
    widgets::Paragraph,
};

use super::theme;
use crate::app::{App, PanelFocus};

/// Render the status bar at the bottom of the screen.
pub fn render(frame: &mut Frame, area: Rect, app: &App) {
    let snapshot = &app.snapshot;
    let help_text = match app.focus {
        PanelFocus::Input => "Enter: send | Tab: panel | Esc: quit",
        PanelFocus::Sidebar => "\u{2191}\u{2193}: move | Enter: open | Tab: panel",
        PanelFocus::Chat => "\u{2191}\u{2193}: scroll | Tab: panel",
    };

    let identity = snapshot
        .identity
        .as_ref()
        .map_or_else(|| "no name".to_string(), ToString::to_string);
    let online_text = if snapshot.online { "Online" } else { "Offline" };

    let status_line = Line::from(vec![
        Span::styled("Lifeline", theme::own_name()),
        Span::raw(" | "),
        Span::raw(identity),
        Span::raw(" | "),
        Span::styled("\u{25cf}", theme::network_dot(snapshot.online)),
        Span::raw(format!(" {online_text}")),
        Span::raw(" | "),
        Span::raw(format!("Queued: {}", snapshot.queued)),
        Span::raw(" | "),
        Span::raw(snapshot.status.as_str()),
        Span::raw(" | "),
        Span::styled(help_text, theme::faint()),
    ]);

    frame.render_widget(
        Paragraph::new(status_line).style(theme::status_bar()),
        area,
    );
}
