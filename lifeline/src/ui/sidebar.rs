//! Sidebar rendering for the peer list.

use ratatui::{
    Frame,
    layout::Rect,
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem},
};

use super::theme;
use crate::app::{App, PanelFocus};

/// Render the sidebar: every known or connected peer, active one marked.
pub fn render(frame: &mut Frame, area: Rect, app: &App) {
    let is_focused = app.focus == PanelFocus::Sidebar;
    let active = app.snapshot.active_peer.as_ref();

    let items: Vec<ListItem> = app
        .sidebar_peers()
        .into_iter()
        .enumerate()
        .map(|(idx, peer)| {
            let is_selected = idx == app.selected_peer;
            let marker = if active == Some(&peer) { "\u{25b6} " } else { "  " };

            let line = Line::from(vec![
                Span::raw(marker),
                Span::styled("\u{25cf} ", theme::link_dot(app.is_connected(&peer))),
                Span::raw(peer.to_string()),
            ]);
            let style = if is_selected && is_focused {
                theme::selected()
            } else if active == Some(&peer) {
                theme::active()
            } else {
                theme::text()
            };
            ListItem::new(line).style(style)
        })
        .collect();

    let block = Block::default()
        .title(Span::styled("Peers", theme::title()))
        .borders(Borders::ALL)
        .border_style(theme::border(is_focused));

    frame.render_widget(List::new(items).block(block), area);
}
