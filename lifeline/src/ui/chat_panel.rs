//! Chat panel rendering (message list + input box).

use lifeline_proto::message::PayloadKind;
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
};

use super::theme;
use crate::app::{App, PanelFocus, format_timestamp};
use crate::messenger::{Message, Sender};

/// Render the chat panel (messages + input box).
pub fn render(frame: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(3)])
        .split(area);

    render_messages(frame, chunks[0], app);
    render_input(frame, chunks[1], app);
}

fn message_line<'a>(msg: &'a Message, timestamp_format: &str) -> Line<'a> {
    let sender = msg.sender.to_string();
    let sender_style = match &msg.sender {
        Sender::Me => theme::own_name(),
        Sender::Peer(name) => theme::peer_name(name.as_str()),
    };

    let mut spans = vec![
        Span::styled(format_timestamp(msg.timestamp, timestamp_format), theme::timestamp()),
        Span::raw(" "),
        Span::styled(sender, sender_style),
        Span::raw(": "),
    ];
    match msg.kind {
        PayloadKind::Text => spans.push(Span::styled(msg.text.as_str(), theme::text())),
        PayloadKind::Location => {
            spans.push(Span::styled("[LOC] ", theme::location_tag()));
            spans.push(Span::styled(msg.text.as_str(), theme::text()));
        }
        PayloadKind::Request => {
            spans.push(Span::styled(
                format!("[REQ {}]", msg.text),
                theme::request(msg.category),
            ));
        }
    }
    Line::from(spans)
}

/// Render the message list for the active peer.
fn render_messages(frame: &mut Frame, area: Rect, app: &App) {
    let is_focused = app.focus == PanelFocus::Chat;
    let snapshot = &app.snapshot;

    let title = match &snapshot.active_peer {
        Some(peer) if app.is_connected(peer) => format!("Chat with {peer}"),
        Some(peer) => format!("Chat with {peer} (not connected)"),
        None => "Chat".to_string(),
    };

    let messages = app.active_messages();
    let items: Vec<ListItem> = if snapshot.active_peer.is_none() {
        let hint = if snapshot.identity.is_none() {
            "Pick a name with /name, then /connect <peer>"
        } else {
            "No conversation selected. Use /connect <peer>"
        };
        vec![ListItem::new(Line::from(Span::styled(hint, theme::hint())))]
    } else {
        // Keep the scroll position on screen, showing as much history above it as fits.
        let visible = usize::from(area.height.saturating_sub(2));
        let start = (app.message_scroll + 1).saturating_sub(visible);
        messages
            .iter()
            .skip(start)
            .map(|msg| ListItem::new(message_line(msg, &app.timestamp_format)))
            .collect()
    };

    let block = Block::default()
        .title(Span::styled(title, theme::title()))
        .borders(Borders::ALL)
        .border_style(theme::border(is_focused));

    frame.render_widget(List::new(items).block(block), area);
}

/// Render the input box.
fn render_input(frame: &mut Frame, area: Rect, app: &App) {
    let is_focused = app.focus == PanelFocus::Input;

    let input_line = if app.input.is_empty() && !is_focused {
        Line::from(Span::styled(
            "Type a message or /command...",
            theme::faint(),
        ))
    } else if is_focused {
        let split = app
            .input
            .char_indices()
            .nth(app.cursor_position)
            .map_or(app.input.len(), |(i, _)| i);
        let (before, after) = app.input.split_at(split);
        Line::from(vec![
            Span::styled(before, theme::text()),
            Span::styled("\u{2588}", theme::cursor()),
            Span::styled(after, theme::text()),
        ])
    } else {
        Line::from(Span::styled(app.input.as_str(), theme::text()))
    };

    let title = app.notice.as_deref().map_or_else(
        || Span::raw("Input"),
        |notice| Span::styled(notice, theme::notice()),
    );
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(theme::border(is_focused));

    frame.render_widget(Paragraph::new(input_line).block(block), area);
}
