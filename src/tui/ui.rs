//! Chat window rendering

use crate::session::ChatStatus;
use crate::tui::app::App;
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

/// Renders the chat window
pub fn ui(f: &mut Frame, app: &App) {
    let size = f.size();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3), // Title
            Constraint::Min(5),    // Message log
            Constraint::Length(3), // Input box
            Constraint::Length(3), // Status/Help
        ])
        .split(size);

    let title_text = match app.session.active_contact() {
        Some(contact) => format!("Chat with {}", contact.username),
        None => "No contact selected".to_string(),
    };
    let title = Paragraph::new(title_text)
        .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(title, chunks[0]);

    let views = app.session.views();
    if views.is_empty() {
        let placeholder = if app.session.is_loading_history() {
            "Loading conversation..."
        } else {
            "No messages yet. Type a message below and press Enter to send."
        };
        let empty = Paragraph::new(placeholder)
            .style(Style::default().fg(Color::DarkGray))
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL).title("Messages"));
        f.render_widget(empty, chunks[1]);
    } else {
        let visible = chunks[1].height.saturating_sub(2) as usize;
        let (start, end) = visible_range(views.len(), visible, app.scroll_offset);

        let lines: Vec<Line> = views[start..end]
            .iter()
            .map(|view| {
                let (label, color) = if view.is_sender_message {
                    ("You".to_string(), Color::Green)
                } else {
                    (view.sender.clone(), Color::Blue)
                };
                Line::from(vec![
                    Span::styled(
                        format!("{}: ", label),
                        Style::default().fg(color).add_modifier(Modifier::BOLD),
                    ),
                    Span::styled(view.content.clone(), Style::default().fg(Color::White)),
                ])
            })
            .collect();

        let log = Paragraph::new(lines).block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("Messages ({}/{})", end, views.len())),
        );
        f.render_widget(log, chunks[1]);
    }

    let input_style = if app.session.status().can_send() {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let input = Paragraph::new(app.input.as_str())
        .style(input_style)
        .block(Block::default().borders(Borders::ALL).title("Type a message"));
    f.render_widget(input, chunks[2]);

    let status_color = match app.session.status() {
        ChatStatus::Ready => Color::Green,
        ChatStatus::Connecting => Color::Yellow,
        ChatStatus::Offline | ChatStatus::Unavailable(_) => Color::Red,
    };
    let help_text = app.status_message.clone().unwrap_or_else(|| {
        "Enter: Send | Tab: Next contact | PgUp/PgDn: Scroll | Esc: Quit".to_string()
    });
    let status = Paragraph::new(Line::from(vec![
        Span::styled(
            format!("[{}] ", app.session.status().label()),
            Style::default().fg(status_color),
        ),
        Span::styled(help_text, Style::default().fg(Color::DarkGray)),
    ]))
    .alignment(Alignment::Center)
    .block(Block::default().borders(Borders::ALL));
    f.render_widget(status, chunks[3]);
}

/// Slice of the log shown for `offset` lines scrolled up from the newest
pub fn visible_range(total: usize, visible: usize, offset: usize) -> (usize, usize) {
    let end = total.saturating_sub(offset.min(total.saturating_sub(1)));
    let start = end.saturating_sub(visible);
    (start, end)
}
