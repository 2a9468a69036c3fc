//! Chat window state and input handling

use crate::session::{ChatSession, SessionEvent};
use crate::storage::Contact;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tokio::sync::mpsc;

/// Terminal chat window
pub struct App {
    /// Chat session driving the window
    pub session: ChatSession,
    /// Contacts that can be cycled with Tab
    pub contacts: Vec<Contact>,
    /// Index of the active contact in `contacts`
    pub selected: Option<usize>,
    /// Input buffer for message composition
    pub input: String,
    /// Lines scrolled up from the newest message
    pub scroll_offset: usize,
    /// Transient notice shown in the status bar
    pub status_message: Option<String>,
    /// Should quit
    pub should_quit: bool,
}

impl App {
    /// Create the window; the first contact, if any, is opened
    pub fn new(session: ChatSession, contacts: Vec<Contact>) -> Self {
        let mut app = Self {
            session,
            contacts,
            selected: None,
            input: String::new(),
            scroll_offset: 0,
            status_message: None,
            should_quit: false,
        };
        if !app.contacts.is_empty() {
            app.next_contact();
        }
        app
    }

    /// Add character to input
    pub fn add_char(&mut self, c: char) {
        self.input.push(c);
    }

    /// Remove last character from input
    pub fn backspace(&mut self) {
        self.input.pop();
    }

    /// Clear input buffer
    pub fn clear_input(&mut self) {
        self.input.clear();
    }

    /// Send the input buffer
    pub fn submit(&mut self) {
        match self.session.send(&self.input) {
            Ok(Some(_)) => {
                self.clear_input();
                self.scroll_offset = 0;
                self.status_message = None;
            }
            Ok(None) => {}
            Err(e) => self.set_status(format!("Not sent: {}", e)),
        }
    }

    /// Open the next contact's conversation
    pub fn next_contact(&mut self) {
        if self.contacts.is_empty() {
            self.set_status("No contacts configured".to_string());
            return;
        }
        let next = match self.selected {
            Some(index) => (index + 1) % self.contacts.len(),
            None => 0,
        };
        self.selected = Some(next);
        self.scroll_offset = 0;
        self.status_message = None;
        self.session.select_contact(Some(self.contacts[next].clone()));
    }

    /// Scroll towards older messages
    pub fn scroll_up(&mut self) {
        if self.scroll_offset < self.session.messages().len().saturating_sub(1) {
            self.scroll_offset += 1;
        }
    }

    /// Scroll towards newer messages
    pub fn scroll_down(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_sub(1);
    }

    /// Set status message
    pub fn set_status(&mut self, message: String) {
        self.status_message = Some(message);
    }

    /// Apply a key press
    pub fn handle_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => self.should_quit = true,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.should_quit = true;
            }
            KeyCode::Enter => self.submit(),
            KeyCode::Backspace => self.backspace(),
            KeyCode::Tab => self.next_contact(),
            KeyCode::PageUp | KeyCode::Up => self.scroll_up(),
            KeyCode::PageDown | KeyCode::Down => self.scroll_down(),
            KeyCode::Char(c) => self.add_char(c),
            _ => {}
        }
    }

    /// Reflect a session event in the window
    pub fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::MessageReceived(_) => {
                if self.scroll_offset > 0 {
                    self.scroll_offset += 1;
                }
            }
            SessionEvent::HistoryLoaded { .. } => self.scroll_offset = 0,
            SessionEvent::HistoryFailed { error, .. } => {
                self.set_status(format!("Could not load history: {}", error));
            }
            SessionEvent::MalformedMessage(_) => {
                self.set_status("Received an unreadable message".to_string());
            }
            SessionEvent::StatusChanged(_) => self.status_message = None,
            SessionEvent::MessageDropped { .. } => {}
        }
    }
}

/// Hold keys typed while the session is still connecting
///
/// Returns once Esc is pressed; the held keys are meant for
/// `App::handle_key` after the connect completes. Never returns if the key
/// channel closes first.
pub async fn buffer_until_quit(
    key_rx: &mut mpsc::UnboundedReceiver<KeyEvent>,
    buffered: &mut Vec<KeyEvent>,
) {
    while let Some(key) = key_rx.recv().await {
        if key.code == KeyCode::Esc {
            return;
        }
        buffered.push(key);
    }
    std::future::pending::<()>().await
}
