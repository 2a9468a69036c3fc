//! Forum chat TUI (Terminal User Interface)
//!
//! A terminal chat window for one signed-in forum user.
//!
//! Usage: `forum-chat-tui [config.json]`

use anyhow::Context;
use crossterm::{
    event::{self, Event, KeyEvent, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use forum_chat::tui::{buffer_until_quit, ui::ui, App};
use forum_chat::{ChatConfig, ChatSession, User};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::fs::File;
use std::io;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const DEFAULT_CONFIG_PATH: &str = "chat.json";
const LOG_PATH: &str = "forum-chat.log";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = ChatConfig::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    let log_file = File::create(LOG_PATH).context("Failed to create log file")?;
    tracing_subscriber::fmt()
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .init();

    let user = config
        .user
        .clone()
        .unwrap_or_else(|| User {
            id: 0,
            username: "guest".to_string(),
            token: None,
        });
    let session = ChatSession::from_config(&config, user).context("Failed to set up chat")?;
    let mut app = App::new(session, config.contacts.clone());

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, &mut app).await;

    app.session.close();

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        error!("TUI exited with error: {:?}", err);
        println!("Error: {:?}", err);
    }

    Ok(())
}

async fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> anyhow::Result<()> {
    let mut key_rx = spawn_key_reader();
    let cancel = CancellationToken::new();
    terminal.draw(|f| ui(f, app))?;

    let mut early_keys = Vec::new();
    let started = tokio::select! {
        result = app.session.start(&cancel) => Some(result),
        _ = buffer_until_quit(&mut key_rx, &mut early_keys) => None,
    };
    match started {
        Some(Err(e)) => app.set_status(format!("Chat unavailable: {}", e)),
        Some(Ok(())) => {}
        None => {
            cancel.cancel();
            return Ok(());
        }
    }
    for key in early_keys {
        app.handle_key(key);
    }

    while !app.should_quit {
        terminal.draw(|f| ui(f, app))?;

        tokio::select! {
            key = key_rx.recv() => match key {
                Some(key) => app.handle_key(key),
                None => break,
            },
            event = app.session.next_event() => match event {
                Some(event) => app.handle_session_event(event),
                None => {
                    info!("Chat session ended");
                    break;
                }
            },
        }
    }

    Ok(())
}

/// Forward key presses from a blocking reader thread
fn spawn_key_reader() -> mpsc::UnboundedReceiver<KeyEvent> {
    let (key_tx, key_rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || loop {
        match event::poll(Duration::from_millis(100)) {
            Ok(true) => match event::read() {
                Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                    if key_tx.send(key).is_err() {
                        return;
                    }
                }
                Ok(_) => {}
                Err(_) => return,
            },
            Ok(false) => {
                if key_tx.is_closed() {
                    return;
                }
            }
            Err(_) => return,
        }
    });
    key_rx
}
