//! TUI (Terminal User Interface) module
//!
//! The chat window that drives a `ChatSession`, kept apart from the binary
//! so it can be tested without a terminal.

pub mod app;
pub mod ui;

pub use app::{buffer_until_quit, App};
