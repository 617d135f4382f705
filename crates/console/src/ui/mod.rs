//! User interface module for the HostPanel console.
//!
//! This module provides the interactive terminal console and its
//! scrollback handling.

pub mod scroll;
pub mod tui;

// Re-export main types for convenience
pub use scroll::Scrollback;
pub use tui::{export_log, line_style, ConsoleTui, ConsoleView, KeyOutcome};
