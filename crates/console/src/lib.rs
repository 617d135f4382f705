//! # HostPanel Console Library
//!
//! This crate provides the live console client for HostPanel game servers:
//! it attaches to a server's log stream, keeps the connection alive across
//! drops and shows install and startup progress while the server comes up.
//!
//! ## Overview
//!
//! - **Connection State Machine**: connect only while the server is live,
//!   reconnect with exponential backoff, ignore events from stale channels
//! - **Log Buffer**: bounded scrollback with reconnect/disconnect markers
//! - **Classifiers**: per-line display styles and startup milestones
//! - **Install Progress**: time-based estimate anchored on the creation time
//! - **Command Input**: submission gating and command history
//! - **Network**: WebSocket console channel and lifecycle API polling
//! - **User Interface**: ratatui console screen
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       SessionRunner                          │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │                   ConsoleSession                       │  │
//! │  │  ConnectionMachine │ LogIngest │ InstallTracker │ Input │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │         ▲ events                      │ actions              │
//! │  ┌──────┴────────┐  ┌───────────────┐ ▼ ┌────────────────┐   │
//! │  │ StatusPoller  │  │  timers       │   │ WebSocket      │   │
//! │  │ (REST API)    │  │  (tokio)      │   │ transport      │   │
//! │  └───────────────┘  └───────────────┘   └────────────────┘   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use console::auth::StaticCredential;
//! use console::network::WebSocketTransport;
//! use console::{ConsoleSession, SessionRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let url = protocol::console_url("https://panel.example.com", "srv-1")?;
//!     let mut runner = SessionRunner::new(
//!         ConsoleSession::new("srv-1"),
//!         url,
//!         Arc::new(WebSocketTransport::default()),
//!         Arc::new(StaticCredential::new("jwt")),
//!     );
//!
//!     // Status events from the poller drive the connection.
//!     while !runner.is_finished() {
//!         runner.step().await;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`auth`]: Credential providers
//! - [`session`]: Session state, classifiers and the async runner
//! - [`network`]: Console channel transport and lifecycle API client
//! - [`ui`]: Terminal console

pub mod auth;
pub mod config;
pub mod network;
pub mod session;
pub mod ui;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::Config;

// Re-export session types for convenience
pub use session::{
    Action, ConnectionState, ConsoleSession, LineStyle, LogBuffer, ReconnectPolicy, SessionEvent,
    SessionRunner,
};

// Re-export network types for convenience
pub use network::{ApiClient, ConsoleTransport, StatusPoller, WebSocketTransport};

// Re-export UI types for convenience
pub use ui::{ConsoleTui, ConsoleView, KeyOutcome};
