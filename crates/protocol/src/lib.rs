//! # HostPanel Protocol Library
//!
//! This crate provides the wire-level definitions shared by the HostPanel
//! console client: channel messages, lifecycle API records, address
//! derivation and the common error type.
//!
//! ## Overview
//!
//! - **Channel Messages**: the `{"token": ..}` handshake, outbound commands,
//!   inbound log/error frames with raw-text fallback
//! - **Server Records**: lifecycle status, creation time and metrics as
//!   served by the REST API
//! - **Endpoints**: REST and WebSocket addresses derived from one API base URL
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{console_url, decode_line, ClientMessage, Handshake};
//!
//! let url = console_url("https://api.example.com", "srv-1").unwrap();
//! assert_eq!(url.scheme(), "wss");
//!
//! let hello = Handshake::new("short-lived-jwt").to_json().unwrap();
//! let cmd = ClientMessage::command("list").to_json().unwrap();
//! # let _ = (hello, cmd);
//!
//! assert_eq!(decode_line(r#"{"type":"log","line":"hi"}"#), "hi");
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Channel message definitions
//! - [`server`]: Server status, records and metrics
//! - [`endpoint`]: URL derivation
//! - [`error`]: Error types

pub mod endpoint;
pub mod error;
pub mod messages;
pub mod server;

pub use endpoint::{console_url, server_url};
pub use error::{ProtocolError, Result};
pub use messages::{decode_line, ClientMessage, Handshake, ServerMessage, ERROR_LINE_PREFIX};
pub use server::{ServerMetrics, ServerRecord, ServerStatus};
