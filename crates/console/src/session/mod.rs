//! Console session state and its async driver.
//!
//! - [`machine`]: connection state machine with id-tagged events
//! - [`backoff`]: reconnect delay policy
//! - [`log`]: bounded log buffer, ingestion and marker lines
//! - [`classify`]: display-style and startup-milestone classifiers
//! - [`install`]: time-based install progress estimate
//! - [`input`]: command line and history
//! - [`console`]: the session that composes all of the above
//! - [`runner`]: async event loop performing the session's I/O

pub mod backoff;
pub mod classify;
pub mod console;
pub mod input;
pub mod install;
pub mod log;
pub mod machine;
pub mod runner;

pub use backoff::ReconnectPolicy;
pub use classify::{classify_style, LineStyle, StartupProgress, StartupStep};
pub use console::{Action, ConsoleSession, SessionEvent};
pub use input::{CommandHistory, CommandInput};
pub use install::{estimate, InstallProgress, InstallTracker, INSTALL_STEPS};
pub use log::{LogBuffer, LogIngest, LOG_CAPACITY};
pub use machine::{ChannelId, ConnectionMachine, ConnectionState, TimerId};
pub use runner::SessionRunner;
