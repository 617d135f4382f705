//! Network module: the console channel and the lifecycle API.
//!
//! - [`channel`]: WebSocket transport for the bidirectional log/command channel
//! - [`api`]: REST client and status poller for the lifecycle API

pub mod api;
pub mod channel;

use protocol::error::Result;
use tokio::sync::mpsc;
use url::Url;

use crate::session::{ChannelId, SessionEvent};

/// A transport able to open console channels.
///
/// Opening is fire-and-forget: the transport spawns whatever it needs and
/// reports progress through the [`ChannelEvents`] it is given. This keeps the
/// session loop free of I/O and lets tests substitute an in-memory transport.
pub trait ConsoleTransport: Send + Sync {
    /// Starts opening a channel to `url`.
    fn open(&self, url: &Url, events: ChannelEvents) -> Box<dyn ChannelHandle>;
}

/// Control side of one channel.
pub trait ChannelHandle: Send {
    /// Queues a text frame.
    fn send(&self, text: String) -> Result<()>;

    /// Requests the channel to close. Safe to call more than once and before
    /// the channel has opened.
    fn close(&self);
}

/// Posts a channel's lifecycle into the session queue, tagged with its id.
#[derive(Debug, Clone)]
pub struct ChannelEvents {
    channel: ChannelId,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelEvents {
    pub fn new(channel: ChannelId, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { channel, tx }
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Returns `false` once the session is gone.
    pub fn opened(&self) -> bool {
        self.tx.send(SessionEvent::ChannelOpened(self.channel)).is_ok()
    }

    pub fn frame(&self, text: String) -> bool {
        self.tx
            .send(SessionEvent::ChannelFrame {
                channel: self.channel,
                text,
            })
            .is_ok()
    }

    pub fn closed(&self) -> bool {
        self.tx.send(SessionEvent::ChannelClosed(self.channel)).is_ok()
    }
}

pub use api::{ApiClient, StatusPoller};
pub use channel::WebSocketTransport;
