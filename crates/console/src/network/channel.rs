//! WebSocket transport for the console channel.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use protocol::error::{ProtocolError, Result};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use url::Url;

use super::{ChannelEvents, ChannelHandle, ConsoleTransport};

/// Default time allowed for the WebSocket upgrade.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Frames queued from the session to a channel task.
#[derive(Debug)]
enum Outbound {
    Text(String),
    Close,
}

/// Opens console channels over `ws://` / `wss://`.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    connect_timeout: Duration,
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl WebSocketTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl ConsoleTransport for WebSocketTransport {
    fn open(&self, url: &Url, events: ChannelEvents) -> Box<dyn ChannelHandle> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_channel(
            url.clone(),
            self.connect_timeout,
            events,
            outbound_rx,
        ));
        Box::new(WebSocketHandle { outbound_tx })
    }
}

/// Handle to a channel task.
struct WebSocketHandle {
    outbound_tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelHandle for WebSocketHandle {
    fn send(&self, text: String) -> Result<()> {
        self.outbound_tx
            .send(Outbound::Text(text))
            .map_err(|_| ProtocolError::ConnectionClosed("console channel task has exited".to_string()))
    }

    fn close(&self) {
        let _ = self.outbound_tx.send(Outbound::Close);
    }
}

async fn connect(
    url: &Url,
    timeout: Duration,
) -> Result<tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>>
{
    let connecting = connect_async(url.as_str());
    match tokio::time::timeout(timeout, connecting).await {
        Ok(Ok((ws, _response))) => Ok(ws),
        Ok(Err(WsError::Io(io_err))) => Err(ProtocolError::from(io_err)),
        Ok(Err(e)) => Err(ProtocolError::ConnectionClosed(format!(
            "WebSocket connection failed: {}",
            e
        ))),
        Err(_) => Err(ProtocolError::Timeout(format!(
            "no WebSocket upgrade within {:?}",
            timeout
        ))),
    }
}

/// Drives one channel from connect to close.
///
/// Reports `opened` after the upgrade, each text frame as it arrives, and
/// `closed` exactly once when the channel ends for any reason other than a
/// close requested before the upgrade finished.
async fn run_channel(
    url: Url,
    timeout: Duration,
    events: ChannelEvents,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
) {
    let channel = events.channel();
    tracing::debug!(?channel, "Opening console channel");

    let ws = tokio::select! {
        result = connect(&url, timeout) => match result {
            Ok(ws) => ws,
            Err(e) => {
                tracing::warn!(?channel, "Console channel failed to open: {}", e);
                events.closed();
                return;
            }
        },
        // Closed (or handle dropped) before the upgrade finished.
        _ = wait_for_close(&mut outbound_rx) => {
            tracing::debug!(?channel, "Console channel cancelled while connecting");
            return;
        }
    };

    let (mut sink, mut stream) = ws.split();
    if !events.opened() {
        let _ = sink.send(WsMessage::Close(None)).await;
        return;
    }

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => match outbound {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = sink.send(WsMessage::Text(text)).await {
                        tracing::warn!(?channel, "Failed to send on console channel: {}", e);
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(WsMessage::Text(text))) => {
                    if !events.frame(text) {
                        break;
                    }
                }
                Some(Ok(WsMessage::Binary(bytes))) => {
                    if !events.frame(String::from_utf8_lossy(&bytes).into_owned()) {
                        break;
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    tracing::debug!(?channel, ?frame, "Server closed console channel");
                    break;
                }
                Some(Ok(_)) => {
                    // Ping/pong are answered by tungstenite.
                }
                Some(Err(e)) => {
                    tracing::warn!(?channel, "Console channel error: {}", e);
                    break;
                }
                None => break,
            },
        }
    }

    events.closed();
}

/// Resolves once a close is requested. Text queued before the channel is
/// open is dropped.
async fn wait_for_close(outbound_rx: &mut mpsc::UnboundedReceiver<Outbound>) {
    loop {
        match outbound_rx.recv().await {
            Some(Outbound::Text(_)) => {
                tracing::debug!("Dropping frame queued before channel open");
            }
            Some(Outbound::Close) | None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ChannelId, SessionEvent};
    use tokio::net::TcpListener;

    /// Minimal console server: records the first two client frames, then
    /// sends one log frame and closes.
    async fn spawn_server() -> (Url, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let mut received = Vec::new();
            while received.len() < 2 {
                match ws.next().await {
                    Some(Ok(WsMessage::Text(text))) => received.push(text),
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
            ws.send(WsMessage::Text(r#"{"type":"log","line":"hello"}"#.to_string()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
            received
        });
        let url = Url::parse(&format!("ws://{}/api/servers/srv-1/console", addr)).unwrap();
        (url, handle)
    }

    #[tokio::test]
    async fn test_channel_round_trip() {
        let (url, server) = spawn_server().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = ChannelId(7);
        let transport = WebSocketTransport::default();
        let handle = transport.open(&url, ChannelEvents::new(channel, tx));

        assert_eq!(rx.recv().await, Some(SessionEvent::ChannelOpened(channel)));
        handle.send(r#"{"token":"jwt"}"#.to_string()).unwrap();
        handle
            .send(r#"{"type":"command","cmd":"list"}"#.to_string())
            .unwrap();

        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::ChannelFrame {
                channel,
                text: r#"{"type":"log","line":"hello"}"#.to_string()
            })
        );
        assert_eq!(rx.recv().await, Some(SessionEvent::ChannelClosed(channel)));

        let received = server.await.unwrap();
        assert_eq!(
            received,
            vec![
                r#"{"token":"jwt"}"#.to_string(),
                r#"{"type":"command","cmd":"list"}"#.to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_refused_connection_reports_closed() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let url = Url::parse(&format!("ws://{}/console", addr)).unwrap();
        let _handle = WebSocketTransport::default().open(&url, ChannelEvents::new(ChannelId(1), tx));
        assert_eq!(rx.recv().await, Some(SessionEvent::ChannelClosed(ChannelId(1))));
    }
}
