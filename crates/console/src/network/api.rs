//! Lifecycle API client and status poller.
//!
//! The console only reads two endpoints: the server record (status and
//! creation time) and, while the server runs, its live metrics.

use std::sync::Arc;
use std::time::Duration;

use protocol::error::{ProtocolError, Result};
use protocol::{server_url, ServerMetrics, ServerRecord, ServerStatus};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::auth::CredentialProvider;
use crate::session::SessionEvent;

/// Read-only client for the lifecycle API.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

fn map_reqwest(error: reqwest::Error) -> ProtocolError {
    if error.is_timeout() {
        ProtocolError::Timeout(error.to_string())
    } else {
        ProtocolError::Http {
            status: error.status().map(|s| s.as_u16()).unwrap_or(0),
            message: error.to_string(),
        }
    }
}

impl ApiClient {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("hostpanel-console/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(map_reqwest)?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            credentials,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /api/servers/{id}`
    pub async fn server(&self, server_id: &str) -> Result<ServerRecord> {
        self.get_json(server_id, &[]).await
    }

    /// `GET /api/servers/{id}/metrics`
    pub async fn metrics(&self, server_id: &str) -> Result<ServerMetrics> {
        self.get_json(server_id, &["metrics"]).await
    }

    async fn get_json<T: DeserializeOwned>(&self, server_id: &str, extra: &[&str]) -> Result<T> {
        let url = server_url(&self.base_url, server_id, extra)?;
        let mut request = self.http.get(url.clone());
        match self.credentials.credential().await {
            Ok(token) => request = request.bearer_auth(token),
            Err(e) => tracing::debug!("Calling API without credential: {}", e),
        }

        let response = request.send().await.map_err(map_reqwest)?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ProtocolError::NotFound {
                server_id: server_id.to_string(),
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProtocolError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await.map_err(map_reqwest)?;
        tracing::trace!(%url, bytes = body.len(), "API response");
        Ok(serde_json::from_str(&body)?)
    }
}

/// Periodically pushes the server record (and metrics while running) into a
/// session queue.
#[derive(Debug, Clone)]
pub struct StatusPoller {
    api: Arc<ApiClient>,
    server_id: String,
    interval: Duration,
}

impl StatusPoller {
    pub fn new(api: Arc<ApiClient>, server_id: impl Into<String>, interval: Duration) -> Self {
        Self {
            api,
            server_id: server_id.into(),
            interval,
        }
    }

    /// Fetches the record once, plus metrics when the server is running.
    pub async fn poll_once(&self) -> Result<(ServerRecord, Option<ServerMetrics>)> {
        let record = self.api.server(&self.server_id).await?;
        let metrics = if record.status == ServerStatus::Running {
            match self.api.metrics(&self.server_id).await {
                Ok(metrics) => Some(metrics),
                Err(e) => {
                    tracing::debug!("Metrics unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };
        Ok((record, metrics))
    }

    /// Starts polling immediately and then every interval until `shutdown`
    /// fires, the queue closes or the server is gone.
    pub fn spawn(
        self,
        events: mpsc::UnboundedSender<SessionEvent>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let keep_going = tokio::select! {
                    _ = shutdown.cancelled() => false,
                    keep_going = self.poll(&events) => keep_going,
                };
                if !keep_going {
                    break;
                }
            }
            tracing::debug!(server_id = %self.server_id, "Status poller stopped");
        })
    }

    /// One poll round. Returns whether polling should continue.
    async fn poll(&self, events: &mpsc::UnboundedSender<SessionEvent>) -> bool {
        match self.poll_once().await {
            Ok((record, metrics)) => {
                let running = record.status == ServerStatus::Running;
                if events.send(SessionEvent::Record(record)).is_err() {
                    return false;
                }
                // Metrics only mean something while running; clear them otherwise.
                if running && metrics.is_none() {
                    return true;
                }
                events.send(SessionEvent::Metrics(metrics)).is_ok()
            }
            Err(ProtocolError::NotFound { server_id }) => {
                tracing::info!(%server_id, "Server not found, stopping poller");
                let _ = events.send(SessionEvent::ServerGone);
                false
            }
            Err(e) => {
                tracing::warn!(server_id = %self.server_id, "Status poll failed: {}", e);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticCredential;
    use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode as AxumStatus};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    /// Serves one server record with the given status; unknown ids 404.
    async fn spawn_api(status: &'static str) -> String {
        let app = Router::new()
            .route(
                "/api/servers/srv-1",
                get(move |headers: HeaderMap| async move {
                    let authorized = headers
                        .get(AUTHORIZATION)
                        .and_then(|v| v.to_str().ok())
                        == Some("Bearer jwt");
                    if !authorized {
                        return (AxumStatus::UNAUTHORIZED, "missing token").into_response();
                    }
                    Json(json!({
                        "id": "srv-1",
                        "name": "survival",
                        "status": status,
                        "created_at": "2026-03-01T10:00:00Z",
                        "mc_version": "1.21.1",
                        "port": 25565
                    }))
                    .into_response()
                }),
            )
            .route(
                "/api/servers/srv-1/metrics",
                get(|| async {
                    Json(json!({
                        "cpu_percent": 12.5,
                        "ram_used_mb": 512,
                        "ram_limit_mb": 2048,
                        "players_online": 1,
                        "player_names": ["alex"]
                    }))
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client(base_url: String, token: &str) -> Arc<ApiClient> {
        Arc::new(
            ApiClient::new(
                base_url,
                Arc::new(StaticCredential::new(token)),
                Duration::from_secs(5),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_server_record_with_bearer() {
        let api = client(spawn_api("running").await, "jwt");
        let record = api.server("srv-1").await.unwrap();
        assert_eq!(record.status, ServerStatus::Running);
        assert_eq!(record.mc_version.as_deref(), Some("1.21.1"));
        let metrics = api.metrics("srv-1").await.unwrap();
        assert_eq!(metrics.ram_percent(), 25);
    }

    #[tokio::test]
    async fn test_unauthorized_is_http_error() {
        let api = client(spawn_api("running").await, "wrong");
        match api.server("srv-1").await {
            Err(ProtocolError::Http { status, message }) => {
                assert_eq!(status, 401);
                assert_eq!(message, "missing token");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_server_is_not_found() {
        let api = client(spawn_api("running").await, "jwt");
        assert!(matches!(
            api.server("srv-2").await,
            Err(ProtocolError::NotFound { server_id }) if server_id == "srv-2"
        ));
    }

    #[tokio::test]
    async fn test_poll_once_skips_metrics_unless_running() {
        let api = client(spawn_api("starting").await, "jwt");
        let poller = StatusPoller::new(api, "srv-1", Duration::from_secs(5));
        let (record, metrics) = poller.poll_once().await.unwrap();
        assert_eq!(record.status, ServerStatus::Starting);
        assert!(metrics.is_none());
    }

    #[tokio::test]
    async fn test_poller_pushes_record_and_metrics() {
        let api = client(spawn_api("running").await, "jwt");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let task = StatusPoller::new(api, "srv-1", Duration::from_millis(50))
            .spawn(tx, shutdown.clone());

        match rx.recv().await {
            Some(SessionEvent::Record(record)) => assert_eq!(record.id, "srv-1"),
            other => panic!("unexpected: {:?}", other),
        }
        match rx.recv().await {
            Some(SessionEvent::Metrics(Some(metrics))) => assert_eq!(metrics.players_online, 1),
            other => panic!("unexpected: {:?}", other),
        }

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_poller_stops_when_server_gone() {
        let api = client(spawn_api("running").await, "jwt");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = StatusPoller::new(api, "srv-missing", Duration::from_millis(50))
            .spawn(tx, CancellationToken::new());
        assert_eq!(rx.recv().await, Some(SessionEvent::ServerGone));
        task.await.unwrap();
        assert_eq!(rx.recv().await, None);
    }
}
