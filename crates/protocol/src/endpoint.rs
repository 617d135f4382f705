//! Address derivation for the lifecycle API and the console channel.

use url::Url;

use crate::error::{ProtocolError, Result};

/// Builds `<base>/api/servers/{id}` and any further path segments.
///
/// The base URL's own path is kept, so a panel mounted under a prefix
/// (`https://host/panel`) resolves to `https://host/panel/api/servers/...`.
pub fn server_url(api_base: &str, server_id: &str, extra: &[&str]) -> Result<Url> {
    let mut url = Url::parse(api_base)?;
    url.set_query(None);
    url.set_fragment(None);
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| ProtocolError::InvalidUrl(format!("cannot be a base: {}", api_base)))?;
        segments
            .pop_if_empty()
            .extend(["api", "servers", server_id])
            .extend(extra);
    }
    Ok(url)
}

/// Derives the console channel address for a server.
///
/// `http` becomes `ws` and `https` becomes `wss`; the path is
/// `/api/servers/{id}/console` below the base path.
pub fn console_url(api_base: &str, server_id: &str) -> Result<Url> {
    let mut url = server_url(api_base, server_id, &["console"])?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ProtocolError::InvalidUrl(format!(
                "unsupported scheme for console channel: {}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| ProtocolError::InvalidUrl(format!("cannot switch scheme to {}", scheme)))?;
    Ok(url)
}
