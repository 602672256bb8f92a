// Unauthenticated handshake probe.
//
// The presence endpoint negotiates through `GET /api/ws/document/info`
// before upgrading. A server that guards that path behind authentication
// breaks every client, so `quill probe` checks it directly.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use url::Url;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub url: String,
    pub status: u16,
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("handshake endpoint {url} requires authorization (HTTP {status})")]
    AuthorizationDenied { url: String, status: u16 },
    #[error("handshake request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

pub fn default_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(DEFAULT_PROBE_TIMEOUT)
        .user_agent(concat!("quill-presence/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Issue the probe without credentials. Only 401 and 403 are failures;
/// any other status is reported as-is.
pub async fn probe_handshake(client: &reqwest::Client, url: &Url) -> Result<ProbeReport, ProbeError> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|source| ProbeError::Request { url: url.to_string(), source })?;
    classify(url, response.status())
}

fn classify(url: &Url, status: StatusCode) -> Result<ProbeReport, ProbeError> {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return Err(ProbeError::AuthorizationDenied { url: url.to_string(), status: status.as_u16() });
    }
    Ok(ProbeReport { url: url.to_string(), status: status.as_u16() })
}
