//! HTTP room-status probe.
//!
//! POSTs the identifier to the configured room-status endpoint and maps the
//! JSON `room_status` field. The endpoint answers the same way for every
//! room, so the mapping table below is the whole protocol.

use std::sync::{LazyLock, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;
use tracing::debug;

use super::{AvailabilityProbe, AvailabilityStatus};
use crate::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

static URL_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://[^/]+/(?P<id>[^/?#]+)").unwrap());

/// The reqwest TLS backend needs a process-level CryptoProvider; without one
/// the first HTTPS request panics inside the client.
fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Safe to ignore: can happen if another crate installed it first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Extract the room identifier from a profile URL.
///
/// Bare identifiers pass through unchanged, so callers can accept either
/// form from configuration.
pub fn identifier_from_url(input: &str) -> String {
    let input = input.trim().trim_end_matches('/');
    match URL_ID_RE.captures(input) {
        Some(caps) => caps["id"].to_string(),
        None => input.to_string(),
    }
}

/// Probe backed by the room-status HTTP endpoint.
pub struct RoomStatusProbe {
    client: reqwest::Client,
    endpoint: String,
    referer_base: Option<String>,
}

impl RoomStatusProbe {
    pub fn new(endpoint: impl Into<String>, referer_base: Option<String>) -> Result<Self> {
        install_rustls_provider();
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            referer_base,
        })
    }

    async fn request_status(&self, identifier: &str) -> Result<AvailabilityStatus> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .form(&[("room_slug", identifier), ("bandwidth", "high")])
            .header("X-Requested-With", "XMLHttpRequest");

        if let Some(base) = &self.referer_base {
            request = request.header(
                reqwest::header::REFERER,
                format!("{}/{}/", base.trim_end_matches('/'), identifier),
            );
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Other(format!("room status request failed: {}", e)))?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Ok(AvailabilityStatus::Error429);
        }
        if !response.status().is_success() {
            return Ok(AvailabilityStatus::Error);
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Other(format!("room status response not JSON: {}", e)))?;

        Ok(map_room_status(body["room_status"].as_str().unwrap_or("")))
    }
}

fn map_room_status(raw: &str) -> AvailabilityStatus {
    match raw {
        "public" => AvailabilityStatus::Public,
        "private" => AvailabilityStatus::Private,
        "hidden" => AvailabilityStatus::Hidden,
        "away" => AvailabilityStatus::Away,
        "offline" => AvailabilityStatus::Offline,
        _ => AvailabilityStatus::Unknown,
    }
}

#[async_trait]
impl AvailabilityProbe for RoomStatusProbe {
    async fn check(&self, identifier: &str) -> AvailabilityStatus {
        match self.request_status(identifier).await {
            Ok(status) => status,
            Err(e) => {
                debug!(identifier, error = %e, "availability probe failed");
                AvailabilityStatus::Error
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_from_url() {
        assert_eq!(identifier_from_url("https://example.com/alpha/"), "alpha");
        assert_eq!(identifier_from_url("http://example.com/alpha"), "alpha");
        assert_eq!(
            identifier_from_url("https://example.com/alpha?tab=bio"),
            "alpha"
        );
        assert_eq!(identifier_from_url("alpha"), "alpha");
        assert_eq!(identifier_from_url("  alpha  "), "alpha");
    }

    #[tokio::test]
    async fn test_unreachable_https_endpoint_maps_to_error() {
        let probe = RoomStatusProbe::new("https://127.0.0.1:1/status", None).unwrap();
        assert_eq!(probe.check("alpha").await, AvailabilityStatus::Error);
    }

    #[test]
    fn test_map_room_status() {
        assert_eq!(map_room_status("public"), AvailabilityStatus::Public);
        assert_eq!(map_room_status("private"), AvailabilityStatus::Private);
        assert_eq!(map_room_status("hidden"), AvailabilityStatus::Hidden);
        assert_eq!(map_room_status("away"), AvailabilityStatus::Away);
        assert_eq!(map_room_status("offline"), AvailabilityStatus::Offline);
        assert_eq!(map_room_status("banned"), AvailabilityStatus::Unknown);
        assert_eq!(map_room_status(""), AvailabilityStatus::Unknown);
    }
}
