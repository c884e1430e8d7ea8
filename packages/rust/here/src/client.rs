//! Thin JSON-over-GET client with timeout and status mapping.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use wasteroute_shared::{Result, RoutePlannerError, scrub_url};

/// User-Agent string for service requests.
const USER_AGENT: &str = concat!("wasteroute/", env!("CARGO_PKG_VERSION"));

/// Largest error body kept in [`RoutePlannerError::Http`].
const MAX_ERROR_BODY: usize = 2000;

/// HTTP client shared by the sequencing and routing calls.
#[derive(Debug, Clone)]
pub struct HereClient {
    client: Client,
    timeout_secs: u64,
}

impl HereClient {
    /// Build a client whose every call is capped at `timeout_secs`.
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| {
                RoutePlannerError::Network(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self {
            client,
            timeout_secs,
        })
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    /// GET `url` and decode the body as JSON.
    ///
    /// Non-2xx statuses become [`RoutePlannerError::Http`] carrying the body;
    /// an exceeded time budget becomes [`RoutePlannerError::Timeout`].
    pub async fn get_json(&self, url: &str) -> Result<Value> {
        let safe_url = scrub_url(url);
        debug!(url = %safe_url, "GET");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(&safe_url, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(&safe_url, e))?;

        if !status.is_success() {
            warn!(url = %safe_url, status = status.as_u16(), "service returned error status");
            let mut body = body;
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(RoutePlannerError::Http {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            RoutePlannerError::protocol(format!("response from {safe_url} is not valid JSON: {e}"))
        })
    }

    fn transport_error(&self, safe_url: &str, e: reqwest::Error) -> RoutePlannerError {
        if e.is_timeout() {
            warn!(url = %safe_url, secs = self.timeout_secs, "request timed out");
            RoutePlannerError::Timeout {
                secs: self.timeout_secs,
            }
        } else {
            // reqwest embeds the full URL (and the key) in its message
            RoutePlannerError::Network(format!("{safe_url}: {}", e.without_url()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn decodes_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v8/routes"))
            .and(query_param("apiKey", "k"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"routes":[]}"#))
            .mount(&server)
            .await;

        let client = HereClient::new(5).unwrap();
        let value = client
            .get_json(&format!("{}/v8/routes?apiKey=k", server.uri()))
            .await
            .unwrap();
        assert_eq!(value["routes"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn error_status_keeps_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400).set_body_string("Bad destination"))
            .mount(&server)
            .await;

        let client = HereClient::new(5).unwrap();
        let err = client.get_json(&server.uri()).await.unwrap_err();
        match err {
            RoutePlannerError::Http { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "Bad destination");
            }
            other => panic!("expected HTTP error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_service_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("{}")
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let client = HereClient::new(1).unwrap();
        let err = client.get_json(&server.uri()).await.unwrap_err();
        assert!(matches!(err, RoutePlannerError::Timeout { secs: 1 }), "{err:?}");
    }

    #[tokio::test]
    async fn non_json_body_is_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let client = HereClient::new(5).unwrap();
        let err = client
            .get_json(&format!("{}/x?apiKey=secret", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, RoutePlannerError::Protocol { .. }));
        assert!(!err.to_string().contains("secret"));
    }
}
