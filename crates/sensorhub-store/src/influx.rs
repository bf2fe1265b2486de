//! InfluxDB v2 HTTP write backend.
//!
//! Points go to `{url}/api/v2/write` as line protocol with nanosecond
//! precision, authenticated with `Authorization: Token <token>`.

use futures::future::BoxFuture;
use sensorhub_core::config::StoreConfig;
use sensorhub_core::{DataPoint, PointStore, StoreError};
use serde::Deserialize;
use tracing::debug;

use crate::line_protocol;

/// Response of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Health {
    /// `pass` or `fail`.
    pub status: String,
    /// Server version, when reported.
    #[serde(default)]
    pub version: Option<String>,
}

impl Health {
    /// Whether the server reported itself healthy.
    pub fn is_pass(&self) -> bool {
        self.status.eq_ignore_ascii_case("pass")
    }
}

/// Writes points to an InfluxDB v2 bucket.
pub struct InfluxStore {
    client: reqwest::Client,
    url: String,
    token: String,
    org: String,
    bucket: String,
}

impl InfluxStore {
    /// Create a store from connection settings.
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: config.url.trim_end_matches('/').to_owned(),
            token: config.token.clone(),
            org: config.org.clone(),
            bucket: config.bucket.clone(),
        }
    }

    /// Query the server's health endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Request`] if the server is unreachable or the
    /// body is not a health document.
    pub async fn health(&self) -> Result<Health, StoreError> {
        let url = format!("{}/health", self.url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| StoreError::Request(format!("health check failed: {e}")))?;

        response
            .json::<Health>()
            .await
            .map_err(|e| StoreError::Request(format!("health response parse failed: {e}")))
    }

    async fn post_line(&self, line: String) -> Result<(), StoreError> {
        let url = format!("{}/api/v2/write", self.url);

        let response = self
            .client
            .post(&url)
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(line)
            .send()
            .await
            .map_err(|e| StoreError::Request(format!("InfluxDB request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error body".to_owned());
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

impl PointStore for InfluxStore {
    fn name(&self) -> &str {
        "influxdb"
    }

    fn write<'a>(&'a self, point: &'a DataPoint) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let line = line_protocol::encode(point)?;
            debug!(bucket = %self.bucket, line = %line, "Writing point");
            self.post_line(line).await
        })
    }
}

impl std::fmt::Debug for InfluxStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfluxStore")
            .field("url", &self.url)
            .field("org", &self.org)
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}
