// Online-IP auditing endpoint client
//
// A single call: push the locally observed online IPs and receive the
// auditor's reconciled view back. No retries -- callers fail open.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::models::OnlineIpEntry;
use crate::transport::TransportConfig;

/// Client for `POST {base}/api/v1/SyncOnlineIp?token=..`.
#[derive(Clone)]
pub struct AuditClient {
    http: reqwest::Client,
    base_url: Url,
    token: SecretString,
}

impl std::fmt::Debug for AuditClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl AuditClient {
    /// Create an audit client whose requests time out after `timeout`.
    pub fn new(base_url: Url, token: SecretString, timeout: Duration) -> Result<Self, Error> {
        let transport = TransportConfig {
            timeout,
            attempts: 1,
            ..TransportConfig::default()
        };
        Ok(Self {
            http: transport.build_client()?,
            base_url,
            token,
        })
    }

    /// Create an audit client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url, token: SecretString) -> Self {
        Self {
            http,
            base_url,
            token,
        }
    }

    fn sync_url(&self) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}/api/v1/SyncOnlineIp"))?;
        url.query_pairs_mut()
            .append_pair("token", self.token.expose_secret());
        Ok(url)
    }

    /// Push the current online-IP list and return the authoritative one.
    ///
    /// Anything but HTTP 200 is an [`Error::Status`]; a 200 whose body is
    /// not a JSON array of entries is an [`Error::Deserialization`].
    pub async fn sync_online_ips(
        &self,
        online: &[OnlineIpEntry],
    ) -> Result<Vec<OnlineIpEntry>, Error> {
        let url = self.sync_url()?;
        debug!(count = online.len(), "POST {}", url.path());

        let resp = self.http.post(url).json(online).send().await?;
        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            let endpoint = resp.url().path().to_owned();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Status {
                endpoint,
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }
}
