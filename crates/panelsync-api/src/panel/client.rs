// Panel HTTP client
//
// Wraps `reqwest::Client` with panel URL construction, credential query
// parameters, transient-failure retries and envelope unwrapping. Endpoint
// methods live in `panel/node.rs` as inherent methods.

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::models::PanelResponse;
use crate::transport::TransportConfig;

const API_PREFIX: &str = "api/v1/server";

/// Raw HTTP client for one node's view of the panel.
///
/// Every request carries `node_id` and `token` query parameters. All
/// methods return the unwrapped `data` payload -- the `{ret, msg, data}`
/// envelope is stripped before the caller sees it.
#[derive(Clone)]
pub struct PanelClient {
    http: reqwest::Client,
    base_url: Url,
    node_id: u32,
    node_type: Option<String>,
    key: SecretString,
    transport: TransportConfig,
}

impl std::fmt::Debug for PanelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanelClient")
            .field("base_url", &self.base_url.as_str())
            .field("node_id", &self.node_id)
            .field("node_type", &self.node_type)
            .finish_non_exhaustive()
    }
}

impl PanelClient {
    /// Create a new panel client from a `TransportConfig`.
    pub fn new(
        base_url: Url,
        node_id: u32,
        key: SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self {
            http,
            base_url,
            node_id,
            node_type: None,
            key,
            transport: transport.clone(),
        })
    }

    /// Create a panel client with a pre-built `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        base_url: Url,
        node_id: u32,
        key: SecretString,
        transport: TransportConfig,
    ) -> Self {
        Self {
            http,
            base_url,
            node_id,
            node_type: None,
            key,
            transport,
        }
    }

    /// Also send `node_type` on every request, for panels that serve
    /// several protocol families from one node ID space.
    pub fn with_node_type(mut self, node_type: impl Into<String>) -> Self {
        self.node_type = Some(node_type.into());
        self
    }

    /// The node this client speaks for.
    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    /// The panel base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build `{base}/api/v1/server/{path}?node_id=..&token=..`.
    pub(crate) fn endpoint_url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}/{API_PREFIX}/{path}"))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("node_id", &self.node_id.to_string());
            if let Some(node_type) = &self.node_type {
                query.append_pair("node_type", node_type);
            }
            query.append_pair("token", self.key.expose_secret());
        }
        Ok(url)
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// Send a GET request and unwrap the envelope.
    pub(crate) async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let url = self.endpoint_url(path)?;
        debug!(node_id = self.node_id, "GET {}", url.path());

        let resp = self.execute(|| self.http.get(url.clone())).await?;
        let body = parse_envelope::<T>(resp).await?;
        body.ok_or_else(|| Error::Panel {
            message: format!("{path}: response carried no data"),
        })
    }

    /// Send a POST request with a JSON body; the response `data` is ignored.
    pub(crate) async fn post(&self, path: &str, body: &(impl Serialize + Sync)) -> Result<(), Error> {
        let url = self.endpoint_url(path)?;
        debug!(node_id = self.node_id, "POST {}", url.path());

        let resp = self
            .execute(|| self.http.post(url.clone()).json(body))
            .await?;
        let _: Option<serde_json::Value> = parse_envelope(resp).await?;
        Ok(())
    }

    /// Send a request, retrying transient failures up to the configured
    /// number of attempts. Non-success statuses become [`Error::Status`].
    async fn execute(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, Error> {
        let attempts = self.transport.attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = match build().send().await {
                Ok(resp) => check_status(resp).await,
                Err(e) if e.is_timeout() => Err(Error::Timeout {
                    timeout_secs: self.transport.timeout.as_secs(),
                }),
                Err(e) => Err(Error::Transport(e)),
            };
            match result {
                Err(e) if e.is_transient() && attempt < attempts => {
                    debug!(attempt, error = %e, "transient panel error, retrying");
                    attempt += 1;
                    tokio::time::sleep(self.transport.retry_backoff).await;
                }
                other => return other,
            }
        }
    }
}

/// Turn a non-2xx response into [`Error::Status`], keeping a body preview.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let endpoint = resp.url().path().to_owned();
    let body = resp.text().await.unwrap_or_default();
    Err(Error::Status {
        endpoint,
        status: status.as_u16(),
        body: body.chars().take(200).collect(),
    })
}

/// Parse the `{ ret, msg, data }` envelope, returning `data` on success
/// or an [`Error::Panel`] if `ret != 1`.
async fn parse_envelope<T: DeserializeOwned>(resp: reqwest::Response) -> Result<Option<T>, Error> {
    let body = resp.text().await.map_err(Error::Transport)?;
    trace!(len = body.len(), "panel response body");

    let envelope: PanelResponse<T> = serde_json::from_str(&body).map_err(|e| {
        let preview: String = body.chars().take(200).collect();
        Error::Deserialization {
            message: format!("{e} (body preview: {preview:?})"),
            body: body.clone(),
        }
    })?;

    if envelope.ret == 1 {
        Ok(envelope.data)
    } else {
        Err(Error::Panel {
            message: envelope
                .msg
                .unwrap_or_else(|| format!("ret={}", envelope.ret)),
        })
    }
}
