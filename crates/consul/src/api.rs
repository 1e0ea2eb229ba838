use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;

use crate::error::{Error, Result};

/// Transport timeout for every request to the agent.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// The parts of the Consul HTTP API the supervisor relies on.
#[async_trait]
pub trait ConsulApi: Send + Sync {
    /// Whether autopilot considers the cluster healthy.
    async fn autopilot_healthy(&self) -> Result<bool>;

    /// Writes a raw value under `key` in the KV store.
    async fn put_key(&self, key: &str, value: &str) -> Result<()>;
}

#[derive(Deserialize)]
struct AutopilotHealth {
    #[serde(rename = "Healthy")]
    healthy: bool,
}

/// [`ConsulApi`] over HTTP.
#[derive(Clone, Debug)]
pub struct HttpConsulApi {
    base_url: String,
    client: Client,
    kv_url: Url,
}

impl HttpConsulApi {
    /// Creates a client for the agent listening on `address` (`host:port`).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or `address` does
    /// not form a valid URL.
    pub fn new(address: &str) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let base_url = format!("http://{address}");
        let kv_url = Url::parse(&format!("{base_url}/v1/kv"))
            .map_err(|e| Error::InvalidAddress(format!("{address}: {e}")))?;

        Ok(Self {
            base_url,
            client,
            kv_url,
        })
    }

    /// `/v1/kv/<key>`, with every segment of `key` percent-encoded.
    fn key_url(&self, key: &str) -> Result<Url> {
        let mut url = self.kv_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidAddress(self.kv_url.to_string()))?
            .extend(key.split('/'));

        Ok(url)
    }
}

#[async_trait]
impl ConsulApi for HttpConsulApi {
    async fn autopilot_healthy(&self) -> Result<bool> {
        let health: AutopilotHealth = self
            .client
            .get(format!("{}/v1/operator/autopilot/health", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(health.healthy)
    }

    async fn put_key(&self, key: &str, value: &str) -> Result<()> {
        self.client
            .put(self.key_url(key)?)
            .body(value.to_string())
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}
