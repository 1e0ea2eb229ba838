use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{Error, Result};

/// Transport timeout for every request to the server.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

static TOKEN_HEADER: &str = "X-Vault-Token";

/// Body of `/v1/sys/health`.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct VaultHealth {
    /// Whether the server has been initialized.
    pub initialized: bool,

    /// Whether the server is sealed.
    pub sealed: bool,

    /// Whether the server is a standby node.
    pub standby: bool,
}

/// One entry of the mount table.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct MountInfo {
    /// Backend type, e.g. `kv`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Backend options. Vault reports `null` when there are none.
    #[serde(default)]
    pub options: Option<BTreeMap<String, String>>,
}

impl MountInfo {
    /// The `version` option, if set.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.options
            .as_ref()
            .and_then(|options| options.get("version"))
            .map(String::as_str)
    }
}

/// The parts of the Vault HTTP API the supervisor relies on.
#[async_trait]
pub trait VaultApi: Send + Sync {
    /// Replaces the token sent with authenticated requests.
    fn set_token(&self, token: &str);

    /// Reads the health endpoint regardless of its status code.
    async fn health(&self) -> Result<VaultHealth>;

    /// Lists secret backends keyed by mount path (e.g. `secret/`).
    async fn list_mounts(&self) -> Result<BTreeMap<String, MountInfo>>;

    /// Mounts a `kv` backend at `path` with the given version.
    async fn mount_kv(&self, path: &str, version: &str) -> Result<()>;

    /// Unmounts the backend at `path`.
    async fn unmount(&self, path: &str) -> Result<()>;

    /// Writes `{"value": value}` at `key`.
    async fn write_secret(&self, key: &str, value: &str) -> Result<()>;
}

/// [`VaultApi`] over HTTP.
#[derive(Debug)]
pub struct HttpVaultApi {
    base_url: Url,
    client: Client,
    token: RwLock<String>,
}

impl HttpVaultApi {
    /// Creates a client for the server on `address` (`host:port`).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or `address` does
    /// not form a valid URL.
    pub fn new(address: &str, token: &str) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let base_url = Url::parse(&format!("http://{address}/v1"))
            .map_err(|e| Error::InvalidAddress(format!("{address}: {e}")))?;

        Ok(Self {
            base_url,
            client,
            token: RwLock::new(token.to_string()),
        })
    }

    /// `/v1/<path>` without a trailing slash, each segment percent-encoded.
    fn url(&self, path: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidAddress(self.base_url.to_string()))?
            .extend(path.trim_end_matches('/').split('/'));

        Ok(url)
    }

    fn authenticated(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self
            .token
            .read()
            .map(|token| token.clone())
            .unwrap_or_default();
        request.header(TOKEN_HEADER, token)
    }
}

#[async_trait]
impl VaultApi for HttpVaultApi {
    fn set_token(&self, token: &str) {
        if let Ok(mut current) = self.token.write() {
            *current = token.to_string();
        }
    }

    async fn health(&self) -> Result<VaultHealth> {
        // Non-2xx statuses encode sealed/standby/uninitialized; the body is
        // still the health document.
        let health = self
            .client
            .get(self.url("sys/health")?)
            .send()
            .await?
            .json()
            .await?;

        Ok(health)
    }

    async fn list_mounts(&self) -> Result<BTreeMap<String, MountInfo>> {
        let body: Value = self
            .authenticated(self.client.get(self.url("sys/mounts")?))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        parse_mount_table(body)
    }

    async fn mount_kv(&self, path: &str, version: &str) -> Result<()> {
        self.authenticated(self.client.post(self.url(&format!("sys/mounts/{path}"))?))
            .json(&json!({ "type": "kv", "options": { "version": version } }))
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    async fn unmount(&self, path: &str) -> Result<()> {
        self.authenticated(self.client.delete(self.url(&format!("sys/mounts/{path}"))?))
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    async fn write_secret(&self, key: &str, value: &str) -> Result<()> {
        self.authenticated(self.client.put(self.url(key)?))
            .json(&json!({ "value": value }))
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

/// Extracts the mount table from a `/v1/sys/mounts` body.
///
/// Newer servers nest the table under `data`; older ones put it at the top
/// level next to request metadata, which is skipped.
fn parse_mount_table(body: Value) -> Result<BTreeMap<String, MountInfo>> {
    let table = match body {
        Value::Object(mut top) => match top.remove("data") {
            Some(Value::Object(data)) => data,
            _ => top,
        },
        other => return Err(Error::UnexpectedResponse(format!("mount table: {other}"))),
    };

    Ok(table
        .into_iter()
        .filter(|(path, _)| path.ends_with('/'))
        .filter_map(|(path, entry)| {
            serde_json::from_value::<MountInfo>(entry)
                .ok()
                .map(|info| (path, info))
        })
        .collect())
}
