use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::Result;

/// Transport timeout for every request to the agent.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// The parts of the Nomad HTTP API the supervisor relies on.
#[async_trait]
pub trait NomadApi: Send + Sync {
    /// Address of the current leader, or an empty string if none is elected.
    async fn leader(&self) -> Result<String>;
}

/// [`NomadApi`] over HTTP.
#[derive(Clone, Debug)]
pub struct HttpNomadApi {
    base_url: String,
    client: Client,
}

impl HttpNomadApi {
    /// Creates a client for the agent listening on `address` (`host:port`).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(address: &str) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            base_url: format!("http://{address}"),
            client,
        })
    }
}

#[async_trait]
impl NomadApi for HttpNomadApi {
    async fn leader(&self) -> Result<String> {
        let leader = self
            .client
            .get(format!("{}/v1/status/leader", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(leader)
    }
}
