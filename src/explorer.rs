//! Chain-explorer collaborator.
//!
//! Failure grooming needs one independent observation: "does this txid
//! exist on the public chain". The explorer is a second witness, separate
//! from the wallet API, so a transaction missing from one server's view is
//! not condemned on that evidence alone.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ExplorerError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(u16),
}

#[async_trait]
pub trait ChainExplorer: Send + Sync {
    /// Whether the public chain knows this txid (mempool or confirmed).
    async fn transaction_exists(&self, txid: &str) -> Result<bool, ExplorerError>;
}

/// Esplora-style REST explorer: `GET /tx/{txid}`, 404 means unknown.
#[derive(Clone)]
pub struct EsploraExplorer {
    http_client: Client,
    base_url: String,
}

impl EsploraExplorer {
    pub fn new(base_url: String) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http_client,
            base_url,
        }
    }
}

#[async_trait]
impl ChainExplorer for EsploraExplorer {
    async fn transaction_exists(&self, txid: &str) -> Result<bool, ExplorerError> {
        let url = format!("{}/tx/{}", self.base_url.trim_end_matches('/'), txid);
        debug!("GET {}", url);

        let response = self.http_client.get(&url).send().await?;
        match response.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            other => Err(ExplorerError::Status(other)),
        }
    }
}
