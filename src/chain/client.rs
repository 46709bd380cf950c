//! HTTP client for the remote chain node and the `ChainSource` trait
//! consumed by the sync engine. Transient failures are not retried here; the
//! poll scheduler's next iteration is the retry path.

use crate::chain::types::{Block, BlockHash, NodeInfo, Transaction};
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug)]
pub enum ChainError {
    Timeout { endpoint: String },
    Status { endpoint: String, status: u16 },
    NotFound { endpoint: String },
    Decode { endpoint: String, detail: String },
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainError::Timeout { endpoint } => write!(f, "chain request {endpoint} timed out"),
            ChainError::Status { endpoint, status } => {
                write!(f, "chain request {endpoint} failed with status {status}")
            }
            ChainError::NotFound { endpoint } => {
                write!(f, "chain request {endpoint} returned no data")
            }
            ChainError::Decode { endpoint, detail } => {
                write!(f, "chain response for {endpoint} could not be decoded: {detail}")
            }
        }
    }
}

impl std::error::Error for ChainError {}

/// Remote chain source consumed by workers and the scheduler.
///
/// Object-safe so components can share one `Arc<dyn ChainSource>` and tests
/// can script responses in process.
pub trait ChainSource: Send + Sync {
    fn node_info(&self) -> BoxFuture<'_, Result<NodeInfo>>;

    /// Authoritative ordered hash list; index equals height.
    fn hash_list(&self) -> BoxFuture<'_, Result<Vec<BlockHash>>>;

    fn block_by_hash<'a>(&'a self, hash: &'a BlockHash) -> BoxFuture<'a, Result<Block>>;

    fn block_by_height(&self, height: u64) -> BoxFuture<'_, Result<Block>>;

    fn transaction<'a>(&'a self, tx_id: &'a str) -> BoxFuture<'a, Result<Transaction>>;

    /// Raw transaction body, used to import manifest paths.
    fn tx_data<'a>(&'a self, tx_id: &'a str) -> BoxFuture<'a, Result<Vec<u8>>>;
}

/// Options applied to the HTTP chain client.
#[derive(Debug, Clone)]
pub struct ChainClientOptions {
    pub request_timeout: Duration,
}

impl Default for ChainClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

/// `ChainSource` implementation over the node's REST endpoints.
#[derive(Debug, Clone)]
pub struct HttpChainSource {
    base_url: String,
    client: reqwest::Client,
}

impl HttpChainSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_options(base_url, ChainClientOptions::default())
    }

    pub fn with_options(base_url: impl Into<String>, options: ChainClientOptions) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()
            .context("failed to build chain HTTP client")?;
        Ok(Self { base_url, client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let endpoint = self.endpoint(path);
        let response = self
            .client
            .get(&endpoint)
            .send()
            .await
            .map_err(|err| classify_reqwest(&endpoint, err))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ChainError::NotFound { endpoint }.into());
        }
        if !status.is_success() {
            return Err(ChainError::Status {
                endpoint,
                status: status.as_u16(),
            }
            .into());
        }

        response.json::<T>().await.map_err(|err| {
            ChainError::Decode {
                endpoint,
                detail: err.to_string(),
            }
            .into()
        })
    }

    async fn get_bytes(&self, path: &str) -> Result<Vec<u8>> {
        let endpoint = self.endpoint(path);
        let response = self
            .client
            .get(&endpoint)
            .send()
            .await
            .map_err(|err| classify_reqwest(&endpoint, err))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ChainError::NotFound { endpoint }.into());
        }
        if !status.is_success() {
            return Err(ChainError::Status {
                endpoint,
                status: status.as_u16(),
            }
            .into());
        }

        let body = response.bytes().await.map_err(|err| ChainError::Decode {
            endpoint,
            detail: err.to_string(),
        })?;
        Ok(body.to_vec())
    }
}

fn classify_reqwest(endpoint: &str, err: reqwest::Error) -> anyhow::Error {
    if err.is_timeout() {
        ChainError::Timeout {
            endpoint: endpoint.to_owned(),
        }
        .into()
    } else {
        anyhow::Error::new(err).context(format!("chain request {endpoint} failed"))
    }
}

impl ChainSource for HttpChainSource {
    fn node_info(&self) -> BoxFuture<'_, Result<NodeInfo>> {
        Box::pin(self.get_json("info"))
    }

    fn hash_list(&self) -> BoxFuture<'_, Result<Vec<BlockHash>>> {
        Box::pin(self.get_json("hash_list"))
    }

    fn block_by_hash<'a>(&'a self, hash: &'a BlockHash) -> BoxFuture<'a, Result<Block>> {
        Box::pin(async move { self.get_json(&format!("block/hash/{hash}")).await })
    }

    fn block_by_height(&self, height: u64) -> BoxFuture<'_, Result<Block>> {
        Box::pin(async move { self.get_json(&format!("block/height/{height}")).await })
    }

    fn transaction<'a>(&'a self, tx_id: &'a str) -> BoxFuture<'a, Result<Transaction>> {
        Box::pin(async move { self.get_json(&format!("tx/{tx_id}")).await })
    }

    fn tx_data<'a>(&'a self, tx_id: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move { self.get_bytes(tx_id).await })
    }
}
