//! Fetches and normalises a record's off-chain metadata document from
//! its `link`.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use thiserror::Error;

use crate::codec::ipfs;

/// Error taxonomy the pipeline distinguishes between retryable and
/// terminal failures. `NoIpfsResponse` and `TezosStorageKeyNotFound` are
/// retryable; everything else is permanent.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no response from any IPFS gateway for {0}")]
    NoIpfsResponse(String),

    #[error("tezos storage key not found: {0}")]
    TezosStorageKeyNotFound(String),

    #[error("permanent resolve failure: {0}")]
    Permanent(String),
}

impl ResolveError {
    /// Retryable errors bump `retry_count`; anything else is `Failed`
    /// immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ResolveError::NoIpfsResponse(_) | ResolveError::TezosStorageKeyNotFound(_)
        )
    }
}

#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, network: &str, contract: &str, link: &str) -> Result<Vec<u8>, ResolveError>;
}

/// Default `Resolver`: fetches `ipfs://<cid>` links from a configured set
/// of gateways, shuffled per call so repeated resolutions don't always
/// hammer the same gateway first. Non-IPFS links are fetched directly.
pub struct HttpIpfsResolver {
    client: reqwest::Client,
    gateways: Vec<String>,
}

impl HttpIpfsResolver {
    pub fn new(client: reqwest::Client, gateways: Vec<String>) -> Self {
        Self { client, gateways }
    }

    fn shuffled_gateways(&self) -> Vec<&str> {
        let mut order: Vec<&str> = self.gateways.iter().map(String::as_str).collect();
        if order.len() > 1 {
            order.shuffle(&mut rand::thread_rng());
        }
        order
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ResolveError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ResolveError::NoIpfsResponse(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ResolveError::NoIpfsResponse(format!(
                "{url}: HTTP {}",
                response.status()
            )));
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| ResolveError::NoIpfsResponse(e.to_string()))
    }
}

#[async_trait]
impl Resolver for HttpIpfsResolver {
    async fn resolve(&self, _network: &str, _contract: &str, link: &str) -> Result<Vec<u8>, ResolveError> {
        if !ipfs::is(link) {
            return self.fetch(link).await;
        }

        let cid = ipfs::hash(link).map_err(|e| ResolveError::Permanent(e.to_string()))?;

        let gateways = self.shuffled_gateways();
        if gateways.is_empty() {
            return Err(ResolveError::NoIpfsResponse(
                "no IPFS gateways configured".to_string(),
            ));
        }

        let mut last_error = None;
        for gateway in gateways {
            let url = ipfs::link(gateway, &cid);
            match self.fetch(&url).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| ResolveError::NoIpfsResponse(link.to_string())))
    }
}
