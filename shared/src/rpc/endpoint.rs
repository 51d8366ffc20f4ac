use crate::rpc::gate::RpcGate;
use crate::rpc::limitations::RpcLimitations;
use crate::rpc::quirks::{quirks_for, AdaptedTransport};
use crate::transport::{
    safe_url, Buffered, Configuration, HttpTransport, MetricTransport, TransportMetrics,
};
use anyhow::{ensure, Result};
use model::Chain;
use rand::seq::SliceRandom;
use reqwest::Url;
use std::sync::Arc;
use web3::types::{Block, BlockId, Bytes, CallRequest, Filter, Log, H256};

/// The linear provider: one JSON-RPC call per request.
pub type LinearTransport = AdaptedTransport<MetricTransport<HttpTransport>>;
/// The batch provider: requests arriving within the coalescing window are
/// grouped into one JSON-RPC batch.
pub type BatchingTransport = Buffered<LinearTransport>;

/// One RPC endpoint with its two providers, declared limitations and the
/// process wide gate serializing access to it.
pub struct RpcEndpoint {
    chain: Chain,
    url_label: String,
    limitations: RpcLimitations,
    gate: Arc<RpcGate>,
    linear: web3::Web3<LinearTransport>,
    batching: web3::Web3<BatchingTransport>,
}

impl RpcEndpoint {
    pub fn new(
        chain: Chain,
        url: Url,
        client: reqwest::Client,
        limitations: RpcLimitations,
        metrics: Arc<dyn TransportMetrics>,
    ) -> Self {
        let url_label = safe_url(&url);
        let transport = AdaptedTransport::new(
            MetricTransport::new(HttpTransport::new(client, url), metrics),
            quirks_for(chain),
        );
        let batching = Buffered::with_config(
            transport.clone(),
            Configuration {
                max_batch_len: limitations
                    .methods
                    .values()
                    .filter_map(|limit| *limit)
                    .max()
                    .unwrap_or(1),
                ..Default::default()
            },
        );
        let gate = RpcGate::for_endpoint(&url_label, limitations.min_delay_between_calls);
        Self {
            chain,
            url_label,
            limitations,
            gate,
            linear: web3::Web3::new(transport),
            batching: web3::Web3::new(batching),
        }
    }

    /// Picks one url uniformly at random from the configured list for this
    /// chain. Every pipeline of one process run talks to the same endpoint.
    pub fn sampled_from(
        chain: Chain,
        urls: &[Url],
        client: reqwest::Client,
        limitations: RpcLimitations,
        metrics: Arc<dyn TransportMetrics>,
    ) -> Result<Self> {
        ensure!(!urls.is_empty(), "no rpc urls configured for {}", chain);
        let url = urls
            .choose(&mut rand::thread_rng())
            .expect("non empty url list")
            .clone();
        Ok(Self::new(chain, url, client, limitations, metrics))
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    /// The endpoint url with secrets stripped, safe to log.
    pub fn url_label(&self) -> &str {
        &self.url_label
    }

    pub fn limitations(&self) -> &RpcLimitations {
        &self.limitations
    }

    pub fn gate(&self) -> &Arc<RpcGate> {
        &self.gate
    }

    pub fn provider(&self, use_batching: bool) -> RpcProvider {
        if use_batching {
            RpcProvider::Batching(self.batching.clone())
        } else {
            RpcProvider::Linear(self.linear.clone())
        }
    }
}

impl std::fmt::Debug for RpcEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcEndpoint")
            .field("chain", &self.chain)
            .field("url", &self.url_label)
            .finish()
    }
}

/// Uniform surface over whichever provider the batch planner selected.
///
/// Issuing several calls concurrently against the batching variant makes
/// them coalesce into one JSON-RPC batch; against the linear variant they
/// are sent one by one.
#[derive(Clone)]
pub enum RpcProvider {
    Linear(web3::Web3<LinearTransport>),
    Batching(web3::Web3<BatchingTransport>),
}

impl RpcProvider {
    pub async fn logs(&self, filter: Filter) -> Result<Vec<Log>, web3::Error> {
        match self {
            RpcProvider::Linear(web3) => web3.eth().logs(filter).await,
            RpcProvider::Batching(web3) => web3.eth().logs(filter).await,
        }
    }

    pub async fn call(
        &self,
        request: CallRequest,
        block: Option<BlockId>,
    ) -> Result<Bytes, web3::Error> {
        match self {
            RpcProvider::Linear(web3) => web3.eth().call(request, block).await,
            RpcProvider::Batching(web3) => web3.eth().call(request, block).await,
        }
    }

    pub async fn block(&self, block: BlockId) -> Result<Option<Block<H256>>, web3::Error> {
        match self {
            RpcProvider::Linear(web3) => web3.eth().block(block).await,
            RpcProvider::Batching(web3) => web3.eth().block(block).await,
        }
    }

    pub async fn block_number(&self) -> Result<u64, web3::Error> {
        let number = match self {
            RpcProvider::Linear(web3) => web3.eth().block_number().await?,
            RpcProvider::Batching(web3) => web3.eth().block_number().await?,
        };
        Ok(number.as_u64())
    }
}
