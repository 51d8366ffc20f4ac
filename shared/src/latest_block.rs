use crate::rpc::endpoint::RpcEndpoint;
use crate::rpc::gate::CallOptions;
use crate::rpc::quirks::{classify_with_quirks, quirks_for};
use crate::streams::TimedCache;
use anyhow::{Context, Result};
use model::Chain;
use std::sync::Arc;
use std::time::Duration;

const CACHE_TTL: Duration = Duration::from_secs(60);
const RETRY_BUDGET: Duration = Duration::from_secs(10);

/// Fetches the chain head block number.
///
/// Process wide cache keyed by chain with a 60 s TTL; at most one
/// `eth_blockNumber` call is in flight per chain within the TTL. A forced
/// value bypasses the fetch entirely.
pub struct LatestBlockFetcher {
    cache: TimedCache<Chain, u64>,
}

impl Default for LatestBlockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl LatestBlockFetcher {
    pub fn new() -> Self {
        Self {
            cache: TimedCache::new(CACHE_TTL),
        }
    }

    pub async fn latest_block_number(
        &self,
        endpoint: &Arc<RpcEndpoint>,
        forced: Option<u64>,
    ) -> Result<u64> {
        if let Some(block) = forced {
            return Ok(block);
        }
        let chain = endpoint.chain();
        let endpoint = endpoint.clone();
        self.cache
            .get_or_fetch(chain, move || async move {
                let quirks = quirks_for(chain);
                let gate = endpoint.gate().clone();
                let number = gate
                    .call(
                        move || {
                            let endpoint = endpoint.clone();
                            let quirks = quirks.clone();
                            async move {
                                endpoint
                                    .provider(false)
                                    .block_number()
                                    .await
                                    .map_err(|err| classify_with_quirks(&*quirks, err))
                            }
                        },
                        CallOptions {
                            max_total_retry: RETRY_BUDGET,
                        },
                    )
                    .await;
                number.map_err(anyhow::Error::new)
            })
            .await
            .with_context(|| format!("failed to get latest block of {}", chain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::limitations::RpcLimitations;
    use crate::transport::NoopTransportMetrics;

    #[tokio::test]
    async fn forced_value_bypasses_the_rpc() {
        // The endpoint points nowhere; a forced head must not touch it.
        let endpoint = Arc::new(RpcEndpoint::new(
            Chain::Fantom,
            "http://localhost:1".parse().unwrap(),
            reqwest::Client::new(),
            RpcLimitations::default_for(Chain::Fantom),
            Arc::new(NoopTransportMetrics),
        ));
        let fetcher = LatestBlockFetcher::new();
        let head = fetcher
            .latest_block_number(&endpoint, Some(123_456))
            .await
            .unwrap();
        assert_eq!(head, 123_456);
    }
}
