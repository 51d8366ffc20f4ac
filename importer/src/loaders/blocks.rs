//! Block timestamp lookups with a process wide cache. Timestamps never
//! change once a block is final, so the cache is long lived and shared by
//! every pipeline of the process.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use model::Chain;
use shared::rpc::endpoint::RpcProvider;
use shared::rpc::error::RpcError;
use shared::rpc::quirks::{classify_with_quirks, quirks_for};
use shared::streams::TimedCache;
use std::collections::HashMap;
use std::time::Duration;
use web3::types::{BlockId, BlockNumber};

const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

lazy_static! {
    static ref BLOCK_DATETIMES: TimedCache<(Chain, u64), DateTime<Utc>> =
        TimedCache::new(CACHE_TTL);
}

/// Fetches the timestamps of a batch of blocks, serving repeats from the
/// cache. Fresh lookups are issued concurrently so the batching provider
/// coalesces them.
pub async fn fetch_block_datetimes(
    provider: &RpcProvider,
    chain: Chain,
    blocks: Vec<u64>,
) -> Result<HashMap<u64, DateTime<Utc>>, RpcError> {
    let mut result = HashMap::with_capacity(blocks.len());
    let mut missing = Vec::new();
    for block in blocks {
        match BLOCK_DATETIMES.get(&(chain, block)) {
            Some(datetime) => {
                result.insert(block, datetime);
            }
            None => missing.push(block),
        }
    }
    missing.sort_unstable();
    missing.dedup();

    let quirks = quirks_for(chain);
    let fetched = futures::future::try_join_all(missing.iter().map(|block| async move {
        provider
            .block(BlockId::Number(BlockNumber::Number((*block).into())))
            .await
    }))
    .await
    .map_err(|err| classify_with_quirks(&*quirks, err))?;

    for (block, header) in missing.into_iter().zip(fetched) {
        let datetime = block_datetime(header.as_ref(), block).map_err(RpcError::Fatal)?;
        BLOCK_DATETIMES.insert((chain, block), datetime);
        result.insert(block, datetime);
    }
    Ok(result)
}

fn block_datetime(
    header: Option<&web3::types::Block<web3::types::H256>>,
    block: u64,
) -> Result<DateTime<Utc>> {
    let header = header.ok_or_else(|| anyhow!("block {} not found", block))?;
    let timestamp = header.timestamp.as_u64() as i64;
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .with_context(|| format!("block {} has timestamp {} out of range", block, timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_blocks_are_an_error() {
        assert!(block_datetime(None, 900).is_err());
    }

    #[test]
    fn timestamps_become_utc_datetimes() {
        let header = web3::types::Block {
            timestamp: 1_650_000_000u64.into(),
            ..Default::default()
        };
        let datetime = block_datetime(Some(&header), 900).unwrap();
        assert_eq!(datetime, Utc.timestamp_opt(1_650_000_000, 0).unwrap());
    }
}
