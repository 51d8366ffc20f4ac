//! Command line arguments and related helpers shared between binaries.

use anyhow::{anyhow, Context, Result};
use model::Chain;
use std::fmt::Display;
use std::num::ParseFloatError;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// A `chain=value` command line pair, used for all per chain tunables.
#[derive(Clone, Debug)]
pub struct ChainValue<T> {
    pub chain: Chain,
    pub value: T,
}

impl<T> FromStr for ChainValue<T>
where
    T: FromStr,
    T::Err: Display,
{
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (chain, value) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected chain=value, got {:?}", s))?;
        Ok(Self {
            chain: chain.parse().context("invalid chain")?,
            value: value
                .parse()
                .map_err(|err| anyhow!("invalid value for {}: {}", chain, err))?,
        })
    }
}

#[derive(Debug, structopt::StructOpt)]
pub struct Arguments {
    #[structopt(
        long,
        env = "LOG_FILTER",
        default_value = "warn,importer=debug,shared=debug"
    )]
    pub log_filter: String,

    /// RPC urls as repeated `chain=url` pairs. When a chain has several urls
    /// one is sampled uniformly at startup.
    #[structopt(long, env = "RPC_URLS", use_delimiter = true)]
    pub rpc_urls: Vec<ChainValue<Url>>,

    /// Per chain override of the maximum block span of one RPC query.
    #[structopt(long, env = "CHAIN_RPC_MAX_QUERY_BLOCKS", use_delimiter = true)]
    pub chain_rpc_max_query_blocks: Vec<ChainValue<u64>>,

    /// Per chain override of the estimated milliseconds per block.
    #[structopt(long, env = "MS_PER_BLOCK_ESTIMATE", use_delimiter = true)]
    pub ms_per_block_estimate: Vec<ChainValue<u64>>,

    /// Longest date span of one oracle price query, in milliseconds.
    #[structopt(
        long,
        env = "BEEFY_PRICE_DATA_MAX_QUERY_RANGE_MS",
        default_value = "7776000000"
    )]
    pub price_data_max_query_range_ms: i64,

    /// Upper bound on ranges the planner generates per product and tick.
    #[structopt(
        long,
        env = "MAX_RANGES_PER_PRODUCT_TO_GENERATE",
        default_value = "100"
    )]
    pub max_ranges_per_product_to_generate: usize,

    /// Explorer api keys as `chain=key` pairs, used to look up contract
    /// creation blocks.
    #[structopt(long, env = "ETHERSCAN_API_KEY", use_delimiter = true)]
    pub etherscan_api_key: Vec<ChainValue<String>>,

    /// Timeout for all http requests.
    #[structopt(long, default_value = "10", parse(try_from_str = duration_from_seconds))]
    pub http_timeout: Duration,

    /// Most input objects one RPC facing operator buffers into a group.
    #[structopt(long, env = "MAX_INPUT_TAKE", default_value = "200")]
    pub max_input_take: usize,

    /// How long an RPC facing operator waits for its group to fill up.
    #[structopt(long, env = "MAX_INPUT_WAIT_MS", default_value = "5000", parse(try_from_str = duration_from_millis))]
    pub max_input_wait: Duration,

    /// Most rows one database facing operator buffers into a statement.
    #[structopt(long, env = "DB_MAX_INPUT_TAKE", default_value = "500")]
    pub db_max_input_take: usize,

    /// How long a database facing operator waits for its batch to fill up.
    #[structopt(long, env = "DB_MAX_INPUT_WAIT_MS", default_value = "5000", parse(try_from_str = duration_from_millis))]
    pub db_max_input_wait: Duration,

    /// Concurrency of CPU or database bound pipeline stages.
    #[structopt(long, env = "WORK_CONCURRENCY", default_value = "4")]
    pub work_concurrency: usize,

    /// Wall clock retry budget for one RPC batch.
    #[structopt(long, env = "MAX_TOTAL_RETRY_MS", default_value = "120000", parse(try_from_str = duration_from_millis))]
    pub max_total_retry: Duration,
}

impl Arguments {
    pub fn rpc_urls_for(&self, chain: Chain) -> Vec<Url> {
        self.rpc_urls
            .iter()
            .filter(|pair| pair.chain == chain)
            .map(|pair| pair.value.clone())
            .collect()
    }

    /// Chains that have at least one RPC url configured.
    pub fn configured_chains(&self) -> Vec<Chain> {
        let mut chains: Vec<_> = self.rpc_urls.iter().map(|pair| pair.chain).collect();
        chains.sort();
        chains.dedup();
        chains
    }

    pub fn max_query_blocks(&self, chain: Chain) -> u64 {
        per_chain(&self.chain_rpc_max_query_blocks, chain)
            .unwrap_or_else(|| default_max_query_blocks(chain))
    }

    pub fn ms_per_block(&self, chain: Chain) -> u64 {
        per_chain(&self.ms_per_block_estimate, chain).unwrap_or_else(|| default_ms_per_block(chain))
    }

    pub fn etherscan_api_key_for(&self, chain: Chain) -> Option<String> {
        per_chain(&self.etherscan_api_key, chain)
    }

    pub fn price_data_max_query_range(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.price_data_max_query_range_ms)
    }
}

fn per_chain<T: Clone>(pairs: &[ChainValue<T>], chain: Chain) -> Option<T> {
    pairs
        .iter()
        .find(|pair| pair.chain == chain)
        .map(|pair| pair.value.clone())
}

fn default_max_query_blocks(chain: Chain) -> u64 {
    match chain {
        Chain::Harmony | Chain::Cronos => 1_024,
        Chain::Celo | Chain::Emerald | Chain::Fuse | Chain::Syscoin => 2_000,
        _ => 3_000,
    }
}

fn default_ms_per_block(chain: Chain) -> u64 {
    match chain {
        Chain::Ethereum => 13_000,
        Chain::Bsc | Chain::Cronos => 3_000,
        Chain::Polygon | Chain::Avax | Chain::Harmony | Chain::Moonriver => 2_000,
        Chain::Fantom | Chain::Aurora => 1_000,
        Chain::Arbitrum | Chain::Optimism => 500,
        _ => 5_000,
    }
}

pub fn duration_from_seconds(s: &str) -> Result<Duration, ParseFloatError> {
    Ok(Duration::from_secs_f32(s.parse()?))
}

pub fn duration_from_millis(s: &str) -> Result<Duration, std::num::ParseIntError> {
    Ok(Duration::from_millis(s.parse()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chain_value_pairs() {
        let pair: ChainValue<u64> = "bsc=3000".parse().unwrap();
        assert_eq!(pair.chain, Chain::Bsc);
        assert_eq!(pair.value, 3000);
        assert!("bsc".parse::<ChainValue<u64>>().is_err());
        assert!("solana=1".parse::<ChainValue<u64>>().is_err());
    }

    #[test]
    fn parses_chain_url_pairs() {
        let pair: ChainValue<Url> = "fantom=https://rpc.ftm.tools".parse().unwrap();
        assert_eq!(pair.chain, Chain::Fantom);
        assert_eq!(pair.value.host_str(), Some("rpc.ftm.tools"));
    }
}
