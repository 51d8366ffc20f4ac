//! Contract creation lookups through the chain explorer api, used to seed a
//! default import state the first time a product is seen.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use model::Chain;
use primitive_types::H160;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContractCreation {
    pub block_number: u64,
    pub datetime: DateTime<Utc>,
}

pub struct ContractCreationClient {
    client: Client,
    api_keys: HashMap<Chain, String>,
}

#[derive(Deserialize)]
struct ExplorerResponse {
    status: String,
    message: String,
    result: serde_json::Value,
}

#[derive(Deserialize)]
struct ExplorerTransaction {
    #[serde(rename = "blockNumber")]
    block_number: String,
    #[serde(rename = "timeStamp")]
    timestamp: String,
}

impl ContractCreationClient {
    pub fn new(client: Client, api_keys: HashMap<Chain, String>) -> Self {
        Self { client, api_keys }
    }

    /// The block and datetime of the first transaction of `address`, which
    /// for a contract is its deployment.
    pub async fn contract_creation(
        &self,
        chain: Chain,
        address: H160,
    ) -> Result<ContractCreation> {
        let mut url = explorer_base_url(chain)?;
        url.query_pairs_mut()
            .append_pair("module", "account")
            .append_pair("action", "txlist")
            .append_pair("address", &format!("{:#x}", address))
            .append_pair("startblock", "0")
            .append_pair("page", "1")
            .append_pair("offset", "1")
            .append_pair("sort", "asc");
        if let Some(api_key) = self.api_keys.get(&chain) {
            url.query_pairs_mut().append_pair("apikey", api_key);
        }

        let response: ExplorerResponse = self
            .client
            .get(url)
            .send()
            .await
            .context("explorer request failed")?
            .error_for_status()
            .context("explorer returned an error status")?
            .json()
            .await
            .context("malformed explorer response")?;
        if response.status != "1" {
            bail!(
                "explorer error for {:#x} on {}: {}",
                address,
                chain,
                response.message
            );
        }

        let transactions: Vec<ExplorerTransaction> = serde_json::from_value(response.result)
            .context("malformed explorer transaction list")?;
        let first = transactions
            .first()
            .ok_or_else(|| anyhow!("no transactions for contract {:#x} on {}", address, chain))?;
        parse_creation(first)
    }
}

fn parse_creation(transaction: &ExplorerTransaction) -> Result<ContractCreation> {
    let block_number = transaction
        .block_number
        .parse()
        .context("non numeric block number")?;
    let timestamp: i64 = transaction
        .timestamp
        .parse()
        .context("non numeric timestamp")?;
    let datetime = Utc
        .timestamp_opt(timestamp, 0)
        .single()
        .context("timestamp out of range")?;
    Ok(ContractCreation {
        block_number,
        datetime,
    })
}

fn explorer_base_url(chain: Chain) -> Result<reqwest::Url> {
    let base = match chain {
        Chain::Arbitrum => "https://api.arbiscan.io/api",
        Chain::Aurora => "https://explorer.mainnet.aurora.dev/api",
        Chain::Avax => "https://api.snowtrace.io/api",
        Chain::Bsc => "https://api.bscscan.com/api",
        Chain::Celo => "https://explorer.celo.org/api",
        Chain::Cronos => "https://api.cronoscan.com/api",
        Chain::Emerald => "https://explorer.emerald.oasis.dev/api",
        Chain::Ethereum => "https://api.etherscan.io/api",
        Chain::Fantom => "https://api.ftmscan.com/api",
        Chain::Fuse => "https://explorer.fuse.io/api",
        Chain::Harmony => "https://explorer.harmony.one/api",
        Chain::Heco => "https://api.hecoinfo.com/api",
        Chain::Metis => "https://andromeda-explorer.metis.io/api",
        Chain::Moonbeam => "https://api-moonbeam.moonscan.io/api",
        Chain::Moonriver => "https://api-moonriver.moonscan.io/api",
        Chain::Optimism => "https://api-optimistic.etherscan.io/api",
        Chain::Polygon => "https://api.polygonscan.com/api",
        Chain::Syscoin => "https://explorer.syscoin.org/api",
    };
    base.parse().context("malformed explorer base url")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_explorer_transactions() {
        let creation = parse_creation(&ExplorerTransaction {
            block_number: "12345".into(),
            timestamp: "1650000000".into(),
        })
        .unwrap();
        assert_eq!(creation.block_number, 12_345);
        assert_eq!(creation.datetime.timestamp(), 1_650_000_000);

        assert!(parse_creation(&ExplorerTransaction {
            block_number: "not-a-number".into(),
            timestamp: "0".into(),
        })
        .is_err());
    }

    #[test]
    fn every_chain_has_an_explorer() {
        for chain in Chain::ALL {
            explorer_base_url(chain).unwrap();
        }
    }
}
