use crate::chain::Chain;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use primitive_types::{H160, H256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A net ERC-20 balance change for one owner in one block.
///
/// The amount is signed: sends are negative, receives positive. Several
/// transfers of the same token and owner within one block are merged into a
/// single record before they get here.
#[derive(Clone, Debug, PartialEq)]
pub struct Erc20Transfer {
    pub chain: Chain,
    pub token_address: H160,
    pub token_decimals: u8,
    pub owner_address: H160,
    pub block_number: u64,
    pub transaction_hash: H256,
    pub amount_transferred: BigDecimal,
}

/// One sample of a price feed time series.
#[derive(Clone, Debug, PartialEq)]
pub struct PricePoint {
    pub datetime: DateTime<Utc>,
    pub price_feed_id: i64,
    pub block_number: u64,
    pub price: BigDecimal,
    /// Raw source payload, kept for debugging through `debug_data_ts`.
    pub price_data: Value,
}

/// An investor's balance in a product at a point in time.
#[derive(Clone, Debug, PartialEq)]
pub struct Investment {
    pub datetime: DateTime<Utc>,
    pub product_id: i64,
    pub investor_address: H160,
    pub balance: BigDecimal,
    pub investment_data: Value,
}

/// Serialized form of investment metadata stored in `investment_data`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestmentData {
    pub chain: Chain,
    pub block_number: u64,
    #[serde(with = "crate::h256_hexadecimal")]
    pub transaction_hash: H256,
    pub balance_diff: BigDecimal,
}
