use serde::{Deserialize, Serialize};

/// Identifier and descriptor for a time series of asset prices.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceFeed {
    pub price_feed_id: i64,
    /// Stable external key, e.g. `beefy-data:BIFI:usd`.
    pub feed_key: String,
    pub from_asset_key: String,
    pub to_asset_key: String,
    pub price_feed_data: PriceFeedData,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceFeedData {
    /// Inactive feeds are kept for history but no longer imported.
    pub active: bool,
}
