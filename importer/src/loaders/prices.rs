//! Off chain oracle price time series through the beefy data api.

use anyhow::{Context, Result};
use bigdecimal::BigDecimal;
use chrono::{DateTime, TimeZone, Utc};
use model::price_feed::PriceFeed;
use model::ranges::Range;
use model::records::PricePoint;
use reqwest::{Client, Url};
use serde::Deserialize;

/// A raw sample as served by the api.
#[derive(Clone, Debug, Deserialize)]
pub struct RawPriceSample {
    /// Unix seconds.
    #[serde(rename = "ts")]
    pub timestamp: i64,
    /// Price in the feed's quote asset.
    #[serde(rename = "v")]
    pub value: f64,
}

/// Client for the beefy data api.
pub struct BeefyDataClient {
    client: Client,
    base_url: Url,
}

impl BeefyDataClient {
    pub fn new(client: Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    /// All samples of a feed within `[from, to)`, oldest first.
    pub async fn price_range(
        &self,
        feed: &PriceFeed,
        range: &Range<DateTime<Utc>>,
    ) -> Result<Vec<PricePoint>> {
        let mut url = self
            .base_url
            .join("api/v2/prices/range")
            .context("malformed base url")?;
        url.query_pairs_mut()
            .append_pair("oracle", &feed.feed_key)
            .append_pair("from", &range.from.timestamp().to_string())
            .append_pair("to", &range.to.timestamp().to_string());

        let samples: Vec<RawPriceSample> = self
            .client
            .get(url)
            .send()
            .await
            .context("price api request failed")?
            .error_for_status()
            .context("price api returned an error status")?
            .json()
            .await
            .context("malformed price api response")?;

        samples
            .into_iter()
            .map(|sample| price_point(feed, sample))
            .collect()
    }
}

fn price_point(feed: &PriceFeed, sample: RawPriceSample) -> Result<PricePoint> {
    let datetime = Utc
        .timestamp_opt(sample.timestamp, 0)
        .single()
        .with_context(|| format!("sample timestamp {} out of range", sample.timestamp))?;
    let price = BigDecimal::try_from(sample.value)
        .with_context(|| format!("sample value {} is not a finite number", sample.value))?;
    Ok(PricePoint {
        datetime,
        price_feed_id: feed.price_feed_id,
        // Oracle prices are not anchored to a chain, the time series shares
        // the table with block anchored ones.
        block_number: 0,
        price,
        price_data: serde_json::json!({
            "feedKey": feed.feed_key,
            "ts": sample.timestamp,
            "v": sample.value,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::price_feed::PriceFeedData;

    fn feed() -> PriceFeed {
        PriceFeed {
            price_feed_id: 7,
            feed_key: "beefy-data:BIFI".into(),
            from_asset_key: "BIFI".into(),
            to_asset_key: "usd".into(),
            price_feed_data: PriceFeedData { active: true },
        }
    }

    #[test]
    fn samples_become_price_points() {
        let point = price_point(
            &feed(),
            RawPriceSample {
                timestamp: 1_650_000_000,
                value: 412.5,
            },
        )
        .unwrap();
        assert_eq!(point.price_feed_id, 7);
        assert_eq!(point.block_number, 0);
        assert_eq!(point.datetime.timestamp(), 1_650_000_000);
        assert_eq!(point.price_data["feedKey"], "beefy-data:BIFI");
    }

    #[test]
    fn non_finite_samples_are_rejected() {
        assert!(price_point(
            &feed(),
            RawPriceSample {
                timestamp: 1_650_000_000,
                value: f64::NAN,
            },
        )
        .is_err());
    }
}
