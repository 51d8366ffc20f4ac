use super::Database;
use anyhow::{Context, Result};
use model::price_feed::{PriceFeed, PriceFeedData};
use model::product::{Product, ProductData};
use model::Chain;
use serde_json::Value;

impl Database {
    /// All products of one chain, the targets of the per chain pipelines.
    pub async fn products_for_chain(&self, chain: Chain) -> Result<Vec<Product>> {
        const QUERY: &str = "\
            SELECT product_id, product_key, chain, price_feed_id, product_data \
            FROM product WHERE chain = $1 ORDER BY product_id;";
        let rows: Vec<(i64, String, String, i64, Value)> = sqlx::query_as(QUERY)
            .bind(chain.as_str())
            .fetch_all(self.pool())
            .await
            .context("products_for_chain failed")?;
        rows.into_iter()
            .map(|(product_id, product_key, chain, price_feed_id, product_data)| {
                let product_data: ProductData = serde_json::from_value(product_data)
                    .with_context(|| format!("malformed product_data for {}", product_key))?;
                Ok(Product {
                    product_id,
                    product_key,
                    chain: chain.parse()?,
                    price_feed_id,
                    product_data,
                })
            })
            .collect()
    }

    /// All price feeds still marked active, the targets of the oracle price
    /// pipeline.
    pub async fn active_price_feeds(&self) -> Result<Vec<PriceFeed>> {
        const QUERY: &str = "\
            SELECT price_feed_id, feed_key, from_asset_key, to_asset_key, price_feed_data \
            FROM price_feed \
            WHERE (price_feed_data->>'active')::boolean \
            ORDER BY price_feed_id;";
        let rows: Vec<(i64, String, String, String, Value)> = sqlx::query_as(QUERY)
            .fetch_all(self.pool())
            .await
            .context("active_price_feeds failed")?;
        rows.into_iter()
            .map(
                |(price_feed_id, feed_key, from_asset_key, to_asset_key, price_feed_data)| {
                    let price_feed_data: PriceFeedData = serde_json::from_value(price_feed_data)
                        .with_context(|| format!("malformed price_feed_data for {}", feed_key))?;
                    Ok(PriceFeed {
                        price_feed_id,
                        feed_key,
                        from_asset_key,
                        to_asset_key,
                        price_feed_data,
                    })
                },
            )
            .collect()
    }
}
