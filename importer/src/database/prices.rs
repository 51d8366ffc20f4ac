use super::{with_connection_retries, Database};
use anyhow::{Context, Result};
use model::records::PricePoint;
use sqlx::Executor;
use uuid::Uuid;

/// One batch of price samples to upsert.
#[derive(Clone, Debug, Default)]
pub struct PriceBatch {
    pub prices: Vec<PricePoint>,
}

impl Database {
    /// Upserts price rows together with their raw source payloads. The
    /// numeric price overwrites on conflict. Replaying a range is routine,
    /// so a price row keeps its debug uuid across upserts: a fresh uuid is
    /// only minted when the row does not exist yet, otherwise the existing
    /// one is reused and the debug insert is a no-op.
    pub async fn upsert_prices(&self, batch: &PriceBatch) -> Result<()> {
        if batch.prices.is_empty() {
            return Ok(());
        }

        const EXISTING_UUID: &str = "\
            SELECT debug_data_uuid FROM price_ts \
            WHERE price_feed_id = $1 AND block_number = $2 AND datetime = $3;";
        const DEBUG_DATA: &str = "\
            INSERT INTO debug_data_ts (debug_data_uuid, datetime, origin_table, debug_data) \
            VALUES ($1, $2, 'price_ts', $3) \
            ON CONFLICT DO NOTHING;";
        const PRICE: &str = "\
            INSERT INTO price_ts (price_feed_id, block_number, datetime, price, debug_data_uuid) \
            VALUES ($1, $2, $3, $4, $5) \
            ON CONFLICT (price_feed_id, block_number, datetime) DO UPDATE \
            SET price = EXCLUDED.price;";

        with_connection_retries(move || async move {
            let mut transaction = self.begin_with_timeout().await?;
            for price in &batch.prices {
                let existing: Option<Uuid> = sqlx::query_scalar(EXISTING_UUID)
                    .bind(price.price_feed_id)
                    .bind(price.block_number as i64)
                    .bind(price.datetime)
                    .fetch_optional(&mut *transaction)
                    .await?;
                let debug_data_uuid = existing.unwrap_or_else(Uuid::new_v4);
                transaction
                    .execute(
                        sqlx::query(DEBUG_DATA)
                            .bind(debug_data_uuid)
                            .bind(price.datetime)
                            .bind(&price.price_data),
                    )
                    .await?;
                transaction
                    .execute(
                        sqlx::query(PRICE)
                            .bind(price.price_feed_id)
                            .bind(price.block_number as i64)
                            .bind(price.datetime)
                            .bind(&price.price)
                            .bind(debug_data_uuid),
                    )
                    .await?;
            }
            transaction.commit().await
        })
        .await
        .context("upsert_prices failed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[tokio::test]
    #[ignore]
    async fn postgres_prices_are_idempotent() {
        let db = Database::new("postgresql://").unwrap();
        db.clear().await.unwrap();

        let batch = PriceBatch {
            prices: vec![PricePoint {
                datetime: Utc.timestamp_opt(1_650_000_000, 0).unwrap(),
                price_feed_id: 1,
                block_number: 900,
                price: BigDecimal::from(3),
                price_data: json!({"source": "beefy-data"}),
            }],
        };
        db.upsert_prices(&batch).await.unwrap();
        db.upsert_prices(&batch).await.unwrap();

        // Replays must not orphan debug rows: the price row keeps pointing
        // at the one debug payload written on first insert.
        let debug_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM debug_data_ts;")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(debug_rows, 1);
        let price_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM price_ts;")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(price_rows, 1);
    }
}
