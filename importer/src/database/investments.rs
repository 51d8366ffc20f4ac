use super::{with_connection_retries, Database};
use anyhow::{Context, Result};
use model::records::Investment;
use primitive_types::H160;
use sqlx::Executor;
use std::collections::HashMap;

/// One batch of investment rows to upsert, as produced by the investment
/// pipeline for a block range.
#[derive(Clone, Debug, Default)]
pub struct InvestmentBatch {
    pub investments: Vec<Investment>,
}

fn address_text(address: &H160) -> String {
    format!("{:#x}", address)
}

impl Database {
    /// Maps investor addresses to their serial ids, creating missing rows.
    pub async fn investor_ids(&self, addresses: &[H160]) -> Result<HashMap<H160, i64>> {
        if addresses.is_empty() {
            return Ok(HashMap::new());
        }
        let texts: Vec<String> = addresses.iter().map(address_text).collect();

        const INSERT: &str = "\
            INSERT INTO investor (address) SELECT unnest($1::text[]) \
            ON CONFLICT (address) DO NOTHING;";
        sqlx::query(INSERT)
            .bind(&texts)
            .execute(self.pool())
            .await
            .context("investor insert failed")?;

        const SELECT: &str = "\
            SELECT investor_id, address FROM investor WHERE address = ANY($1);";
        let rows: Vec<(i64, String)> = sqlx::query_as(SELECT)
            .bind(&texts)
            .fetch_all(self.pool())
            .await
            .context("investor select failed")?;
        rows.into_iter()
            .map(|(investor_id, address)| {
                let address = address
                    .strip_prefix("0x")
                    .unwrap_or(&address)
                    .parse::<H160>()
                    .with_context(|| format!("malformed investor address {}", address))?;
                Ok((address, investor_id))
            })
            .collect()
    }

    /// Upserts investment rows, all within one transaction. Balances
    /// overwrite, metadata payloads deep merge.
    pub async fn upsert_investments(&self, batch: &InvestmentBatch) -> Result<()> {
        if batch.investments.is_empty() {
            return Ok(());
        }
        let addresses: Vec<H160> = batch
            .investments
            .iter()
            .map(|investment| investment.investor_address)
            .collect();
        let investor_ids = self.investor_ids(&addresses).await?;

        const QUERY: &str = "\
            INSERT INTO investment_ts (investor_id, product_id, datetime, balance, investment_data) \
            VALUES ($1, $2, $3, $4, $5) \
            ON CONFLICT (investor_id, product_id, datetime) DO UPDATE \
            SET balance = EXCLUDED.balance, \
                investment_data = jsonb_merge(investment_ts.investment_data, EXCLUDED.investment_data);";

        let investor_ids = &investor_ids;
        with_connection_retries(move || async move {
            let mut transaction = self.begin_with_timeout().await?;
            for investment in &batch.investments {
                let investor_id = investor_ids
                    .get(&investment.investor_address)
                    .expect("investor id missing for an address that was just inserted");
                transaction
                    .execute(
                        sqlx::query(QUERY)
                            .bind(investor_id)
                            .bind(investment.product_id)
                            .bind(investment.datetime)
                            .bind(&investment.balance)
                            .bind(&investment.investment_data),
                    )
                    .await?;
            }
            transaction.commit().await
        })
        .await
        .context("upsert_investments failed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn addresses_serialize_as_lowercase_hex() {
        let address = H160([0xAB; 20]);
        assert_eq!(
            address_text(&address),
            "0xabababababababababababababababababababab"
        );
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_investments_round_trip() {
        let db = Database::new("postgresql://").unwrap();
        db.clear().await.unwrap();

        let batch = InvestmentBatch {
            investments: vec![Investment {
                datetime: Utc.timestamp_opt(1_650_000_000, 0).unwrap(),
                product_id: 1,
                investor_address: H160([1; 20]),
                balance: BigDecimal::from(100),
                investment_data: json!({"blockNumber": 900}),
            }],
        };
        db.upsert_investments(&batch).await.unwrap();
        // Idempotent on replay.
        db.upsert_investments(&batch).await.unwrap();

        let ids = db.investor_ids(&[H160([1; 20])]).await.unwrap();
        assert_eq!(ids.len(), 1);
    }
}
