//! The import state store: the durable, per import key record of which
//! ranges are covered and which are queued for retry.

use super::{with_connection_retries, Database};
use anyhow::{Context, Result};
use model::import_state::{ImportData, ImportState};
use serde_json::Value;
use sqlx::Executor;
use std::collections::{BTreeMap, HashMap};

/// One outcome to fold into an import state row. Batches may mix updates for
/// several import keys; they are grouped by key before merging.
#[derive(Clone, Debug)]
pub struct ImportStateUpdate<T> {
    pub import_key: String,
    pub payload: T,
}

impl Database {
    /// Batched read of import states. Keys without a row are absent from the
    /// returned map.
    pub async fn fetch_import_states(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, ImportState>> {
        const QUERY: &str = "\
            SELECT import_key, import_data FROM import_state WHERE import_key = ANY($1);";
        let rows: Vec<(String, Value)> = sqlx::query_as(QUERY)
            .bind(keys)
            .fetch_all(self.pool())
            .await
            .context("fetch_import_states failed")?;
        rows.into_iter()
            .map(|(import_key, import_data)| {
                let import_data: ImportData = serde_json::from_value(import_data)
                    .with_context(|| format!("malformed import_data for {}", import_key))?;
                Ok((
                    import_key.clone(),
                    ImportState {
                        import_key,
                        import_data,
                    },
                ))
            })
            .collect()
    }

    /// Inserts a state or deep merges the JSON payload into an existing row.
    /// Ranges lists replace wholesale under `jsonb_merge`. This never evolves
    /// ranges incrementally; that is what [`Database::update_import_states`]
    /// is for.
    pub async fn upsert_import_state(&self, state: &ImportState) -> Result<()> {
        const QUERY: &str = "\
            INSERT INTO import_state (import_key, import_data) VALUES ($1, $2) \
            ON CONFLICT (import_key) DO UPDATE \
            SET import_data = jsonb_merge(import_state.import_data, EXCLUDED.import_data);";
        sqlx::query(QUERY)
            .bind(&state.import_key)
            .bind(serde_json::to_value(&state.import_data)?)
            .execute(self.pool())
            .await
            .context("upsert_import_state failed")?;
        Ok(())
    }

    /// The only entry point allowed to evolve ranges.
    ///
    /// Groups `updates` by import key, locks the referenced rows in key
    /// order (consistent ordering prevents deadlocks between concurrent
    /// pipelines), applies `merge` to each group and writes the results
    /// back, all within one transaction. Connection timeouts are retried;
    /// after exhaustion the error surfaces and no state was changed.
    pub async fn update_import_states<T, F>(
        &self,
        updates: Vec<ImportStateUpdate<T>>,
        merge: F,
    ) -> Result<()>
    where
        F: Fn(&[T], ImportData) -> ImportData,
    {
        if updates.is_empty() {
            return Ok(());
        }
        let mut by_key: BTreeMap<String, Vec<T>> = BTreeMap::new();
        for update in updates {
            by_key.entry(update.import_key).or_default().push(update.payload);
        }
        let keys: Vec<String> = by_key.keys().cloned().collect();

        let keys = &keys;
        let by_key = &by_key;
        let merge = &merge;
        with_connection_retries(move || async move {
            let mut transaction = self.begin_with_timeout().await?;

            const LOCK: &str = "\
                SELECT import_key, import_data FROM import_state \
                WHERE import_key = ANY($1) ORDER BY import_key FOR UPDATE;";
            let rows: Vec<(String, Value)> = sqlx::query_as(LOCK)
                .bind(keys)
                .fetch_all(&mut *transaction)
                .await?;

            const WRITE: &str = "UPDATE import_state SET import_data = $2 WHERE import_key = $1;";
            for (import_key, import_data) in rows {
                let current: ImportData =
                    serde_json::from_value(import_data).map_err(to_decode_error)?;
                let payloads = by_key
                    .get(&import_key)
                    .expect("locked a row that was not requested");
                let merged = merge(payloads, current);
                transaction
                    .execute(
                        sqlx::query(WRITE)
                            .bind(&import_key)
                            .bind(serde_json::to_value(&merged).map_err(to_decode_error)?),
                    )
                    .await?;
            }

            transaction.commit().await
        })
        .await
        .context("update_import_states failed")?;
        Ok(())
    }
}

fn to_decode_error(error: serde_json::Error) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use model::import_state::{ImportRanges, OraclePriceImport, RangesUpdate};
    use model::ranges::Range;

    fn price_state(feed_id: i64) -> ImportState {
        let date = Utc.timestamp_opt(1_650_000_000, 0).unwrap();
        let import_data = ImportData::OraclePrice(OraclePriceImport {
            price_feed_id: feed_id,
            first_date: date,
            ranges: ImportRanges::new(date),
        });
        ImportState {
            import_key: import_data.import_key(),
            import_data,
        }
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_import_state_round_trip() {
        let db = Database::new("postgresql://").unwrap();
        db.clear().await.unwrap();

        let state = price_state(1);
        db.upsert_import_state(&state).await.unwrap();

        let fetched = db
            .fetch_import_states(&[state.import_key.clone(), "oracle:price:999".into()])
            .await
            .unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[&state.import_key], state);
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_update_evolves_ranges_under_lock() {
        let db = Database::new("postgresql://").unwrap();
        db.clear().await.unwrap();

        let state = price_state(2);
        db.upsert_import_state(&state).await.unwrap();

        let date = Utc.timestamp_opt(1_650_000_000, 0).unwrap();
        let update = ImportStateUpdate {
            import_key: state.import_key.clone(),
            payload: RangesUpdate::<chrono::DateTime<Utc>> {
                covered_ranges: vec![Range::new(date, date + chrono::Duration::hours(1))],
                success_ranges: vec![],
                error_ranges: vec![],
            },
        };
        db.update_import_states(vec![update], |payloads, mut current| {
            if let ImportData::OraclePrice(ref mut import) = current {
                for payload in payloads {
                    import.ranges.apply(payload.clone(), Utc::now());
                }
            }
            current
        })
        .await
        .unwrap();

        let fetched = db
            .fetch_import_states(&[state.import_key.clone()])
            .await
            .unwrap();
        match &fetched[&state.import_key].import_data {
            ImportData::OraclePrice(import) => {
                assert_eq!(import.ranges.covered_ranges.len(), 1);
            }
            other => panic!("unexpected import data {:?}", other),
        }
    }
}
