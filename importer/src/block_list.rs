//! The per product block list: one interpolated block number per timestep,
//! derived from the (datetime, block) pairs the investment import observed.
//! This is what maps share rate sampling timesteps onto blocks.

use crate::database::Database;
use crate::planner::BlockSample;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use lazy_static::lazy_static;
use shared::streams::TimedCache;
use std::sync::Arc;

/// Share rates are sampled once per timestep.
pub fn share_rate_time_step() -> Duration {
    Duration::minutes(15)
}

const CACHE_TTL: std::time::Duration = std::time::Duration::from_secs(15 * 60);

lazy_static! {
    static ref BLOCK_LISTS: TimedCache<i64, Arc<Vec<BlockSample>>> = TimedCache::new(CACHE_TTL);
}

impl Database {
    /// Raw (datetime, block) correspondences observed by the investment
    /// import of one product, oldest first.
    pub async fn investment_block_samples(&self, product_id: i64) -> Result<Vec<BlockSample>> {
        const QUERY: &str = "\
            SELECT datetime, (investment_data->>'blockNumber')::bigint \
            FROM investment_ts \
            WHERE product_id = $1 AND investment_data->>'blockNumber' IS NOT NULL \
            ORDER BY datetime;";
        let rows: Vec<(DateTime<Utc>, i64)> = sqlx::query_as(QUERY)
            .bind(product_id)
            .fetch_all(self.pool())
            .await
            .context("investment_block_samples failed")?;
        Ok(rows
            .into_iter()
            .map(|(datetime, block_number)| BlockSample {
                datetime,
                block_number: block_number.max(0) as u64,
            })
            .collect())
    }
}

/// The cached, interpolated block list of one product.
pub async fn block_list(db: &Database, product_id: i64) -> Result<Arc<Vec<BlockSample>>> {
    let db = db.clone();
    BLOCK_LISTS
        .get_or_fetch(product_id, move || async move {
            let samples = db.investment_block_samples(product_id).await?;
            Ok(Arc::new(build_block_list(&samples, share_rate_time_step())))
        })
        .await
}

/// Linearly interpolates the raw samples at regular timestep marks. Marks
/// outside the sampled span are not produced; extrapolation to the chain
/// head is the planner's job.
pub fn build_block_list(samples: &[BlockSample], time_step: Duration) -> Vec<BlockSample> {
    let step_ms = time_step.num_milliseconds().max(1);
    let (first, last) = match (samples.first(), samples.last()) {
        (Some(first), Some(last)) if first.datetime < last.datetime => (first, last),
        _ => return samples.to_vec(),
    };

    let mut result = Vec::new();
    let mut mark = ceil_to_step(first.datetime, step_ms);
    let mut upper = 1;
    while mark <= last.datetime {
        while samples[upper].datetime < mark {
            upper += 1;
        }
        let (before, after) = (&samples[upper - 1], &samples[upper]);
        result.push(BlockSample {
            datetime: mark,
            block_number: interpolate(before, after, mark),
        });
        mark += time_step;
    }
    result
}

fn ceil_to_step(datetime: DateTime<Utc>, step_ms: i64) -> DateTime<Utc> {
    let millis = datetime.timestamp_millis();
    let floored = millis - millis.rem_euclid(step_ms);
    let ceiled = if floored < millis {
        floored + step_ms
    } else {
        floored
    };
    Utc.timestamp_millis_opt(ceiled)
        .single()
        .expect("rounding keeps the timestamp in range")
}

fn interpolate(before: &BlockSample, after: &BlockSample, mark: DateTime<Utc>) -> u64 {
    let span_ms = (after.datetime - before.datetime).num_milliseconds();
    if span_ms <= 0 {
        return before.block_number;
    }
    let elapsed_ms = (mark - before.datetime).num_milliseconds();
    let block_span = after.block_number.saturating_sub(before.block_number) as i64;
    before.block_number + (block_span * elapsed_ms / span_ms).max(0) as u64
}
