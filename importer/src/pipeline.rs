//! The recurring import pipelines: historical (catch up from contract
//! creation) and recent (tail the chain head), composed from the planner,
//! the batch RPC operator, the loaders and the import state store.
//!
//! Result ingestion and import state bookkeeping are decoupled: every
//! planned range either survives all stages (and moves to the covered
//! ranges) or is reported through an error channel along the way (and moves
//! to the retry ranges). Rows are upserted idempotently so a range that
//! half succeeded before failing is safe to retry.

use crate::block_list::block_list;
use crate::database::{Database, ImportStateUpdate, InvestmentBatch, PriceBatch};
use crate::loaders::balances::{fetch_owner_balances, BalanceQuery};
use crate::loaders::blocks::fetch_block_datetimes;
use crate::loaders::contract_creation::ContractCreationClient;
use crate::loaders::prices::BeefyDataClient;
use crate::loaders::share_rate::{fetch_share_rates, share_rate_query, ShareRateQuery};
use crate::loaders::transfers::{fetch_erc20_transfers, TransferQuery};
use crate::planner::{
    historical_block_ranges, historical_date_ranges, interval_block_ranges, latest_block_query,
    PlannerConfig,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::channel::mpsc::UnboundedReceiver;
use futures::stream::{self, StreamExt};
use maplit::hashmap;
use model::import_state::{
    ImportData, ImportRanges, ImportState, OraclePriceImport, ProductInvestmentImport,
    ProductShareRateImport, RangesUpdate,
};
use model::price_feed::PriceFeed;
use model::product::Product;
use model::ranges::{Range, RangeBound};
use model::records::{Investment, InvestmentData, PricePoint};
use model::Chain;
use shared::latest_block::LatestBlockFetcher;
use shared::rpc::endpoint::RpcEndpoint;
use shared::rpc::limitations::{ETH_CALL, ETH_GET_BLOCK_BY_NUMBER, ETH_GET_LOGS};
use shared::streams::{
    batch_rpc_calls, buffer_time, error_channel, map_concurrent_caught, BatchRpcConfig,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Copy, Debug)]
pub struct PipelineConfig {
    pub planner: PlannerConfig,
    pub rpc_batch: BatchRpcConfig,
    pub db_max_input_take: usize,
    pub db_max_input_wait: Duration,
    pub work_concurrency: usize,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PipelineMode {
    /// Catch up from contract creation, retries behind new work.
    Historical,
    /// Tail the head with a single bounded range per target.
    Recent,
}

/// Everything the per chain pipelines need.
#[derive(Clone)]
pub struct ChainContext {
    pub chain: Chain,
    pub db: Database,
    pub endpoint: Arc<RpcEndpoint>,
    pub latest_block: Arc<LatestBlockFetcher>,
    pub creation_client: Arc<ContractCreationClient>,
    pub config: PipelineConfig,
}

/// Identity of one planned unit of work in the import state.
type RangeKey = (String, Range<u64>);

#[derive(Clone)]
struct TransferItem {
    product: Arc<Product>,
    import_key: String,
    query: TransferQuery,
}

#[derive(Clone)]
struct BalanceItem {
    parent: TransferItem,
    transfer: model::records::Erc20Transfer,
}

#[derive(Clone)]
struct ShareRateItem {
    import_key: String,
    price_feed_id: i64,
    query: ShareRateQuery,
    range: Range<u64>,
}

/// One tick of the investment pipeline: ERC-20 transfers, investor balances
/// at the transfer blocks, block timestamps, investment rows.
pub async fn investments_tick(ctx: &ChainContext, mode: PipelineMode) -> Result<()> {
    let products = ctx.db.products_for_chain(ctx.chain).await?;
    if products.is_empty() {
        return Ok(());
    }
    let head = ctx
        .latest_block
        .latest_block_number(&ctx.endpoint, None)
        .await?;
    let states = ensure_investment_states(ctx, &products, head).await?;

    let mut items = Vec::new();
    for product in products {
        let import_key = investment_key(product.product_id);
        let state = match states.get(&import_key) {
            Some(state) => state,
            None => continue,
        };
        let ranges = match mode {
            PipelineMode::Historical => historical_block_ranges(
                &state.ranges,
                state.contract_created_at_block,
                head,
                &ctx.config.planner,
            ),
            PipelineMode::Recent => latest_block_query(
                state.contract_created_at_block,
                state.ranges.covered_ranges.last().map(|range| range.to),
                head,
                &ctx.config.planner,
            )
            .into_iter()
            .collect(),
        };
        let product = Arc::new(product);
        let source = product.investment_source();
        items.extend(ranges.into_iter().map(|range| TransferItem {
            product: product.clone(),
            import_key: import_key.clone(),
            query: TransferQuery { source, range },
        }));
    }
    tracing::debug!(chain = %ctx.chain, ?mode, ranges = items.len(), "planned investment ranges");
    if items.is_empty() {
        return Ok(());
    }
    let planned: HashSet<RangeKey> = items
        .iter()
        .map(|item| (item.import_key.clone(), item.query.range))
        .collect();

    let (transfer_errors, transfer_failed) = error_channel::<TransferItem>();
    let (balance_errors, balance_failed) = error_channel::<BalanceItem>();
    let chain = ctx.chain;

    // Ranges without a single transfer have nothing to push through the
    // later stages but still count as covered.
    let empty_ranges: Arc<Mutex<Vec<RangeKey>>> = Default::default();

    let transfers = batch_rpc_calls(
        stream::iter(items),
        ctx.endpoint.clone(),
        ctx.config.rpc_batch,
        // Tracked sources need the sender and the receiver filter.
        hashmap! { ETH_GET_LOGS => 2 },
        transfer_errors,
        |item: &TransferItem| item.query,
        move |provider, queries| async move {
            fetch_erc20_transfers(&provider, chain, queries).await
        },
    );

    let empties = empty_ranges.clone();
    let balance_items = transfers
        .flat_map(move |(item, transfers)| {
            if transfers.is_empty() {
                empties
                    .lock()
                    .unwrap()
                    .push((item.import_key.clone(), item.query.range));
            }
            stream::iter(
                transfers
                    .into_iter()
                    .map(move |transfer| BalanceItem {
                        parent: item.clone(),
                        transfer,
                    })
                    .collect::<Vec<_>>(),
            )
        })
        .boxed();

    let enriched = batch_rpc_calls(
        balance_items,
        ctx.endpoint.clone(),
        ctx.config.rpc_batch,
        hashmap! { ETH_CALL => 1, ETH_GET_BLOCK_BY_NUMBER => 1 },
        balance_errors,
        |item: &BalanceItem| BalanceQuery {
            token_address: item.transfer.token_address,
            token_decimals: item.transfer.token_decimals,
            owner_address: item.transfer.owner_address,
            block_number: item.transfer.block_number,
        },
        move |provider, queries: Vec<BalanceQuery>| async move {
            let balances = fetch_owner_balances(&provider, chain, queries.clone()).await?;
            let blocks = queries.iter().map(|query| query.block_number).collect();
            let datetimes = fetch_block_datetimes(&provider, chain, blocks).await?;
            Ok(queries
                .into_iter()
                .map(|query| {
                    let balance = balances[&query].clone();
                    let datetime = datetimes[&query.block_number];
                    (query, (balance, datetime))
                })
                .collect())
        },
    );

    let rows = enriched.map(move |(item, (balance, datetime))| {
        let investment_data = InvestmentData {
            chain,
            block_number: item.transfer.block_number,
            transaction_hash: item.transfer.transaction_hash,
            balance_diff: item.transfer.amount_transferred.clone(),
        };
        let row = Investment {
            datetime,
            product_id: item.parent.product.product_id,
            investor_address: item.transfer.owner_address,
            balance,
            investment_data: serde_json::to_value(investment_data)
                .expect("investment metadata is always serializable"),
        };
        ((item.parent.import_key.clone(), item.parent.query.range), row)
    });

    let (db_errors, db_failed) = error_channel::<RangeKey>();
    let db = ctx.db.clone();
    let saved: Vec<RangeKey> = buffer_time(
        rows.boxed(),
        ctx.config.db_max_input_wait,
        ctx.config.db_max_input_take,
    )
    .then(move |batch: Vec<(RangeKey, Investment)>| {
        let db = db.clone();
        let db_errors = db_errors.clone();
        async move {
            let investments = batch.iter().map(|(_, row)| row.clone()).collect();
            match db.upsert_investments(&InvestmentBatch { investments }).await {
                Ok(()) => batch.into_iter().map(|(key, _)| key).collect::<Vec<_>>(),
                Err(error) => {
                    tracing::error!(%error, rows = batch.len(), "investment upsert failed");
                    db_errors.emit_all(batch.into_iter().map(|(key, _)| key));
                    Vec::new()
                }
            }
        }
    })
    .flat_map(stream::iter)
    .collect()
    .await;

    let mut failed: HashSet<RangeKey> = HashSet::new();
    failed.extend(drain(transfer_failed).map(|item| (item.import_key, item.query.range)));
    failed.extend(
        drain(balance_failed).map(|item| (item.parent.import_key, item.parent.query.range)),
    );
    failed.extend(drain(db_failed));

    let mut succeeded: HashSet<RangeKey> = saved.into_iter().collect();
    succeeded.extend(empty_ranges.lock().unwrap().drain(..));
    // Planned ranges that never produced output nor an error (dropped by a
    // bug upstream) must not be marked covered.
    succeeded.retain(|key| planned.contains(key) && !failed.contains(key));

    let updates = range_updates(succeeded, failed);
    let now = Utc::now();
    ctx.db
        .update_import_states(updates, |payloads, mut data| {
            if let ImportData::ProductInvestment(ref mut import) = data {
                for payload in payloads {
                    import.ranges.apply(payload.clone(), now);
                }
                import.chain_latest_block_number = head;
            }
            data
        })
        .await
        .context("investment import state update failed")
}

/// One tick of the share rate pipeline: one price per full share sample per
/// timestep block, stored as a block anchored price point.
pub async fn share_rates_tick(ctx: &ChainContext) -> Result<()> {
    let products: Vec<Product> = ctx
        .db
        .products_for_chain(ctx.chain)
        .await?
        .into_iter()
        .filter(Product::has_share_rate)
        .collect();
    if products.is_empty() {
        return Ok(());
    }
    let head = ctx
        .latest_block
        .latest_block_number(&ctx.endpoint, None)
        .await?;
    let investment_states = ctx
        .db
        .fetch_import_states(
            &products
                .iter()
                .map(|product| investment_key(product.product_id))
                .collect::<Vec<_>>(),
        )
        .await?;
    let states = ensure_share_rate_states(ctx, &products, &investment_states, head).await?;

    let mut items = Vec::new();
    for product in &products {
        let import_key = share_rate_key(product.price_feed_id);
        let state = match states.get(&import_key) {
            Some(state) => state,
            None => continue,
        };
        let parent_covered = match investment_states.get(&investment_key(product.product_id)) {
            Some(ImportState {
                import_data: ImportData::ProductInvestment(parent),
                ..
            }) => parent.ranges.covered_ranges.clone(),
            _ => continue,
        };
        let samples = block_list(&ctx.db, product.product_id).await?;
        let ranges = interval_block_ranges(
            &samples,
            &parent_covered,
            &state.ranges,
            head,
            &ctx.config.planner,
        );
        for range in ranges {
            items.push(ShareRateItem {
                import_key: import_key.clone(),
                price_feed_id: product.price_feed_id,
                query: share_rate_query(product, range.from)?,
                range,
            });
        }
    }
    tracing::debug!(chain = %ctx.chain, ranges = items.len(), "planned share rate ranges");
    if items.is_empty() {
        return Ok(());
    }

    let (rpc_errors, rpc_failed) = error_channel::<ShareRateItem>();
    let chain = ctx.chain;
    let samples = batch_rpc_calls(
        stream::iter(items),
        ctx.endpoint.clone(),
        ctx.config.rpc_batch,
        hashmap! { ETH_CALL => 1, ETH_GET_BLOCK_BY_NUMBER => 1 },
        rpc_errors,
        |item: &ShareRateItem| item.query,
        move |provider, queries: Vec<ShareRateQuery>| async move {
            let rates = fetch_share_rates(&provider, chain, queries.clone()).await?;
            let blocks = queries.iter().map(|query| query.block_number).collect();
            let datetimes = fetch_block_datetimes(&provider, chain, blocks).await?;
            Ok(queries
                .into_iter()
                .map(|query| {
                    let rate = rates[&query].clone();
                    let datetime = datetimes[&query.block_number];
                    (query, (rate, datetime))
                })
                .collect())
        },
    );

    let rows = samples.map(|(item, (rate, datetime))| {
        let row = PricePoint {
            datetime,
            price_feed_id: item.price_feed_id,
            block_number: item.query.block_number,
            price: rate,
            price_data: serde_json::json!({ "from": "ppfs-snapshots" }),
        };
        ((item.import_key.clone(), item.range), row)
    });

    let (db_errors, db_failed) = error_channel::<RangeKey>();
    let db = ctx.db.clone();
    let saved: Vec<RangeKey> = buffer_time(
        rows.boxed(),
        ctx.config.db_max_input_wait,
        ctx.config.db_max_input_take,
    )
    .then(move |batch: Vec<(RangeKey, PricePoint)>| {
        let db = db.clone();
        let db_errors = db_errors.clone();
        async move {
            let prices = batch.iter().map(|(_, row)| row.clone()).collect();
            match db.upsert_prices(&PriceBatch { prices }).await {
                Ok(()) => batch.into_iter().map(|(key, _)| key).collect::<Vec<_>>(),
                Err(error) => {
                    tracing::error!(%error, rows = batch.len(), "share rate upsert failed");
                    db_errors.emit_all(batch.into_iter().map(|(key, _)| key));
                    Vec::new()
                }
            }
        }
    })
    .flat_map(stream::iter)
    .collect()
    .await;

    let mut failed: HashSet<RangeKey> = HashSet::new();
    failed.extend(drain(rpc_failed).map(|item| (item.import_key, item.range)));
    failed.extend(drain(db_failed));
    let mut succeeded: HashSet<RangeKey> = saved.into_iter().collect();
    succeeded.retain(|key| !failed.contains(key));

    let updates = range_updates(succeeded, failed);
    let now = Utc::now();
    ctx.db
        .update_import_states(updates, |payloads, mut data| {
            if let ImportData::ProductShareRate(ref mut import) = data {
                for payload in payloads {
                    import.ranges.apply(payload.clone(), now);
                }
                import.chain_latest_block_number = head;
            }
            data
        })
        .await
        .context("share rate import state update failed")
}

#[derive(Clone)]
struct PriceRangeItem {
    feed: Arc<PriceFeed>,
    import_key: String,
    range: Range<DateTime<Utc>>,
}

/// One tick of the oracle price pipeline, over the off chain price api
/// instead of an RPC endpoint.
pub async fn oracle_prices_tick(
    db: &Database,
    client: &Arc<BeefyDataClient>,
    max_query_range: chrono::Duration,
    max_ranges: usize,
    config: &PipelineConfig,
) -> Result<()> {
    let feeds = db.active_price_feeds().await?;
    if feeds.is_empty() {
        return Ok(());
    }
    let now = Utc::now();
    let states = ensure_oracle_states(db, &feeds, now).await?;

    let mut items = Vec::new();
    for feed in feeds {
        let import_key = oracle_key(feed.price_feed_id);
        let state = match states.get(&import_key) {
            Some(state) => state,
            None => continue,
        };
        let ranges = historical_date_ranges(
            &state.ranges,
            state.first_date,
            now,
            max_query_range,
            max_ranges,
        );
        let feed = Arc::new(feed);
        items.extend(ranges.into_iter().map(|range| PriceRangeItem {
            feed: feed.clone(),
            import_key: import_key.clone(),
            range,
        }));
    }
    tracing::debug!(ranges = items.len(), "planned oracle price ranges");
    if items.is_empty() {
        return Ok(());
    }

    let (http_errors, http_failed) = error_channel::<PriceRangeItem>();
    let client = client.clone();
    let rows = map_concurrent_caught(
        stream::iter(items),
        config.work_concurrency,
        http_errors,
        move |item: PriceRangeItem| {
            let client = client.clone();
            async move {
                let prices = client.price_range(&item.feed, &item.range).await?;
                Ok(((item.import_key.clone(), item.range), prices))
            }
        },
    );

    let (db_errors, db_failed) = error_channel::<(String, Range<DateTime<Utc>>)>();
    let db_handle = db.clone();
    let saved: Vec<(String, Range<DateTime<Utc>>)> = buffer_time(
        rows.boxed(),
        config.db_max_input_wait,
        config.db_max_input_take,
    )
    .then(move |batch| {
        let db = db_handle.clone();
        let db_errors = db_errors.clone();
        async move {
            let prices = batch
                .iter()
                .flat_map(|(_, prices): &(_, Vec<PricePoint>)| prices.iter().cloned())
                .collect();
            match db.upsert_prices(&PriceBatch { prices }).await {
                Ok(()) => batch.into_iter().map(|(key, _)| key).collect::<Vec<_>>(),
                Err(error) => {
                    tracing::error!(%error, "oracle price upsert failed");
                    db_errors.emit_all(batch.into_iter().map(|(key, _)| key));
                    Vec::new()
                }
            }
        }
    })
    .flat_map(stream::iter)
    .collect()
    .await;

    let mut failed: HashSet<(String, Range<DateTime<Utc>>)> = HashSet::new();
    failed.extend(drain(http_failed).map(|item| (item.import_key, item.range)));
    failed.extend(drain(db_failed));
    let mut succeeded: HashSet<_> = saved.into_iter().collect();
    succeeded.retain(|key| !failed.contains(key));

    let updates = range_updates(succeeded, failed);
    db.update_import_states(updates, |payloads, mut data| {
        if let ImportData::OraclePrice(ref mut import) = data {
            for payload in payloads {
                import.ranges.apply(payload.clone(), now);
            }
        }
        data
    })
    .await
    .context("oracle price import state update failed")
}

pub fn investment_key(product_id: i64) -> String {
    format!("product:investment:{}", product_id)
}

pub fn share_rate_key(price_feed_id: i64) -> String {
    format!("product:share-rate:{}", price_feed_id)
}

pub fn oracle_key(price_feed_id: i64) -> String {
    format!("oracle:price:{}", price_feed_id)
}

fn drain<T>(mut receiver: UnboundedReceiver<T>) -> impl Iterator<Item = T> {
    let mut items = Vec::new();
    while let Ok(Some(item)) = receiver.try_next() {
        items.push(item);
    }
    items.into_iter()
}

/// Success moves a range into the covered set, failure into the retry set.
fn range_updates<T: RangeBound>(
    succeeded: HashSet<(String, Range<T>)>,
    failed: HashSet<(String, Range<T>)>,
) -> Vec<ImportStateUpdate<RangesUpdate<T>>> {
    succeeded
        .into_iter()
        .map(|(import_key, range)| ImportStateUpdate {
            import_key,
            payload: RangesUpdate {
                covered_ranges: vec![range],
                success_ranges: vec![range],
                error_ranges: vec![],
            },
        })
        .chain(failed.into_iter().map(|(import_key, range)| ImportStateUpdate {
            import_key,
            payload: RangesUpdate {
                covered_ranges: vec![],
                success_ranges: vec![],
                error_ranges: vec![range],
            },
        }))
        .collect()
}

/// Import states are created lazily the first time a product is seen; the
/// contract creation lookup seeds the historical lower bound.
async fn ensure_investment_states(
    ctx: &ChainContext,
    products: &[Product],
    head: u64,
) -> Result<HashMap<String, ProductInvestmentImport>> {
    let keys: Vec<String> = products
        .iter()
        .map(|product| investment_key(product.product_id))
        .collect();
    let mut existing = ctx.db.fetch_import_states(&keys).await?;

    let mut result = HashMap::new();
    for product in products {
        let import_key = investment_key(product.product_id);
        let import = match existing.remove(&import_key) {
            Some(ImportState {
                import_data: ImportData::ProductInvestment(import),
                ..
            }) => import,
            Some(state) => {
                tracing::error!(import_key = %state.import_key, "import state has the wrong type");
                continue;
            }
            None => {
                let creation = match ctx
                    .creation_client
                    .contract_creation(ctx.chain, product.contract_address())
                    .await
                {
                    Ok(creation) => creation,
                    Err(error) => {
                        tracing::warn!(
                            %error,
                            product = %product.product_key,
                            "contract creation lookup failed, skipping product this tick"
                        );
                        continue;
                    }
                };
                let import = ProductInvestmentImport {
                    product_id: product.product_id,
                    chain: ctx.chain,
                    contract_created_at_block: creation.block_number,
                    contract_creation_date: creation.datetime,
                    chain_latest_block_number: head,
                    ranges: ImportRanges::new(Utc::now()),
                };
                ctx.db
                    .upsert_import_state(&ImportState {
                        import_key: import_key.clone(),
                        import_data: ImportData::ProductInvestment(import.clone()),
                    })
                    .await?;
                import
            }
        };
        result.insert(import_key, import);
    }
    Ok(result)
}

/// Share rate states inherit the creation info from the investment state so
/// no second explorer lookup is needed.
async fn ensure_share_rate_states(
    ctx: &ChainContext,
    products: &[Product],
    investment_states: &HashMap<String, ImportState>,
    head: u64,
) -> Result<HashMap<String, ProductShareRateImport>> {
    let keys: Vec<String> = products
        .iter()
        .map(|product| share_rate_key(product.price_feed_id))
        .collect();
    let mut existing = ctx.db.fetch_import_states(&keys).await?;

    let mut result = HashMap::new();
    for product in products {
        let import_key = share_rate_key(product.price_feed_id);
        let import = match existing.remove(&import_key) {
            Some(ImportState {
                import_data: ImportData::ProductShareRate(import),
                ..
            }) => import,
            Some(state) => {
                tracing::error!(import_key = %state.import_key, "import state has the wrong type");
                continue;
            }
            None => {
                let parent = match investment_states.get(&investment_key(product.product_id)) {
                    Some(ImportState {
                        import_data: ImportData::ProductInvestment(parent),
                        ..
                    }) => parent,
                    // The investment import has not created its state yet,
                    // try again next tick.
                    _ => continue,
                };
                let import = ProductShareRateImport {
                    price_feed_id: product.price_feed_id,
                    product_id: product.product_id,
                    chain: ctx.chain,
                    contract_created_at_block: parent.contract_created_at_block,
                    contract_creation_date: parent.contract_creation_date,
                    chain_latest_block_number: head,
                    ranges: ImportRanges::new(Utc::now()),
                };
                ctx.db
                    .upsert_import_state(&ImportState {
                        import_key: import_key.clone(),
                        import_data: ImportData::ProductShareRate(import.clone()),
                    })
                    .await?;
                import
            }
        };
        result.insert(import_key, import);
    }
    Ok(result)
}

async fn ensure_oracle_states(
    db: &Database,
    feeds: &[PriceFeed],
    now: DateTime<Utc>,
) -> Result<HashMap<String, OraclePriceImport>> {
    let keys: Vec<String> = feeds
        .iter()
        .map(|feed| oracle_key(feed.price_feed_id))
        .collect();
    let mut existing = db.fetch_import_states(&keys).await?;

    let mut result = HashMap::new();
    for feed in feeds {
        let import_key = oracle_key(feed.price_feed_id);
        let import = match existing.remove(&import_key) {
            Some(ImportState {
                import_data: ImportData::OraclePrice(import),
                ..
            }) => import,
            Some(state) => {
                tracing::error!(import_key = %state.import_key, "import state has the wrong type");
                continue;
            }
            None => {
                let import = OraclePriceImport {
                    price_feed_id: feed.price_feed_id,
                    first_date: beefy_launch_date(),
                    ranges: ImportRanges::new(now),
                };
                db.upsert_import_state(&ImportState {
                    import_key: import_key.clone(),
                    import_data: ImportData::OraclePrice(import.clone()),
                })
                .await?;
                import
            }
        };
        result.insert(import_key, import);
    }
    Ok(result)
}

/// No price feed predates the protocol launch.
fn beefy_launch_date() -> DateTime<Utc> {
    chrono::TimeZone::with_ymd_and_hms(&Utc, 2020, 10, 1, 0, 0, 0)
        .single()
        .expect("valid constant date")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_keys_match_the_model() {
        assert_eq!(investment_key(42), "product:investment:42");
        assert_eq!(share_rate_key(7), "product:share-rate:7");
        assert_eq!(oracle_key(7), "oracle:price:7");
    }

    #[test]
    fn range_updates_separate_success_from_error() {
        let range = Range::new(900u64, 950);
        let mut succeeded = HashSet::new();
        succeeded.insert(("product:investment:1".to_string(), range));
        let mut failed = HashSet::new();
        failed.insert(("product:investment:2".to_string(), range));

        let updates = range_updates(succeeded, failed);
        assert_eq!(updates.len(), 2);
        for update in updates {
            if update.import_key.ends_with(":1") {
                assert_eq!(update.payload.success_ranges, vec![range]);
                assert!(update.payload.error_ranges.is_empty());
            } else {
                assert_eq!(update.payload.error_ranges, vec![range]);
                assert!(update.payload.success_ranges.is_empty());
            }
        }
    }
}
