use anyhow::Result;
use importer::database::Database;
use importer::loaders::contract_creation::ContractCreationClient;
use importer::loaders::prices::BeefyDataClient;
use importer::pipeline::{
    investments_tick, oracle_prices_tick, share_rates_tick, ChainContext, PipelineConfig,
    PipelineMode,
};
use importer::planner::PlannerConfig;
use model::Chain;
use shared::arguments::duration_from_seconds;
use shared::latest_block::LatestBlockFetcher;
use shared::metrics::RpcMetrics;
use shared::rpc::endpoint::RpcEndpoint;
use shared::rpc::limitations::RpcLimitations;
use shared::streams::BatchRpcConfig;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use structopt::StructOpt;
use tokio::sync::watch;
use url::Url;

#[derive(Debug, StructOpt)]
struct Arguments {
    #[structopt(flatten)]
    shared: shared::arguments::Arguments,

    #[structopt(long, env = "DATABASE_URL", default_value = "postgresql://")]
    db_url: String,

    #[structopt(
        long,
        env = "BEEFY_DATA_URL",
        default_value = "https://data.beefy.finance"
    )]
    beefy_data_url: Url,

    /// How often the recent pipelines tail the head.
    #[structopt(long, env, default_value = "30", parse(try_from_str = duration_from_seconds))]
    recent_interval: Duration,

    /// How often the historical pipelines catch up.
    #[structopt(long, env, default_value = "300", parse(try_from_str = duration_from_seconds))]
    historical_interval: Duration,

    /// How often the oracle price pipeline runs.
    #[structopt(long, env, default_value = "60", parse(try_from_str = duration_from_seconds))]
    oracle_price_interval: Duration,
}

fn pipeline_config(shared: &shared::arguments::Arguments, chain: Chain) -> PipelineConfig {
    PipelineConfig {
        planner: PlannerConfig {
            max_blocks_per_query: shared.max_query_blocks(chain),
            ms_per_block: shared.ms_per_block(chain),
            max_ranges_to_generate: shared.max_ranges_per_product_to_generate,
        },
        rpc_batch: BatchRpcConfig {
            max_input_objs: shared.max_input_take,
            max_input_wait: shared.max_input_wait,
            max_total_retry: shared.max_total_retry,
        },
        db_max_input_take: shared.db_max_input_take,
        db_max_input_wait: shared.db_max_input_wait,
        work_concurrency: shared.work_concurrency,
    }
}

/// Runs `tick` on every interval until shutdown. In-flight ticks are never
/// interrupted; the shutdown signal is only honored between ticks so
/// operators drain cleanly.
async fn run_recurring<F, Fut>(
    name: &'static str,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    tick: F,
) where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = timer.tick() => {}
            _ = shutdown.changed() => {}
        }
        if *shutdown.borrow() {
            tracing::info!(pipeline = name, "shutting down");
            return;
        }
        if let Err(error) = tick().await {
            tracing::error!(%error, pipeline = name, "pipeline tick failed");
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Arguments::from_args();
    shared::tracing::initialize(&args.shared.log_filter);
    tracing::info!("running importer with {:#?}", args);

    let db = Database::new(&args.db_url).expect("invalid database url");
    let client = shared::http_client(args.shared.http_timeout);
    let metrics = Arc::new(RpcMetrics::get().clone());
    let latest_block = Arc::new(LatestBlockFetcher::new());
    let creation_client = Arc::new(ContractCreationClient::new(
        client.clone(),
        Chain::ALL
            .iter()
            .filter_map(|chain| {
                args.shared
                    .etherscan_api_key_for(*chain)
                    .map(|key| (*chain, key))
            })
            .collect(),
    ));
    let price_client = Arc::new(BeefyDataClient::new(
        client.clone(),
        args.beefy_data_url.clone(),
    ));

    let (shutdown_sender, shutdown) = watch::channel(false);
    let mut tasks = Vec::new();

    for chain in args.shared.configured_chains() {
        let endpoint = RpcEndpoint::sampled_from(
            chain,
            &args.shared.rpc_urls_for(chain),
            client.clone(),
            RpcLimitations::default_for(chain),
            metrics.clone(),
        )
        .expect("no rpc urls for a configured chain");
        tracing::info!(%chain, endpoint = endpoint.url_label(), "starting chain pipelines");

        let context = ChainContext {
            chain,
            db: db.clone(),
            endpoint: Arc::new(endpoint),
            latest_block: latest_block.clone(),
            creation_client: creation_client.clone(),
            config: pipeline_config(&args.shared, chain),
        };

        let recent = context.clone();
        tasks.push(tokio::spawn(run_recurring(
            "investments-recent",
            args.recent_interval,
            shutdown.clone(),
            move || {
                let context = recent.clone();
                async move { investments_tick(&context, PipelineMode::Recent).await }
            },
        )));

        let historical = context.clone();
        tasks.push(tokio::spawn(run_recurring(
            "investments-historical",
            args.historical_interval,
            shutdown.clone(),
            move || {
                let context = historical.clone();
                async move { investments_tick(&context, PipelineMode::Historical).await }
            },
        )));

        let share_rates = context.clone();
        tasks.push(tokio::spawn(run_recurring(
            "share-rates",
            args.historical_interval,
            shutdown.clone(),
            move || {
                let context = share_rates.clone();
                async move { share_rates_tick(&context).await }
            },
        )));
    }

    let oracle_db = db.clone();
    let oracle_config = pipeline_config(&args.shared, Chain::Ethereum);
    let max_query_range = args.shared.price_data_max_query_range();
    let max_ranges = args.shared.max_ranges_per_product_to_generate;
    tasks.push(tokio::spawn(run_recurring(
        "oracle-prices",
        args.oracle_price_interval,
        shutdown.clone(),
        move || {
            let db = oracle_db.clone();
            let client = price_client.clone();
            async move {
                oracle_prices_tick(&db, &client, max_query_range, max_ranges, &oracle_config).await
            }
        },
    )));

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for shutdown signal");
    tracing::info!("shutdown requested, draining pipelines");
    let _ = shutdown_sender.send(true);
    for task in tasks {
        if let Err(error) = task.await {
            tracing::error!(%error, "pipeline task panicked");
        }
    }
}
