//! The batch RPC operator: groups upstream items, picks linear or batch
//! transport based on the endpoint's declared limits, executes the calls
//! under the rate limit gate and re-associates results with the items that
//! asked for them.

use crate::rpc::endpoint::{RpcEndpoint, RpcProvider};
use crate::rpc::error::RpcError;
use crate::rpc::gate::CallOptions;
use crate::streams::{buffer_time, ErrorEmitter};
use futures::stream::{self, Stream, StreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

/// Stream level configuration for one batch RPC operator instance.
#[derive(Clone, Copy, Debug)]
pub struct BatchRpcConfig {
    /// Upper bound on items per group before endpoint limits are applied.
    pub max_input_objs: usize,
    /// How long to wait for a group to fill up.
    pub max_input_wait: Duration,
    /// Wall clock retry budget for one group.
    pub max_total_retry: Duration,
}

/// How many RPC calls of each method processing one input object costs.
pub type RpcCallsPerInputObj = HashMap<&'static str, usize>;

/// Capacity decision derived from the declared endpoint limits.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BatchPlan {
    pub can_use_batch_provider: bool,
    pub max_input_objs_per_batch: usize,
}

/// Decides how many input objects fit in one batch and which provider to
/// use. Any involved method with batching disabled forces the linear
/// provider; the cap then stays at one unless the endpoint declares no rate
/// limit at all, in which case small linear bursts are still worthwhile.
pub fn plan_batches(
    endpoint: &RpcEndpoint,
    calls_per_obj: &RpcCallsPerInputObj,
    config: &BatchRpcConfig,
) -> BatchPlan {
    let limitations = endpoint.limitations();
    let mut cap = config.max_input_objs;
    let mut can_use_batch_provider = true;
    for (method, calls) in calls_per_obj.iter().filter(|(_, calls)| **calls > 0) {
        match limitations.max_batch_for(method) {
            Some(limit) => cap = cap.min((limit / calls).max(1)),
            None => can_use_batch_provider = false,
        }
    }
    if !can_use_batch_provider {
        let cap = if limitations.min_delay_between_calls.is_none() {
            (config.max_input_objs / 10).max(1)
        } else {
            1
        };
        return BatchPlan {
            can_use_batch_provider: false,
            max_input_objs_per_batch: cap,
        };
    }
    BatchPlan {
        can_use_batch_provider: true,
        max_input_objs_per_batch: cap.max(1),
    }
}

/// For every input item either exactly one `(item, result)` is emitted or
/// the item is reported through `errors` exactly once, never both. A result
/// map missing a query it was given is a bug in the `process_batch`
/// implementation and aborts the run.
pub fn batch_rpc_calls<TObj, Q, R, S, GetQuery, Process, Fut>(
    input: S,
    endpoint: Arc<RpcEndpoint>,
    config: BatchRpcConfig,
    calls_per_obj: RpcCallsPerInputObj,
    errors: ErrorEmitter<TObj>,
    get_query: GetQuery,
    process_batch: Process,
) -> impl Stream<Item = (TObj, R)>
where
    TObj: Send + 'static,
    Q: Clone + Eq + Hash + Send + 'static,
    R: Clone + Send + 'static,
    S: Stream<Item = TObj> + Unpin,
    GetQuery: Fn(&TObj) -> Q + Send + Sync + 'static,
    Process: Fn(RpcProvider, Vec<Q>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HashMap<Q, R>, RpcError>> + Send,
{
    let plan = plan_batches(&endpoint, &calls_per_obj, &config);
    tracing::debug!(endpoint = %endpoint.url_label(), ?plan, "planned rpc batching");
    let provider = endpoint.provider(plan.can_use_batch_provider);
    let get_query = Arc::new(get_query);
    let process_batch = Arc::new(process_batch);

    // `then` keeps groups strictly sequential; within a group the provider
    // decides whether the calls coalesce into one JSON-RPC batch.
    buffer_time(input, config.max_input_wait, plan.max_input_objs_per_batch)
        .then(move |group| {
            let endpoint = endpoint.clone();
            let provider = provider.clone();
            let get_query = get_query.clone();
            let process_batch = process_batch.clone();
            let errors = errors.clone();
            async move {
                let queries: Vec<Q> = group.iter().map(|obj| get_query(obj)).collect();
                let result = endpoint
                    .gate()
                    .call(
                        || process_batch(provider.clone(), queries.clone()),
                        CallOptions {
                            max_total_retry: config.max_total_retry,
                        },
                    )
                    .await;
                match result {
                    Ok(results) => group
                        .into_iter()
                        .map(|obj| {
                            let result = results
                                .get(&get_query(&obj))
                                .cloned()
                                .expect("batch result missing a query it was given");
                            (obj, result)
                        })
                        .collect::<Vec<_>>(),
                    Err(error) => {
                        tracing::error!(
                            endpoint = %endpoint.url_label(),
                            %error,
                            items = group.len(),
                            "batch failed, reporting items for retry"
                        );
                        errors.emit_all(group);
                        Vec::new()
                    }
                }
            }
        })
        .flat_map(stream::iter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::limitations::{RpcLimitations, ETH_CALL, ETH_GET_LOGS};
    use crate::streams::error_channel;
    use crate::transport::NoopTransportMetrics;
    use maplit::hashmap;
    use model::Chain;
    use std::sync::Mutex;

    fn test_endpoint(limitations: RpcLimitations) -> Arc<RpcEndpoint> {
        Arc::new(RpcEndpoint::new(
            Chain::Bsc,
            "http://localhost:8545".parse().unwrap(),
            reqwest::Client::new(),
            limitations,
            Arc::new(NoopTransportMetrics),
        ))
    }

    fn limitations(get_logs: Option<usize>) -> RpcLimitations {
        RpcLimitations {
            methods: hashmap! {
                ETH_GET_LOGS.to_string() => get_logs,
                ETH_CALL.to_string() => Some(50),
            },
            min_delay_between_calls: Some(Duration::from_millis(1)),
            is_archive_node: true,
        }
    }

    fn config() -> BatchRpcConfig {
        BatchRpcConfig {
            max_input_objs: 100,
            max_input_wait: Duration::from_millis(5),
            max_total_retry: Duration::from_millis(50),
        }
    }

    #[test]
    fn capacity_is_bounded_by_the_tightest_method_limit() {
        let endpoint = test_endpoint(limitations(Some(5)));
        let plan = plan_batches(
            &endpoint,
            &hashmap! { ETH_GET_LOGS => 1, ETH_CALL => 2 },
            &config(),
        );
        assert_eq!(
            plan,
            BatchPlan {
                can_use_batch_provider: true,
                max_input_objs_per_batch: 5,
            }
        );
    }

    #[test]
    fn disabled_method_forces_linear_provider() {
        let endpoint = test_endpoint(limitations(None));
        let plan = plan_batches(&endpoint, &hashmap! { ETH_GET_LOGS => 1 }, &config());
        assert_eq!(
            plan,
            BatchPlan {
                can_use_batch_provider: false,
                max_input_objs_per_batch: 1,
            }
        );
    }

    #[tokio::test]
    async fn groups_of_ten_split_into_two_sequential_batches_of_five() {
        let endpoint = test_endpoint(limitations(Some(5)));
        let (errors, _failed) = error_channel();
        let batch_sizes = Arc::new(Mutex::new(Vec::new()));

        let sizes = batch_sizes.clone();
        let output: Vec<(u64, u64)> = batch_rpc_calls(
            stream::iter(0u64..10),
            endpoint,
            config(),
            hashmap! { ETH_GET_LOGS => 1 },
            errors,
            |obj| *obj,
            move |_provider, queries: Vec<u64>| {
                sizes.lock().unwrap().push(queries.len());
                async move {
                    Ok(queries.into_iter().map(|q| (q, q * 2)).collect::<HashMap<_, _>>())
                }
            },
        )
        .collect()
        .await;

        assert_eq!(output.len(), 10);
        for (obj, result) in output {
            assert_eq!(result, obj * 2);
        }
        assert_eq!(*batch_sizes.lock().unwrap(), vec![5, 5]);
    }

    #[tokio::test]
    async fn terminal_failure_reports_every_item_exactly_once() {
        let endpoint = test_endpoint(limitations(Some(5)));
        let (errors, mut failed) = error_channel();

        let output: Vec<(u64, u64)> = batch_rpc_calls(
            stream::iter(0u64..5),
            endpoint,
            config(),
            hashmap! { ETH_GET_LOGS => 1 },
            errors,
            |obj| *obj,
            |_provider, _queries: Vec<u64>| async {
                Err(RpcError::ArchiveNodeNeeded("missing trie node".into()))
            },
        )
        .collect()
        .await;

        assert!(output.is_empty());
        let mut failures = Vec::new();
        while let Ok(Some(item)) = failed.try_next() {
            failures.push(item);
        }
        failures.sort_unstable();
        assert_eq!(failures, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn transient_errors_are_retried_within_budget() {
        let endpoint = test_endpoint(limitations(Some(5)));
        let (errors, _failed) = error_channel();
        let attempts = Arc::new(Mutex::new(0usize));

        let seen = attempts.clone();
        let output: Vec<(u64, u64)> = batch_rpc_calls(
            stream::iter(0u64..1),
            endpoint,
            BatchRpcConfig {
                max_total_retry: Duration::from_secs(30),
                ..config()
            },
            hashmap! { ETH_GET_LOGS => 1 },
            errors,
            |obj| *obj,
            move |_provider, queries: Vec<u64>| {
                let mut attempts = seen.lock().unwrap();
                *attempts += 1;
                let fail = *attempts < 3;
                async move {
                    if fail {
                        Err(RpcError::RateLimited("slow down".into()))
                    } else {
                        Ok(queries.into_iter().map(|q| (q, q)).collect())
                    }
                }
            },
        )
        .collect()
        .await;

        assert_eq!(output, vec![(0, 0)]);
        assert_eq!(*attempts.lock().unwrap(), 3);
    }
}
