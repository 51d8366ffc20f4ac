//! The per endpoint serializer enforcing rate limits and retries.

use crate::rpc::error::RpcError;
use lazy_static::lazy_static;
use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(5);
const NETWORK_CHANGED_DELAY: Duration = Duration::from_millis(200);

/// Serializes access to one RPC endpoint: at most one call in flight and
/// successive calls spaced by the endpoint's declared minimum delay.
///
/// Gates are process wide. Two transports talking to the same endpoint get
/// the same gate, so the declared limits hold across all pipelines.
pub struct RpcGate {
    url_label: String,
    min_delay: Option<Duration>,
    state: Mutex<GateState>,
}

#[derive(Default)]
struct GateState {
    last_call_finished_at: Option<Instant>,
}

/// Options for one gated call.
#[derive(Clone, Copy, Debug)]
pub struct CallOptions {
    /// Retrying stops once this much wall clock time was spent; the last
    /// error becomes terminal.
    pub max_total_retry: Duration,
}

impl RpcGate {
    /// Returns the process wide gate for an endpoint, creating it on first
    /// use. Keyed by the secret stripped url.
    pub fn for_endpoint(url_label: &str, min_delay: Option<Duration>) -> Arc<RpcGate> {
        lazy_static! {
            static ref GATES: StdMutex<HashMap<String, Arc<RpcGate>>> = Default::default();
        }
        GATES
            .lock()
            .unwrap()
            .entry(url_label.to_string())
            .or_insert_with(|| {
                Arc::new(RpcGate {
                    url_label: url_label.to_string(),
                    min_delay,
                    state: Mutex::new(Default::default()),
                })
            })
            .clone()
    }

    /// Runs `work` under the gate, retrying retryable failures with jittered
    /// exponential backoff until `max_total_retry` wall clock time was spent.
    /// Fatal and archive-node errors abort immediately.
    pub async fn call<T, F, Fut>(&self, work: F, options: CallOptions) -> Result<T, RpcError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let started = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            let error = match self.run_gated(&work).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            if !error.is_retryable() {
                return Err(error);
            }
            let backoff = match error {
                RpcError::NetworkChanged(_) => NETWORK_CHANGED_DELAY,
                _ => backoff_with_jitter(attempt),
            };
            if started.elapsed() + backoff > options.max_total_retry {
                tracing::warn!(
                    endpoint = %self.url_label,
                    %error,
                    "retry budget exhausted"
                );
                return Err(error);
            }
            tracing::debug!(
                endpoint = %self.url_label,
                %error,
                ?backoff,
                attempt,
                "retrying rpc call"
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }

    async fn run_gated<T, F, Fut>(&self, work: &F) -> Result<T, RpcError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        match self.min_delay {
            // Holding the lock across the call serializes the endpoint.
            Some(min_delay) => {
                let mut state = self.state.lock().await;
                if let Some(last) = state.last_call_finished_at {
                    let elapsed = last.elapsed();
                    if elapsed < min_delay {
                        tokio::time::sleep(min_delay - elapsed).await;
                    }
                }
                let result = work().await;
                state.last_call_finished_at = Some(Instant::now());
                result
            }
            None => work().await,
        }
    }
}

fn backoff_with_jitter(attempt: u32) -> Duration {
    let exponential = INITIAL_BACKOFF
        .mul_f64(2f64.powi(attempt.min(16) as i32))
        .min(MAX_BACKOFF);
    // Jitter in [0.5, 1.5) so concurrent pipelines do not retry in lockstep.
    exponential.mul_f64(0.5 + rand::thread_rng().gen::<f64>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn gate(min_delay: Option<Duration>) -> RpcGate {
        RpcGate {
            url_label: "https://test".into(),
            min_delay,
            state: Mutex::new(Default::default()),
        }
    }

    #[tokio::test]
    async fn returns_first_success() {
        let gate = gate(None);
        let result = gate
            .call(
                || async { Ok::<_, RpcError>(42) },
                CallOptions {
                    max_total_retry: Duration::from_secs(1),
                },
            )
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let gate = gate(None);
        let attempts = AtomicUsize::new(0);
        let result = gate
            .call(
                || {
                    let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt < 2 {
                            Err(RpcError::RateLimited("slow down".into()))
                        } else {
                            Ok(attempt)
                        }
                    }
                },
                CallOptions {
                    max_total_retry: Duration::from_secs(30),
                },
            )
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn archive_node_errors_abort_immediately() {
        let gate = gate(None);
        let attempts = AtomicUsize::new(0);
        let result: Result<(), _> = gate
            .call(
                || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Err(RpcError::ArchiveNodeNeeded("missing trie node".into())) }
                },
                CallOptions {
                    max_total_retry: Duration::from_secs(30),
                },
            )
            .await;
        assert!(matches!(result, Err(RpcError::ArchiveNodeNeeded(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn spaces_calls_by_the_declared_delay() {
        let gate = gate(Some(Duration::from_millis(50)));
        let options = CallOptions {
            max_total_retry: Duration::from_secs(1),
        };
        let started = Instant::now();
        for _ in 0..3 {
            gate.call(|| async { Ok::<_, RpcError>(()) }, options)
                .await
                .unwrap();
        }
        // Three calls, two enforced gaps.
        assert!(started.elapsed() >= Duration::from_millis(100));
    }
}
