//! Per chain normalization of malformed RPC responses and refinement of the
//! generic error classification.
//!
//! Some chains serve responses that are close to but not exactly the
//! canonical Ethereum format. The adapters here rewrite those into canonical
//! form so the rest of the pipeline never sees them. Adapters are composed
//! into the transport stack at endpoint construction.

use crate::rpc::error::RpcError;
use crate::rpc::limitations::{ETH_GET_BLOCK_BY_NUMBER, ETH_GET_LOGS};
use derivative::Derivative;
use futures::future::BoxFuture;
use futures::FutureExt;
use model::Chain;
use std::sync::Arc;
use web3::error;
use jsonrpc_core::{Call, Value};
use web3::{BatchTransport, RequestId, Transport};

pub trait ChainQuirks: Send + Sync + 'static {
    /// Rewrites a raw successful response for `method` into canonical form.
    fn normalize_response(&self, _method: &str, response: Value) -> Value {
        response
    }

    /// Chain specific error classification, consulted before the generic
    /// message patterns.
    fn classify_error(&self, _error: &web3::Error) -> Option<RpcError> {
        None
    }
}

/// Chains that speak the canonical format.
pub struct StandardQuirks;

impl ChainQuirks for StandardQuirks {}

/// Celo blocks miss fields the canonical block format requires.
pub struct CeloQuirks;

impl ChainQuirks for CeloQuirks {
    fn normalize_response(&self, method: &str, mut response: Value) -> Value {
        if method == ETH_GET_BLOCK_BY_NUMBER {
            if let Some(block) = response.as_object_mut() {
                block
                    .entry("gasLimit")
                    .or_insert_with(|| Value::String("0x0".into()));
                block
                    .entry("miner")
                    .or_insert_with(|| Value::String(format!("0x{}", "00".repeat(20))));
            }
        }
        response
    }
}

/// Harmony occasionally answers `eth_getLogs` with `null` instead of an
/// empty array and words its throttling errors unusually.
pub struct HarmonyQuirks;

impl ChainQuirks for HarmonyQuirks {
    fn normalize_response(&self, method: &str, response: Value) -> Value {
        if method == ETH_GET_LOGS && response.is_null() {
            return Value::Array(Vec::new());
        }
        response
    }

    fn classify_error(&self, error: &web3::Error) -> Option<RpcError> {
        let message = error.to_string();
        message
            .contains("Method rate limited for this key")
            .then(|| RpcError::RateLimited(message))
    }
}

pub fn quirks_for(chain: Chain) -> Arc<dyn ChainQuirks> {
    match chain {
        Chain::Celo => Arc::new(CeloQuirks),
        Chain::Harmony => Arc::new(HarmonyQuirks),
        _ => Arc::new(StandardQuirks),
    }
}

/// Classifies an error, letting the chain adapter refine the generic rules.
pub fn classify_with_quirks(quirks: &dyn ChainQuirks, error: web3::Error) -> RpcError {
    match quirks.classify_error(&error) {
        Some(classified) => classified,
        None => crate::rpc::error::classify(error),
    }
}

/// Transport wrapper applying the response normalization hooks of one chain.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct AdaptedTransport<T> {
    inner: T,
    #[derivative(Debug = "ignore")]
    quirks: Arc<dyn ChainQuirks>,
}

impl<T> AdaptedTransport<T> {
    pub fn new(inner: T, quirks: Arc<dyn ChainQuirks>) -> Self {
        Self { inner, quirks }
    }
}

fn call_method(call: &Call) -> String {
    match call {
        Call::MethodCall(call) => call.method.clone(),
        Call::Notification(notification) => notification.method.clone(),
        Call::Invalid { .. } => "invalid".into(),
    }
}

impl<T> Transport for AdaptedTransport<T>
where
    T: Transport,
    T::Out: Send + 'static,
{
    type Out = BoxFuture<'static, error::Result<Value>>;

    fn prepare(&self, method: &str, params: Vec<Value>) -> (RequestId, Call) {
        self.inner.prepare(method, params)
    }

    fn send(&self, id: RequestId, request: Call) -> Self::Out {
        let quirks = self.quirks.clone();
        let method = call_method(&request);
        self.inner
            .send(id, request)
            .map(move |result| result.map(|response| quirks.normalize_response(&method, response)))
            .boxed()
    }
}

impl<T> BatchTransport for AdaptedTransport<T>
where
    T: BatchTransport,
    T::Batch: Send + 'static,
    T::Out: Send + 'static,
{
    type Batch = BoxFuture<'static, error::Result<Vec<error::Result<Value>>>>;

    fn send_batch<I>(&self, requests: I) -> Self::Batch
    where
        I: IntoIterator<Item = (RequestId, Call)>,
    {
        let quirks = self.quirks.clone();
        let (requests, methods): (Vec<_>, Vec<_>) = requests
            .into_iter()
            .map(|(id, call)| {
                let method = call_method(&call);
                ((id, call), method)
            })
            .unzip();
        self.inner
            .send_batch(requests)
            .map(move |result| {
                result.map(|responses| {
                    responses
                        .into_iter()
                        .zip(methods)
                        .map(|(response, method)| {
                            response
                                .map(|response| quirks.normalize_response(&method, response))
                        })
                        .collect()
                })
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn harmony_null_logs_become_empty_array() {
        let quirks = HarmonyQuirks;
        assert_eq!(
            quirks.normalize_response(ETH_GET_LOGS, Value::Null),
            json!([])
        );
        assert_eq!(
            quirks.normalize_response(ETH_GET_LOGS, json!([{"data": "0x"}])),
            json!([{"data": "0x"}])
        );
    }

    #[test]
    fn celo_blocks_get_missing_fields_filled_in() {
        let quirks = CeloQuirks;
        let normalized =
            quirks.normalize_response(ETH_GET_BLOCK_BY_NUMBER, json!({"number": "0x10"}));
        assert_eq!(normalized["gasLimit"], json!("0x0"));
        assert_eq!(normalized["number"], json!("0x10"));
    }

    #[test]
    fn quirk_classification_wins_over_generic_rules() {
        let error = web3::Error::Rpc(jsonrpc_core::Error {
            code: jsonrpc_core::ErrorCode::ServerError(-32000),
            message: "Method rate limited for this key".into(),
            data: None,
        });
        assert!(matches!(
            classify_with_quirks(&HarmonyQuirks, error),
            RpcError::RateLimited(_)
        ));
    }
}
