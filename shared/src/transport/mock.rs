//! A programmable transport for tests, driven by `mockall` expectations.

use futures::future;
use std::sync::{Arc, Mutex, MutexGuard};
use web3::error::Error;
use web3::helpers;
use jsonrpc_core::{Call, Value};
use web3::{BatchTransport, RequestId, Transport};

pub type RpcResult = Result<Value, Error>;

#[mockall::automock]
pub trait MockableTransport: Send + Sync {
    fn execute(&self, method: String, params: Vec<Value>) -> RpcResult;
    fn execute_batch(&self, requests: Vec<(String, Vec<Value>)>) -> Result<Vec<RpcResult>, Error>;
}

/// Test transport whose behaviour is scripted through
/// `transport.mock().expect_execute...()` expectations.
#[derive(Clone, Default)]
pub struct MockTransport {
    mock: Arc<Mutex<MockMockableTransport>>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport").finish()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Default::default()
    }

    /// Sets up expectations; hold the guard only for the duration of one
    /// statement.
    pub fn mock(&self) -> MutexGuard<'_, MockMockableTransport> {
        self.mock.lock().unwrap()
    }
}

fn method_and_params(call: &Call) -> (String, Vec<Value>) {
    match call {
        Call::MethodCall(call) => (
            call.method.clone(),
            match &call.params {
                jsonrpc_core::Params::Array(values) => values.clone(),
                jsonrpc_core::Params::None => Vec::new(),
                other => panic!("unexpected jsonrpc params {:?}", other),
            },
        ),
        other => panic!("unexpected jsonrpc call {:?}", other),
    }
}

impl Transport for MockTransport {
    type Out = future::Ready<RpcResult>;

    fn prepare(&self, method: &str, params: Vec<Value>) -> (RequestId, Call) {
        (0, helpers::build_request(0, method, params))
    }

    fn send(&self, _: RequestId, call: Call) -> Self::Out {
        let (method, params) = method_and_params(&call);
        future::ready(self.mock.lock().unwrap().execute(method, params))
    }
}

impl BatchTransport for MockTransport {
    type Batch = future::Ready<Result<Vec<RpcResult>, Error>>;

    fn send_batch<T>(&self, requests: T) -> Self::Batch
    where
        T: IntoIterator<Item = (RequestId, Call)>,
    {
        let requests = requests
            .into_iter()
            .map(|(_, call)| method_and_params(&call))
            .collect();
        future::ready(self.mock.lock().unwrap().execute_batch(requests))
    }
}
