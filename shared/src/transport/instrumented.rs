use derivative::Derivative;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use web3::error;
use jsonrpc_core::{Call, Value};
use web3::{BatchTransport, RequestId, Transport};

pub trait TransportMetrics: Send + Sync {
    fn report_query(&self, label: &str, elapsed: Duration);
}

/// Wraps a transport and reports call durations per JSON-RPC method, so the
/// `eth_getLogs` traffic of the transfer import is observable separately
/// from the `eth_call` traffic of the share rate and balance imports.
///
/// A batch reports every member under its own method label, each with the
/// round trip duration of the whole batch; collapsing a batch into one
/// sample would hide which import is saturating an endpoint since the
/// batching provider freely mixes methods within one POST.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct MetricTransport<T: Transport> {
    inner: T,
    #[derivative(Debug = "ignore")]
    metrics: Arc<dyn TransportMetrics>,
}

impl<T: Transport> MetricTransport<T> {
    pub fn new(inner: T, metrics: Arc<dyn TransportMetrics>) -> MetricTransport<T> {
        Self { inner, metrics }
    }
}

fn method_label(call: &Call) -> String {
    match call {
        Call::MethodCall(call) => call.method.clone(),
        Call::Notification(notification) => notification.method.clone(),
        Call::Invalid { .. } => "invalid".into(),
    }
}

impl<T> Transport for MetricTransport<T>
where
    T: Transport,
    <T as Transport>::Out: Send + 'static,
{
    type Out = BoxFuture<'static, error::Result<Value>>;

    fn prepare(&self, method: &str, params: Vec<Value>) -> (RequestId, Call) {
        self.inner.prepare(method, params)
    }

    fn send(&self, id: RequestId, request: Call) -> Self::Out {
        let metrics = self.metrics.clone();
        let label = method_label(&request);
        let start = Instant::now();
        self.inner
            .send(id, request)
            .inspect(move |_| metrics.report_query(&label, start.elapsed()))
            .boxed()
    }
}

impl<T> BatchTransport for MetricTransport<T>
where
    T: BatchTransport,
    T::Batch: Send + 'static,
    <T as Transport>::Out: Send + 'static,
{
    type Batch = BoxFuture<'static, error::Result<Vec<error::Result<Value>>>>;

    fn send_batch<I>(&self, requests: I) -> Self::Batch
    where
        I: IntoIterator<Item = (RequestId, Call)>,
    {
        let metrics = self.metrics.clone();
        let (requests, labels): (Vec<_>, Vec<_>) = requests
            .into_iter()
            .map(|(id, call)| {
                let label = method_label(&call);
                ((id, call), label)
            })
            .unzip();
        let start = Instant::now();
        self.inner
            .send_batch(requests)
            .inspect(move |_| {
                let elapsed = start.elapsed();
                for label in labels {
                    metrics.report_query(&label, elapsed);
                }
            })
            .boxed()
    }
}

pub struct NoopTransportMetrics;

impl TransportMetrics for NoopTransportMetrics {
    fn report_query(&self, _: &str, _: Duration) {}
}
