use crate::transport::TransportMetrics;
use prometheus_metric_storage::MetricStorage;
use std::time::Duration;

/// RPC transport metrics, labeled by JSON-RPC method.
#[derive(MetricStorage, Clone, Debug)]
#[metric(subsystem = "rpc")]
pub struct RpcMetrics {
    /// Number of RPC requests sent.
    #[metric(labels("method"))]
    requests: prometheus::IntCounterVec,

    /// RPC request latency in seconds.
    #[metric(labels("method"))]
    request_duration_seconds: prometheus::HistogramVec,
}

impl RpcMetrics {
    pub fn get() -> &'static Self {
        Self::instance(prometheus_metric_storage::default_storage_registry())
            .expect("metric registration failed")
    }
}

impl TransportMetrics for RpcMetrics {
    fn report_query(&self, label: &str, elapsed: Duration) {
        self.requests.with_label_values(&[label]).inc();
        self.request_duration_seconds
            .with_label_values(&[label])
            .observe(elapsed.as_secs_f64());
    }
}
