pub mod buffered;
pub mod http;
pub mod instrumented;
pub mod mock;

/// Upper bound on the number of calls in one JSON-RPC batch, regardless of
/// what an endpoint declares.
pub const MAX_BATCH_SIZE: usize = 100;

pub use buffered::{Buffered, Configuration};
pub use http::{safe_url, HttpTransport};
pub use instrumented::{MetricTransport, NoopTransportMetrics, TransportMetrics};
