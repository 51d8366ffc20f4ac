pub mod arguments;
pub mod latest_block;
pub mod metrics;
pub mod rpc;
pub mod streams;
pub mod tracing;
pub mod transport;

use std::time::Duration;

/// The standard http client used for RPC transports and external apis.
pub fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::ClientBuilder::new()
        .timeout(timeout)
        .user_agent("beefy-import/1.0.0")
        .build()
        .expect("reqwest client construction only fails on invalid configuration")
}
