use thiserror::Error;

/// Classification of RPC failures, driving the gate's retry policy.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The queried state is older than what a non archive node retains. Not
    /// retried against the same endpoint; the failed ranges go back to the
    /// planner which schedules them behind new work.
    #[error("archive node needed: {0}")]
    ArchiveNodeNeeded(String),
    /// The endpoint switched nodes behind a load balancer mid call. Retried
    /// after a short fixed delay.
    #[error("underlying network changed: {0}")]
    NetworkChanged(String),
    /// Retried with exponential backoff.
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Timeouts and connection level failures. Retried with exponential
    /// backoff.
    #[error("transient transport failure: {0}")]
    Transient(String),
    /// Everything else, surfaced to the caller.
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl RpcError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RpcError::NetworkChanged(_) | RpcError::RateLimited(_) | RpcError::Transient(_)
        )
    }
}

const ARCHIVE_NODE_PATTERNS: &[&str] = &[
    "missing trie node",
    "header not found",
    "state not available",
    "old data not available due to pruning",
    "required historical state unavailable",
];

const RATE_LIMIT_PATTERNS: &[&str] = &[
    "rate limit",
    "too many requests",
    "exceeded the quota",
    "daily request count exceeded",
];

const NETWORK_CHANGED_PATTERNS: &[&str] = &["underlying network changed", "network changed"];

const TRANSIENT_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "connection closed",
    "temporarily unavailable",
];

/// Maps a raw `web3` error into the retry taxonomy using generic message
/// patterns. Chain specific refinement happens in the quirk adapters before
/// this is consulted.
pub fn classify(error: web3::Error) -> RpcError {
    let message = error.to_string();
    let lowercase = message.to_lowercase();
    let contains_any = |patterns: &[&str]| patterns.iter().any(|p| lowercase.contains(p));

    if contains_any(ARCHIVE_NODE_PATTERNS) {
        return RpcError::ArchiveNodeNeeded(message);
    }
    if let web3::Error::Transport(web3::error::TransportError::Code(status)) = &error {
        if *status == 429 {
            return RpcError::RateLimited(message);
        }
        if *status >= 500 {
            return RpcError::Transient(message);
        }
    }
    if contains_any(RATE_LIMIT_PATTERNS) {
        return RpcError::RateLimited(message);
    }
    if contains_any(NETWORK_CHANGED_PATTERNS) {
        return RpcError::NetworkChanged(message);
    }
    if contains_any(TRANSIENT_PATTERNS) {
        return RpcError::Transient(message);
    }
    RpcError::Fatal(anyhow::Error::new(error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use web3::error::TransportError;

    fn rpc_error(message: &str) -> web3::Error {
        web3::Error::Rpc(jsonrpc_core::Error {
            code: jsonrpc_core::ErrorCode::ServerError(-32000),
            message: message.into(),
            data: None,
        })
    }

    #[test]
    fn missing_trie_node_needs_archive_node() {
        assert!(matches!(
            classify(rpc_error("missing trie node a32f1b45")),
            RpcError::ArchiveNodeNeeded(_)
        ));
    }

    #[test]
    fn http_429_is_rate_limited() {
        assert!(matches!(
            classify(web3::Error::Transport(TransportError::Code(429))),
            RpcError::RateLimited(_)
        ));
    }

    #[test]
    fn unknown_errors_are_fatal() {
        let classified = classify(rpc_error("execution reverted"));
        assert!(matches!(classified, RpcError::Fatal(_)));
        assert!(!classified.is_retryable());
    }

    #[test]
    fn timeouts_are_transient() {
        assert!(classify(web3::Error::Transport(TransportError::Message(
            "request timed out".into()
        )))
        .is_retryable());
    }
}
