use model::Chain;
use std::collections::HashMap;
use std::time::Duration;

/// Declared capabilities and quirks of one RPC endpoint.
///
/// These are configuration, not measurements: public endpoints rarely
/// advertise their limits so the values here encode what was observed to
/// work in production.
#[derive(Clone, Debug)]
pub struct RpcLimitations {
    /// Per method maximum number of calls in one JSON-RPC batch. `None`
    /// disables batching for that method entirely.
    pub methods: HashMap<String, Option<usize>>,
    /// Minimum spacing between calls. `None` means the endpoint declares no
    /// rate limit.
    pub min_delay_between_calls: Option<Duration>,
    pub is_archive_node: bool,
}

pub const ETH_GET_LOGS: &str = "eth_getLogs";
pub const ETH_CALL: &str = "eth_call";
pub const ETH_GET_BLOCK_BY_NUMBER: &str = "eth_getBlockByNumber";
pub const ETH_BLOCK_NUMBER: &str = "eth_blockNumber";

impl RpcLimitations {
    /// Declared maximum batch size for a method; methods that were never
    /// declared do not support batching.
    pub fn max_batch_for(&self, method: &str) -> Option<usize> {
        self.methods.get(method).copied().flatten()
    }

    /// Conservative defaults for public endpoints of a chain.
    pub fn default_for(chain: Chain) -> Self {
        let batchable = |get_logs: usize, calls: usize| {
            HashMap::from([
                (ETH_GET_LOGS.to_string(), Some(get_logs)),
                (ETH_CALL.to_string(), Some(calls)),
                (ETH_GET_BLOCK_BY_NUMBER.to_string(), Some(calls)),
                (ETH_BLOCK_NUMBER.to_string(), Some(1)),
            ])
        };
        let linear_only = || {
            HashMap::from([
                (ETH_GET_LOGS.to_string(), None),
                (ETH_CALL.to_string(), None),
                (ETH_GET_BLOCK_BY_NUMBER.to_string(), None),
                (ETH_BLOCK_NUMBER.to_string(), None),
            ])
        };
        match chain {
            // These public endpoints reject JSON-RPC batches outright and
            // throttle aggressively.
            Chain::Harmony | Chain::Cronos => Self {
                methods: linear_only(),
                min_delay_between_calls: Some(Duration::from_secs(1)),
                is_archive_node: false,
            },
            Chain::Celo | Chain::Syscoin | Chain::Emerald => Self {
                methods: batchable(3, 10),
                min_delay_between_calls: Some(Duration::from_millis(500)),
                is_archive_node: false,
            },
            Chain::Bsc | Chain::Polygon | Chain::Fantom | Chain::Avax => Self {
                methods: batchable(10, 50),
                min_delay_between_calls: Some(Duration::from_millis(100)),
                is_archive_node: true,
            },
            _ => Self {
                methods: batchable(10, 30),
                min_delay_between_calls: Some(Duration::from_millis(200)),
                is_archive_node: false,
            },
        }
    }
}
