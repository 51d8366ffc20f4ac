//! ERC-20 `Transfer` event fetching and decoding into signed, per owner and
//! per block net balance changes.

use crate::conversions::{big_int_to_token_amount, u256_to_big_int};
use anyhow::{Context, Result};
use bigdecimal::num_bigint::BigInt;
use hex_literal::hex;
use model::product::InvestmentSource;
use model::ranges::Range;
use model::records::Erc20Transfer;
use model::Chain;
use primitive_types::{H160, H256, U256};
use shared::rpc::endpoint::RpcProvider;
use shared::rpc::error::RpcError;
use shared::rpc::quirks::{classify_with_quirks, quirks_for};
use std::collections::HashMap;
use web3::types::{BlockNumber, Filter, FilterBuilder, Log};

/// keccak256("Transfer(address,address,uint256)")
const TRANSFER_TOPIC: H256 = H256(hex!(
    "ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
));

/// One `eth_getLogs` unit of work: a token over a block range, optionally
/// narrowed to transfers touching one tracked address.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TransferQuery {
    pub source: InvestmentSource,
    pub range: Range<u64>,
}

/// RPC cost of one [`TransferQuery`]: tracked sources need the sender and
/// the receiver filter.
pub fn logs_per_query(source: &InvestmentSource) -> usize {
    match source.track_address {
        Some(_) => 2,
        None => 1,
    }
}

/// Fetches and decodes every query of a batch. Issued concurrently so the
/// batching provider coalesces the underlying `eth_getLogs` calls into one
/// JSON-RPC batch.
pub async fn fetch_erc20_transfers(
    provider: &RpcProvider,
    chain: Chain,
    queries: Vec<TransferQuery>,
) -> Result<HashMap<TransferQuery, Vec<Erc20Transfer>>, RpcError> {
    let results =
        futures::future::try_join_all(queries.iter().map(|query| fetch_one(provider, chain, query)))
            .await?;
    Ok(queries.into_iter().zip(results).collect())
}

async fn fetch_one(
    provider: &RpcProvider,
    chain: Chain,
    query: &TransferQuery,
) -> Result<Vec<Erc20Transfer>, RpcError> {
    let quirks = quirks_for(chain);
    let logs = match query.source.track_address {
        None => provider
            .logs(transfer_filter(&query.source, &query.range, None, None))
            .await
            .map_err(|err| classify_with_quirks(&*quirks, err))?,
        // Two filters: the tracked address as sender and as receiver.
        Some(tracked) => {
            let (sent, received) = futures::future::try_join(
                provider.logs(transfer_filter(&query.source, &query.range, Some(tracked), None)),
                provider.logs(transfer_filter(&query.source, &query.range, None, Some(tracked))),
            )
            .await
            .map_err(|err| classify_with_quirks(&*quirks, err))?;
            let mut logs = sent;
            logs.extend(received);
            // Self transfers match both filters.
            logs.sort_by_key(|log| (log.transaction_hash, log.log_index));
            logs.dedup_by_key(|log| (log.transaction_hash, log.log_index));
            logs
        }
    };
    decode_transfer_logs(chain, &query.source, &logs).map_err(RpcError::Fatal)
}

fn transfer_filter(
    source: &InvestmentSource,
    range: &Range<u64>,
    from: Option<H160>,
    to: Option<H160>,
) -> Filter {
    FilterBuilder::default()
        .address(vec![source.token_address])
        .from_block(BlockNumber::Number(range.from.into()))
        .to_block(BlockNumber::Number(range.to.into()))
        .topics(
            Some(vec![TRANSFER_TOPIC]),
            from.map(|address| vec![address_topic(address)]),
            to.map(|address| vec![address_topic(address)]),
            None,
        )
        .build()
}

fn address_topic(address: H160) -> H256 {
    let mut topic = H256::zero();
    topic.0[12..].copy_from_slice(address.as_bytes());
    topic
}

fn topic_address(topic: &H256) -> H160 {
    H160::from_slice(&topic.0[12..])
}

/// Decodes raw `Transfer` logs into net balance changes.
///
/// Without a tracked address the sender loses and the receiver gains the
/// amount. With one, the investor is the counterparty of the tracked
/// contract and the sign follows the product position: a transfer into the
/// contract is a deposit. Several changes for the same owner within one
/// block merge into a single record carrying the transaction hash of the
/// highest log index; zero address, the token itself and the tracked
/// contract never count as investors.
pub fn decode_transfer_logs(
    chain: Chain,
    source: &InvestmentSource,
    logs: &[Log],
) -> Result<Vec<Erc20Transfer>> {
    struct NetChange {
        amount: BigInt,
        transaction_hash: H256,
        log_index: U256,
    }

    let mut by_owner_and_block: HashMap<(H160, u64), NetChange> = HashMap::new();
    for log in logs {
        anyhow::ensure!(
            log.topics.len() == 3 && log.topics[0] == TRANSFER_TOPIC,
            "not an erc20 transfer log: {:?}",
            log
        );
        let from = topic_address(&log.topics[1]);
        let to = topic_address(&log.topics[2]);
        let amount = u256_to_big_int(&U256::from_big_endian(&log.data.0));
        let block_number = log
            .block_number
            .context("transfer log without block number")?
            .as_u64();
        let transaction_hash = log
            .transaction_hash
            .context("transfer log without transaction hash")?;
        let log_index = log.log_index.context("transfer log without log index")?;

        let changes: [(H160, BigInt); 2] = match source.track_address {
            None => [(from, -amount.clone()), (to, amount)],
            Some(tracked) => {
                if to == tracked {
                    // Deposit: the sender's position grows.
                    [(from, amount.clone()), (to, -amount)]
                } else {
                    // Withdrawal: the receiver's position shrinks.
                    [(to, -amount.clone()), (from, amount)]
                }
            }
        };
        for (owner, diff) in changes {
            if owner == H160::zero()
                || owner == source.token_address
                || Some(owner) == source.track_address
            {
                continue;
            }
            let entry = by_owner_and_block
                .entry((owner, block_number))
                .or_insert_with(|| NetChange {
                    amount: BigInt::from(0),
                    transaction_hash,
                    log_index,
                });
            entry.amount += diff;
            if log_index >= entry.log_index {
                entry.transaction_hash = transaction_hash;
                entry.log_index = log_index;
            }
        }
    }

    let mut transfers: Vec<Erc20Transfer> = by_owner_and_block
        .into_iter()
        .map(|((owner_address, block_number), change)| Erc20Transfer {
            chain,
            token_address: source.token_address,
            token_decimals: source.token_decimals,
            owner_address,
            block_number,
            transaction_hash: change.transaction_hash,
            amount_transferred: big_int_to_token_amount(change.amount, source.token_decimals),
        })
        .collect();
    transfers.sort_by_key(|transfer| (transfer.block_number, transfer.owner_address));
    Ok(transfers)
}
