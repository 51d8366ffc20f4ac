//! Post-hoc investor token balances through `balanceOf(owner)` calls at
//! historical blocks.

use crate::conversions::u256_to_token_amount;
use bigdecimal::BigDecimal;
use hex_literal::hex;
use model::Chain;
use primitive_types::{H160, U256};
use shared::rpc::endpoint::RpcProvider;
use shared::rpc::error::RpcError;
use shared::rpc::quirks::{classify_with_quirks, quirks_for};
use std::collections::HashMap;
use web3::types::{BlockId, BlockNumber, Bytes, CallRequest};

/// balanceOf(address) selector.
const BALANCE_OF_SELECTOR: [u8; 4] = hex!("70a08231");

/// One `eth_call` unit of work: an owner's token balance at one block.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct BalanceQuery {
    pub token_address: H160,
    pub token_decimals: u8,
    pub owner_address: H160,
    pub block_number: u64,
}

pub async fn fetch_owner_balances(
    provider: &RpcProvider,
    chain: Chain,
    queries: Vec<BalanceQuery>,
) -> Result<HashMap<BalanceQuery, BigDecimal>, RpcError> {
    let quirks = quirks_for(chain);
    let results = futures::future::try_join_all(queries.iter().map(|query| async move {
        let request = CallRequest {
            to: Some(query.token_address),
            data: Some(balance_of_calldata(query.owner_address)),
            ..Default::default()
        };
        let block = BlockId::Number(BlockNumber::Number(query.block_number.into()));
        provider.call(request, Some(block)).await
    }))
    .await
    .map_err(|err| classify_with_quirks(&*quirks, err))?;

    Ok(queries
        .into_iter()
        .zip(results)
        .map(|(query, raw)| {
            let bytes = if raw.0.len() > 32 { &raw.0[..32] } else { &raw.0[..] };
            let balance = u256_to_token_amount(&U256::from_big_endian(bytes), query.token_decimals);
            (query, balance)
        })
        .collect())
}

fn balance_of_calldata(owner: H160) -> Bytes {
    let mut data = Vec::with_capacity(4 + 32);
    data.extend_from_slice(&BALANCE_OF_SELECTOR);
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(owner.as_bytes());
    Bytes(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calldata_is_selector_plus_padded_owner() {
        let owner = H160([0xAA; 20]);
        let data = balance_of_calldata(owner).0;
        assert_eq!(data.len(), 36);
        assert_eq!(&data[..4], &BALANCE_OF_SELECTOR);
        assert_eq!(&data[4..16], &[0u8; 12]);
        assert_eq!(&data[16..], owner.as_bytes());
    }
}
