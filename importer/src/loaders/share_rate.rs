//! Price per full share sampling through `getPricePerFullShare()` calls at
//! historical blocks.

use crate::conversions::u256_to_token_amount;
use anyhow::{ensure, Result};
use bigdecimal::BigDecimal;
use hex_literal::hex;
use model::product::Product;
use model::Chain;
use primitive_types::{H160, U256};
use shared::rpc::endpoint::RpcProvider;
use shared::rpc::error::RpcError;
use shared::rpc::quirks::{classify_with_quirks, quirks_for};
use std::collections::HashMap;
use web3::types::{BlockId, BlockNumber, Bytes, CallRequest};

/// getPricePerFullShare() selector.
const PPFS_SELECTOR: [u8; 4] = hex!("77c7b8fc");

/// One `eth_call` unit of work: a vault's share rate at one block.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ShareRateQuery {
    pub contract_address: H160,
    pub want_decimals: u8,
    pub block_number: u64,
}

/// Builds the query for a product, rejecting products that have no share
/// token. A boost or gov vault arriving here is a planner bug and must
/// surface as fatal instead of going on chain.
pub fn share_rate_query(product: &Product, block_number: u64) -> Result<ShareRateQuery> {
    ensure!(
        product.has_share_rate(),
        "price per full share requested for {} which has no share token",
        product.product_key
    );
    let vault = match &product.product_data {
        model::product::ProductData::Vault { vault } => vault,
        _ => unreachable!("has_share_rate only holds for vaults"),
    };
    Ok(ShareRateQuery {
        contract_address: vault.contract_address,
        want_decimals: vault.want_decimals,
        block_number,
    })
}

pub async fn fetch_share_rates(
    provider: &RpcProvider,
    chain: Chain,
    queries: Vec<ShareRateQuery>,
) -> Result<HashMap<ShareRateQuery, BigDecimal>, RpcError> {
    let quirks = quirks_for(chain);
    let results = futures::future::try_join_all(queries.iter().map(|query| async move {
        let request = CallRequest {
            to: Some(query.contract_address),
            data: Some(Bytes(PPFS_SELECTOR.to_vec())),
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
            let rate = decode_share_rate(&raw, query.want_decimals);
            (query, rate)
        })
        .collect())
}

fn decode_share_rate(raw: &Bytes, decimals: u8) -> BigDecimal {
    // A well formed response is one abi encoded uint256; short or empty
    // responses decode as zero which the canonical format also allows for
    // freshly deployed vaults.
    let bytes = if raw.0.len() > 32 { &raw.0[..32] } else { &raw.0 };
    u256_to_token_amount(&U256::from_big_endian(bytes), decimals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::product::{BeefyBoost, BeefyVault, ProductData};
    use std::str::FromStr;

    fn vault_product(is_gov_vault: bool) -> Product {
        Product {
            product_id: 1,
            product_key: "beefy:vault:bsc:test".into(),
            chain: Chain::Bsc,
            price_feed_id: 7,
            product_data: ProductData::Vault {
                vault: BeefyVault {
                    id: "test".into(),
                    chain: Chain::Bsc,
                    contract_address: H160([1; 20]),
                    want_address: H160([2; 20]),
                    token_decimals: 18,
                    want_decimals: 18,
                    is_gov_vault,
                },
            },
        }
    }

    #[test]
    fn rejects_products_without_share_token() {
        assert!(share_rate_query(&vault_product(false), 900).is_ok());
        assert!(share_rate_query(&vault_product(true), 900).is_err());

        let boost = Product {
            product_data: ProductData::Boost {
                boost: BeefyBoost {
                    id: "boost".into(),
                    chain: Chain::Bsc,
                    contract_address: H160([3; 20]),
                    staked_token_address: H160([1; 20]),
                    staked_token_decimals: 18,
                    vault_id: "test".into(),
                },
            },
            ..vault_product(false)
        };
        assert!(share_rate_query(&boost, 900).is_err());
    }

    #[test]
    fn decodes_the_abi_encoded_rate() {
        let mut word = [0u8; 32];
        U256::from_dec_str("1020000000000000000")
            .unwrap()
            .to_big_endian(&mut word);
        assert_eq!(
            decode_share_rate(&Bytes(word.to_vec()), 18),
            BigDecimal::from_str("1.02").unwrap()
        );
        assert_eq!(decode_share_rate(&Bytes(vec![]), 18), BigDecimal::from(0));
    }
}
