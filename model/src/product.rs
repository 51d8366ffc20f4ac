use crate::chain::Chain;
use primitive_types::H160;
use serde::{Deserialize, Serialize};

/// A yield bearing contract tracked by the importer: a vault or a boost.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub product_id: i64,
    pub product_key: String,
    pub chain: Chain,
    pub price_feed_id: i64,
    pub product_data: ProductData,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProductData {
    #[serde(rename = "beefy:vault")]
    Vault { vault: BeefyVault },
    #[serde(rename = "beefy:boost")]
    Boost { boost: BeefyBoost },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeefyVault {
    pub id: String,
    pub chain: Chain,
    /// The vault contract, which is also the share token for standard vaults.
    #[serde(with = "crate::h160_hexadecimal")]
    pub contract_address: H160,
    /// The token deposited into the vault.
    #[serde(with = "crate::h160_hexadecimal")]
    pub want_address: H160,
    pub token_decimals: u8,
    pub want_decimals: u8,
    /// Gov vaults have no share token of their own; investor balances are
    /// derived from want token transfers to and from the contract.
    pub is_gov_vault: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeefyBoost {
    pub id: String,
    pub chain: Chain,
    #[serde(with = "crate::h160_hexadecimal")]
    pub contract_address: H160,
    /// The share token of the boosted vault, staked into this contract.
    #[serde(with = "crate::h160_hexadecimal")]
    pub staked_token_address: H160,
    pub staked_token_decimals: u8,
    pub vault_id: String,
}

/// What to watch on chain to derive investor positions for a product.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct InvestmentSource {
    /// The ERC-20 token whose transfers carry the positions.
    pub token_address: H160,
    pub token_decimals: u8,
    /// When set, only transfers where this address is sender or receiver are
    /// relevant and the investor is the counterparty.
    pub track_address: Option<H160>,
}

impl Product {
    pub fn contract_address(&self) -> H160 {
        match &self.product_data {
            ProductData::Vault { vault } => vault.contract_address,
            ProductData::Boost { boost } => boost.contract_address,
        }
    }

    pub fn investment_source(&self) -> InvestmentSource {
        match &self.product_data {
            ProductData::Vault { vault } if vault.is_gov_vault => InvestmentSource {
                token_address: vault.want_address,
                token_decimals: vault.want_decimals,
                track_address: Some(vault.contract_address),
            },
            ProductData::Vault { vault } => InvestmentSource {
                token_address: vault.contract_address,
                token_decimals: vault.token_decimals,
                track_address: None,
            },
            ProductData::Boost { boost } => InvestmentSource {
                token_address: boost.staked_token_address,
                token_decimals: boost.staked_token_decimals,
                track_address: Some(boost.contract_address),
            },
        }
    }

    /// Share rate sampling only makes sense where a share token with a price
    /// per full share exists, which excludes gov vaults and boosts.
    pub fn has_share_rate(&self) -> bool {
        matches!(&self.product_data, ProductData::Vault { vault } if !vault.is_gov_vault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vault(is_gov_vault: bool) -> Product {
        Product {
            product_id: 1,
            product_key: "beefy:vault:bsc:0101010101010101010101010101010101010101".into(),
            chain: Chain::Bsc,
            price_feed_id: 7,
            product_data: ProductData::Vault {
                vault: BeefyVault {
                    id: "venus-bnb".into(),
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
    fn standard_vault_tracks_its_own_token() {
        let source = vault(false).investment_source();
        assert_eq!(source.token_address, H160([1; 20]));
        assert_eq!(source.track_address, None);
        assert!(vault(false).has_share_rate());
    }

    #[test]
    fn gov_vault_tracks_want_transfers() {
        let source = vault(true).investment_source();
        assert_eq!(source.token_address, H160([2; 20]));
        assert_eq!(source.track_address, Some(H160([1; 20])));
        assert!(!vault(true).has_share_rate());
    }

    #[test]
    fn product_data_serializes_with_type_tag() {
        let serialized = serde_json::to_value(&vault(false).product_data).unwrap();
        assert_eq!(serialized["type"], json!("beefy:vault"));
        assert_eq!(serialized["vault"]["isGovVault"], json!(false));
    }
}
