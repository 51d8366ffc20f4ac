use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An EVM compatible network tracked by the importer.
///
/// The serialized form is the lowercase name and matches the `chain` text
/// columns in the database as well as the chain keys used in configuration.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Arbitrum,
    Aurora,
    Avax,
    Bsc,
    Celo,
    Cronos,
    Emerald,
    Ethereum,
    Fantom,
    Fuse,
    Harmony,
    Heco,
    Metis,
    Moonbeam,
    Moonriver,
    Optimism,
    Polygon,
    Syscoin,
}

impl Chain {
    pub const ALL: [Chain; 18] = [
        Chain::Arbitrum,
        Chain::Aurora,
        Chain::Avax,
        Chain::Bsc,
        Chain::Celo,
        Chain::Cronos,
        Chain::Emerald,
        Chain::Ethereum,
        Chain::Fantom,
        Chain::Fuse,
        Chain::Harmony,
        Chain::Heco,
        Chain::Metis,
        Chain::Moonbeam,
        Chain::Moonriver,
        Chain::Optimism,
        Chain::Polygon,
        Chain::Syscoin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Arbitrum => "arbitrum",
            Chain::Aurora => "aurora",
            Chain::Avax => "avax",
            Chain::Bsc => "bsc",
            Chain::Celo => "celo",
            Chain::Cronos => "cronos",
            Chain::Emerald => "emerald",
            Chain::Ethereum => "ethereum",
            Chain::Fantom => "fantom",
            Chain::Fuse => "fuse",
            Chain::Harmony => "harmony",
            Chain::Heco => "heco",
            Chain::Metis => "metis",
            Chain::Moonbeam => "moonbeam",
            Chain::Moonriver => "moonriver",
            Chain::Optimism => "optimism",
            Chain::Polygon => "polygon",
            Chain::Syscoin => "syscoin",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|chain| chain.as_str() == s)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("unknown chain {:?}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_round_trip() {
        for chain in Chain::ALL {
            assert_eq!(chain.as_str().parse::<Chain>().unwrap(), chain);
        }
        assert!("solana".parse::<Chain>().is_err());
    }

    #[test]
    fn serializes_as_lowercase_text() {
        assert_eq!(
            serde_json::to_value(Chain::Bsc).unwrap(),
            serde_json::json!("bsc")
        );
    }
}
