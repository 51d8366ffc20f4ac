pub mod balances;
pub mod blocks;
pub mod contract_creation;
pub mod prices;
pub mod share_rate;
pub mod transfers;
