pub mod chain;
pub mod h160_hexadecimal;
pub mod h256_hexadecimal;
pub mod import_state;
pub mod price_feed;
pub mod product;
pub mod ranges;
pub mod records;

pub use chain::Chain;
