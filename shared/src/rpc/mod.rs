pub mod endpoint;
pub mod error;
pub mod gate;
pub mod limitations;
pub mod quirks;

pub use endpoint::{RpcEndpoint, RpcProvider};
pub use error::RpcError;
pub use gate::{CallOptions, RpcGate};
pub use limitations::RpcLimitations;
