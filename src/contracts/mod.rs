pub mod vault;
pub mod wrapped;

pub use vault::BridgeVault;
pub use wrapped::WrappedToken;
