pub mod config;
pub mod error;
pub mod magnet;
pub mod types;

pub use config::{MiningConfig, MiningSettings};
pub use error::{ConfigError, IdentifierError};
pub use magnet::magnet_link;
pub use types::*;
