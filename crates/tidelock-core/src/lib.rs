pub mod account;
pub mod config;
pub mod constants;
pub mod epoch;
pub mod error;
pub mod fees;
pub mod stake;
pub mod types;

pub use account::Account;
pub use config::{EngineConfig, FeeConfig};
pub use constants::*;
pub use epoch::EpochRecord;
pub use error::TidelockError;
pub use fees::RewardSplit;
pub use stake::StakePool;
pub use types::*;
