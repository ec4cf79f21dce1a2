use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::{
    DEFAULT_DELEGATION_SPACE, DEFAULT_REDEMPTION_FEE_MAX, DEFAULT_REDEMPTION_FEE_MIN,
    DEFAULT_REWARD_FEE, REDEMPTION_FEE_CAP, REWARD_FEE_CAP,
};
use crate::error::TidelockError;
use crate::types::AccountId;

// ── FeeConfig ────────────────────────────────────────────────────────────────

/// All fee parameters, expressed in parts per `FEE_DENOMINATOR`.
/// Adjustable at runtime by the owner; re-validated on every change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Exit fee when the full `MAX_REDEMPTION_TIME` remains.
    pub redemption_fee_max: u128,
    /// Exit fee when the position is already redeemable.
    pub redemption_fee_min: u128,
    /// Protocol cut taken off every incoming reward before splitting.
    pub reward_fee: u128,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            redemption_fee_max: DEFAULT_REDEMPTION_FEE_MAX,
            redemption_fee_min: DEFAULT_REDEMPTION_FEE_MIN,
            reward_fee: DEFAULT_REWARD_FEE,
        }
    }
}

impl FeeConfig {
    pub fn validate(&self) -> Result<(), TidelockError> {
        if self.redemption_fee_max > REDEMPTION_FEE_CAP {
            return Err(TidelockError::FeeAboveCap {
                value: self.redemption_fee_max,
                cap: REDEMPTION_FEE_CAP,
            });
        }
        if self.redemption_fee_min > self.redemption_fee_max {
            return Err(TidelockError::FeeBoundsInverted {
                min: self.redemption_fee_min,
                max: self.redemption_fee_max,
            });
        }
        if self.reward_fee > REWARD_FEE_CAP {
            return Err(TidelockError::FeeAboveCap {
                value: self.reward_fee,
                cap: REWARD_FEE_CAP,
            });
        }
        Ok(())
    }
}

// ── EngineConfig ─────────────────────────────────────────────────────────────

/// Deployment parameters of a ledger engine.
///
/// In production these come from a deployment manifest; in tests they are
/// built in code around fixed account ids.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Privileged account: fee changes, pause, delegation, migration.
    pub owner: AccountId,
    /// Account credited with all fee flows; an external splitter contract
    /// pays it onward.
    pub fee_splitter: AccountId,
    /// Account the compounding vault holds receipt tokens under.
    pub compound_vault: AccountId,
    /// Fee parameters at deployment.
    #[serde(default)]
    pub fees: FeeConfig,
    /// Vote-delegation namespace registered with the delegate registry.
    #[serde(default = "default_space")]
    pub delegation_space: String,
}

fn default_space() -> String {
    DEFAULT_DELEGATION_SPACE.to_string()
}

impl EngineConfig {
    pub fn new(owner: AccountId, fee_splitter: AccountId, compound_vault: AccountId) -> Self {
        Self {
            owner,
            fee_splitter,
            compound_vault,
            fees: FeeConfig::default(),
            delegation_space: default_space(),
        }
    }

    /// Load a config from a JSON manifest on disk.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, TidelockError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| TidelockError::Storage(e.to_string()))?;
        let config: Self =
            serde_json::from_str(&raw).map_err(|e| TidelockError::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TidelockError> {
        if self.owner.is_zero() {
            return Err(TidelockError::ZeroConfigAccount("owner"));
        }
        if self.fee_splitter.is_zero() {
            return Err(TidelockError::ZeroConfigAccount("fee_splitter"));
        }
        if self.compound_vault.is_zero() {
            return Err(TidelockError::ZeroConfigAccount("compound_vault"));
        }
        self.fees.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig::new(
            AccountId::from_bytes([1u8; 32]),
            AccountId::from_bytes([2u8; 32]),
            AccountId::from_bytes([3u8; 32]),
        )
    }

    #[test]
    fn default_config_is_valid() {
        config().validate().unwrap();
    }

    #[test]
    fn zero_owner_rejected() {
        let mut c = config();
        c.owner = AccountId::ZERO;
        assert!(matches!(
            c.validate(),
            Err(TidelockError::ZeroConfigAccount("owner"))
        ));
    }

    #[test]
    fn inverted_fee_bounds_rejected() {
        let mut c = config();
        c.fees.redemption_fee_min = c.fees.redemption_fee_max + 1;
        assert!(matches!(
            c.validate(),
            Err(TidelockError::FeeBoundsInverted { .. })
        ));
    }

    #[test]
    fn fee_above_cap_rejected() {
        let mut c = config();
        c.fees.redemption_fee_max = REDEMPTION_FEE_CAP + 1;
        assert!(matches!(c.validate(), Err(TidelockError::FeeAboveCap { .. })));
    }

    #[test]
    fn json_round_trip() {
        let c = config();
        let json = serde_json::to_string(&c).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.owner, c.owner);
        assert_eq!(back.fees, c.fees);
        assert_eq!(back.delegation_space, c.delegation_space);
    }
}
