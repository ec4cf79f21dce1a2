use serde::{Deserialize, Serialize};
use std::fmt;

/// Balance in base-asset base units. u128 leaves headroom for reward tokens
/// with 18-decimal supplies.
pub type Balance = u128;

/// Unix timestamp (seconds, UTC). Epochs are keyed by their start timestamp.
pub type Timestamp = i64;

/// Balance-snapshot identifier. 0 means "no snapshot taken yet".
pub type SnapshotId = u64;

// ── AccountId ────────────────────────────────────────────────────────────────

/// 32-byte account identifier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub [u8; 32]);

impl AccountId {
    /// The zero account. Never a valid receiver or owner.
    pub const ZERO: AccountId = AccountId([0u8; 32]);

    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Base-58 encoded string representation.
    pub fn to_b58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }

    pub fn from_b58(s: &str) -> Result<Self, bs58::decode::Error> {
        let bytes = bs58::decode(s).into_vec()?;
        if bytes.len() != 32 {
            return Err(bs58::decode::Error::BufferTooSmall);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_b58())
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", &self.to_b58()[..8])
    }
}

// ── TokenId ──────────────────────────────────────────────────────────────────

/// 32-byte identifier of an external reward token.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenId(pub [u8; 32]);

impl TokenId {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenId({}…)", &self.to_hex()[..16])
    }
}

// ── FuturesKind ──────────────────────────────────────────────────────────────

/// The two classes of per-epoch futures notes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FuturesKind {
    /// Right to the epoch's delegated vote weight.
    Vote,
    /// Right to a pro-rata share of the epoch's futures reward pool.
    Reward,
}

impl FuturesKind {
    /// Stable single-byte key prefix for ledger storage.
    pub fn key_byte(self) -> u8 {
        match self {
            FuturesKind::Vote => 0,
            FuturesKind::Reward => 1,
        }
    }
}

impl fmt::Display for FuturesKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FuturesKind::Vote => write!(f, "vote"),
            FuturesKind::Reward => write!(f, "reward"),
        }
    }
}

// ── Asset ────────────────────────────────────────────────────────────────────

/// An asset class the engine holds or routes: the underlying base asset, the
/// receipt token it mints, or an external reward token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Asset {
    Base,
    Receipt,
    Reward(TokenId),
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::Base => write!(f, "base"),
            Asset::Receipt => write!(f, "receipt"),
            Asset::Reward(t) => write!(f, "reward:{}", t),
        }
    }
}
