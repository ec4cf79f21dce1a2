//! Proof-gated reward vault.
//!
//! Distributions are committed as a blake3 Merkle root per token; a claim
//! presents `(index, amount)` plus a sibling path and is paid once. Pair
//! hashes are order-normalized so proofs carry no direction bits.

use std::collections::{BTreeMap, BTreeSet};

use tidelock_core::error::TidelockError;
use tidelock_core::types::{Balance, TokenId};

use crate::traits::RewardVerifier;

// ── Hashing ──────────────────────────────────────────────────────────────────

/// Leaf commitment for one claimable entry.
pub fn reward_leaf(token: &TokenId, index: u64, amount: Balance) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(token.as_bytes());
    hasher.update(&index.to_le_bytes());
    hasher.update(&amount.to_le_bytes());
    *hasher.finalize().as_bytes()
}

fn combine(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = blake3::Hasher::new();
    hasher.update(lo);
    hasher.update(hi);
    *hasher.finalize().as_bytes()
}

/// Root of a leaf set. Odd nodes are promoted to the next level unchanged.
pub fn merkle_root(leaves: &[[u8; 32]]) -> [u8; 32] {
    assert!(!leaves.is_empty(), "merkle tree needs at least one leaf");
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                if pair.len() == 2 {
                    combine(&pair[0], &pair[1])
                } else {
                    pair[0]
                }
            })
            .collect();
    }
    level[0]
}

/// Sibling path for `index` into the tree over `leaves`.
pub fn merkle_proof(leaves: &[[u8; 32]], index: usize) -> Vec<[u8; 32]> {
    assert!(index < leaves.len(), "proof index out of range");
    let mut proof = Vec::new();
    let mut level = leaves.to_vec();
    let mut pos = index;
    while level.len() > 1 {
        let sibling = pos ^ 1;
        if sibling < level.len() {
            proof.push(level[sibling]);
        }
        level = level
            .chunks(2)
            .map(|pair| {
                if pair.len() == 2 {
                    combine(&pair[0], &pair[1])
                } else {
                    pair[0]
                }
            })
            .collect();
        pos /= 2;
    }
    proof
}

fn verify(leaf: [u8; 32], proof: &[[u8; 32]], root: [u8; 32]) -> bool {
    let mut node = leaf;
    for sibling in proof {
        node = combine(&node, sibling);
    }
    node == root
}

// ── MerkleRewardVault ────────────────────────────────────────────────────────

#[derive(Debug)]
struct Distribution {
    root: [u8; 32],
    funded: Balance,
}

/// Reference implementation of the proof-gated reward source. One
/// distribution root per token; every (token, index) pays out at most once.
#[derive(Debug, Default)]
pub struct MerkleRewardVault {
    distributions: BTreeMap<TokenId, Distribution>,
    claimed: BTreeSet<(TokenId, u64)>,
}

impl MerkleRewardVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit a distribution: `root` over its claim set, backed by `amount`
    /// of `token`. Re-funding a token replaces the root and adds funding.
    pub fn fund(&mut self, token: TokenId, root: [u8; 32], amount: Balance) {
        let dist = self
            .distributions
            .entry(token)
            .or_insert(Distribution { root, funded: 0 });
        dist.root = root;
        dist.funded += amount;
    }

    pub fn funded(&self, token: &TokenId) -> Balance {
        self.distributions.get(token).map(|d| d.funded).unwrap_or(0)
    }
}

impl RewardVerifier for MerkleRewardVault {
    fn claim(
        &mut self,
        token: TokenId,
        index: u64,
        amount: Balance,
        proof: &[[u8; 32]],
    ) -> Result<Balance, TidelockError> {
        let dist = self
            .distributions
            .get_mut(&token)
            .ok_or_else(|| TidelockError::InvalidProof(format!("no distribution for {token}")))?;

        if self.claimed.contains(&(token, index)) {
            return Err(TidelockError::InvalidProof(format!(
                "index {index} already claimed for {token}"
            )));
        }
        if !verify(reward_leaf(&token, index, amount), proof, dist.root) {
            return Err(TidelockError::InvalidProof(format!(
                "bad proof for {token} index {index}"
            )));
        }
        if dist.funded < amount {
            return Err(TidelockError::InvalidProof(format!(
                "distribution for {token} underfunded"
            )));
        }

        dist.funded -= amount;
        self.claimed.insert((token, index));
        Ok(amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(n: u8) -> TokenId {
        TokenId::from_bytes([n; 32])
    }

    fn vault_with(token_id: TokenId, entries: &[(u64, Balance)]) -> (MerkleRewardVault, Vec<[u8; 32]>) {
        let leaves: Vec<[u8; 32]> = entries
            .iter()
            .map(|&(i, a)| reward_leaf(&token_id, i, a))
            .collect();
        let mut vault = MerkleRewardVault::new();
        let total = entries.iter().map(|&(_, a)| a).sum();
        vault.fund(token_id, merkle_root(&leaves), total);
        (vault, leaves)
    }

    #[test]
    fn valid_claim_pays_once() {
        let t = token(1);
        let (mut vault, leaves) = vault_with(t, &[(0, 100), (1, 50), (2, 25)]);
        let proof = merkle_proof(&leaves, 1);
        assert_eq!(vault.claim(t, 1, 50, &proof).unwrap(), 50);
        assert_eq!(vault.funded(&t), 125);

        let err = vault.claim(t, 1, 50, &proof).unwrap_err();
        assert!(matches!(err, TidelockError::InvalidProof(_)));
    }

    #[test]
    fn wrong_amount_rejected() {
        let t = token(2);
        let (mut vault, leaves) = vault_with(t, &[(0, 100), (1, 50)]);
        let proof = merkle_proof(&leaves, 0);
        assert!(vault.claim(t, 0, 999, &proof).is_err());
        // Claim not consumed by the failed attempt.
        assert_eq!(vault.claim(t, 0, 100, &proof).unwrap(), 100);
    }

    #[test]
    fn single_leaf_tree_has_empty_proof() {
        let t = token(3);
        let (mut vault, _leaves) = vault_with(t, &[(7, 42)]);
        assert_eq!(vault.claim(t, 7, 42, &[]).unwrap(), 42);
    }

    #[test]
    fn odd_leaf_counts_verify() {
        let t = token(4);
        let entries: Vec<(u64, Balance)> = (0..5).map(|i| (i, 10 + i as Balance)).collect();
        let (mut vault, leaves) = vault_with(t, &entries);
        for (i, amount) in entries {
            let proof = merkle_proof(&leaves, i as usize);
            assert_eq!(vault.claim(t, i, amount, &proof).unwrap(), amount);
        }
        assert_eq!(vault.funded(&t), 0);
    }

    #[test]
    fn unknown_token_rejected() {
        let mut vault = MerkleRewardVault::new();
        assert!(vault.claim(token(9), 0, 1, &[]).is_err());
    }
}
