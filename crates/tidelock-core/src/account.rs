use serde::{Deserialize, Serialize};

use crate::error::TidelockError;
use crate::types::{AccountId, Balance};

/// Per-account balances as stored in the state DB.
///
/// `base_balance` is underlying asset the account holds outside the engine
/// (the engine debits it on deposit and credits it on redemption payout).
/// `receipt_balance` is the liquid receipt token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Account {
    pub account_id: AccountId,
    pub base_balance: Balance,
    pub receipt_balance: Balance,
}

impl Account {
    pub fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            base_balance: 0,
            receipt_balance: 0,
        }
    }

    pub fn debit_base(&mut self, amount: Balance) -> Result<(), TidelockError> {
        if self.base_balance < amount {
            return Err(TidelockError::InsufficientBalance {
                need: amount,
                have: self.base_balance,
            });
        }
        self.base_balance -= amount;
        Ok(())
    }

    pub fn credit_base(&mut self, amount: Balance) {
        self.base_balance += amount;
    }

    pub fn debit_receipt(&mut self, amount: Balance) -> Result<(), TidelockError> {
        if self.receipt_balance < amount {
            return Err(TidelockError::InsufficientBalance {
                need: amount,
                have: self.receipt_balance,
            });
        }
        self.receipt_balance -= amount;
        Ok(())
    }

    pub fn credit_receipt(&mut self, amount: Balance) {
        self.receipt_balance += amount;
    }
}
