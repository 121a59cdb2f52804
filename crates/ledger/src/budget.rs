//! Cumulative spend per scope.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::{Error, Result};

/// Spend ledger keyed by scope. Usage only grows until an operator calls
/// [`BudgetManager::reset`].
#[derive(Default)]
pub struct BudgetManager {
    usage: Mutex<HashMap<String, f64>>,
}

impl BudgetManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Debit `amount` against `key` if the total stays within `limit`.
    ///
    /// Either the whole amount is committed or nothing is. Returns the new
    /// usage.
    pub fn spend(&self, key: &str, amount: f64, limit: f64) -> Result<f64> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(Error::InvalidAmount(amount));
        }
        let mut usage = self.usage.lock();
        let current = usage.get(key).copied().unwrap_or(0.0);
        if current + amount > limit {
            return Err(Error::BudgetExceeded {
                key: key.to_string(),
                usage: current,
                amount,
                limit,
            });
        }
        let updated = current + amount;
        usage.insert(key.to_string(), updated);
        Ok(updated)
    }

    pub fn usage(&self, key: &str) -> f64 {
        self.usage.lock().get(key).copied().unwrap_or(0.0)
    }

    /// Clear a key's usage. Returns what it was.
    pub fn reset(&self, key: &str) -> f64 {
        self.usage.lock().remove(key).unwrap_or(0.0)
    }

    pub fn snapshot(&self) -> HashMap<String, f64> {
        self.usage.lock().clone()
    }
}
