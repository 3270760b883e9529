//! Per-vaccine dose counters.
//!
//! Counters are only ever changed through [`Inventory::decrement`] and
//! [`Inventory::increment`], each a single read-modify-write on the
//! transaction's working copy, so a count can never go negative.

use crate::{Error, Result, VaccineStock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Inventory {
    stock: BTreeMap<String, u32>,
}

impl Inventory {
    /// Take `n` doses. Unknown vaccines have zero doses.
    ///
    /// Returns the remaining count.
    pub fn decrement(&mut self, vaccine: &str, n: u32) -> Result<u32> {
        let available = self.doses(vaccine);
        let remaining = available
            .checked_sub(n)
            .ok_or_else(|| Error::InsufficientStock {
                vaccine: vaccine.to_string(),
                requested: n,
                available,
            })?;
        if let Some(doses) = self.stock.get_mut(vaccine) {
            *doses = remaining;
        }
        tracing::debug!("Decremented {} by {} ({} left)", vaccine, n, remaining);
        Ok(remaining)
    }

    /// Add `n` doses, creating the vaccine if needed. Returns the new count.
    pub fn increment(&mut self, vaccine: &str, n: u32) -> Result<u32> {
        if vaccine.trim().is_empty() {
            return Err(Error::InvalidInput("vaccine name must not be empty".into()));
        }
        let doses = self.stock.entry(vaccine.to_string()).or_insert(0);
        *doses = doses.checked_add(n).ok_or_else(|| {
            Error::InvalidInput(format!("adding {} doses of {} overflows the counter", n, vaccine))
        })?;
        tracing::debug!("Incremented {} by {} ({} now)", vaccine, n, *doses);
        Ok(*doses)
    }

    pub fn doses(&self, vaccine: &str) -> u32 {
        self.stock.get(vaccine).copied().unwrap_or(0)
    }

    /// All vaccines ordered by name
    pub fn all(&self) -> Vec<VaccineStock> {
        self.stock
            .iter()
            .map(|(name, doses)| VaccineStock {
                name: name.clone(),
                doses: *doses,
            })
            .collect()
    }
}
