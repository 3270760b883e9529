//! Caregiver availability slots.

use crate::{AvailabilitySlot, Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Calendar {
    slots: BTreeSet<AvailabilitySlot>,
}

impl Calendar {
    /// Open a slot for `caregiver` on `date`
    pub fn publish(&mut self, caregiver: &str, date: NaiveDate) -> Result<()> {
        if !self.slots.insert(AvailabilitySlot::new(caregiver, date)) {
            return Err(Error::DuplicateSlot {
                caregiver: caregiver.to_string(),
                date,
            });
        }
        tracing::debug!("Published slot {} on {}", caregiver, date);
        Ok(())
    }

    /// Remove and return the lexicographically smallest caregiver open on `date`
    pub fn select_and_consume(&mut self, date: NaiveDate) -> Option<String> {
        let slot = self.first_on(date)?.clone();
        self.slots.remove(&slot);
        tracing::debug!("Consumed slot {} on {}", slot.caregiver, date);
        Some(slot.caregiver)
    }

    /// Caregivers open on `date`, ascending
    pub fn available_on(&self, date: NaiveDate) -> Vec<String> {
        self.on(date).map(|slot| slot.caregiver.clone()).collect()
    }

    pub fn contains(&self, caregiver: &str, date: NaiveDate) -> bool {
        self.slots.contains(&AvailabilitySlot::new(caregiver, date))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn first_on(&self, date: NaiveDate) -> Option<&AvailabilitySlot> {
        self.on(date).next()
    }

    fn on(&self, date: NaiveDate) -> impl Iterator<Item = &AvailabilitySlot> {
        // Empty caregiver name sorts before every other name on the same date
        self.slots
            .range(AvailabilitySlot::new("", date)..)
            .take_while(move |slot| slot.date == date)
    }
}
