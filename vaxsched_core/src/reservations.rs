//! Append-only record of completed bookings.
//!
//! IDs come from a sequence persisted with the records. If a snapshot has no
//! sequence yet, it starts after the highest recorded ID. Inserts are still
//! checked for uniqueness so a sequence that lags behind the records can
//! never overwrite a booking.

use crate::{Error, Reservation, ReservationId, Result};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReservationLedger {
    #[serde(default)]
    records: BTreeMap<ReservationId, Reservation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    next_id: Option<ReservationId>,
}

impl ReservationLedger {
    /// The ID the sequence will hand out next
    pub fn next_id(&self) -> ReservationId {
        self.next_id.unwrap_or_else(|| {
            self.records
                .keys()
                .next_back()
                .map_or(ReservationId::FIRST, |id| id.next())
        })
    }

    /// Take the next ID and advance the sequence
    pub fn allocate_id(&mut self) -> ReservationId {
        let id = self.next_id();
        self.next_id = Some(id.next());
        id
    }

    /// Insert a reservation. Fails if its ID is already recorded.
    pub fn create(&mut self, record: Reservation) -> Result<()> {
        match self.records.entry(record.id) {
            Entry::Occupied(_) => Err(Error::StorageUnavailable(format!(
                "reservation id {} already exists",
                record.id
            ))),
            Entry::Vacant(slot) => {
                tracing::debug!("Recorded reservation {}", record.id);
                slot.insert(record);
                Ok(())
            }
        }
    }

    /// A patient's reservations in ascending ID order
    pub fn list_for_patient(&self, patient: &str) -> Vec<Reservation> {
        self.records
            .values()
            .filter(|r| r.patient == patient)
            .cloned()
            .collect()
    }

    /// A caregiver's reservations in ascending ID order
    pub fn list_for_caregiver(&self, caregiver: &str) -> Vec<Reservation> {
        self.records
            .values()
            .filter(|r| r.caregiver == caregiver)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: ReservationId) -> Option<&Reservation> {
        self.records.get(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
