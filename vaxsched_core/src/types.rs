//! Core domain types for the vaccine scheduler.
//!
//! This module defines the records held by the ledgers and the values
//! handed back to callers:
//! - Availability slots and vaccine stock
//! - Reservations and their identifiers
//! - Booking outcomes and schedule views

use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Ledger Records
// ============================================================================

/// A caregiver's declared availability on a specific date.
///
/// Ordered by date first, then caregiver username, so all slots of one date
/// are contiguous and ascend lexicographically by caregiver.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AvailabilitySlot {
    pub date: NaiveDate,
    pub caregiver: String,
}

impl AvailabilitySlot {
    pub fn new(caregiver: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            date,
            caregiver: caregiver.into(),
        }
    }
}

/// Available doses of one vaccine
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VaccineStock {
    pub name: String,
    pub doses: u32,
}

/// Reservation identifier, assigned from a monotonically increasing sequence
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ReservationId(pub u64);

impl ReservationId {
    pub const FIRST: ReservationId = ReservationId(1);

    pub fn next(self) -> ReservationId {
        ReservationId(self.0 + 1)
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A completed booking. Immutable once recorded.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reservation {
    pub id: ReservationId,
    pub vaccine: String,
    pub patient: String,
    pub caregiver: String,
    pub date: NaiveDate,
    pub booked_at: DateTime<Utc>,
}

// ============================================================================
// Caller-facing Results
// ============================================================================

/// A committed booking as reported to the caller
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Booking {
    pub reservation_id: ReservationId,
    pub caregiver: String,
}

/// Business-rule reasons a booking did not go through
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    NoCaregiverAvailable,
    InsufficientStock { available: u32 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NoCaregiverAvailable => write!(f, "No caregiver is available"),
            Rejection::InsufficientStock { .. } => write!(f, "Not enough available doses"),
        }
    }
}

/// Result of a booking attempt that did not hit an infrastructure fault
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BookingOutcome {
    Committed(Booking),
    Rejected(Rejection),
}

impl BookingOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, BookingOutcome::Committed(_))
    }
}

/// Caregivers and stock visible for one date
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduleView {
    pub date: NaiveDate,
    pub caregivers: Vec<String>,
    pub stock: Vec<VaccineStock>,
}

// ============================================================================
// Parsing
// ============================================================================

/// Parse a date given as `YYYY-MM-DD` or `MM-DD-YYYY`
pub fn parse_date(input: &str) -> Result<NaiveDate> {
    let trimmed = input.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%m-%d-%Y"))
        .map_err(|_| Error::InvalidDate(format!("{trimmed} (expected YYYY-MM-DD or MM-DD-YYYY)")))
}
