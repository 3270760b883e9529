//! CSV export of appointments.

use crate::{Reservation, Result};
use std::path::Path;

/// A row in the CSV output
#[derive(Debug, serde::Serialize)]
struct CsvRow<'a> {
    id: u64,
    vaccine: &'a str,
    date: String,
    patient: &'a str,
    caregiver: &'a str,
    booked_at: String,
}

impl<'a> From<&'a Reservation> for CsvRow<'a> {
    fn from(reservation: &'a Reservation) -> Self {
        CsvRow {
            id: reservation.id.0,
            vaccine: &reservation.vaccine,
            date: reservation.date.format("%Y-%m-%d").to_string(),
            patient: &reservation.patient,
            caregiver: &reservation.caregiver,
            booked_at: reservation.booked_at.to_rfc3339(),
        }
    }
}

/// Write `reservations` to `path` as CSV with a header row.
///
/// The file is replaced, not appended to. Returns the number of rows written.
pub fn export_appointments(reservations: &[Reservation], path: &Path) -> Result<usize> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_path(path)?;

    if reservations.is_empty() {
        // serde-driven headers are only emitted with the first record
        writer.write_record(["id", "vaccine", "date", "patient", "caregiver", "booked_at"])?;
    }
    for reservation in reservations {
        writer.serialize(CsvRow::from(reservation))?;
    }
    writer.flush()?;

    tracing::info!("Exported {} appointments to {:?}", reservations.len(), path);
    Ok(reservations.len())
}
