//! Booking orchestration.
//!
//! A booking runs as one store transaction:
//!
//! 1. **SelectingCaregiver** - take the smallest caregiver open on the date
//! 2. **ReservingDose** - take one dose of the vaccine
//! 3. **PersistingReservation** - record the reservation under a fresh ID
//! 4. **Committed** - report the reservation ID and caregiver
//!
//! Any step may fail. Effects of earlier steps are reversed before the
//! attempt returns, so a failed booking never leaves a consumed slot or a
//! missing dose behind.

use crate::identity::Role;
use crate::{
    Booking, BookingOutcome, Config, Credential, Error, Rejection, Reservation, ReservationId,
    Result, ScheduleView, Store, Tables,
};
use chrono::{NaiveDate, Utc};
use uuid::Uuid;

/// Why a booking attempt ended without committing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FailureReason {
    NoCaregiverAvailable,
    InsufficientStock,
    StorageUnavailable,
}

impl FailureReason {
    /// Stock shortfalls are business rejections; anything else is a store fault
    fn from_error(error: &Error) -> Self {
        match error {
            Error::InsufficientStock { .. } => FailureReason::InsufficientStock,
            _ => FailureReason::StorageUnavailable,
        }
    }
}

/// Position of a booking attempt in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BookingState {
    SelectingCaregiver,
    ReservingDose,
    PersistingReservation,
    Committed,
    Failed(FailureReason),
}

/// One booking attempt working on a transaction's tables
struct BookingAttempt<'a> {
    tables: &'a mut Tables,
    patient: &'a str,
    date: NaiveDate,
    vaccine: &'a str,
    max_id_retries: u32,
    state: BookingState,
}

impl<'a> BookingAttempt<'a> {
    fn transition(&mut self, next: BookingState) {
        tracing::debug!("{:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn run(&mut self) -> Result<BookingOutcome> {
        let Some(caregiver) = self.tables.calendar.select_and_consume(self.date) else {
            self.transition(BookingState::Failed(FailureReason::NoCaregiverAvailable));
            return Ok(BookingOutcome::Rejected(Rejection::NoCaregiverAvailable));
        };

        self.transition(BookingState::ReservingDose);
        if let Err(e) = self.tables.inventory.decrement(self.vaccine, 1) {
            self.restore_slot(&caregiver);
            self.transition(BookingState::Failed(FailureReason::from_error(&e)));
            return match e {
                Error::InsufficientStock { available, .. } => {
                    Ok(BookingOutcome::Rejected(Rejection::InsufficientStock { available }))
                }
                other => Err(other),
            };
        }

        self.transition(BookingState::PersistingReservation);
        let reservation_id = match self.persist_reservation(&caregiver) {
            Ok(id) => id,
            Err(e) => {
                self.restore_dose();
                self.restore_slot(&caregiver);
                self.transition(BookingState::Failed(FailureReason::StorageUnavailable));
                return Err(e);
            }
        };

        self.transition(BookingState::Committed);
        Ok(BookingOutcome::Committed(Booking {
            reservation_id,
            caregiver,
        }))
    }

    /// Insert under the next sequence ID, moving past IDs already taken
    fn persist_reservation(&mut self, caregiver: &str) -> Result<ReservationId> {
        let mut attempts = 0;
        loop {
            let id = self.tables.reservations.allocate_id();
            let record = Reservation {
                id,
                vaccine: self.vaccine.to_string(),
                patient: self.patient.to_string(),
                caregiver: caregiver.to_string(),
                date: self.date,
                booked_at: Utc::now(),
            };
            match self.tables.reservations.create(record) {
                Ok(()) => return Ok(id),
                Err(e) if attempts >= self.max_id_retries => {
                    tracing::error!("Giving up on reservation IDs after {} retries", attempts);
                    return Err(e);
                }
                Err(_) => {
                    attempts += 1;
                    tracing::warn!("Reservation id {} already taken, retrying", id);
                }
            }
        }
    }

    fn restore_slot(&mut self, caregiver: &str) {
        if let Err(e) = self.tables.calendar.publish(caregiver, self.date) {
            tracing::error!("Failed to restore slot {} on {}: {}", caregiver, self.date, e);
        }
    }

    fn restore_dose(&mut self) {
        if let Err(e) = self.tables.inventory.increment(self.vaccine, 1) {
            tracing::error!("Failed to restore dose of {}: {}", self.vaccine, e);
        }
    }
}

/// Caller-facing scheduler operations over a store
pub struct Scheduler<S: Store> {
    store: S,
    config: Config,
}

impl<S: Store> Scheduler<S> {
    pub fn new(store: S, config: Config) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Create an account
    pub fn register(&self, role: Role, username: &str, password: &str) -> Result<Credential> {
        let security = &self.config.security;
        self.store
            .transact(|tables| tables.accounts.register(role, username, password, security))
    }

    /// Verify credentials
    pub fn login(&self, username: &str, password: &str) -> Result<Credential> {
        self.store
            .read(|tables| tables.accounts.authenticate(username, password))
    }

    /// Book one dose of `vaccine` with the first available caregiver on `date`.
    ///
    /// Business rejections come back as `Ok(BookingOutcome::Rejected)` with
    /// the store unchanged. `Err` means an infrastructure fault; nothing was
    /// committed.
    pub fn reserve(
        &self,
        patient: &Credential,
        date: NaiveDate,
        vaccine: &str,
    ) -> Result<BookingOutcome> {
        patient.require(Role::Patient)?;

        let attempt_id = Uuid::new_v4();
        let span = tracing::info_span!("reserve", attempt = %attempt_id);
        let _entered = span.enter();
        tracing::debug!(
            "Booking {} for {} on {}",
            vaccine,
            patient.username(),
            date
        );

        let max_id_retries = self.config.booking.max_id_retries;
        let result = self.store.transact(|tables| {
            match tables.accounts.get(patient.username()) {
                Some(stored) if stored.role() == Role::Patient => {}
                _ => {
                    tracing::warn!("No stored patient account for {}", patient.username());
                    return Err(Error::InvalidCredentials);
                }
            }
            BookingAttempt {
                tables,
                patient: patient.username(),
                date,
                vaccine,
                max_id_retries,
                state: BookingState::SelectingCaregiver,
            }
            .run()
        });

        match &result {
            Ok(BookingOutcome::Committed(booking)) => tracing::info!(
                "Reserved appointment {} with {} on {}",
                booking.reservation_id,
                booking.caregiver,
                date
            ),
            Ok(BookingOutcome::Rejected(reason)) => {
                tracing::info!("Booking on {} rejected: {}", date, reason)
            }
            Err(e) => tracing::warn!("Booking on {} failed: {}", date, e),
        }
        result
    }

    /// Publish a caregiver's availability on `date`
    pub fn publish_availability(&self, caregiver: &Credential, date: NaiveDate) -> Result<()> {
        caregiver.require(Role::Caregiver)?;
        self.store
            .transact(|tables| tables.calendar.publish(caregiver.username(), date))?;
        tracing::info!("{} is available on {}", caregiver.username(), date);
        Ok(())
    }

    /// Restock `doses` of `vaccine`. Returns the new count.
    pub fn add_doses(&self, caregiver: &Credential, vaccine: &str, doses: u32) -> Result<u32> {
        caregiver.require(Role::Caregiver)?;
        if doses == 0 {
            return Err(Error::InvalidInput("number of doses must be positive".into()));
        }
        let total = self
            .store
            .transact(|tables| tables.inventory.increment(vaccine, doses))?;
        tracing::info!("Added {} doses of {} ({} available)", doses, vaccine, total);
        Ok(total)
    }

    /// Caregivers open on `date` and current stock
    pub fn search_schedule(&self, date: NaiveDate) -> Result<ScheduleView> {
        self.store.read(|tables| {
            Ok(ScheduleView {
                date,
                caregivers: tables.calendar.available_on(date),
                stock: tables.inventory.all(),
            })
        })
    }

    /// A patient's reservations in ascending ID order; empty if none
    pub fn list_for_patient(&self, patient: &str) -> Result<Vec<Reservation>> {
        self.store
            .read(|tables| Ok(tables.reservations.list_for_patient(patient)))
    }

    /// The signed-in user's appointments, as patient or as caregiver
    pub fn list_appointments(&self, user: &Credential) -> Result<Vec<Reservation>> {
        match user.role() {
            Role::Patient => self.list_for_patient(user.username()),
            Role::Caregiver => self
                .store
                .read(|tables| Ok(tables.reservations.list_for_caregiver(user.username()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FileStore, MemoryStore};
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.security.hash_iterations = 1;
        config
    }

    fn may1() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    /// Caregivers alice and bob open on 2024-05-01, `doses` of V1 in stock
    fn seeded<S: Store>(store: S, doses: u32) -> Scheduler<S> {
        crate::logging::init_test();
        let scheduler = Scheduler::new(store, fast_config());
        for name in ["alice", "bob"] {
            let caregiver = scheduler
                .register(Role::Caregiver, name, "caregiver-pass")
                .unwrap();
            scheduler.publish_availability(&caregiver, may1()).unwrap();
        }
        if doses > 0 {
            let alice = scheduler.login("alice", "caregiver-pass").unwrap();
            scheduler.add_doses(&alice, "V1", doses).unwrap();
        }
        scheduler
    }

    fn patient<S: Store>(scheduler: &Scheduler<S>, name: &str) -> Credential {
        scheduler
            .register(Role::Patient, name, "patient-pass")
            .unwrap()
    }

    fn committed(outcome: BookingOutcome) -> Booking {
        match outcome {
            BookingOutcome::Committed(booking) => booking,
            other => panic!("expected a committed booking, got {:?}", other),
        }
    }

    #[test]
    fn test_two_caregivers_booked_in_order_then_exhausted() {
        let scheduler = seeded(MemoryStore::new(), 5);
        let x = patient(&scheduler, "patientX");
        let y = patient(&scheduler, "patientY");
        let z = patient(&scheduler, "patientZ");

        let first = committed(scheduler.reserve(&x, may1(), "V1").unwrap());
        assert_eq!(first.reservation_id, ReservationId(1));
        assert_eq!(first.caregiver, "alice");

        let second = committed(scheduler.reserve(&y, may1(), "V1").unwrap());
        assert_eq!(second.reservation_id, ReservationId(2));
        assert_eq!(second.caregiver, "bob");

        let third = scheduler.reserve(&z, may1(), "V1").unwrap();
        assert_eq!(
            third,
            BookingOutcome::Rejected(Rejection::NoCaregiverAvailable)
        );

        let tables = scheduler.store().snapshot();
        assert_eq!(tables.inventory.doses("V1"), 3);
        assert!(tables.calendar.is_empty());
        assert_eq!(tables.reservations.len(), 2);
    }

    #[test]
    fn test_success_applies_all_three_effects() {
        let scheduler = seeded(MemoryStore::new(), 5);
        let x = patient(&scheduler, "patientX");

        let booking = committed(scheduler.reserve(&x, may1(), "V1").unwrap());

        let tables = scheduler.store().snapshot();
        assert_eq!(tables.inventory.doses("V1"), 4);
        assert!(!tables.calendar.contains(&booking.caregiver, may1()));
        let record = tables.reservations.get(booking.reservation_id).unwrap();
        assert_eq!(record.patient, "patientX");
        assert_eq!(record.caregiver, "alice");
        assert_eq!(record.vaccine, "V1");
        assert_eq!(record.date, may1());
    }

    #[test]
    fn test_zero_doses_rejected_and_slot_restored() {
        let scheduler = seeded(MemoryStore::new(), 0);
        let x = patient(&scheduler, "patientX");
        let before = scheduler.store().snapshot();

        let outcome = scheduler.reserve(&x, may1(), "V1").unwrap();
        assert_eq!(
            outcome,
            BookingOutcome::Rejected(Rejection::InsufficientStock { available: 0 })
        );

        let after = scheduler.store().snapshot();
        assert_eq!(after.calendar, before.calendar);
        assert!(after.calendar.contains("alice", may1()));
        assert_eq!(after.inventory, before.inventory);
        assert!(after.reservations.is_empty());
    }

    #[test]
    fn test_no_caregiver_leaves_stock_untouched() {
        let scheduler = seeded(MemoryStore::new(), 5);
        let x = patient(&scheduler, "patientX");
        let june = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

        let outcome = scheduler.reserve(&x, june, "V1").unwrap();
        assert_eq!(outcome, BookingOutcome::Rejected(Rejection::NoCaregiverAvailable));
        assert_eq!(scheduler.store().snapshot().inventory.doses("V1"), 5);
    }

    #[test]
    fn test_unregistered_credential_cannot_reserve() {
        let scheduler = seeded(MemoryStore::new(), 5);
        let ghost = Credential::register(
            Role::Patient,
            "ghost",
            "patient-pass",
            &scheduler.config().security,
        )
        .unwrap();
        let before = scheduler.store().snapshot();

        let err = scheduler.reserve(&ghost, may1(), "V1").unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials));

        let after = scheduler.store().snapshot();
        assert_eq!(after.calendar, before.calendar);
        assert_eq!(after.inventory, before.inventory);
        assert!(after.reservations.is_empty());
    }

    #[test]
    fn test_failure_reason_tracks_error_kind() {
        let short = Error::InsufficientStock {
            vaccine: "V1".into(),
            requested: 1,
            available: 0,
        };
        assert_eq!(
            FailureReason::from_error(&short),
            FailureReason::InsufficientStock
        );
        assert_eq!(
            FailureReason::from_error(&Error::StorageUnavailable("disk full".into())),
            FailureReason::StorageUnavailable
        );
    }

    #[test]
    fn test_insufficient_stock_attempt_state() {
        let mut tables = Tables::default();
        tables.calendar.publish("alice", may1()).unwrap();

        let mut attempt = BookingAttempt {
            tables: &mut tables,
            patient: "patientX",
            date: may1(),
            vaccine: "V1",
            max_id_retries: 1,
            state: BookingState::SelectingCaregiver,
        };
        let outcome = attempt.run().unwrap();
        assert_eq!(
            outcome,
            BookingOutcome::Rejected(Rejection::InsufficientStock { available: 0 })
        );
        assert_eq!(
            attempt.state,
            BookingState::Failed(FailureReason::InsufficientStock)
        );
        assert!(tables.calendar.contains("alice", may1()));
    }

    #[test]
    fn test_commit_failure_leaves_no_partial_effects() {
        let scheduler = seeded(MemoryStore::new(), 5);
        let x = patient(&scheduler, "patientX");
        let before = scheduler.store().snapshot();

        scheduler.store().fail_next_commits(1);
        let err = scheduler.reserve(&x, may1(), "V1").unwrap_err();
        assert!(err.is_transient());

        let after = scheduler.store().snapshot();
        assert_eq!(after.inventory, before.inventory);
        assert_eq!(after.calendar, before.calendar);
        assert_eq!(after.reservations, before.reservations);

        // Retrying once storage recovers succeeds with the first ID
        let booking = committed(scheduler.reserve(&x, may1(), "V1").unwrap());
        assert_eq!(booking.reservation_id, ReservationId(1));
    }

    fn tables_with_lagging_sequence(taken_ids: u64) -> Tables {
        let records: serde_json::Map<String, serde_json::Value> = (1..=taken_ids)
            .map(|id| {
                (
                    id.to_string(),
                    serde_json::json!({
                        "id": id,
                        "vaccine": "V1",
                        "patient": "earlier",
                        "caregiver": "carol",
                        "date": "2024-04-01",
                        "booked_at": "2024-03-01T00:00:00Z"
                    }),
                )
            })
            .collect();
        serde_json::from_value(serde_json::json!({
            "reservations": { "records": records, "next_id": 1 }
        }))
        .unwrap()
    }

    #[test]
    fn test_taken_ids_are_skipped() {
        let scheduler = seeded(MemoryStore::with_tables(tables_with_lagging_sequence(2)), 5);
        let x = patient(&scheduler, "patientX");

        let booking = committed(scheduler.reserve(&x, may1(), "V1").unwrap());
        assert_eq!(booking.reservation_id, ReservationId(3));
        assert_eq!(scheduler.store().snapshot().reservations.len(), 3);
    }

    #[test]
    fn test_exhausted_id_retries_compensate() {
        let scheduler = seeded(MemoryStore::with_tables(tables_with_lagging_sequence(10)), 5);
        let x = patient(&scheduler, "patientX");
        let before = scheduler.store().snapshot();

        let err = scheduler.reserve(&x, may1(), "V1").unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)));

        let after = scheduler.store().snapshot();
        assert_eq!(after.inventory.doses("V1"), 5);
        assert_eq!(after.calendar, before.calendar);
        assert_eq!(after.reservations.len(), 10);
    }

    #[test]
    fn test_attempt_compensates_inside_transaction() {
        let mut tables = tables_with_lagging_sequence(10);
        tables.calendar.publish("alice", may1()).unwrap();
        tables.inventory.increment("V1", 2).unwrap();

        let mut attempt = BookingAttempt {
            tables: &mut tables,
            patient: "patientX",
            date: may1(),
            vaccine: "V1",
            max_id_retries: 1,
            state: BookingState::SelectingCaregiver,
        };
        assert!(attempt.run().is_err());
        assert_eq!(
            attempt.state,
            BookingState::Failed(FailureReason::StorageUnavailable)
        );
        assert!(tables.calendar.contains("alice", may1()));
        assert_eq!(tables.inventory.doses("V1"), 2);
    }

    #[test]
    fn test_caregiver_cannot_reserve() {
        let scheduler = seeded(MemoryStore::new(), 5);
        let alice = scheduler.login("alice", "caregiver-pass").unwrap();
        assert!(matches!(
            scheduler.reserve(&alice, may1(), "V1"),
            Err(Error::RoleRequired(Role::Patient))
        ));
    }

    #[test]
    fn test_patient_cannot_publish_or_restock() {
        let scheduler = seeded(MemoryStore::new(), 5);
        let x = patient(&scheduler, "patientX");
        assert!(matches!(
            scheduler.publish_availability(&x, may1()),
            Err(Error::RoleRequired(Role::Caregiver))
        ));
        assert!(matches!(
            scheduler.add_doses(&x, "V1", 1),
            Err(Error::RoleRequired(Role::Caregiver))
        ));
    }

    #[test]
    fn test_duplicate_availability_rejected() {
        let scheduler = seeded(MemoryStore::new(), 0);
        let alice = scheduler.login("alice", "caregiver-pass").unwrap();
        assert!(matches!(
            scheduler.publish_availability(&alice, may1()),
            Err(Error::DuplicateSlot { .. })
        ));
    }

    #[test]
    fn test_search_and_listing() {
        let scheduler = seeded(MemoryStore::new(), 5);
        let x = patient(&scheduler, "patientX");
        assert!(scheduler.list_for_patient("patientX").unwrap().is_empty());

        let view = scheduler.search_schedule(may1()).unwrap();
        assert_eq!(view.caregivers, vec!["alice", "bob"]);
        assert_eq!(view.stock[0].doses, 5);

        scheduler.reserve(&x, may1(), "V1").unwrap();
        scheduler.reserve(&x, may1(), "V1").unwrap();

        let ids: Vec<_> = scheduler
            .list_appointments(&x)
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![ReservationId(1), ReservationId(2)]);

        let bob = scheduler.login("bob", "caregiver-pass").unwrap();
        let bobs = scheduler.list_appointments(&bob).unwrap();
        assert_eq!(bobs.len(), 1);
        assert_eq!(bobs[0].patient, "patientX");
    }

    #[test]
    fn test_concurrent_bookings_single_slot() {
        let scheduler = Scheduler::new(MemoryStore::new(), fast_config());
        let alice = scheduler
            .register(Role::Caregiver, "alice", "caregiver-pass")
            .unwrap();
        scheduler.publish_availability(&alice, may1()).unwrap();
        scheduler.add_doses(&alice, "V1", 5).unwrap();
        let patients: Vec<_> = ["p1", "p2"]
            .iter()
            .map(|name| patient(&scheduler, name))
            .collect();
        let scheduler = Arc::new(scheduler);

        let handles: Vec<_> = patients
            .into_iter()
            .map(|p| {
                let scheduler = Arc::clone(&scheduler);
                thread::spawn(move || scheduler.reserve(&p, may1(), "V1").unwrap())
            })
            .collect();
        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let commits = outcomes.iter().filter(|o| o.is_committed()).count();
        assert_eq!(commits, 1);
        assert!(outcomes
            .contains(&BookingOutcome::Rejected(Rejection::NoCaregiverAvailable)));
        assert_eq!(scheduler.store().snapshot().inventory.doses("V1"), 4);
    }

    fn hammer<S: Store + 'static>(store: S) {
        let scheduler = Arc::new(seeded(store, 10));
        let carol = scheduler
            .register(Role::Caregiver, "carol", "caregiver-pass")
            .unwrap();
        scheduler.publish_availability(&carol, may1()).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let scheduler = Arc::clone(&scheduler);
                thread::spawn(move || {
                    let p = scheduler
                        .register(Role::Patient, &format!("patient{i}"), "patient-pass")
                        .unwrap();
                    scheduler.reserve(&p, may1(), "V1").unwrap()
                })
            })
            .collect();
        let bookings: Vec<_> = handles
            .into_iter()
            .filter_map(|h| match h.join().unwrap() {
                BookingOutcome::Committed(booking) => Some(booking),
                BookingOutcome::Rejected(_) => None,
            })
            .collect();

        assert_eq!(bookings.len(), 3);
        let ids: HashSet<_> = bookings.iter().map(|b| b.reservation_id).collect();
        let caregivers: HashSet<_> = bookings.iter().map(|b| b.caregiver.clone()).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(caregivers.len(), 3);

        let (doses, reservations) = scheduler
            .store()
            .read(|tables| Ok((tables.inventory.doses("V1"), tables.reservations.len())))
            .unwrap();
        assert_eq!(doses, 7);
        assert_eq!(reservations, 3);
    }

    #[test]
    fn test_concurrent_bookings_memory_store() {
        hammer(MemoryStore::new());
    }

    #[test]
    fn test_concurrent_bookings_file_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        hammer(FileStore::open(temp_dir.path()).unwrap());
    }
}
