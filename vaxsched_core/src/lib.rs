#![forbid(unsafe_code)]

//! Core domain model and booking logic for the vaccine scheduler.
//!
//! This crate provides:
//! - Domain types (slots, stock, reservations, roles)
//! - Credential derivation and verification
//! - Transactional persistence (file-backed and in-memory stores)
//! - The inventory, availability and reservation ledgers
//! - The booking orchestrator that ties them into one atomic unit

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod identity;
pub mod store;
pub mod inventory;
pub mod calendar;
pub mod reservations;
pub mod booking;
pub mod export;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
pub use identity::{Credential, Role};
pub use store::{FileStore, MemoryStore, Store, Tables};
pub use booking::Scheduler;
pub use export::export_appointments;
