//! Error types for the vaxsched_core library.

use crate::identity::Role;
use chrono::NaiveDate;
use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for vaxsched_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Not enough doses of a vaccine to satisfy the request
    #[error("Not enough available doses of {vaccine}: requested {requested}, available {available}")]
    InsufficientStock {
        vaccine: String,
        requested: u32,
        available: u32,
    },

    /// Caregiver already published availability for this date
    #[error("{caregiver} is already available on {date}")]
    DuplicateSlot { caregiver: String, date: NaiveDate },

    /// Username is taken
    #[error("Username {0} is taken")]
    DuplicateUsername(String),

    /// Username/password pair did not verify
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// Password rejected at registration
    #[error("Password rejected: {0}")]
    WeakPassword(String),

    /// Operation needs an account of a different role
    #[error("Please login as a {0} first")]
    RoleRequired(Role),

    /// Date argument could not be parsed
    #[error("Invalid date: {0}")]
    InvalidDate(String),

    /// Argument outside the accepted range
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Transient persistence failure; no partial mutation is visible
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl Error {
    /// Whether the caller may retry the same operation unchanged
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::StorageUnavailable(_))
    }
}
