//! Error types.
//!
//! `Error` covers the I/O seams (database, config file, export files).
//! `Rejected` covers precondition violations in the tracker: those are
//! logged and reported back to the user, never raised as faults.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid setting '{key}': {message}")]
    InvalidSetting { key: String, message: String },

    #[error("Unsupported export schema version {found} (expected {expected})")]
    UnsupportedSchema { found: u32, expected: u32 },
}

/// A request the tracker refused without changing any state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Rejected {
    #[error("no run is being tracked")]
    NotTracking,

    #[error("the run is still timeable ({0}); abandon is only allowed once it is borderline or lost")]
    StillTimeable(String),

    #[error("the run is untimed and cannot be abandoned; use reset")]
    Untimed,

    #[error("there is no previous run to restore")]
    NothingToRestore,

    #[error("the saved run does not match the current activity")]
    StaleSnapshot,

    #[error("there is nothing to reset")]
    NothingToReset,
}
