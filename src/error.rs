//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it provides one place where every failure an
//! instrument session can hit is named, from configuration mistakes to a
//! serial read that never completes.
//!
//! ## Error Hierarchy
//!
//! `DaqError` groups its variants into three families:
//!
//! - **Configuration**: `Config` wraps errors from the `figment` loader, while
//!   `Configuration`, `FunctionNotSupported`, `DuplicateFunctions`,
//!   `MultiFunctionUnsupported`, `NoMeasurements` and `IntervalOutOfRange`
//!   are semantic problems detected before any byte is written to the
//!   instrument.
//! - **Identity**: `IdentityUnavailable` and `IdentityMismatch` are raised once
//!   when a session connects. The caller must abandon the connection.
//! - **Transport**: `Io` wraps `std::io::Error` from the byte transport and
//!   `NotConnected` covers operations on a session without an open port.
//!
//! Parse failures of individual responses are not errors. They become a
//! `Reading` whose value is `None`.

use crate::instrument::{InstrumentType, MeasurementFunction};
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum DaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("{function} is not available for {instrument}")]
    FunctionNotSupported {
        function: MeasurementFunction,
        instrument: InstrumentType,
    },

    #[error("Duplicate measurement functions requested: {}", join_labels(.0))]
    DuplicateFunctions(Vec<MeasurementFunction>),

    #[error("{0} cannot sample more than one function simultaneously")]
    MultiFunctionUnsupported(InstrumentType),

    #[error("At least one measurement function must be selected")]
    NoMeasurements,

    #[error("Polling interval {0} ms is out of range (200-60000 ms)")]
    IntervalOutOfRange(u64),

    #[error("Unable to read device identity. Check cabling and SCPI mode")]
    IdentityUnavailable,

    #[error(
        "Selected instrument {instrument} does not match connected device \
         (expected ID containing one of: {expected}; received: {received})"
    )]
    IdentityMismatch {
        instrument: InstrumentType,
        expected: String,
        received: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Instrument not connected")]
    NotConnected,

    #[error("Polling is already active")]
    PollingActive,

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Config(Box::new(err))
    }
}

#[cfg(feature = "storage_csv")]
impl From<csv::Error> for DaqError {
    fn from(err: csv::Error) -> Self {
        DaqError::Storage(err.to_string())
    }
}

fn join_labels(functions: &[MeasurementFunction]) -> String {
    functions
        .iter()
        .map(|f| f.label())
        .collect::<Vec<_>>()
        .join(", ")
}
