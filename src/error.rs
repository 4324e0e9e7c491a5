//! Application error type.
//!
//! Domain modules keep their own error enums ([`RelayError`],
//! [`InstrumentError`], [`SweepError`](crate::sweep::SweepError),
//! [`StorageError`]). `DaqError` gathers the ones that can end a run
//! before or around orchestration:
//!
//! - **`Config`**: the figment layer could not build a [`BenchConfig`](crate::config::BenchConfig)
//! - **`Configuration`**: values parsed but failed validation
//! - **`DeviceList`**: the device YAML did not parse
//! - **`Io`**: a file could not be read or created
//! - **`BenchOpen`**: an instrument or the relay bus could not be opened
//! - **`Relay`**: a relay transaction gave up
//!
//! Per-device failures never become a `DaqError`; they are recorded in the
//! [`RunSummary`](crate::procedures::RunSummary).

use crate::instrument::InstrumentError;
use crate::relay::{RelayError, TransportError};
use crate::storage::StorageError;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Application-level error.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Provider stack failed to extract
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Extracted but invalid values
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Device YAML did not parse
    #[error("Device list error: {0}")]
    DeviceList(#[from] serde_yaml::Error),

    /// File system failure outside a sink
    #[error("I/O error while {context}: {source}")]
    Io {
        /// What was being done
        context: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Instrument or relay bus could not be opened
    #[error("Failed to open {what}: {reason}")]
    BenchOpen {
        /// Instrument id or "relay bus"
        what: String,
        /// Cause
        reason: String,
    },

    /// Relay transaction gave up
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    /// Sink could not be opened or created
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Requested backend compiled out
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Config(Box::new(err))
    }
}

impl DaqError {
    /// Bench-open failure for an instrument.
    pub fn instrument_open(what: &str, err: InstrumentError) -> Self {
        DaqError::BenchOpen {
            what: what.to_string(),
            reason: err.to_string(),
        }
    }

    /// Bench-open failure for the relay bus.
    pub fn relay_open(err: TransportError) -> Self {
        DaqError::BenchOpen {
            what: "relay bus".to_string(),
            reason: err.to_string(),
        }
    }
}
