//! Instrument sessions and SCPI helpers.
//!
//! Every bench instrument (scope, function generator, SMU, DMM, electronic
//! load) is driven through the narrow [`Instrument`] capability: send a
//! command, or send a query and read one line back. Transports:
//!
//! - [`tcp::TcpInstrument`]: raw SCPI socket (`TCPIP0::<host>::<port>::SOCKET`)
//! - `visa::VisaInstrument`: VISA session (feature `instrument_visa`)
//! - [`mock::MockInstrument`]: scripted responses for tests and `--simulate`
//!
//! Command strings are plain SCPI; this module does not interpret them.

pub mod mock;
pub mod scope;
pub mod tcp;
#[cfg(feature = "instrument_visa")]
pub mod visa;

pub use mock::MockInstrument;
pub use tcp::TcpInstrument;

use std::time::Duration;
use thiserror::Error;

/// Failure talking to an instrument.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InstrumentError {
    /// Session could not be opened
    #[error("failed to open '{resource}': {reason}")]
    Open {
        /// Resource string
        resource: String,
        /// Cause
        reason: String,
    },

    /// Link-level failure during write or query
    #[error("transport error on {instrument}: {reason}")]
    Transport {
        /// Instrument id
        instrument: String,
        /// Cause
        reason: String,
    },

    /// No reply within the session timeout
    #[error("timeout waiting for {instrument} to answer '{command}'")]
    Timeout {
        /// Instrument id
        instrument: String,
        /// Query that timed out
        command: String,
    },

    /// Reply could not be parsed
    #[error("unexpected response to '{command}': '{response}'")]
    Parse {
        /// Query sent
        command: String,
        /// Raw reply
        response: String,
    },

    /// Resource string scheme is not supported by this build
    #[error("unsupported resource '{0}' (enable the matching transport feature)")]
    Unsupported(String),

    /// Session already closed
    #[error("instrument {0} is closed")]
    Closed(String),
}

/// A message-based instrument session.
pub trait Instrument {
    /// Short identifier used in logs (e.g., "smu").
    fn id(&self) -> &str;

    /// Send a command; no response is read.
    fn write(&mut self, command: &str) -> Result<(), InstrumentError>;

    /// Send a query and return the trimmed response line.
    fn query(&mut self, command: &str) -> Result<String, InstrumentError>;

    /// Release the session. Idempotent.
    fn close(&mut self) -> Result<(), InstrumentError> {
        Ok(())
    }
}

impl<I: Instrument + ?Sized> Instrument for Box<I> {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn write(&mut self, command: &str) -> Result<(), InstrumentError> {
        (**self).write(command)
    }

    fn query(&mut self, command: &str) -> Result<String, InstrumentError> {
        (**self).query(command)
    }

    fn close(&mut self) -> Result<(), InstrumentError> {
        (**self).close()
    }
}

/// Open a session for `resource`, picking the transport from its scheme.
///
/// `TCPIP<n>::<host>::<port>::SOCKET` uses a raw socket; every other VISA
/// resource string requires the `instrument_visa` feature.
pub fn open(id: &str, resource: &str, timeout: Duration) -> Result<Box<dyn Instrument>, InstrumentError> {
    if let Some((host, port)) = tcp::parse_socket_resource(resource) {
        return Ok(Box::new(TcpInstrument::connect(id, &host, port, timeout)?));
    }

    #[cfg(feature = "instrument_visa")]
    {
        Ok(Box::new(visa::VisaInstrument::open(id, resource, timeout)?))
    }

    #[cfg(not(feature = "instrument_visa"))]
    {
        Err(InstrumentError::Unsupported(resource.to_string()))
    }
}

/// Reset to a known state and clear the status registers, then log `*IDN?`.
pub fn reset_and_identify(instrument: &mut dyn Instrument) -> Result<String, InstrumentError> {
    instrument.write("*rst")?;
    instrument.write("*cls")?;
    let idn = instrument.query("*IDN?")?;
    tracing::info!(instrument = instrument.id(), "Initialized: {}", idn.trim());
    Ok(idn)
}

// =============================================================================
// Response parsing
// =============================================================================

/// Parse a single numeric SCPI reply.
pub fn parse_f64_response(command: &str, response: &str) -> Result<f64, InstrumentError> {
    response
        .trim()
        .parse::<f64>()
        .map_err(|_| InstrumentError::Parse {
            command: command.to_string(),
            response: response.to_string(),
        })
}

/// Parse a comma-separated numeric array reply (e.g., `:fetc:arr:volt?`).
///
/// An empty reply is an empty array.
pub fn parse_f64_list(command: &str, response: &str) -> Result<Vec<f64>, InstrumentError> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    trimmed
        .split(',')
        .map(|field| parse_f64_response(command, field))
        .collect()
}
