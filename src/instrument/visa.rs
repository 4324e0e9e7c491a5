//! VISA instrument sessions (USB-TMC, GPIB, VXI-11).
//!
//! Requires a system VISA library (Keysight IO Libraries, NI-VISA) and the
//! `instrument_visa` feature. Supports resource strings like:
//! - "USB0::0x0957::0xCE18::MY51143560::0::INSTR"
//! - "GPIB0::5::INSTR"
//! - "TCPIP0::192.168.1.100::inst0::INSTR"

use super::{Instrument, InstrumentError};
use std::ffi::CString;
use std::io::{BufRead, BufReader, Write};
use std::time::Duration;
use visa_rs::prelude::*;

/// One open VISA session.
pub struct VisaInstrument {
    id: String,
    resource: String,
    // Keeps the resource manager alive for the lifetime of the session.
    _rm: DefaultRM,
    session: Option<visa_rs::Instrument>,
}

impl VisaInstrument {
    /// Open `resource`, waiting at most `timeout` for the session lock.
    pub fn open(id: &str, resource: &str, timeout: Duration) -> Result<Self, InstrumentError> {
        let open_err = |reason: String| InstrumentError::Open {
            resource: resource.to_string(),
            reason,
        };

        let rm = DefaultRM::new().map_err(|e| open_err(e.to_string()))?;
        let name = CString::new(resource).map_err(|e| open_err(e.to_string()))?;
        let session = rm
            .open(&name.into(), AccessMode::NO_LOCK, timeout)
            .map_err(|e| open_err(e.to_string()))?;

        Ok(Self {
            id: id.to_string(),
            resource: resource.to_string(),
            _rm: rm,
            session: Some(session),
        })
    }

    fn session(&self) -> Result<&visa_rs::Instrument, InstrumentError> {
        self.session
            .as_ref()
            .ok_or_else(|| InstrumentError::Closed(self.id.clone()))
    }

    fn transport_error(&self, err: std::io::Error) -> InstrumentError {
        InstrumentError::Transport {
            instrument: self.id.clone(),
            reason: format!("{} ({})", err, self.resource),
        }
    }
}

impl Instrument for VisaInstrument {
    fn id(&self) -> &str {
        &self.id
    }

    fn write(&mut self, command: &str) -> Result<(), InstrumentError> {
        tracing::debug!(instrument = %self.id, "VISA write: {:?}", command.trim());
        let line = format!("{}\n", command.trim_end());
        let mut session = self.session()?;
        session
            .write_all(line.as_bytes())
            .map_err(|e| self.transport_error(e))
    }

    fn query(&mut self, command: &str) -> Result<String, InstrumentError> {
        self.write(command)?;

        let mut response = String::new();
        let read = BufReader::new(self.session()?).read_line(&mut response);
        match read {
            Ok(_) => Ok(response.trim().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Err(InstrumentError::Timeout {
                instrument: self.id.clone(),
                command: command.to_string(),
            }),
            Err(e) => Err(self.transport_error(e)),
        }
    }

    fn close(&mut self) -> Result<(), InstrumentError> {
        if self.session.take().is_some() {
            tracing::info!(instrument = %self.id, "VISA session closed");
        }
        Ok(())
    }
}
