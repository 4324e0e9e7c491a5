//! Modbus RTU relay channel over a serial port.
//!
//! Frames are built and checked with `rmodbus`; bytes move over a blocking
//! `serialport` handle. Read Coils (0x01) and Write Multiple Coils (0x0F) are
//! the only function codes used.

use super::{RelayChannel, TransportError};
use rmodbus::client::ModbusRequest;
use rmodbus::ModbusProto;
use serde::{Deserialize, Serialize};
use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, info};

/// Serial link parameters for the relay controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModbusSettings {
    /// Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Modbus slave id of the relay controller
    #[serde(default = "default_slave_id")]
    pub slave_id: u8,
    /// Per-frame response timeout
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_slave_id() -> u8 {
    247
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Relay bank reached through a Modbus RTU slave.
pub struct ModbusRelayChannel {
    settings: ModbusSettings,
    port: Option<Box<dyn SerialPort>>,
}

impl ModbusRelayChannel {
    /// Open the serial port. Failure here is fatal to a bench run.
    pub fn open(settings: ModbusSettings) -> Result<Self, TransportError> {
        let port = serialport::new(settings.port.as_str(), settings.baud_rate)
            .timeout(settings.timeout)
            .open()
            .map_err(|e| TransportError::Io(format!("failed to open {}: {}", settings.port, e)))?;

        info!(
            port = %settings.port,
            baud = settings.baud_rate,
            slave = settings.slave_id,
            "Relay controller connected"
        );

        Ok(Self {
            settings,
            port: Some(port),
        })
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::Closed)
    }

    /// Send `frame` and read a response of `expected_len` bytes, or a
    /// 5-byte exception response.
    fn transact(&mut self, frame: &[u8], expected_len: usize) -> Result<Vec<u8>, TransportError> {
        let port = self.port()?;
        port.clear(serialport::ClearBuffer::Input)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        port.write_all(frame).map_err(io_error)?;
        port.flush().map_err(io_error)?;
        debug!("Sent relay frame: {:02X?}", frame);

        let mut response = vec![0u8; 3];
        port.read_exact(&mut response).map_err(io_error)?;

        // Exception responses set the high bit of the function code and are
        // always id + fc + code + crc16.
        let total = if response[1] & 0x80 != 0 { 5 } else { expected_len };
        if total > response.len() {
            let mut rest = vec![0u8; total - response.len()];
            port.read_exact(&mut rest).map_err(io_error)?;
            response.extend_from_slice(&rest);
        }
        debug!("Received relay frame: {:02X?}", response);
        Ok(response)
    }
}

fn io_error(err: std::io::Error) -> TransportError {
    if err.kind() == std::io::ErrorKind::TimedOut {
        TransportError::Timeout
    } else {
        TransportError::Io(err.to_string())
    }
}

fn protocol_error(err: impl std::fmt::Display) -> TransportError {
    TransportError::Protocol(err.to_string())
}

impl RelayChannel for ModbusRelayChannel {
    fn read_coils(&mut self, start: u16, count: u16) -> Result<Vec<bool>, TransportError> {
        let mut request = ModbusRequest::new(self.settings.slave_id, ModbusProto::Rtu);
        let mut frame = Vec::with_capacity(8);
        request
            .generate_get_coils(start, count, &mut frame)
            .map_err(protocol_error)?;

        // id + fc + byte count + packed bits + crc16
        let expected = 5 + (count as usize).div_ceil(8);
        let response = self.transact(&frame, expected)?;

        let mut bits = Vec::with_capacity(count as usize);
        request
            .parse_bool(&response, &mut bits)
            .map_err(protocol_error)?;
        bits.truncate(count as usize);
        Ok(bits)
    }

    fn write_coils(&mut self, start: u16, values: &[bool]) -> Result<(), TransportError> {
        let mut request = ModbusRequest::new(self.settings.slave_id, ModbusProto::Rtu);
        let mut frame = Vec::new();
        request
            .generate_set_coils_bulk(start, values, &mut frame)
            .map_err(protocol_error)?;

        // id + fc + start(2) + quantity(2) + crc16
        let response = self.transact(&frame, 8)?;
        request.parse_ok(&response).map_err(protocol_error)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.port.take().is_some() {
            info!(port = %self.settings.port, "Relay controller disconnected");
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "modbus relay {} @ {} baud (slave {})",
            self.settings.port, self.settings.baud_rate, self.settings.slave_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings: ModbusSettings = toml::from_str(r#"port = "COM3""#).unwrap();
        assert_eq!(settings.baud_rate, 9600);
        assert_eq!(settings.slave_id, 247);
        assert_eq!(settings.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_read_request_frame() {
        let mut request = ModbusRequest::new(247, ModbusProto::Rtu);
        let mut frame = Vec::new();
        request.generate_get_coils(0, 32, &mut frame).unwrap();
        assert_eq!(&frame[..6], &[247, 0x01, 0x00, 0x00, 0x00, 0x20]);
        assert_eq!(frame.len(), 8);
    }

    #[test]
    fn test_open_missing_port_fails() {
        let settings = ModbusSettings {
            port: "/dev/does-not-exist-relay".to_string(),
            baud_rate: 9600,
            slave_id: 247,
            timeout: Duration::from_millis(10),
        };
        assert!(ModbusRelayChannel::open(settings).is_err());
    }
}
