//! SCPI over a raw TCP socket.
//!
//! LAN-capable bench instruments expose SCPI on a plain socket (port 5025 on
//! most Keysight and Tektronix models). Commands are newline-terminated and
//! every query answers with exactly one line.

use super::{Instrument, InstrumentError};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::debug;

/// Default SCPI socket port.
pub const DEFAULT_PORT: u16 = 5025;

/// Parse `TCPIP0::<host>::<port>::SOCKET` into `(host, port)`.
pub fn parse_socket_resource(resource: &str) -> Option<(String, u16)> {
    let parts: Vec<&str> = resource.split("::").collect();
    match parts.as_slice() {
        [board, host, port, kind]
            if board.to_ascii_uppercase().starts_with("TCPIP")
                && kind.eq_ignore_ascii_case("SOCKET") =>
        {
            Some((host.to_string(), port.parse().ok()?))
        }
        _ => None,
    }
}

/// Blocking SCPI socket session.
pub struct TcpInstrument {
    id: String,
    reader: Option<BufReader<TcpStream>>,
}

impl TcpInstrument {
    /// Connect with `timeout` applied to connect, read and write.
    pub fn connect(id: &str, host: &str, port: u16, timeout: Duration) -> Result<Self, InstrumentError> {
        let open_err = |reason: String| InstrumentError::Open {
            resource: format!("{}:{}", host, port),
            reason,
        };

        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| open_err(e.to_string()))?
            .next()
            .ok_or_else(|| open_err("address did not resolve".to_string()))?;

        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|e| open_err(e.to_string()))?;
        stream
            .set_read_timeout(Some(timeout))
            .and_then(|_| stream.set_write_timeout(Some(timeout)))
            .and_then(|_| stream.set_nodelay(true))
            .map_err(|e| open_err(e.to_string()))?;

        tracing::info!(instrument = id, "Connected to {}:{}", host, port);

        Ok(Self {
            id: id.to_string(),
            reader: Some(BufReader::new(stream)),
        })
    }

    fn reader(&mut self) -> Result<&mut BufReader<TcpStream>, InstrumentError> {
        let id = &self.id;
        self.reader
            .as_mut()
            .ok_or_else(|| InstrumentError::Closed(id.clone()))
    }

    fn transport_error(&self, err: std::io::Error) -> InstrumentError {
        InstrumentError::Transport {
            instrument: self.id.clone(),
            reason: err.to_string(),
        }
    }
}

impl Instrument for TcpInstrument {
    fn id(&self) -> &str {
        &self.id
    }

    fn write(&mut self, command: &str) -> Result<(), InstrumentError> {
        debug!(instrument = %self.id, "SCPI write: {:?}", command.trim());
        let line = format!("{}\n", command.trim_end());
        let result = self.reader()?.get_mut().write_all(line.as_bytes());
        result.map_err(|e| self.transport_error(e))
    }

    fn query(&mut self, command: &str) -> Result<String, InstrumentError> {
        self.write(command)?;

        let mut response = String::new();
        let result = self.reader()?.read_line(&mut response);
        match result {
            Ok(0) => Err(InstrumentError::Transport {
                instrument: self.id.clone(),
                reason: "connection closed by instrument".to_string(),
            }),
            Ok(_) => {
                let trimmed = response.trim().to_string();
                debug!(instrument = %self.id, "SCPI response: {:?}", trimmed);
                Ok(trimmed)
            }
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                Err(InstrumentError::Timeout {
                    instrument: self.id.clone(),
                    command: command.to_string(),
                })
            }
            Err(e) => Err(self.transport_error(e)),
        }
    }

    fn close(&mut self) -> Result<(), InstrumentError> {
        if let Some(reader) = self.reader.take() {
            let _ = reader.get_ref().shutdown(std::net::Shutdown::Both);
            tracing::info!(instrument = %self.id, "Session closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_parse_socket_resource() {
        assert_eq!(
            parse_socket_resource("TCPIP0::192.168.1.20::5025::SOCKET"),
            Some(("192.168.1.20".to_string(), 5025))
        );
        assert_eq!(parse_socket_resource("TCPIP0::192.168.1.20::inst0::INSTR"), None);
        assert_eq!(parse_socket_resource("USB0::0x0957::0x2807::MY62003209::0::INSTR"), None);
    }

    #[test]
    fn test_query_round_trip_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            assert_eq!(line, "*IDN?\n");
            reader
                .get_mut()
                .write_all(b"Keysight Technologies,33500B,MY62003209,5.0\n")
                .unwrap();
        });

        let mut gen = TcpInstrument::connect("func_gen", "127.0.0.1", port, Duration::from_secs(2)).unwrap();
        let idn = gen.query("*IDN?").unwrap();
        assert!(idn.starts_with("Keysight"));
        gen.close().unwrap();
        assert!(matches!(gen.write("*rst"), Err(InstrumentError::Closed(_))));

        server.join().unwrap();
    }
}
