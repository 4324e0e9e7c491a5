//! Bench configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/bench.toml` (or a path given on the command line)
//! 2. Environment variables prefixed with `BENCH_DAQ_`, nested with `__`
//!    (e.g. `BENCH_DAQ_RELAY__PORT=/dev/ttyUSB1`)
//!
//! Every section has defaults except the instrument resource strings, so a
//! minimal file only lists `[instruments.*]`.
//!
//! # Example
//! ```no_run
//! use bench_daq::config::BenchConfig;
//!
//! let config = BenchConfig::load()?;
//! println!("Relay bus: {}", config.relay.port);
//! # Ok::<(), bench_daq::error::DaqError>(())
//! ```

use crate::error::DaqError;
use crate::retry::RetryPolicy;
use crate::storage::StorageFormat;
use crate::tracing_setup::{parse_log_level, OutputFormat};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/bench.toml";

/// Environment override prefix.
pub const ENV_PREFIX: &str = "BENCH_DAQ_";

/// Top-level bench configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Relay bank bus
    pub relay: RelayConfig,
    /// Instrument sessions
    pub instruments: InstrumentsConfig,
    /// Result output
    pub storage: StorageConfig,
    /// Sweep timing
    pub sweep: SweepConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "bench-daq".to_string(),
            log_level: "info".to_string(),
            log_format: OutputFormat::default(),
        }
    }
}

/// Modbus relay bank settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Serial port
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Modbus slave id
    pub slave_id: u8,
    /// Per-frame timeout in milliseconds
    pub timeout_ms: u64,
    /// Attempts per transaction phase
    pub retries: u32,
    /// Wait between attempts in milliseconds
    pub retry_delay_ms: u64,
    /// Use in-memory relays and scripted instruments
    pub simulate: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            slave_id: 247,
            timeout_ms: 5000,
            retries: crate::retry::DEFAULT_RETRIES,
            retry_delay_ms: 100,
            simulate: false,
        }
    }
}

impl RelayConfig {
    /// Retry policy for relay transactions.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries, Duration::from_millis(self.retry_delay_ms))
    }

    /// Serial settings for the Modbus channel.
    #[cfg(feature = "instrument_serial")]
    pub fn modbus_settings(&self) -> crate::relay::ModbusSettings {
        crate::relay::ModbusSettings {
            port: self.port.clone(),
            baud_rate: self.baud_rate,
            slave_id: self.slave_id,
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

/// One instrument session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// VISA resource string or `TCPIP0::<host>::<port>::SOCKET`
    pub resource: String,
    /// I/O timeout in milliseconds
    #[serde(default = "default_instrument_timeout")]
    pub timeout_ms: u64,
}

fn default_instrument_timeout() -> u64 {
    5000
}

impl InstrumentConfig {
    /// I/O timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// The five bench instruments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentsConfig {
    /// Oscilloscope
    pub scope: InstrumentConfig,
    /// Function generator
    pub func_gen: InstrumentConfig,
    /// Source-measure unit
    pub smu: InstrumentConfig,
    /// Digital multimeter
    pub dmm: InstrumentConfig,
    /// Electronic load
    pub eload: InstrumentConfig,
}

impl InstrumentsConfig {
    /// `(id, config)` pairs in bench-open order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &InstrumentConfig)> {
        [
            ("scope", &self.scope),
            ("func_gen", &self.func_gen),
            ("smu", &self.smu),
            ("dmm", &self.dmm),
            ("eload", &self.eload),
        ]
        .into_iter()
    }
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory that receives `results_<timestamp>` run directories
    pub output_dir: PathBuf,
    /// File format
    pub format: StorageFormat,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            format: StorageFormat::Csv,
        }
    }
}

/// Sweep timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Wait after each impedance frequency step, in milliseconds
    pub settle_ms: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self { settle_ms: 200 }
    }
}

impl BenchConfig {
    /// Load `config/bench.toml` plus environment overrides.
    pub fn load() -> Result<Self, DaqError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path plus environment overrides.
    ///
    /// A missing file is not an error; defaults and environment apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, DaqError> {
        Self::from_figment(Self::figment(path.as_ref()))
    }

    /// Extract and validate from a provider stack, e.g. [`BenchConfig::figment`]
    /// with command-line overrides merged on top.
    pub fn from_figment(figment: Figment) -> Result<Self, DaqError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// The provider stack used by [`BenchConfig::load_from`].
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(BenchConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), DaqError> {
        parse_log_level(&self.application.log_level).map_err(DaqError::Configuration)?;

        if self.relay.retries == 0 {
            return Err(DaqError::Configuration(
                "relay.retries must be at least 1".to_string(),
            ));
        }

        // 0 is broadcast and 248..=255 are reserved in Modbus RTU.
        if !(1..=247).contains(&self.relay.slave_id) {
            return Err(DaqError::Configuration(format!(
                "Invalid relay.slave_id {}. Must be 1-247",
                self.relay.slave_id
            )));
        }

        if self.relay.baud_rate == 0 {
            return Err(DaqError::Configuration("relay.baud_rate must be non-zero".to_string()));
        }

        if !self.relay.simulate {
            for (id, instrument) in self.instruments.iter() {
                if instrument.resource.trim().is_empty() {
                    return Err(DaqError::Configuration(format!(
                        "instruments.{}.resource is required unless relay.simulate is set",
                        id
                    )));
                }
                if !cfg!(feature = "instrument_visa")
                    && crate::instrument::tcp::parse_socket_resource(&instrument.resource).is_none()
                {
                    return Err(DaqError::Configuration(format!(
                        "instruments.{}.resource '{}' is not a TCPIP::<host>::<port>::SOCKET \
                         resource; VISA resources require the instrument_visa feature",
                        id, instrument.resource
                    )));
                }
            }
        }

        match self.storage.format {
            StorageFormat::Csv if !cfg!(feature = "storage_csv") => {
                Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
            }
            StorageFormat::Hdf5 if !cfg!(feature = "storage_hdf5") => {
                Err(DaqError::FeatureNotEnabled("storage_hdf5".to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Settle time between impedance points.
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.sweep.settle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const SAMPLE: &str = r#"
[application]
log_level = "debug"

[relay]
port = "/dev/ttyUSB3"
retries = 3

[instruments.scope]
resource = "TCPIP0::192.168.10.11::4000::SOCKET"
timeout_ms = 10000

[instruments.func_gen]
resource = "TCPIP0::192.168.10.12::5025::SOCKET"

[instruments.smu]
resource = "TCPIP0::192.168.10.13::5025::SOCKET"
timeout_ms = 10000

[instruments.dmm]
resource = "TCPIP0::192.168.10.14::5025::SOCKET"

[instruments.eload]
resource = "TCPIP0::192.168.10.15::5025::SOCKET"

[storage]
output_dir = "data"
format = "csv"
"#;

    fn write_sample(dir: &Path) -> PathBuf {
        let path = dir.join("bench.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        path
    }

    #[test]
    #[serial]
    fn test_load_file_with_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = BenchConfig::load_from(write_sample(tmp.path())).unwrap();

        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.relay.port, "/dev/ttyUSB3");
        assert_eq!(config.relay.retries, 3);
        assert_eq!(config.relay.slave_id, 247);
        assert_eq!(config.relay.baud_rate, 9600);
        assert_eq!(config.relay.retry_policy().delay, Duration::from_millis(100));
        assert_eq!(config.instruments.scope.timeout(), Duration::from_secs(10));
        assert_eq!(config.instruments.dmm.timeout_ms, 5000);
        assert_eq!(config.sweep.settle_ms, 200);
        assert_eq!(config.storage.output_dir, PathBuf::from("data"));
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_sample(tmp.path());

        std::env::set_var("BENCH_DAQ_RELAY__SLAVE_ID", "12");
        let result = BenchConfig::load_from(&path);
        std::env::remove_var("BENCH_DAQ_RELAY__SLAVE_ID");

        assert_eq!(result.unwrap().relay.slave_id, 12);
    }

    #[test]
    #[serial]
    fn test_missing_resources_rejected_unless_simulated() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("absent.toml");
        assert!(matches!(
            BenchConfig::load_from(&missing),
            Err(DaqError::Configuration(_))
        ));

        std::env::set_var("BENCH_DAQ_RELAY__SIMULATE", "true");
        let result = BenchConfig::load_from(&missing);
        std::env::remove_var("BENCH_DAQ_RELAY__SIMULATE");
        assert!(result.unwrap().relay.simulate);
    }

    #[test]
    #[serial]
    fn test_cli_override_merges_last() {
        let tmp = tempfile::tempdir().unwrap();
        let figment = BenchConfig::figment(&tmp.path().join("absent.toml"))
            .merge(Serialized::default("relay.simulate", true));
        assert!(BenchConfig::from_figment(figment).unwrap().relay.simulate);
    }

    #[test]
    #[serial]
    fn test_sample_socket_resources_validate() {
        let tmp = tempfile::tempdir().unwrap();
        let config = BenchConfig::load_from(write_sample(tmp.path())).unwrap();
        assert_eq!(config.instruments.smu.resource, "TCPIP0::192.168.10.13::5025::SOCKET");
    }

    #[cfg(not(feature = "instrument_visa"))]
    #[test]
    fn test_visa_resource_needs_visa_feature() {
        let mut config = BenchConfig::default();
        let socket = InstrumentConfig {
            resource: "TCPIP0::10.0.0.2::5025::SOCKET".into(),
            timeout_ms: 5000,
        };
        config.instruments = InstrumentsConfig {
            scope: socket.clone(),
            func_gen: socket.clone(),
            smu: InstrumentConfig {
                resource: "USB0::0x0957::0xCE18::MY51143560::0::INSTR".into(),
                timeout_ms: 5000,
            },
            dmm: socket.clone(),
            eload: socket,
        };

        match config.validate() {
            Err(DaqError::Configuration(message)) => {
                assert!(message.contains("instruments.smu"), "{}", message);
                assert!(message.contains("instrument_visa"), "{}", message);
            }
            other => panic!("unexpected result: {:?}", other),
        }

        config.relay.simulate = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values() {
        let mut config = BenchConfig::default();
        config.relay.simulate = true;
        assert!(config.validate().is_ok());

        config.application.log_level = "verbose".into();
        assert!(config.validate().is_err());
        config.application.log_level = "info".into();

        config.relay.retries = 0;
        assert!(config.validate().is_err());
        config.relay.retries = 5;

        config.relay.slave_id = 0;
        assert!(config.validate().is_err());
    }
}
