//! Device test list.
//!
//! Loaded from YAML. A file may hold a single device mapping or a sequence
//! of them:
//!
//! ```yaml
//! - name: dut_a
//!   Input:
//!     mode: volt_sweep
//!     v_start: -0.5
//!     v_stop: 1.0
//!     num_points: 100
//!   Output:
//!     mode: impedance_sweep
//!     z_stop: 5
//! ```
//!
//! Unknown modes are preserved as [`SweepMode::Unrecognized`] and skipped by
//! the orchestrator rather than rejected here.

use crate::sweep::{ImpedanceSweepParams, VoltSweepParams};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Name given to devices with no `name` key.
pub const UNNAMED_DEVICE: &str = "unknown_device";

/// Sweep procedure requested by a device config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepMode {
    /// `volt_sweep`: SMU I-V sweep
    VoltSweep,
    /// `impedance_sweep`: frequency-stepped impedance
    ImpedanceSweep,
    /// Any other mode string
    Unrecognized(String),
}

impl SweepMode {
    /// Parse a mode string. Never fails.
    pub fn parse(mode: &str) -> Self {
        match mode {
            "volt_sweep" => SweepMode::VoltSweep,
            "impedance_sweep" => SweepMode::ImpedanceSweep,
            other => SweepMode::Unrecognized(other.to_string()),
        }
    }

    /// The mode string.
    pub fn as_str(&self) -> &str {
        match self {
            SweepMode::VoltSweep => "volt_sweep",
            SweepMode::ImpedanceSweep => "impedance_sweep",
            SweepMode::Unrecognized(s) => s,
        }
    }
}

impl fmt::Display for SweepMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for SweepMode {
    fn from(mode: String) -> Self {
        SweepMode::parse(&mode)
    }
}

impl From<SweepMode> for String {
    fn from(mode: SweepMode) -> Self {
        mode.as_str().to_string()
    }
}

impl Serialize for SweepMode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SweepMode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(SweepMode::from)
    }
}

impl Default for SweepMode {
    fn default() -> Self {
        SweepMode::Unrecognized("unknown_mode".to_string())
    }
}

/// Input-side (SMU) test configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Channel index
    pub channel: u32,
    /// Requested sweep
    pub mode: SweepMode,
    /// Current compliance (A)
    pub compliance: f64,
    /// Sweep start voltage (V)
    pub v_start: f64,
    /// Sweep stop voltage (V)
    pub v_stop: f64,
    /// Points in the sweep
    pub num_points: usize,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            channel: 0,
            mode: SweepMode::default(),
            compliance: 1e-3,
            v_start: -0.5,
            v_stop: 1.0,
            num_points: 100,
        }
    }
}

impl InputConfig {
    /// Volt sweep parameters for this config.
    pub fn volt_sweep(&self) -> VoltSweepParams {
        VoltSweepParams {
            channel: self.channel,
            v_start: self.v_start,
            v_stop: self.v_stop,
            num_points: self.num_points,
            compliance: self.compliance,
        }
    }
}

/// Output-side (load) test configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Channel index
    pub channel: u32,
    /// Requested sweep
    pub mode: SweepMode,
    /// Load current (A)
    pub compliance: f64,
    /// Sweep start frequency (Hz)
    pub z_start: f64,
    /// Sweep stop frequency (Hz)
    pub z_stop: f64,
    /// Points in the sweep
    pub num_points: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            channel: 0,
            mode: SweepMode::default(),
            compliance: 1e-3,
            z_start: 0.0,
            z_stop: 5.0,
            num_points: 100,
        }
    }
}

impl OutputConfig {
    /// Impedance sweep parameters for this config.
    pub fn impedance_sweep(&self) -> ImpedanceSweepParams {
        ImpedanceSweepParams {
            channel: self.channel,
            z_start: self.z_start,
            z_stop: self.z_stop,
            num_points: self.num_points,
            compliance: self.compliance,
        }
    }
}

/// One device under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSpec {
    /// Device name, used for output paths and the run summary
    #[serde(default = "default_name")]
    pub name: String,
    /// Input-side test
    #[serde(rename = "Input", default, skip_serializing_if = "Option::is_none")]
    pub input: Option<InputConfig>,
    /// Output-side test
    #[serde(rename = "Output", default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputConfig>,
}

fn default_name() -> String {
    UNNAMED_DEVICE.to_string()
}

impl DeviceSpec {
    /// Device with neither config.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input: None,
            output: None,
        }
    }

    /// Attach an input config.
    pub fn with_input(mut self, input: InputConfig) -> Self {
        self.input = Some(input);
        self
    }

    /// Attach an output config.
    pub fn with_output(mut self, output: OutputConfig) -> Self {
        self.output = Some(output);
        self
    }
}

/// Parse a device list from YAML text.
///
/// The document shape is checked first so that a bad field inside a device
/// is reported as such rather than as a failed match of either shape.
pub fn parse_devices(yaml: &str) -> Result<Vec<DeviceSpec>, serde_yaml::Error> {
    if yaml.trim().is_empty() {
        return Ok(Vec::new());
    }
    match serde_yaml::from_str::<serde_yaml::Value>(yaml)? {
        serde_yaml::Value::Null => Ok(Vec::new()),
        serde_yaml::Value::Sequence(_) => serde_yaml::from_str(yaml),
        _ => serde_yaml::from_str::<DeviceSpec>(yaml).map(|device| vec![device]),
    }
}

/// Load a device list from a YAML file.
pub fn load_devices(path: impl AsRef<Path>) -> Result<Vec<DeviceSpec>, crate::error::DaqError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| crate::error::DaqError::Io {
        context: format!("reading device list {}", path.display()),
        source,
    })?;
    let devices = parse_devices(&text)?;
    tracing::info!("Loaded {} device(s) from {}", devices.len(), path.display());
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_mapping_is_one_device() {
        let devices = parse_devices(
            r#"
name: dut_a
Input:
  mode: volt_sweep
  v_stop: 2.0
"#,
        )
        .unwrap();
        assert_eq!(devices.len(), 1);
        let input = devices[0].input.as_ref().unwrap();
        assert_eq!(input.mode, SweepMode::VoltSweep);
        assert_eq!(input.v_stop, 2.0);
        assert_eq!(input.v_start, -0.5);
        assert_eq!(input.num_points, 100);
        assert!(devices[0].output.is_none());
    }

    #[test]
    fn test_sequence_keeps_order_and_defaults() {
        let devices = parse_devices(
            r#"
- name: first
  Output:
    mode: impedance_sweep
- Input:
    mode: curve_trace
"#,
        )
        .unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name, "first");
        let output = devices[0].output.as_ref().unwrap();
        assert_eq!(output.z_start, 0.0);
        assert_eq!(output.z_stop, 5.0);
        assert_eq!(output.compliance, 1e-3);
        assert_eq!(devices[1].name, UNNAMED_DEVICE);
        assert_eq!(
            devices[1].input.as_ref().unwrap().mode,
            SweepMode::Unrecognized("curve_trace".into())
        );
    }

    #[test]
    fn test_missing_mode_is_unrecognized() {
        let devices = parse_devices("name: x\nInput: {}\n").unwrap();
        assert!(matches!(
            devices[0].input.as_ref().unwrap().mode,
            SweepMode::Unrecognized(_)
        ));
    }

    #[test]
    fn test_empty_document_is_empty_list() {
        assert!(parse_devices("").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_yaml_is_reported() {
        assert!(parse_devices("- name: [unclosed").is_err());
        assert!(parse_devices("name: x\nInput:\n  num_points: many\n").is_err());
    }

    #[test]
    fn test_bad_field_error_names_the_value() {
        for yaml in [
            "name: x\nInput:\n  num_points: many\n",
            "- name: x\n  Input:\n    num_points: many\n",
        ] {
            let message = parse_devices(yaml).unwrap_err().to_string();
            assert!(message.contains("invalid type"), "{}", message);
            assert!(message.contains("many"), "{}", message);
            assert!(!message.contains("untagged"), "{}", message);
        }
    }

    #[test]
    fn test_comment_only_document_is_empty_list() {
        assert!(parse_devices("# nothing to test yet\n").unwrap().is_empty());
        assert!(parse_devices("  \n").unwrap().is_empty());
    }

    #[test]
    fn test_mode_round_trips_as_string() {
        let yaml = serde_yaml::to_string(&InputConfig::default()).unwrap();
        assert!(yaml.contains("mode: unknown_mode"));
    }
}
