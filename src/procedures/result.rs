//! Run summary and per-device outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;

// =============================================================================
// Sweep records
// =============================================================================

/// Which sweep a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepKind {
    /// SMU I-V sweep (input side)
    Volt,
    /// Impedance sweep (output side)
    Impedance,
}

impl SweepKind {
    /// Tag for a complete result.
    pub fn tag(self) -> &'static str {
        match self {
            SweepKind::Volt => super::IV_DATA,
            SweepKind::Impedance => super::IMPEDANCE_DATA,
        }
    }

    /// Tag for partial data kept from a failed sweep.
    pub fn partial_tag(self) -> &'static str {
        match self {
            SweepKind::Volt => super::IV_DATA_PARTIAL,
            SweepKind::Impedance => super::IMPEDANCE_DATA_PARTIAL,
        }
    }
}

/// One attempted sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepRecord {
    /// Sweep kind
    pub kind: SweepKind,
    /// Points returned (or salvaged) by the runner
    pub points: usize,
    /// Where the full result was saved
    #[serde(default)]
    pub saved: Option<PathBuf>,
    /// Where partial data was saved after a failure
    #[serde(default)]
    pub partial_saved: Option<PathBuf>,
    /// Sweep or save error
    #[serde(default)]
    pub error: Option<String>,
}

impl SweepRecord {
    /// Sweep ran and its result was saved.
    pub fn saved(kind: SweepKind, points: usize, path: PathBuf) -> Self {
        Self {
            kind,
            points,
            saved: Some(path),
            partial_saved: None,
            error: None,
        }
    }

    /// Sweep or save failed.
    pub fn failed(kind: SweepKind, points: usize, error: impl Into<String>) -> Self {
        Self {
            kind,
            points,
            saved: None,
            partial_saved: None,
            error: Some(error.into()),
        }
    }

    /// True when the sweep and its save succeeded.
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

// =============================================================================
// Device reports
// =============================================================================

/// Final state of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceOutcome {
    /// Every attempted sweep succeeded
    Passed,
    /// A sweep, save or device-level step failed
    Failed,
    /// No recognized sweep was configured
    Skipped,
}

/// What happened to one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceReport {
    /// Device name
    pub name: String,
    /// Attempted sweeps, in order
    pub sweeps: Vec<SweepRecord>,
    /// Fault outside any single sweep (e.g. a panic)
    #[serde(default)]
    pub fault: Option<String>,
}

impl DeviceReport {
    /// Empty report for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sweeps: Vec::new(),
            fault: None,
        }
    }

    /// Derived outcome.
    pub fn outcome(&self) -> DeviceOutcome {
        if self.fault.is_some() || self.sweeps.iter().any(|s| !s.succeeded()) {
            DeviceOutcome::Failed
        } else if self.sweeps.is_empty() {
            DeviceOutcome::Skipped
        } else {
            DeviceOutcome::Passed
        }
    }

    /// True when any partial data was saved.
    pub fn has_partial_data(&self) -> bool {
        self.sweeps.iter().any(|s| s.partial_saved.is_some())
    }
}

// =============================================================================
// RunSummary
// =============================================================================

/// Outcome of one orchestrated run.
///
/// `success + failures.len() <= total_devices` always holds: each device is
/// counted at most once, and devices with nothing to run count in neither.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run id
    pub run_id: String,
    /// Host that ran the bench
    pub hostname: String,
    /// Devices in the input list
    pub total_devices: usize,
    /// Devices whose every sweep succeeded
    pub success: usize,
    /// Failed device names, in test order
    pub failures: Vec<String>,
    /// Devices with partial data saved, in test order
    pub partial_data: Vec<String>,
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Run end, set by [`RunSummary::finish`]
    pub finished_at: Option<DateTime<Utc>>,
    /// Per-device detail
    pub devices: Vec<DeviceReport>,
}

impl RunSummary {
    /// Start a summary for `total_devices` devices.
    pub fn start(total_devices: usize) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            hostname: hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".to_string()),
            total_devices,
            success: 0,
            failures: Vec::new(),
            partial_data: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            devices: Vec::new(),
        }
    }

    /// Fold a device report into the counters.
    pub fn record(&mut self, report: DeviceReport) {
        match report.outcome() {
            DeviceOutcome::Passed => self.success += 1,
            DeviceOutcome::Failed => self.failures.push(report.name.clone()),
            DeviceOutcome::Skipped => {}
        }
        if report.has_partial_data() {
            self.partial_data.push(report.name.clone());
        }
        self.devices.push(report);
    }

    /// Stamp the end time.
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Wall-clock run time, zero until finished.
    pub fn duration(&self) -> Duration {
        self.finished_at
            .and_then(|end| (end - self.started_at).to_std().ok())
            .unwrap_or_default()
    }

    /// Devices that ran nothing.
    pub fn skipped(&self) -> usize {
        self.devices
            .iter()
            .filter(|d| d.outcome() == DeviceOutcome::Skipped)
            .count()
    }

    /// Human-readable report.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "===== Test Summary =====");
        let _ = writeln!(out, "Run id: {} ({})", self.run_id, self.hostname);
        let _ = writeln!(out, "Total devices tested: {}", self.total_devices);
        let _ = writeln!(out, "Successful runs: {}", self.success);
        let _ = writeln!(out, "Failures: {:?}", self.failures);
        let _ = writeln!(out, "Partial data saved: {:?}", self.partial_data);
        if self.skipped() > 0 {
            let _ = writeln!(out, "Skipped (no recognized sweep): {}", self.skipped());
        }
        for device in self.devices.iter().filter(|d| d.outcome() == DeviceOutcome::Failed) {
            if let Some(fault) = &device.fault {
                let _ = writeln!(out, "  {}: {}", device.name, fault);
            }
            for sweep in &device.sweeps {
                if let Some(error) = &sweep.error {
                    let _ = writeln!(out, "  {} [{}]: {}", device.name, sweep.kind.tag(), error);
                }
            }
        }
        let _ = writeln!(out, "Total run time: {:.2} seconds", self.duration().as_secs_f64());
        let _ = write!(out, "========================");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_derivation() {
        let mut report = DeviceReport::new("d");
        assert_eq!(report.outcome(), DeviceOutcome::Skipped);

        report
            .sweeps
            .push(SweepRecord::saved(SweepKind::Volt, 3, PathBuf::from("a.csv")));
        assert_eq!(report.outcome(), DeviceOutcome::Passed);

        report
            .sweeps
            .push(SweepRecord::failed(SweepKind::Impedance, 0, "timeout"));
        assert_eq!(report.outcome(), DeviceOutcome::Failed);
    }

    #[test]
    fn test_fault_fails_device_without_sweeps() {
        let mut report = DeviceReport::new("d");
        report.fault = Some("panic".into());
        assert_eq!(report.outcome(), DeviceOutcome::Failed);
    }

    #[test]
    fn test_record_counts_each_device_once() {
        let mut summary = RunSummary::start(3);

        let mut both_failed = DeviceReport::new("a");
        both_failed
            .sweeps
            .push(SweepRecord::failed(SweepKind::Volt, 0, "x"));
        both_failed
            .sweeps
            .push(SweepRecord::failed(SweepKind::Impedance, 0, "y"));
        summary.record(both_failed);

        let mut passed = DeviceReport::new("b");
        passed
            .sweeps
            .push(SweepRecord::saved(SweepKind::Volt, 3, PathBuf::from("b.csv")));
        summary.record(passed);

        summary.record(DeviceReport::new("c"));
        summary.finish();

        assert_eq!(summary.success, 1);
        assert_eq!(summary.failures, vec!["a".to_string()]);
        assert_eq!(summary.skipped(), 1);
        assert!(summary.success + summary.failures.len() <= summary.total_devices);
        assert!(summary.finished_at.unwrap() >= summary.started_at);
    }

    #[test]
    fn test_render_lists_errors() {
        let mut summary = RunSummary::start(1);
        let mut report = DeviceReport::new("dut_z");
        report
            .sweeps
            .push(SweepRecord::failed(SweepKind::Impedance, 2, "dmm timeout"));
        summary.record(report);
        summary.finish();

        let text = summary.render();
        assert!(text.contains("Failures: [\"dut_z\"]"));
        assert!(text.contains("dut_z [impedance_data]: dmm timeout"));
        assert!(text.ends_with("========================"));
    }
}
