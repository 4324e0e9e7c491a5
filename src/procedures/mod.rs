//! Device test orchestration.
//!
//! [`DeviceTestOrchestrator`] walks the device list in order. For each
//! device it runs the sweep requested by the `Input` config (volt sweep) and
//! then the one requested by the `Output` config (impedance sweep), saves
//! each result through the [`ResultSink`] and folds the outcome into a
//! [`RunSummary`].
//!
//! # Failure handling
//!
//! ```text
//!   device ──► catch_fault ──► input sweep ──► save ───────────┐
//!                  │               │ err                       │
//!                  │               └──► partial? ──► save _partial
//!                  │           output sweep ──► save ...       │
//!                  └── panic ──► DeviceReport.fault            ▼
//!                                                         RunSummary
//! ```
//!
//! Nothing that happens while testing one device stops the run. Volt
//! partial data is kept only when both arrays are non-empty; impedance
//! partial data is kept whenever any impedance was measured.

pub mod panic_safety;
pub mod result;

pub use panic_safety::{catch_fault, panic_message};
pub use result::{DeviceOutcome, DeviceReport, RunSummary, SweepKind, SweepRecord};

use crate::devices::{DeviceSpec, InputConfig, OutputConfig, SweepMode};
use crate::storage::ResultSink;
use crate::sweep::{SweepData, SweepError, SweepRunner};
use tracing::{error, info, warn};

/// Tag of a complete volt sweep result.
pub const IV_DATA: &str = "iv_data";
/// Tag of volt sweep data kept after a failure.
pub const IV_DATA_PARTIAL: &str = "iv_data_partial";
/// Tag of a complete impedance sweep result.
pub const IMPEDANCE_DATA: &str = "impedance_data";
/// Tag of impedance data kept after a failure.
pub const IMPEDANCE_DATA_PARTIAL: &str = "impedance_data_partial";

/// Runs every device's configured sweeps and collects a [`RunSummary`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceTestOrchestrator;

impl DeviceTestOrchestrator {
    /// New orchestrator.
    pub fn new() -> Self {
        Self
    }

    /// Test `devices` in order. Never fails; every fault is recorded
    /// against the device that raised it.
    pub fn run(
        &self,
        devices: &[DeviceSpec],
        runner: &mut dyn SweepRunner,
        sink: &mut dyn ResultSink,
    ) -> RunSummary {
        let mut summary = RunSummary::start(devices.len());
        info!(run_id = %summary.run_id, "Testing {} device(s)", devices.len());

        for device in devices {
            let report = test_device(device, runner, sink);
            match report.outcome() {
                DeviceOutcome::Passed => info!(device = %report.name, "Device passed"),
                DeviceOutcome::Failed => error!(device = %report.name, "Device failed"),
                DeviceOutcome::Skipped => {
                    warn!(device = %report.name, "No recognized sweep configured, skipped")
                }
            }
            summary.record(report);
        }

        summary.finish();
        info!(
            run_id = %summary.run_id,
            success = summary.success,
            failures = summary.failures.len(),
            "Run complete"
        );
        summary
    }
}

/// Test one device, catching any panic from the runner or sink.
fn test_device(device: &DeviceSpec, runner: &mut dyn SweepRunner, sink: &mut dyn ResultSink) -> DeviceReport {
    let name = device.name.as_str();
    let mut report = DeviceReport::new(name);

    info!("Beginning test sequence for {}", name);
    info!(
        "Testing {} with Input channel {} and Output channel {}..",
        name,
        device.input.as_ref().map_or(0, |c| c.channel),
        device.output.as_ref().map_or(0, |c| c.channel),
    );

    let outcome = catch_fault(|| {
        if let Some(input) = &device.input {
            run_input(name, input, runner, sink, &mut report);
        }
        if let Some(output) = &device.output {
            run_output(name, output, runner, sink, &mut report);
        }
    });

    if let Err(message) = outcome {
        error!("Error testing device {}: {}", name, message);
        report.fault = Some(message);
    }
    report
}

fn run_input(
    name: &str,
    input: &InputConfig,
    runner: &mut dyn SweepRunner,
    sink: &mut dyn ResultSink,
    report: &mut DeviceReport,
) {
    match &input.mode {
        SweepMode::VoltSweep => {
            let result = runner.run_volt_sweep(&input.volt_sweep());
            let record = finish_sweep(name, SweepKind::Volt, result, sink, SweepData::both_non_empty);
            report.sweeps.push(record);
        }
        other => info!("Skipping input mode '{}' for {}", other, name),
    }
}

fn run_output(
    name: &str,
    output: &OutputConfig,
    runner: &mut dyn SweepRunner,
    sink: &mut dyn ResultSink,
    report: &mut DeviceReport,
) {
    match &output.mode {
        SweepMode::ImpedanceSweep => {
            let result = runner.run_impedance_sweep(&output.impedance_sweep());
            let keep_partial = |data: &SweepData| !data.primary.is_empty();
            let record = finish_sweep(name, SweepKind::Impedance, result, sink, keep_partial);
            report.sweeps.push(record);
        }
        other => info!("Skipping output mode '{}' for {}", other, name),
    }
}

/// Save a sweep result, or its partial data when `keep_partial` accepts it.
fn finish_sweep(
    name: &str,
    kind: SweepKind,
    result: Result<SweepData, SweepError>,
    sink: &mut dyn ResultSink,
    keep_partial: impl Fn(&SweepData) -> bool,
) -> SweepRecord {
    match result {
        Ok(data) => match sink.save(name, &data.primary, data.secondary.as_deref(), kind.tag()) {
            Ok(path) => SweepRecord::saved(kind, data.len(), path),
            Err(e) => {
                error!("Saving {} for {} failed: {}", kind.tag(), name, e);
                SweepRecord::failed(kind, data.len(), format!("save failed: {}", e))
            }
        },
        Err(e) => {
            error!("{} sweep failed for {}: {}", kind_label(kind), name, e);
            let points = e.partial().map_or(0, SweepData::len);
            let mut record = SweepRecord::failed(kind, points, e.to_string());

            if let Some(partial) = e.partial().filter(|p| keep_partial(p)) {
                match sink.save(name, &partial.primary, partial.secondary.as_deref(), kind.partial_tag()) {
                    Ok(path) => record.partial_saved = Some(path),
                    Err(save_err) => warn!(
                        "Could not save partial {} for {}: {}",
                        kind.tag(),
                        name,
                        save_err
                    ),
                }
            }
            record
        }
    }
}

fn kind_label(kind: SweepKind) -> &'static str {
    match kind {
        SweepKind::Volt => "Voltage",
        SweepKind::Impedance => "Impedance",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{InputConfig, OutputConfig};
    use crate::instrument::InstrumentError;
    use crate::storage::MemorySink;
    use crate::sweep::{ImpedanceSweepParams, VoltSweepParams};
    use std::collections::VecDeque;

    /// Runner replaying scripted results; panics when told to.
    #[derive(Default)]
    struct ScriptedRunner {
        volt: VecDeque<Result<SweepData, SweepError>>,
        impedance: VecDeque<Result<SweepData, SweepError>>,
        panic_on_volt: bool,
        volt_calls: usize,
        impedance_calls: usize,
    }

    impl SweepRunner for ScriptedRunner {
        fn run_volt_sweep(&mut self, _params: &VoltSweepParams) -> Result<SweepData, SweepError> {
            self.volt_calls += 1;
            if self.panic_on_volt {
                panic!("SMU driver bug");
            }
            self.volt
                .pop_front()
                .unwrap_or_else(|| Ok(SweepData::pair(vec![0.0, 1.0], vec![0.0, 1e-3])))
        }

        fn run_impedance_sweep(&mut self, _params: &ImpedanceSweepParams) -> Result<SweepData, SweepError> {
            self.impedance_calls += 1;
            self.impedance
                .pop_front()
                .unwrap_or_else(|| Ok(SweepData::single(vec![50.0, 51.0])))
        }
    }

    fn aborted(partial: SweepData) -> Result<SweepData, SweepError> {
        Err(SweepError::Aborted {
            partial,
            source: InstrumentError::Timeout {
                instrument: "dmm".into(),
                command: "meas:volt?".into(),
            },
        })
    }

    fn volt_device(name: &str) -> DeviceSpec {
        DeviceSpec::new(name).with_input(InputConfig {
            mode: SweepMode::VoltSweep,
            ..InputConfig::default()
        })
    }

    fn impedance_device(name: &str) -> DeviceSpec {
        DeviceSpec::new(name).with_output(OutputConfig {
            mode: SweepMode::ImpedanceSweep,
            ..OutputConfig::default()
        })
    }

    #[test]
    fn test_volt_success_saves_iv_data() {
        let mut runner = ScriptedRunner::default();
        let mut sink = MemorySink::new();
        let summary = DeviceTestOrchestrator::new().run(&[volt_device("d1")], &mut runner, &mut sink);

        assert_eq!(summary.success, 1);
        assert!(summary.failures.is_empty());
        assert_eq!(sink.tags_for("d1"), vec![IV_DATA]);
        assert_eq!(sink.saved()[0].secondary.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn test_impedance_partial_saved_and_reported() {
        let mut runner = ScriptedRunner::default();
        runner
            .impedance
            .push_back(aborted(SweepData::single(vec![50.0, 52.0])));
        let mut sink = MemorySink::new();

        let summary =
            DeviceTestOrchestrator::new().run(&[impedance_device("d2")], &mut runner, &mut sink);

        assert_eq!(summary.success, 0);
        assert_eq!(summary.failures, vec!["d2".to_string()]);
        assert_eq!(summary.partial_data, vec!["d2".to_string()]);
        assert_eq!(sink.tags_for("d2"), vec![IMPEDANCE_DATA_PARTIAL]);
        assert_eq!(sink.saved()[0].primary, vec![50.0, 52.0]);
    }

    #[test]
    fn test_volt_partial_needs_both_arrays() {
        let mut runner = ScriptedRunner::default();
        runner
            .volt
            .push_back(aborted(SweepData::pair(vec![0.0, 0.5], Vec::new())));
        let mut sink = MemorySink::new();

        let summary = DeviceTestOrchestrator::new().run(&[volt_device("d")], &mut runner, &mut sink);

        assert_eq!(summary.failures, vec!["d".to_string()]);
        assert!(summary.partial_data.is_empty());
        assert_eq!(sink.attempts(), 0);
    }

    #[test]
    fn test_volt_partial_with_both_arrays_is_saved() {
        let mut runner = ScriptedRunner::default();
        runner
            .volt
            .push_back(aborted(SweepData::pair(vec![0.0], vec![1e-6])));
        let mut sink = MemorySink::new();

        let summary = DeviceTestOrchestrator::new().run(&[volt_device("d")], &mut runner, &mut sink);

        assert_eq!(summary.partial_data, vec!["d".to_string()]);
        assert_eq!(sink.tags_for("d"), vec![IV_DATA_PARTIAL]);
    }

    #[test]
    fn test_empty_impedance_partial_is_not_saved() {
        let mut runner = ScriptedRunner::default();
        runner.impedance.push_back(aborted(SweepData::single(Vec::new())));
        let mut sink = MemorySink::new();

        let summary =
            DeviceTestOrchestrator::new().run(&[impedance_device("d")], &mut runner, &mut sink);

        assert_eq!(summary.failures.len(), 1);
        assert!(summary.partial_data.is_empty());
        assert_eq!(sink.attempts(), 0);
    }

    #[test]
    fn test_panic_is_contained_to_one_device() {
        let mut runner = ScriptedRunner {
            panic_on_volt: true,
            ..ScriptedRunner::default()
        };
        let mut sink = MemorySink::new();
        let devices = [volt_device("bad"), impedance_device("good")];

        let summary = DeviceTestOrchestrator::new().run(&devices, &mut runner, &mut sink);

        assert_eq!(summary.total_devices, 2);
        assert_eq!(summary.success, 1);
        assert_eq!(summary.failures, vec!["bad".to_string()]);
        assert!(summary.devices[0]
            .fault
            .as_deref()
            .is_some_and(|f| f.contains("SMU driver bug")));
        assert_eq!(sink.tags_for("good"), vec![IMPEDANCE_DATA]);
    }

    #[test]
    fn test_save_failure_marks_device_failed() {
        let mut runner = ScriptedRunner::default();
        let mut sink = MemorySink::new().fail_tag(IV_DATA);

        let summary = DeviceTestOrchestrator::new().run(&[volt_device("d")], &mut runner, &mut sink);

        assert_eq!(summary.success, 0);
        assert_eq!(summary.failures, vec!["d".to_string()]);
        assert!(summary.partial_data.is_empty());
        assert_eq!(sink.attempts(), 1);
    }

    #[test]
    fn test_partial_save_failure_is_not_double_counted() {
        let mut runner = ScriptedRunner::default();
        runner.impedance.push_back(aborted(SweepData::single(vec![1.0])));
        let mut sink = MemorySink::new().fail_tag(IMPEDANCE_DATA_PARTIAL);

        let summary =
            DeviceTestOrchestrator::new().run(&[impedance_device("d")], &mut runner, &mut sink);

        assert_eq!(summary.failures, vec!["d".to_string()]);
        assert!(summary.partial_data.is_empty());
    }

    #[test]
    fn test_mode_for_other_role_is_skipped() {
        let device = DeviceSpec::new("swapped")
            .with_input(InputConfig {
                mode: SweepMode::ImpedanceSweep,
                ..InputConfig::default()
            })
            .with_output(OutputConfig {
                mode: SweepMode::VoltSweep,
                ..OutputConfig::default()
            });
        let mut runner = ScriptedRunner::default();
        let mut sink = MemorySink::new();

        let summary = DeviceTestOrchestrator::new().run(&[device], &mut runner, &mut sink);

        assert_eq!(runner.volt_calls + runner.impedance_calls, 0);
        assert_eq!(summary.success, 0);
        assert!(summary.failures.is_empty());
        assert_eq!(summary.skipped(), 1);
    }

    #[test]
    fn test_one_failure_entry_when_both_sweeps_fail() {
        let device = volt_device("both").with_output(OutputConfig {
            mode: SweepMode::ImpedanceSweep,
            ..OutputConfig::default()
        });
        let mut runner = ScriptedRunner::default();
        runner.volt.push_back(aborted(SweepData::default()));
        runner.impedance.push_back(aborted(SweepData::default()));
        let mut sink = MemorySink::new();

        let summary = DeviceTestOrchestrator::new().run(&[device], &mut runner, &mut sink);

        assert_eq!(summary.failures, vec!["both".to_string()]);
        assert_eq!(summary.devices[0].sweeps.len(), 2);
        assert!(summary.success + summary.failures.len() <= summary.total_devices);
    }

    #[test]
    fn test_volt_length_mismatch_saves_both_arrays_as_partial() {
        let mut runner = ScriptedRunner::default();
        runner.volt.push_back(Err(SweepError::LengthMismatch {
            primary: 3,
            secondary: 2,
            partial: SweepData::pair(vec![0.0, 0.1, 0.2], vec![1e-9, 2e-6]),
        }));
        let mut sink = MemorySink::new();

        let summary = DeviceTestOrchestrator::new().run(&[volt_device("d1")], &mut runner, &mut sink);

        assert_eq!(summary.failures, vec!["d1".to_string()]);
        assert_eq!(summary.partial_data, vec!["d1".to_string()]);
        assert_eq!(sink.tags_for("d1"), vec![IV_DATA_PARTIAL]);
        assert_eq!(sink.saved()[0].primary.len(), 3);
        assert_eq!(sink.saved()[0].secondary.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn test_duplicate_device_names_are_tested_separately() {
        let mut runner = ScriptedRunner::default();
        let mut sink = MemorySink::new();

        let summary = DeviceTestOrchestrator::new().run(
            &[volt_device("d"), volt_device("d")],
            &mut runner,
            &mut sink,
        );

        assert_eq!(runner.volt_calls, 2);
        assert_eq!(summary.total_devices, 2);
        assert_eq!(summary.success, 2);
        assert_eq!(summary.devices.len(), 2);
        assert_eq!(sink.tags_for("d"), vec![IV_DATA, IV_DATA]);
        assert_eq!(sink.attempts(), 2);
    }

    #[test]
    fn test_empty_device_list() {
        let mut runner = ScriptedRunner::default();
        let mut sink = MemorySink::new();
        let summary = DeviceTestOrchestrator::new().run(&[], &mut runner, &mut sink);
        assert_eq!(summary.total_devices, 0);
        assert_eq!(summary.success, 0);
        assert!(summary.finished_at.is_some());
    }
}
