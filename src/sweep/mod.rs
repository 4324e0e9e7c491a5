//! Characterization sweeps.
//!
//! A [`SweepRunner`] executes one parameterized procedure against the bench
//! instruments and hands back paired result arrays. The orchestrator only
//! sees this trait; [`scpi::ScpiSweepRunner`] is the hardware implementation.
//!
//! A failed sweep may still carry the data it collected before the failure
//! ([`SweepError::partial`]); the orchestrator decides whether that partial
//! data is worth persisting.

pub mod scpi;

pub use scpi::{ScpiSweepRunner, SweepInstruments};

use crate::instrument::InstrumentError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Parameters
// =============================================================================

/// SMU voltage sweep parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoltSweepParams {
    /// SMU channel
    pub channel: u32,
    /// First source voltage (V)
    pub v_start: f64,
    /// Last source voltage (V)
    pub v_stop: f64,
    /// Number of points, including both ends
    pub num_points: usize,
    /// Current compliance (A)
    pub compliance: f64,
}

impl VoltSweepParams {
    /// Check the parameters describe a sweep the SMU can run.
    pub fn validate(&self) -> Result<(), SweepError> {
        check_points(self.num_points)?;
        check_finite("v_start", self.v_start)?;
        check_finite("v_stop", self.v_stop)?;
        check_positive("compliance", self.compliance)
    }

    /// Source step between points.
    pub fn step(&self) -> f64 {
        (self.v_stop - self.v_start) / (self.num_points as f64 - 1.0)
    }
}

/// Frequency-stepped impedance sweep parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImpedanceSweepParams {
    /// Output channel
    pub channel: u32,
    /// First frequency (Hz)
    pub z_start: f64,
    /// Last frequency (Hz)
    pub z_stop: f64,
    /// Number of points, including both ends
    pub num_points: usize,
    /// Electronic load current (A)
    pub compliance: f64,
}

impl ImpedanceSweepParams {
    /// Check the parameters describe a sweep the bench can run.
    pub fn validate(&self) -> Result<(), SweepError> {
        check_points(self.num_points)?;
        check_finite("z_start", self.z_start)?;
        check_finite("z_stop", self.z_stop)?;
        check_positive("compliance", self.compliance)
    }

    /// Frequency of point `index`.
    pub fn frequency(&self, index: usize) -> f64 {
        self.z_start + index as f64 * (self.z_stop - self.z_start) / (self.num_points as f64 - 1.0)
    }
}

fn check_points(num_points: usize) -> Result<(), SweepError> {
    if num_points < 2 {
        return Err(SweepError::InvalidParameters(format!(
            "num_points must be at least 2, got {}",
            num_points
        )));
    }
    Ok(())
}

fn check_finite(name: &str, value: f64) -> Result<(), SweepError> {
    if !value.is_finite() {
        return Err(SweepError::InvalidParameters(format!(
            "{} must be finite, got {}",
            name, value
        )));
    }
    Ok(())
}

fn check_positive(name: &str, value: f64) -> Result<(), SweepError> {
    if !(value.is_finite() && value > 0.0) {
        return Err(SweepError::InvalidParameters(format!(
            "{} must be positive, got {}",
            name, value
        )));
    }
    Ok(())
}

// =============================================================================
// Results
// =============================================================================

/// Result arrays of one sweep: `primary` and an optional equal-length
/// `secondary` (e.g., voltages and currents).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepData {
    /// Swept or measured primary quantity
    pub primary: Vec<f64>,
    /// Paired secondary quantity, absent for single-array sweeps
    pub secondary: Option<Vec<f64>>,
}

impl SweepData {
    /// Paired arrays.
    pub fn pair(primary: Vec<f64>, secondary: Vec<f64>) -> Self {
        Self {
            primary,
            secondary: Some(secondary),
        }
    }

    /// Single array.
    pub fn single(primary: Vec<f64>) -> Self {
        Self {
            primary,
            secondary: None,
        }
    }

    /// Number of points in the primary array.
    pub fn len(&self) -> usize {
        self.primary.len()
    }

    /// True when the primary array is empty.
    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
    }

    /// True when both arrays exist and are non-empty.
    pub fn both_non_empty(&self) -> bool {
        !self.primary.is_empty() && self.secondary.as_ref().is_some_and(|s| !s.is_empty())
    }
}

/// A sweep that did not complete.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SweepError {
    /// Parameters rejected before touching any instrument
    #[error("invalid sweep parameters: {0}")]
    InvalidParameters(String),

    /// Instrument configuration failed before any data was taken
    #[error("failed to configure {stage}: {source}")]
    Setup {
        /// What was being configured
        stage: &'static str,
        /// Underlying instrument error
        #[source]
        source: InstrumentError,
    },

    /// The sweep started but stopped early
    #[error("sweep aborted after {} point(s): {source}", .partial.len())]
    Aborted {
        /// Data collected before the failure
        partial: SweepData,
        /// Underlying instrument error
        #[source]
        source: InstrumentError,
    },

    /// Instrument returned arrays of different lengths
    #[error("mismatched result arrays: {primary} vs {secondary} points")]
    LengthMismatch {
        /// Primary array length
        primary: usize,
        /// Secondary array length
        secondary: usize,
        /// Both arrays as returned
        partial: SweepData,
    },
}

impl SweepError {
    /// Data collected before the failure, if any.
    pub fn partial(&self) -> Option<&SweepData> {
        match self {
            SweepError::Aborted { partial, .. } | SweepError::LengthMismatch { partial, .. } => {
                Some(partial)
            }
            _ => None,
        }
    }
}

// =============================================================================
// SweepRunner
// =============================================================================

/// Executes sweep procedures against the bench instruments.
pub trait SweepRunner {
    /// Source a voltage sweep and measure current.
    /// Returns `(voltages, currents)` as a paired [`SweepData`].
    fn run_volt_sweep(&mut self, params: &VoltSweepParams) -> Result<SweepData, SweepError>;

    /// Step frequency and measure impedance.
    /// Returns impedances as a single-array [`SweepData`].
    fn run_impedance_sweep(&mut self, params: &ImpedanceSweepParams) -> Result<SweepData, SweepError>;
}

impl<R: SweepRunner + ?Sized> SweepRunner for &mut R {
    fn run_volt_sweep(&mut self, params: &VoltSweepParams) -> Result<SweepData, SweepError> {
        (**self).run_volt_sweep(params)
    }

    fn run_impedance_sweep(&mut self, params: &ImpedanceSweepParams) -> Result<SweepData, SweepError> {
        (**self).run_impedance_sweep(params)
    }
}
