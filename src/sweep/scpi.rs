//! SCPI implementation of [`SweepRunner`].
//!
//! Volt sweeps run on the SMU's internal sweep engine and are fetched as two
//! arrays at the end. Impedance sweeps are stepped point by point: the
//! function generator sets the frequency, the electronic load sinks a
//! constant current and the DMM reads the voltage, so `Z = V / I`.
//!
//! Config channels are zero-based; the SMU channel list is one-based, so
//! channel 0 addresses `(@1)`.

use super::{ImpedanceSweepParams, SweepData, SweepError, SweepRunner, VoltSweepParams};
use crate::instrument::{parse_f64_list, parse_f64_response, Instrument, InstrumentError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default wait between setting a frequency and reading the DMM.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(200);

/// Returns the SMU source to a fixed 0 V.
const SMU_SOURCE_OFF: &str = "sour:volt:mode fix; :sour:volt 0";

/// Function generator amplitude during impedance sweeps (Vpp).
const SWEEP_AMPLITUDE_VPP: f64 = 1.0;

/// Instrument handles used by the sweeps.
pub struct SweepInstruments<'a> {
    /// Source-measure unit (volt sweeps)
    pub smu: &'a mut dyn Instrument,
    /// Function generator (impedance sweeps)
    pub func_gen: &'a mut dyn Instrument,
    /// Electronic load (impedance sweeps)
    pub eload: &'a mut dyn Instrument,
    /// Digital multimeter (impedance sweeps)
    pub dmm: &'a mut dyn Instrument,
}

/// Sweep runner driving bench instruments with SCPI.
pub struct ScpiSweepRunner<'a> {
    instruments: SweepInstruments<'a>,
    settle: Duration,
}

impl<'a> ScpiSweepRunner<'a> {
    /// Create a runner with the default settle time.
    pub fn new(instruments: SweepInstruments<'a>) -> Self {
        Self {
            instruments,
            settle: DEFAULT_SETTLE,
        }
    }

    /// Override the per-point settle time of impedance sweeps.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    fn configure_func_gen(&mut self, params: &ImpedanceSweepParams) -> Result<(), InstrumentError> {
        let gen = &mut *self.instruments.func_gen;
        gen.write(&format!("freq:start {}", params.z_start))?;
        gen.write(&format!("freq:stop {}", params.z_stop))?;
        gen.write(&format!("sweep:points {}", params.num_points))?;
        gen.write(&format!("volt {}", SWEEP_AMPLITUDE_VPP))?;
        gen.write("init:imm")?;
        info!("Function generator configured for impedance sweep");
        Ok(())
    }

    fn configure_eload(&mut self, current: f64) -> Result<(), InstrumentError> {
        let eload = &mut *self.instruments.eload;
        eload.write("mode curr")?;
        eload.write(&format!("curr {}", current))?;
        eload.write("input on")?;
        info!("Electronic load configured and turned on");
        Ok(())
    }

    /// Switch the load off and reset the generator. Errors are logged only.
    fn release_impedance_bench(&mut self) {
        if let Err(e) = self.instruments.eload.write("input off") {
            warn!("Error switching off electronic load: {}", e);
        }
        if let Err(e) = self.instruments.func_gen.write("*RST") {
            warn!("Error resetting function generator: {}", e);
        }
    }

    fn measure_impedances(
        &mut self,
        params: &ImpedanceSweepParams,
        impedances: &mut Vec<f64>,
    ) -> Result<(), InstrumentError> {
        for i in 0..params.num_points {
            let freq = params.frequency(i);
            self.instruments.func_gen.write(&format!("freq {}", freq))?;
            if !self.settle.is_zero() {
                std::thread::sleep(self.settle);
            }

            let reply = self.instruments.dmm.query("meas:volt?")?;
            let voltage = parse_f64_response("meas:volt?", &reply)?;
            let impedance = voltage / params.compliance;
            impedances.push(impedance);

            info!(
                "Freq: {} Hz, Volt: {:.3} V, Z: {:.2} Ohm",
                freq, voltage, impedance
            );
        }
        Ok(())
    }
}

/// Best-effort return of the SMU to 0 V after a failed fetch.
fn reset_smu(smu: &mut dyn Instrument) {
    if let Err(e) = smu.write(SMU_SOURCE_OFF) {
        warn!("Error returning SMU to 0 V: {}", e);
    }
}

impl SweepRunner for ScpiSweepRunner<'_> {
    fn run_volt_sweep(&mut self, params: &VoltSweepParams) -> Result<SweepData, SweepError> {
        params.validate()?;
        let smu = &mut *self.instruments.smu;
        let chan = params.channel + 1;
        let setup = |source| SweepError::Setup { stage: "SMU", source };

        smu.write(&format!(
            ":sour:func:mode volt;:sour:volt:mode sweep;:sour:volt:start {};:sour:volt:stop {};:sour:volt:step {}",
            params.v_start,
            params.v_stop,
            params.step()
        ))
        .map_err(setup)?;

        let points = smu.query(":sour:volt:poin?").map_err(setup)?;
        let points = parse_f64_response(":sour:volt:poin?", &points).map_err(setup)?;
        debug!("SMU reports {} sweep points", points);

        smu.write(&format!(
            ":sens:func \"curr\";:sens:curr:prot {};:sens:func \"volt\"",
            params.compliance
        ))
        .map_err(setup)?;
        smu.write(&format!(":trig:sour aint;:trig:count {}", points))
            .map_err(setup)?;
        smu.write(&format!("init (@{})", chan)).map_err(setup)?;

        let volt_cmd = format!(":fetc:arr:volt? (@{})", chan);
        let voltages = match smu
            .query(&volt_cmd)
            .and_then(|reply| parse_f64_list(&volt_cmd, &reply))
        {
            Ok(voltages) => voltages,
            Err(source) => {
                reset_smu(smu);
                return Err(SweepError::Aborted {
                    partial: SweepData::default(),
                    source,
                });
            }
        };

        let curr_cmd = format!(":fetc:arr:curr? (@{})", chan);
        let currents = match smu
            .query(&curr_cmd)
            .and_then(|reply| parse_f64_list(&curr_cmd, &reply))
        {
            Ok(currents) => currents,
            Err(source) => {
                reset_smu(smu);
                return Err(SweepError::Aborted {
                    partial: SweepData::pair(voltages, Vec::new()),
                    source,
                });
            }
        };

        if let Err(source) = smu.write(SMU_SOURCE_OFF) {
            return Err(SweepError::Aborted {
                partial: SweepData::pair(voltages, currents),
                source,
            });
        }

        if voltages.len() != currents.len() {
            return Err(SweepError::LengthMismatch {
                primary: voltages.len(),
                secondary: currents.len(),
                partial: SweepData::pair(voltages, currents),
            });
        }

        info!("Voltage sweep complete: {} points", voltages.len());
        Ok(SweepData::pair(voltages, currents))
    }

    fn run_impedance_sweep(&mut self, params: &ImpedanceSweepParams) -> Result<SweepData, SweepError> {
        params.validate()?;

        let result = self
            .configure_func_gen(params)
            .map_err(|source| SweepError::Setup {
                stage: "function generator",
                source,
            })
            .and_then(|_| {
                self.configure_eload(params.compliance)
                    .map_err(|source| SweepError::Setup {
                        stage: "electronic load",
                        source,
                    })
            })
            .and_then(|_| {
                let mut impedances = Vec::with_capacity(params.num_points);
                match self.measure_impedances(params, &mut impedances) {
                    Ok(()) => Ok(SweepData::single(impedances)),
                    Err(source) => Err(SweepError::Aborted {
                        partial: SweepData::single(impedances),
                        source,
                    }),
                }
            });

        self.release_impedance_bench();
        result
    }
}
