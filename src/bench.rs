//! Bench session.
//!
//! [`Bench`] owns the relay channel and the five instrument sessions for
//! the length of a run. Opening is all-or-nothing: if any session fails to
//! open, the ones already opened are closed and the error is returned.
//! Dropping a `Bench` closes every handle best-effort, so sessions are
//! released on every exit path, including early returns and panics.

use crate::config::BenchConfig;
use crate::error::DaqError;
use crate::instrument::{self, scope, Instrument, MockInstrument};
use crate::relay::{ChangeSet, Confirmation, MockRelayChannel, RelayChannel, RelayStateWriter};
use crate::sweep::{ScpiSweepRunner, SweepInstruments};
use std::time::Duration;
use tracing::{error, info, warn};

/// Open instrument and relay handles.
pub struct Bench {
    relay: Box<dyn RelayChannel>,
    scope: Box<dyn Instrument>,
    func_gen: Box<dyn Instrument>,
    smu: Box<dyn Instrument>,
    dmm: Box<dyn Instrument>,
    eload: Box<dyn Instrument>,
    simulated: bool,
    closed: bool,
}

/// Open the relay channel described by `config`.
pub fn open_relay(config: &BenchConfig) -> Result<Box<dyn RelayChannel>, DaqError> {
    if config.relay.simulate {
        info!("Using simulated relay bank");
        return Ok(Box::new(MockRelayChannel::new()));
    }

    #[cfg(feature = "instrument_serial")]
    {
        let channel = crate::relay::ModbusRelayChannel::open(config.relay.modbus_settings())
            .map_err(DaqError::relay_open)?;
        info!("Relay bank connected on {}", config.relay.port);
        Ok(Box::new(channel))
    }

    #[cfg(not(feature = "instrument_serial"))]
    {
        Err(DaqError::FeatureNotEnabled("instrument_serial".to_string()))
    }
}

impl Bench {
    /// Open every handle named in `config`, or a simulated bench when
    /// `relay.simulate` is set.
    pub fn open(config: &BenchConfig) -> Result<Self, DaqError> {
        if config.relay.simulate {
            return Ok(Self::simulated());
        }

        let mut relay = open_relay(config)?;
        let mut opened: Vec<Box<dyn Instrument>> = Vec::with_capacity(5);

        for (id, settings) in config.instruments.iter() {
            let session = instrument::open(id, &settings.resource, settings.timeout())
                .and_then(|mut session| {
                    instrument::reset_and_identify(session.as_mut())?;
                    Ok(session)
                });
            match session {
                Ok(session) => opened.push(session),
                Err(e) => {
                    error!("Error initializing {}: {}", id, e);
                    for mut session in opened {
                        close_instrument(session.as_mut());
                    }
                    close_relay(relay.as_mut());
                    return Err(DaqError::instrument_open(id, e));
                }
            }
        }

        let mut sessions = opened.into_iter();
        match (
            sessions.next(),
            sessions.next(),
            sessions.next(),
            sessions.next(),
            sessions.next(),
        ) {
            (Some(scope), Some(func_gen), Some(smu), Some(dmm), Some(eload)) => Ok(Self {
                relay,
                scope,
                func_gen,
                smu,
                dmm,
                eload,
                simulated: false,
                closed: false,
            }),
            _ => Err(DaqError::BenchOpen {
                what: "instruments".to_string(),
                reason: "expected five sessions".to_string(),
            }),
        }
    }

    /// Bench backed by an in-memory relay bank and scripted instruments.
    pub fn simulated() -> Self {
        let mut bench = Self {
            relay: Box::new(MockRelayChannel::new()),
            scope: Box::new(simulated_instrument("scope").respond("trig:state?", "REA")),
            func_gen: Box::new(simulated_instrument("func_gen")),
            smu: Box::new(simulated_smu()),
            dmm: Box::new(simulated_instrument("dmm").respond("meas:volt?", "+5.000000E-02")),
            eload: Box::new(simulated_instrument("eload")),
            simulated: true,
            closed: false,
        };
        for session in bench.instruments_mut() {
            // Scripted sessions cannot fail here.
            let _ = instrument::reset_and_identify(session);
        }
        info!("Simulated bench ready");
        bench
    }

    /// Clear every relay and configure the oscilloscope.
    ///
    /// A relay failure is logged and returned in the result but does not
    /// stop the run; a scope failure is fatal.
    pub fn prepare(
        &mut self,
        writer: &RelayStateWriter,
    ) -> Result<Option<Confirmation>, DaqError> {
        let cleared = match writer.apply(self.relay.as_mut(), &ChangeSet::all_off()) {
            Ok(confirmation) => Some(confirmation),
            Err(e) => {
                error!("Failed to clear relay bank: {}", e);
                None
            }
        };

        let setup = if self.simulated {
            scope::ScopeSetup {
                arm_poll: Duration::ZERO,
                arm_polls: 1,
                measurement_settle: Duration::ZERO,
            }
        } else {
            scope::ScopeSetup::default()
        };
        scope::configure(self.scope.as_mut(), &setup)
            .map_err(|e| DaqError::instrument_open("scope setup", e))?;

        Ok(cleared)
    }

    /// Sweep runner over this bench's SMU, generator, load and DMM.
    pub fn sweep_runner(&mut self, settle: Duration) -> ScpiSweepRunner<'_> {
        let settle = if self.simulated { Duration::ZERO } else { settle };
        ScpiSweepRunner::new(SweepInstruments {
            smu: self.smu.as_mut(),
            func_gen: self.func_gen.as_mut(),
            eload: self.eload.as_mut(),
            dmm: self.dmm.as_mut(),
        })
        .with_settle(settle)
    }

    /// Relay channel.
    pub fn relay_mut(&mut self) -> &mut dyn RelayChannel {
        self.relay.as_mut()
    }

    /// Whether this bench is simulated.
    pub fn is_simulated(&self) -> bool {
        self.simulated
    }

    fn instruments_mut(&mut self) -> [&mut dyn Instrument; 5] {
        [
            self.scope.as_mut(),
            self.func_gen.as_mut(),
            self.smu.as_mut(),
            self.dmm.as_mut(),
            self.eload.as_mut(),
        ]
    }

    /// Close every handle, logging failures. Idempotent.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        info!("Initiating safe shutdown...");
        for session in self.instruments_mut() {
            close_instrument(session);
        }
        close_relay(self.relay.as_mut());
    }
}

impl Drop for Bench {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn close_instrument(session: &mut dyn Instrument) {
    match session.close() {
        Ok(()) => info!("{} closed successfully.", session.id()),
        Err(e) => warn!("Error closing device {}: {}", session.id(), e),
    }
}

fn close_relay(relay: &mut dyn RelayChannel) {
    match relay.close() {
        Ok(()) => info!("{} closed successfully.", relay.describe()),
        Err(e) => warn!("Error closing device {}: {}", relay.describe(), e),
    }
}

fn simulated_instrument(id: &str) -> MockInstrument {
    MockInstrument::new(id).respond("*IDN?", format!("SIMULATED,{},0,0", id))
}

/// SMU answering a 100-point diode-like I-V sweep from -0.5 V to 1.0 V.
fn simulated_smu() -> MockInstrument {
    const POINTS: usize = 100;
    let volts: Vec<f64> = (0..POINTS)
        .map(|i| -0.5 + 1.5 * i as f64 / (POINTS - 1) as f64)
        .collect();
    let amps: Vec<f64> = volts
        .iter()
        .map(|v| (1e-12 * ((v / 0.025).exp() - 1.0)).min(1e-3))
        .collect();
    let join = |values: &[f64]| {
        values
            .iter()
            .map(|v| format!("{:E}", v))
            .collect::<Vec<_>>()
            .join(",")
    };

    simulated_instrument("smu")
        .respond(":sour:volt:poin?", POINTS.to_string())
        .respond(":fetc:arr:volt? (@1)", join(&volts))
        .respond(":fetc:arr:curr? (@1)", join(&amps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedures::DeviceTestOrchestrator;
    use crate::devices::{DeviceSpec, InputConfig, SweepMode};
    use crate::storage::MemorySink;

    #[test]
    fn test_simulated_bench_runs_a_volt_sweep() {
        let mut bench = Bench::simulated();
        let cleared = bench
            .prepare(&RelayStateWriter::with_retries(2, Duration::ZERO))
            .unwrap();
        assert!(cleared.is_some_and(|c| c.committed.energised().is_empty()));

        let device = DeviceSpec::new("sim").with_input(InputConfig {
            mode: SweepMode::VoltSweep,
            ..InputConfig::default()
        });
        let mut sink = MemorySink::new();
        let mut runner = bench.sweep_runner(Duration::from_secs(1));
        let summary = DeviceTestOrchestrator::new().run(&[device], &mut runner, &mut sink);

        assert_eq!(summary.success, 1);
        assert_eq!(sink.saved()[0].primary.len(), 100);
    }

    #[test]
    fn test_shutdown_is_idempotent_and_closes_relay() {
        let mut bench = Bench::simulated();
        bench.shutdown();
        bench.shutdown();
        assert!(bench.relay_mut().read_coils(0, 32).is_err());
    }

    #[test]
    fn test_open_simulated_from_config() {
        let mut config = BenchConfig::default();
        config.relay.simulate = true;
        let bench = Bench::open(&config).unwrap();
        assert!(bench.is_simulated());
    }
}
