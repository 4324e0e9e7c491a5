//! Oscilloscope bench setup.
//!
//! The scope watches the device under test during sweeps: it triggers on the
//! rising edge of the AUX input, runs a single-sequence acquisition and keeps
//! a fixed set of automatic measurements (base/top levels, edge delays
//! between CH2 and CH1, rise/fall times, overshoots, mean).

use super::{Instrument, InstrumentError};
use std::time::Duration;
use tracing::{info, warn};

/// Scope setup timing.
#[derive(Debug, Clone, Copy)]
pub struct ScopeSetup {
    /// Poll interval while waiting for the trigger to arm
    pub arm_poll: Duration,
    /// Maximum polls while waiting for the trigger to arm
    pub arm_polls: u32,
    /// Settle time after loading the measurement table
    pub measurement_settle: Duration,
}

impl Default for ScopeSetup {
    fn default() -> Self {
        Self {
            arm_poll: Duration::from_millis(100),
            arm_polls: 10,
            measurement_settle: Duration::from_secs(10),
        }
    }
}

const TRIGGER_SETUP: &str = ":trig:a:type edge;\
:trig:auxlevel 0.5;\
:trig:a:edge:sou aux;\
:trig:a:edge:slope rise;\
:trig:a:edge:coupling dc;\
:trig:a:mode normal";

const ACQUIRE_SINGLE: &str = ":acquire:mode sample;\
:acquire:seq:numseq 1;\
:acquire:stopafter sequence;\
:acquire:state run";

const MEASUREMENTS: &str = ":measurement:meas1:type base;\
:measurement:meas2:type top;\
:measurement:addmeas delay;\
:measurement:meas3:source1 ch2;\
:measurement:meas3:source2 ch1;\
:measurement:meas3:delay:edge1 fall;\
:measurement:meas3:delay:edge2 fall;\
:measurement:addmeas delay;\
:measurement:meas4:source1 ch2;\
:measurement:meas4:source2 ch1;\
:measurement:meas4:delay:edge1 rise;\
:measurement:meas4:delay:edge2 rise;\
:measurement:meas5:type risetime;\
:measurement:meas6:type falltime;\
:measurement:meas7:type povershoot;\
:measurement:meas8:type novershoot;\
:measurement:meas9:type mean";

/// Configure trigger, arm a single acquisition, load measurements and show CH2.
pub fn configure(scope: &mut dyn Instrument, setup: &ScopeSetup) -> Result<(), InstrumentError> {
    scope.write(TRIGGER_SETUP)?;
    arm(scope, setup)?;

    scope.write("measurement:deleteall")?;
    scope.write(MEASUREMENTS)?;
    sleep(setup.measurement_settle);

    scope.write("display:waveview1:ch2:state 1")?;
    info!(instrument = scope.id(), "Scope trigger and measurements configured");
    Ok(())
}

/// Start a single-sequence acquisition and wait for the trigger to report
/// READY. Returns whether it armed within the poll budget.
pub fn arm(scope: &mut dyn Instrument, setup: &ScopeSetup) -> Result<bool, InstrumentError> {
    scope.write(ACQUIRE_SINGLE)?;

    for _ in 0..setup.arm_polls {
        if scope.query("trig:state?")?.trim().eq_ignore_ascii_case("REA") {
            return Ok(true);
        }
        sleep(setup.arm_poll);
    }

    warn!(instrument = scope.id(), "Trigger did not arm after {} polls", setup.arm_polls);
    Ok(false)
}

fn sleep(duration: Duration) {
    if !duration.is_zero() {
        std::thread::sleep(duration);
    }
}
