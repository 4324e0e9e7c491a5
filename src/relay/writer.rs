//! Transactional relay-state writer.
//!
//! One call to [`RelayStateWriter::apply`] is one transaction:
//!
//! 1. **validate** the change set (no bus access on failure)
//! 2. **read** the full 32-coil vector from address 0
//! 3. **compose** the change set onto the observed vector
//! 4. **write** the composed vector back
//! 5. **verify** by re-reading and comparing element-wise
//!
//! Read, write and verify are each retried under the same [`RetryPolicy`].
//! Transport errors are folded into the returned `Result`; a non-transport
//! fault (malformed read, panic inside the channel) aborts the transaction
//! with [`RelayError::Internal`] and is never retried.

use super::{ChangeSet, CoilVector, RelayChannel, RelayError, TransportError, COIL_COUNT};
use crate::procedures::panic_safety::catch_fault;
use crate::retry::{Attempted, RetryPolicy, Verdict};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Proof of a committed and verified relay transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Confirmation {
    /// State observed before the transaction
    pub previous: CoilVector,
    /// State now on the relay bank
    pub committed: CoilVector,
    /// Attempts used by the read phase
    pub read_attempts: u32,
    /// Attempts used by the write phase
    pub write_attempts: u32,
    /// Attempts used by the verify phase
    pub verify_attempts: u32,
    /// Wall time for the whole transaction
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

/// Read-modify-write-verify updater for the shared relay bank.
///
/// Holds no coil state: every transaction re-reads the hardware.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelayStateWriter {
    policy: RetryPolicy,
}

impl RelayStateWriter {
    /// Writer using `policy` for each phase.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Writer with an explicit per-phase attempt budget and inter-attempt delay.
    pub fn with_retries(retries: u32, inter_retry_delay: Duration) -> Self {
        Self::new(RetryPolicy::new(retries, inter_retry_delay))
    }

    /// Active retry policy.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Validate raw `(address, value)` pairs, then run a transaction.
    ///
    /// An out-of-range address returns [`RelayError::InvalidAddress`]
    /// before the channel is touched.
    pub fn apply_pairs<C>(
        &self,
        channel: &mut C,
        pairs: impl IntoIterator<Item = (i64, bool)>,
    ) -> Result<Confirmation, RelayError>
    where
        C: RelayChannel + ?Sized,
    {
        let changes = ChangeSet::from_pairs(pairs)?;
        self.apply(channel, &changes)
    }

    /// Read the relay bank with the same retry policy as a transaction's
    /// read phase. Nothing is written.
    pub fn read_state<C>(&self, channel: &mut C) -> Result<CoilVector, RelayError>
    where
        C: RelayChannel + ?Sized,
    {
        self.read_phase(channel).map(|(state, _)| state)
    }

    /// Run one transaction applying `changes` to the relay bank.
    pub fn apply<C>(&self, channel: &mut C, changes: &ChangeSet) -> Result<Confirmation, RelayError>
    where
        C: RelayChannel + ?Sized,
    {
        let start = Instant::now();
        debug!(
            channel = %channel.describe(),
            changes = changes.len(),
            "Starting relay transaction"
        );

        let (previous, read_attempts) = self.read_phase(channel)?;
        let committed = previous.compose(changes);
        let write_attempts = self.write_phase(channel, &committed)?;
        let verify_attempts = self.verify_phase(channel, &committed)?;

        let elapsed = start.elapsed();
        info!(
            elapsed_ms = elapsed.as_millis() as u64,
            state = %committed,
            "Relay write successful"
        );

        Ok(Confirmation {
            previous,
            committed,
            read_attempts,
            write_attempts,
            verify_attempts,
            elapsed,
        })
    }

    fn read_phase<C>(&self, channel: &mut C) -> Result<(CoilVector, u32), RelayError>
    where
        C: RelayChannel + ?Sized,
    {
        let outcome = self.policy.run(
            |_| match read_vector(channel) {
                Ok(Ok(vector)) => Verdict::Done(vector),
                Ok(Err(err)) => Verdict::Retry(err),
                Err(fault) => Verdict::Abort(fault),
            },
            |attempt, err| warn!("Read attempt {} failed, retrying... ({})", attempt, err),
        )?;

        match outcome {
            Attempted::Succeeded { value, attempts } => Ok((value, attempts)),
            Attempted::Exhausted {
                attempts,
                last_error,
            } => Err(RelayError::ReadFailed {
                attempts,
                last_error: describe_last(last_error),
            }),
        }
    }

    fn write_phase<C>(&self, channel: &mut C, target: &CoilVector) -> Result<u32, RelayError>
    where
        C: RelayChannel + ?Sized,
    {
        let outcome = self.policy.run(
            |_| match catch_fault(|| channel.write_coils(0, target.as_slice())) {
                Ok(Ok(())) => Verdict::Done(()),
                Ok(Err(err)) => Verdict::Retry(err),
                Err(message) => Verdict::Abort(RelayError::Internal(message)),
            },
            |attempt, err| warn!("Write attempt {} failed, retrying... ({})", attempt, err),
        )?;

        match outcome {
            Attempted::Succeeded { attempts, .. } => Ok(attempts),
            Attempted::Exhausted {
                attempts,
                last_error,
            } => Err(RelayError::WriteFailed {
                attempts,
                last_error: describe_last(last_error),
            }),
        }
    }

    fn verify_phase<C>(&self, channel: &mut C, expected: &CoilVector) -> Result<u32, RelayError>
    where
        C: RelayChannel + ?Sized,
    {
        let outcome = self.policy.run(
            |_| match read_vector(channel) {
                Ok(Ok(observed)) if observed == *expected => Verdict::Done(()),
                Ok(Ok(observed)) => Verdict::Retry(format!(
                    "read back {} but expected {}",
                    observed, expected
                )),
                Ok(Err(err)) => Verdict::Retry(err.to_string()),
                Err(fault) => Verdict::Abort(fault),
            },
            |attempt, err| warn!("Verify attempt {} failed, retrying... ({})", attempt, err),
        )?;

        match outcome {
            Attempted::Succeeded { attempts, .. } => Ok(attempts),
            Attempted::Exhausted {
                attempts,
                last_error,
            } => Err(RelayError::VerifyFailed {
                attempts,
                last_error: last_error.unwrap_or_default(),
            }),
        }
    }
}

/// Read the full bank. The outer `Err` is a non-retryable fault.
fn read_vector<C>(channel: &mut C) -> Result<Result<CoilVector, TransportError>, RelayError>
where
    C: RelayChannel + ?Sized,
{
    match catch_fault(|| channel.read_coils(0, COIL_COUNT as u16)) {
        Ok(Ok(bits)) => CoilVector::from_slice(&bits).map(Ok).ok_or_else(|| {
            RelayError::Internal(format!(
                "relay channel returned {} coils, expected {}",
                bits.len(),
                COIL_COUNT
            ))
        }),
        Ok(Err(err)) => Ok(Err(err)),
        Err(message) => Err(RelayError::Internal(message)),
    }
}

fn describe_last(err: Option<TransportError>) -> String {
    err.map(|e| e.to_string()).unwrap_or_default()
}

/// Convenience wrapper matching the transaction contract:
/// `apply(channel, change_set, retries, inter_retry_delay)`.
pub fn apply<C>(
    channel: &mut C,
    changes: &ChangeSet,
    retries: u32,
    inter_retry_delay: Duration,
) -> Result<Confirmation, RelayError>
where
    C: RelayChannel + ?Sized,
{
    RelayStateWriter::with_retries(retries, inter_retry_delay).apply(channel, changes)
}

// =============================================================================
// Tests
// =============================================================================
