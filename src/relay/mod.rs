//! Relay Bank Control
//!
//! The relay bank is a shared array of 32 Modbus coils. Other parts of the
//! bench (and other operators) may own unrelated relays on the same bank, so
//! every update goes through a read-modify-write-verify transaction
//! ([`RelayStateWriter`]) instead of a blind write.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ RelayStateWriter::apply(channel, change_set, policy)     │
//! │   validate → read → compose → write → verify             │
//! ├──────────────────────────────────────────────────────────┤
//! │ RelayChannel trait  (read_coils / write_coils)           │
//! │   ModbusRelayChannel  |  MockRelayChannel                │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The channel is always passed explicitly; there is no process-wide relay
//! handle and no cached coil state between transactions.

pub mod mock;
#[cfg(feature = "instrument_serial")]
pub mod modbus;
pub mod writer;

pub use mock::MockRelayChannel;
#[cfg(feature = "instrument_serial")]
pub use modbus::{ModbusRelayChannel, ModbusSettings};
pub use writer::{Confirmation, RelayStateWriter};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Number of coils on the relay bank.
pub const COIL_COUNT: usize = 32;

// =============================================================================
// Errors
// =============================================================================

/// A bus or link failure. Always retryable up to the transaction's policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No response within the link timeout
    #[error("timed out waiting for relay response")]
    Timeout,

    /// Serial port or socket I/O failure
    #[error("link I/O error: {0}")]
    Io(String),

    /// Corrupt frame, CRC mismatch or Modbus exception response
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Channel has been closed
    #[error("relay channel is closed")]
    Closed,
}

/// Terminal outcome of a failed relay transaction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// The change set referenced an address outside `[0, 32)`
    #[error("invalid relay address {0} (valid range 0..{COIL_COUNT})")]
    InvalidAddress(i64),

    /// Reading the current coil state failed on every attempt
    #[error("failed to read relay state after {attempts} attempt(s): {last_error}")]
    ReadFailed {
        /// Attempts made in the read phase
        attempts: u32,
        /// Last transport error observed (empty when no attempt was made)
        last_error: String,
    },

    /// Writing the composed coil state failed on every attempt
    #[error("failed to write relay state after {attempts} attempt(s): {last_error}")]
    WriteFailed {
        /// Attempts made in the write phase
        attempts: u32,
        /// Last transport error observed
        last_error: String,
    },

    /// Read-back never matched the composed state
    #[error("failed to verify relay state after {attempts} attempt(s): {last_error}")]
    VerifyFailed {
        /// Attempts made in the verify phase
        attempts: u32,
        /// Last mismatch or transport error observed
        last_error: String,
    },

    /// Non-transport fault; never retried
    #[error("internal relay fault: {0}")]
    Internal(String),
}

// =============================================================================
// RelayChannel
// =============================================================================

/// Bit-addressable coil array reachable only through atomic read/write
/// primitives. Implementations may fail transiently.
pub trait RelayChannel {
    /// Read `count` coils starting at `start`.
    fn read_coils(&mut self, start: u16, count: u16) -> Result<Vec<bool>, TransportError>;

    /// Write `values` to consecutive coils starting at `start`.
    fn write_coils(&mut self, start: u16, values: &[bool]) -> Result<(), TransportError>;

    /// Release the underlying link. Further calls return `TransportError::Closed`.
    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Short description for logs.
    fn describe(&self) -> String {
        "relay channel".to_string()
    }
}

impl<C: RelayChannel + ?Sized> RelayChannel for Box<C> {
    fn read_coils(&mut self, start: u16, count: u16) -> Result<Vec<bool>, TransportError> {
        (**self).read_coils(start, count)
    }

    fn write_coils(&mut self, start: u16, values: &[bool]) -> Result<(), TransportError> {
        (**self).write_coils(start, values)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        (**self).close()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

// =============================================================================
// CoilVector
// =============================================================================

/// Full state of the relay bank, index = relay address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CoilVector([bool; COIL_COUNT]);

impl CoilVector {
    /// All relays off.
    pub fn all_off() -> Self {
        Self([false; COIL_COUNT])
    }

    /// Build from a bus read. Returns `None` unless exactly 32 coils are given.
    pub fn from_slice(bits: &[bool]) -> Option<Self> {
        let array: [bool; COIL_COUNT] = bits.try_into().ok()?;
        Some(Self(array))
    }

    /// Coil state at `address`.
    pub fn get(&self, address: usize) -> Option<bool> {
        self.0.get(address).copied()
    }

    /// Borrow as a slice for writing to the bus.
    pub fn as_slice(&self) -> &[bool] {
        &self.0
    }

    /// Copy of `self` with every change in `changes` applied.
    pub fn compose(&self, changes: &ChangeSet) -> Self {
        let mut next = *self;
        for (&address, &value) in changes.iter() {
            next.0[address] = value;
        }
        next
    }

    /// Addresses of energised coils.
    pub fn energised(&self) -> Vec<usize> {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(addr, on)| on.then_some(addr))
            .collect()
    }
}

impl fmt::Display for CoilVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, on) in self.0.iter().enumerate() {
            if i > 0 && i % 8 == 0 {
                f.write_str(" ")?;
            }
            f.write_str(if *on { "1" } else { "0" })?;
        }
        Ok(())
    }
}

// =============================================================================
// ChangeSet
// =============================================================================

/// Validated mapping from relay address to target state.
///
/// Construction rejects any address outside `[0, 32)`, so a `ChangeSet` can
/// always be composed onto a [`CoilVector`] without bounds checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet(BTreeMap<usize, bool>);

impl ChangeSet {
    /// Empty change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate raw `(address, value)` pairs. Later duplicates win.
    pub fn from_pairs<I>(pairs: I) -> Result<Self, RelayError>
    where
        I: IntoIterator<Item = (i64, bool)>,
    {
        let mut map = BTreeMap::new();
        for (address, value) in pairs {
            map.insert(check_address(address)?, value);
        }
        Ok(Self(map))
    }

    /// Change set switching every coil off.
    pub fn all_off() -> Self {
        Self((0..COIL_COUNT).map(|a| (a, false)).collect())
    }

    /// Add one change, validating the address.
    pub fn set(&mut self, address: i64, value: bool) -> Result<&mut Self, RelayError> {
        self.0.insert(check_address(address)?, value);
        Ok(self)
    }

    /// Iterate `(address, value)` in address order.
    pub fn iter(&self) -> impl Iterator<Item = (&usize, &bool)> {
        self.0.iter()
    }

    /// Number of addressed relays.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no relay is addressed.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn check_address(address: i64) -> Result<usize, RelayError> {
    if (0..COIL_COUNT as i64).contains(&address) {
        Ok(address as usize)
    } else {
        Err(RelayError::InvalidAddress(address))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_set_rejects_out_of_range() {
        assert_eq!(
            ChangeSet::from_pairs([(3, true), (32, false)]),
            Err(RelayError::InvalidAddress(32))
        );
        assert_eq!(
            ChangeSet::from_pairs([(-1, true)]),
            Err(RelayError::InvalidAddress(-1))
        );
    }

    #[test]
    fn test_change_set_boundaries() {
        let changes = ChangeSet::from_pairs([(0, true), (31, true)]).unwrap();
        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn test_compose_preserves_untouched_addresses() {
        let mut bits = [false; COIL_COUNT];
        bits[5] = true;
        bits[20] = true;
        let current = CoilVector::from_slice(&bits).unwrap();

        let changes = ChangeSet::from_pairs([(5, false), (7, true)]).unwrap();
        let next = current.compose(&changes);

        assert_eq!(next.get(5), Some(false));
        assert_eq!(next.get(7), Some(true));
        assert_eq!(next.get(20), Some(true));
        assert_eq!(next.energised(), vec![7, 20]);
    }

    #[test]
    fn test_coil_vector_requires_exact_length() {
        assert!(CoilVector::from_slice(&[true; 31]).is_none());
        assert!(CoilVector::from_slice(&[true; 33]).is_none());
        assert!(CoilVector::from_slice(&[true; 32]).is_some());
    }

    #[test]
    fn test_display_groups_bytes() {
        let mut bits = [false; COIL_COUNT];
        bits[0] = true;
        bits[8] = true;
        let v = CoilVector::from_slice(&bits).unwrap();
        assert_eq!(
            v.to_string(),
            "10000000 10000000 00000000 00000000"
        );
    }
}
