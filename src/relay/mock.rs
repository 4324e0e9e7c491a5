//! Simulated relay bank.
//!
//! Holds a 32-coil state in memory and can be scripted to fail, drop writes,
//! return short reads or panic, which is how the transaction protocol is
//! exercised without a serial link. Also backs `--simulate` runs.

use super::{CoilVector, RelayChannel, TransportError, COIL_COUNT};

/// Bus operation recorded by [`MockRelayChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// `read_coils`
    Read,
    /// `write_coils`
    Write,
}

/// In-memory relay bank with scripted faults.
#[derive(Debug, Default)]
pub struct MockRelayChannel {
    state: CoilVector,
    calls: Vec<Op>,
    failing_reads: u32,
    failing_writes: u32,
    ignore_writes: bool,
    truncate_reads: Option<usize>,
    panic_on_write: bool,
    closed: bool,
}

impl MockRelayChannel {
    /// Bank with every relay off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bank starting in `state`.
    pub fn with_state(state: CoilVector) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }

    /// Current simulated hardware state.
    pub fn state(&self) -> CoilVector {
        self.state
    }

    /// Change the hardware state behind the writer's back.
    pub fn set_state(&mut self, state: CoilVector) {
        self.state = state;
    }

    /// Every bus operation issued so far, in order.
    pub fn calls(&self) -> &[Op] {
        &self.calls
    }

    /// Number of operations of one kind.
    pub fn count(&self, op: Op) -> usize {
        self.calls.iter().filter(|c| **c == op).count()
    }

    /// Fail the next `n` reads with a timeout.
    pub fn fail_next_reads(&mut self, n: u32) {
        self.failing_reads = n;
    }

    /// Fail the next `n` writes with a protocol error.
    pub fn fail_next_writes(&mut self, n: u32) {
        self.failing_writes = n;
    }

    /// Acknowledge writes without changing state.
    pub fn ignore_writes(&mut self, ignore: bool) {
        self.ignore_writes = ignore;
    }

    /// Return only the first `n` coils on every read.
    pub fn truncate_reads_to(&mut self, n: usize) {
        self.truncate_reads = Some(n);
    }

    /// Panic inside `write_coils`.
    pub fn panic_on_write(&mut self, panic: bool) {
        self.panic_on_write = panic;
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl RelayChannel for MockRelayChannel {
    fn read_coils(&mut self, start: u16, count: u16) -> Result<Vec<bool>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.calls.push(Op::Read);

        if self.failing_reads > 0 {
            self.failing_reads -= 1;
            return Err(TransportError::Timeout);
        }

        let start = start as usize;
        let end = (start + count as usize).min(COIL_COUNT);
        let mut bits = self.state.as_slice()[start.min(end)..end].to_vec();
        if let Some(n) = self.truncate_reads {
            bits.truncate(n);
        }
        Ok(bits)
    }

    #[allow(clippy::panic)]
    fn write_coils(&mut self, start: u16, values: &[bool]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.calls.push(Op::Write);

        if self.panic_on_write {
            panic!("simulated relay driver bug");
        }
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(TransportError::Protocol("CRC mismatch".to_string()));
        }
        if self.ignore_writes {
            return Ok(());
        }

        let start = start as usize;
        if start + values.len() > COIL_COUNT {
            return Err(TransportError::Protocol(format!(
                "illegal data address {}+{}",
                start,
                values.len()
            )));
        }
        let mut bits = [false; COIL_COUNT];
        bits.copy_from_slice(self.state.as_slice());
        bits[start..start + values.len()].copy_from_slice(values);
        self.state = CoilVector::from_slice(&bits).unwrap_or(self.state);
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        Ok(())
    }

    fn describe(&self) -> String {
        "simulated relay bank".to_string()
    }
}
