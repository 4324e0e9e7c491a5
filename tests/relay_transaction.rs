//! Integration tests for relay bank transactions through the public API.

use bench_daq::relay::{
    writer::apply, ChangeSet, CoilVector, MockRelayChannel, RelayChannel, RelayError,
    RelayStateWriter, TransportError,
};
use std::time::{Duration, Instant};

fn writer(retries: u32) -> RelayStateWriter {
    RelayStateWriter::with_retries(retries, Duration::ZERO)
}

/// Bank whose writes only become visible after a number of reads, like a
/// relay board that latches coils asynchronously.
struct SlowLatchBank {
    visible: CoilVector,
    pending: Option<(CoilVector, u32)>,
    reads_to_latch: u32,
}

impl SlowLatchBank {
    fn new(reads_to_latch: u32) -> Self {
        Self {
            visible: CoilVector::all_off(),
            pending: None,
            reads_to_latch,
        }
    }
}

impl RelayChannel for SlowLatchBank {
    fn read_coils(&mut self, start: u16, count: u16) -> Result<Vec<bool>, TransportError> {
        if let Some((target, remaining)) = self.pending.take() {
            if remaining == 0 {
                self.visible = target;
            } else {
                self.pending = Some((target, remaining - 1));
            }
        }
        let start = start as usize;
        Ok(self.visible.as_slice()[start..start + count as usize].to_vec())
    }

    fn write_coils(&mut self, _start: u16, values: &[bool]) -> Result<(), TransportError> {
        let target = CoilVector::from_slice(values)
            .ok_or_else(|| TransportError::Protocol("short frame".to_string()))?;
        self.pending = Some((target, self.reads_to_latch));
        Ok(())
    }
}

/// Bank that answers one read, accepts writes, then stops answering reads.
struct DeafAfterFirstRead {
    coils: CoilVector,
    reads: u32,
}

impl RelayChannel for DeafAfterFirstRead {
    fn read_coils(&mut self, start: u16, count: u16) -> Result<Vec<bool>, TransportError> {
        self.reads += 1;
        if self.reads > 1 {
            return Err(TransportError::Timeout);
        }
        let start = start as usize;
        Ok(self.coils.as_slice()[start..start + count as usize].to_vec())
    }

    fn write_coils(&mut self, _start: u16, values: &[bool]) -> Result<(), TransportError> {
        self.coils = CoilVector::from_slice(values)
            .ok_or_else(|| TransportError::Protocol("short frame".to_string()))?;
        Ok(())
    }
}

#[test]
fn test_sequential_users_do_not_clobber_each_other() {
    let mut bank = MockRelayChannel::new();

    writer(3).apply_pairs(&mut bank, [(2, true), (3, true)]).unwrap();

    // Another tool on the same bus switches relay 20 between our transactions.
    let mut foreign = bank.state().as_slice().to_vec();
    foreign[20] = true;
    bank.set_state(CoilVector::from_slice(&foreign).unwrap());

    let confirmation = writer(3).apply_pairs(&mut bank, [(3, false)]).unwrap();

    assert_eq!(confirmation.previous.energised(), vec![2, 3, 20]);
    assert_eq!(bank.state().energised(), vec![2, 20]);
}

#[test]
fn test_verify_waits_for_slow_latch() {
    let mut bank = SlowLatchBank::new(2);

    let confirmation = writer(5).apply_pairs(&mut bank, [(7, true)]).unwrap();

    assert_eq!(confirmation.committed.energised(), vec![7]);
    assert_eq!(confirmation.verify_attempts, 3);
}

#[test]
fn test_verify_budget_exhausted_by_slow_latch() {
    let mut bank = SlowLatchBank::new(10);

    let err = writer(3).apply_pairs(&mut bank, [(7, true)]).unwrap_err();

    match err {
        RelayError::VerifyFailed {
            attempts,
            last_error,
        } => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("expected"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_empty_change_set_rewrites_observed_state() {
    let mut bits = [false; 32];
    bits[0] = true;
    let mut bank = MockRelayChannel::with_state(CoilVector::from_slice(&bits).unwrap());

    let confirmation = apply(&mut bank, &ChangeSet::new(), 2, Duration::ZERO).unwrap();

    assert_eq!(confirmation.previous, confirmation.committed);
    assert_eq!(bank.state().energised(), vec![0]);
}

#[test]
fn test_inter_retry_delay_only_between_attempts() {
    let mut bank = MockRelayChannel::new();
    bank.fail_next_reads(1);

    let start = Instant::now();
    RelayStateWriter::with_retries(2, Duration::from_millis(30))
        .apply_pairs(&mut bank, [(1, true)])
        .unwrap();
    let elapsed = start.elapsed();

    // One failed read means exactly one wait.
    assert!(elapsed >= Duration::from_millis(30));
    assert!(elapsed < Duration::from_millis(500));
}

#[test]
fn test_boxed_channel_is_a_channel() {
    let mut bank: Box<dyn RelayChannel> = Box::new(MockRelayChannel::new());

    writer(1).apply(&mut bank, &ChangeSet::all_off()).unwrap();
    bank.close().unwrap();

    let err = writer(2).read_state(&mut bank).unwrap_err();
    assert!(matches!(err, RelayError::ReadFailed { attempts: 2, .. }));
}

#[test]
fn test_verify_budget_exhausted_by_read_timeouts() {
    let mut bank = DeafAfterFirstRead {
        coils: CoilVector::all_off(),
        reads: 0,
    };

    let err = writer(3).apply_pairs(&mut bank, [(5, true)]).unwrap_err();

    match err {
        RelayError::VerifyFailed { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("unexpected error: {other}"),
    }
    // One read-phase read plus three verify reads.
    assert_eq!(bank.reads, 4);
}
